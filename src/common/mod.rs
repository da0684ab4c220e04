//! Common utilities and types for the Prometheus SLAM stack

/// Common types and utilities used across the codebase
pub mod types {
    use nalgebra::{Isometry3, Translation3, UnitQuaternion};
    use std::f64::consts::PI;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// A 2D point
    pub type Point2D = (f64, f64);

    /// Timestamp in nanoseconds since the epoch. Zero means "latest available".
    pub type Stamp = i64;

    /// Nanoseconds per second.
    pub const NANOS_PER_SEC: i64 = 1_000_000_000;

    /// A planar pose (x, y, theta)
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Pose2D {
        pub x: f64,
        pub y: f64,
        pub theta: f64,
    }

    impl Pose2D {
        pub fn new(x: f64, y: f64, theta: f64) -> Self {
            Pose2D { x, y, theta }
        }

        /// Lift the pose into a rigid 3D transform with yaw-only rotation.
        pub fn to_isometry(&self) -> Isometry3<f64> {
            Isometry3::from_parts(
                Translation3::new(self.x, self.y, 0.0),
                UnitQuaternion::from_euler_angles(0.0, 0.0, self.theta),
            )
        }

        /// Project a rigid transform onto the plane, keeping only yaw.
        pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
            Pose2D {
                x: iso.translation.x,
                y: iso.translation.y,
                theta: yaw_of(&iso.rotation),
            }
        }

        /// Compose `self ⊕ delta`, with `delta` expressed in the frame of `self`.
        pub fn compose(&self, delta: &Pose2D) -> Pose2D {
            let (s, c) = self.theta.sin_cos();
            Pose2D {
                x: self.x + c * delta.x - s * delta.y,
                y: self.y + s * delta.x + c * delta.y,
                theta: normalize_angle(self.theta + delta.theta),
            }
        }

        /// Relative motion from `from` to `self`, expressed in the frame of `from`.
        pub fn relative_to(&self, from: &Pose2D) -> Pose2D {
            let (s, c) = from.theta.sin_cos();
            let dx = self.x - from.x;
            let dy = self.y - from.y;
            Pose2D {
                x: c * dx + s * dy,
                y: -s * dx + c * dy,
                theta: normalize_angle(self.theta - from.theta),
            }
        }
    }

    /// Extract yaw from a rotation, ignoring roll and pitch.
    pub fn yaw_of(rotation: &UnitQuaternion<f64>) -> f64 {
        let (_roll, _pitch, yaw) = rotation.euler_angles();
        yaw
    }

    /// Normalize angle to [-pi, pi]
    pub fn normalize_angle(angle: f64) -> f64 {
        let mut a = angle % (2.0 * PI);
        if a > PI {
            a -= 2.0 * PI;
        } else if a < -PI {
            a += 2.0 * PI;
        }
        a
    }

    pub fn stamp_from_secs(secs: f64) -> Stamp {
        (secs * NANOS_PER_SEC as f64).round() as Stamp
    }

    pub fn stamp_to_secs(stamp: Stamp) -> f64 {
        stamp as f64 / NANOS_PER_SEC as f64
    }

    /// Build a stamp from the (sec, nanosec) pair carried by ROS headers.
    pub fn stamp_from_parts(sec: i32, nanosec: u32) -> Stamp {
        sec as i64 * NANOS_PER_SEC + nanosec as i64
    }

    /// Split a stamp into the (sec, nanosec) pair carried by ROS headers.
    pub fn stamp_to_parts(stamp: Stamp) -> (i32, u32) {
        (
            stamp.div_euclid(NANOS_PER_SEC) as i32,
            stamp.rem_euclid(NANOS_PER_SEC) as u32,
        )
    }

    /// Source of "now" for broadcast stamps.
    pub trait Clock: Send + Sync {
        fn now(&self) -> Stamp;
    }

    /// Wall clock.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> Stamp {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as Stamp)
                .unwrap_or(0)
        }
    }

}
