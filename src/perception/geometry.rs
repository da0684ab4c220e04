//! Sensor mounting geometry
//!
//! Resolved once from the first usable scan: the base -> laser transform
//! tells whether the laser is mounted upright or upside down, whether the
//! beam order has to be flipped so the mapper sees increasing angles, and
//! where the centered, top-down laser frame sits.

use super::sensors::RangeScan;
use crate::error::SlamError;
use crate::transform::TransformSource;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rclrs::{log_debug, log_info, log_warn};
use std::f64::consts::PI;
use std::time::Duration;

const LOGGER_NAME: &str = "slam_gmapping.geometry";

/// Allowed deviation of the sensor's up axis from +-1.
pub const PLANAR_TOLERANCE: f64 = 0.001;

/// Margin subtracted from the reported maximum range.
pub const MAX_RANGE_MARGIN: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOrientation {
    Upright,
    UpsideDown,
}

/// Mounting geometry of the laser, fixed for the session.
#[derive(Debug, Clone)]
pub struct SensorGeometry {
    pub laser_frame: String,
    pub orientation: MountOrientation,
    /// Flip beam order before handing ranges to the mapper
    pub do_reverse_range: bool,
    /// Beam angles in the centered frame, symmetric and increasing
    pub beam_angles: Vec<f64>,
    /// Absolute angular step between beams
    pub angle_increment: f64,
    /// Laser-from-centered-laser transform
    pub centered_laser_pose: Isometry3<f64>,
    /// Maximum range reported by the sensor
    pub sensor_range_max: f64,
}

impl SensorGeometry {
    pub fn beam_count(&self) -> usize {
        self.beam_angles.len()
    }

    /// Default maximum range for the mapper: reported max minus a margin.
    pub fn default_max_range(&self) -> f64 {
        self.sensor_range_max - MAX_RANGE_MARGIN
    }
}

/// Classify the z component of the base up axis seen from the sensor.
pub fn check_planar_mount(up_z: f64) -> Result<MountOrientation, SlamError> {
    if (up_z.abs() - 1.0).abs() > PLANAR_TOLERANCE {
        return Err(SlamError::NonPlanarMount { up_z });
    }
    if up_z > 0.0 {
        Ok(MountOrientation::Upright)
    } else {
        Ok(MountOrientation::UpsideDown)
    }
}

/// Whether beams arrive in decreasing angle order in the top-down frame.
pub fn needs_reverse(orientation: MountOrientation, angle_min: f64, angle_max: f64) -> bool {
    match orientation {
        MountOrientation::Upright => angle_min > angle_max,
        MountOrientation::UpsideDown => angle_min < angle_max,
    }
}

/// Beam angles from `-span/2` in steps of `|angle_increment|`.
pub fn centered_beam_angles(scan: &RangeScan) -> Vec<f64> {
    let start = -(scan.angle_min - scan.angle_max).abs() / 2.0;
    let step = scan.angle_increment.abs();
    (0..scan.beam_count())
        .map(|i| start + i as f64 * step)
        .collect()
}

/// Resolves the laser geometry against the robot base.
#[derive(Debug, Clone)]
pub struct FrameGeometryResolver {
    base_frame: String,
    wait: Duration,
}

impl FrameGeometryResolver {
    pub fn new(base_frame: &str, wait: Duration) -> Self {
        FrameGeometryResolver {
            base_frame: base_frame.to_string(),
            wait,
        }
    }

    /// Resolve the geometry for the scan's sensor frame.
    ///
    /// Fails if base -> laser cannot be looked up within the wait window,
    /// or if the laser is not mounted planar.
    pub fn resolve(
        &self,
        tf: &dyn TransformSource,
        scan: &RangeScan,
    ) -> Result<SensorGeometry, SlamError> {
        let base_from_laser = tf
            .lookup_transform(&self.base_frame, &scan.frame_id, scan.stamp, self.wait)
            .map_err(|e| {
                log_warn!(
                    LOGGER_NAME,
                    "Failed to compute laser pose, aborting initialization ({})",
                    e
                );
                SlamError::from(e)
            })?;

        // Base up axis expressed in the laser frame
        let up = base_from_laser.rotation.inverse() * Vector3::z();
        log_debug!(LOGGER_NAME, "Z-Axis in sensor frame: {:.3}", up.z);

        let orientation = check_planar_mount(up.z).map_err(|e| {
            log_warn!(LOGGER_NAME, "{}", e);
            e
        })?;

        let angle_center = scan.angle_center();
        let rotation = match orientation {
            MountOrientation::Upright => {
                log_info!(LOGGER_NAME, "Laser is mounted upwards.");
                UnitQuaternion::from_euler_angles(0.0, 0.0, angle_center)
            }
            MountOrientation::UpsideDown => {
                log_info!(LOGGER_NAME, "Laser is mounted upside down.");
                UnitQuaternion::from_euler_angles(PI, 0.0, -angle_center)
            }
        };

        let beam_angles = centered_beam_angles(scan);

        log_debug!(
            LOGGER_NAME,
            "Laser angles in laser-frame: min: {:.3} max: {:.3} inc: {:.3}",
            scan.angle_min,
            scan.angle_max,
            scan.angle_increment
        );
        if let (Some(first), Some(last)) = (beam_angles.first(), beam_angles.last()) {
            log_debug!(
                LOGGER_NAME,
                "Laser angles in top-down centered laser-frame: min: {:.3} max: {:.3} inc: {:.3}",
                first,
                last,
                scan.angle_increment.abs()
            );
        }

        Ok(SensorGeometry {
            laser_frame: scan.frame_id.clone(),
            orientation,
            do_reverse_range: needs_reverse(orientation, scan.angle_min, scan.angle_max),
            beam_angles,
            angle_increment: scan.angle_increment.abs(),
            centered_laser_pose: Isometry3::from_parts(Translation3::identity(), rotation),
            sensor_range_max: scan.range_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{StampedTransform, TfBuffer};
    use nalgebra::Point3;

    fn make_scan(angle_min: f64, angle_max: f64, increment: f64, beams: usize) -> RangeScan {
        RangeScan {
            frame_id: "laser".to_string(),
            stamp: 1_000,
            angle_min,
            angle_max,
            angle_increment: increment,
            range_min: 0.1,
            range_max: 10.0,
            ranges: vec![1.0; beams],
        }
    }

    fn mounted(rotation: UnitQuaternion<f64>) -> std::sync::Arc<TfBuffer> {
        let tf = TfBuffer::new(Duration::from_secs(10));
        tf.set_transform(
            StampedTransform {
                parent_frame: "base_link".to_string(),
                child_frame: "laser".to_string(),
                stamp: 0,
                transform: Isometry3::from_parts(Translation3::new(0.2, 0.0, 0.3), rotation),
            },
            true,
        );
        tf
    }

    #[test]
    fn test_planar_tolerance_boundary() {
        assert_eq!(check_planar_mount(1.0).unwrap(), MountOrientation::Upright);
        assert_eq!(check_planar_mount(-1.0).unwrap(), MountOrientation::UpsideDown);
        assert_eq!(check_planar_mount(-1.0005).unwrap(), MountOrientation::UpsideDown);
        assert_eq!(check_planar_mount(0.9991).unwrap(), MountOrientation::Upright);

        assert!(matches!(
            check_planar_mount(0.95),
            Err(SlamError::NonPlanarMount { .. })
        ));
        assert!(check_planar_mount(0.9989).is_err());
        assert!(check_planar_mount(-1.0011).is_err());
        assert!(check_planar_mount(0.0).is_err());
    }

    #[test]
    fn test_centered_angles_are_symmetric() {
        let scan = make_scan(-1.0, 1.0, 1.0, 3);
        let angles = centered_beam_angles(&scan);
        assert_eq!(angles.len(), 3);
        assert!((angles[0] + 1.0).abs() < 1e-12);
        assert!(angles[1].abs() < 1e-12);
        assert!((angles[2] - 1.0).abs() < 1e-12);

        // Same table regardless of sweep direction or offset
        let scan = make_scan(2.0, 0.0, -1.0, 3);
        let reversed = centered_beam_angles(&scan);
        assert_eq!(angles, reversed);
    }

    #[test]
    fn test_reverse_rule() {
        assert!(!needs_reverse(MountOrientation::Upright, -1.0, 1.0));
        assert!(needs_reverse(MountOrientation::Upright, 1.0, -1.0));
        assert!(needs_reverse(MountOrientation::UpsideDown, -1.0, 1.0));
        assert!(!needs_reverse(MountOrientation::UpsideDown, 1.0, -1.0));
    }

    #[test]
    fn test_resolve_upright_laser() {
        let tf = mounted(UnitQuaternion::from_euler_angles(0.0, 0.0, 0.4));
        let resolver = FrameGeometryResolver::new("base_link", Duration::ZERO);
        let scan = make_scan(-1.0, 2.0, 0.5, 7);

        let geometry = resolver.resolve(tf.as_ref(), &scan).unwrap();

        assert_eq!(geometry.orientation, MountOrientation::Upright);
        assert!(!geometry.do_reverse_range);
        assert_eq!(geometry.beam_count(), 7);
        assert!((geometry.default_max_range() - 9.99).abs() < 1e-12);

        // Centered frame points along the middle of the sweep
        let forward = geometry.centered_laser_pose * Point3::new(1.0, 0.0, 0.0);
        assert!((forward.x - 0.5f64.cos()).abs() < 1e-12);
        assert!((forward.y - 0.5f64.sin()).abs() < 1e-12);
    }

    #[test]
    fn test_resolve_upside_down_laser() {
        let tf = mounted(UnitQuaternion::from_euler_angles(PI, 0.0, 0.0));
        let resolver = FrameGeometryResolver::new("base_link", Duration::ZERO);
        let scan = make_scan(-1.0, 1.0, 0.5, 5);

        let geometry = resolver.resolve(tf.as_ref(), &scan).unwrap();

        assert_eq!(geometry.orientation, MountOrientation::UpsideDown);
        assert!(geometry.do_reverse_range);
    }

    #[test]
    fn test_resolve_rejects_tilted_laser() {
        // Tilted so that up.z = 0.95
        let tf = mounted(UnitQuaternion::from_euler_angles(0.95f64.acos(), 0.0, 0.0));
        let resolver = FrameGeometryResolver::new("base_link", Duration::ZERO);
        let scan = make_scan(-1.0, 1.0, 0.5, 5);

        match resolver.resolve(tf.as_ref(), &scan) {
            Err(SlamError::NonPlanarMount { up_z }) => assert!((up_z - 0.95).abs() < 1e-9),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_fails_without_transform() {
        let tf = TfBuffer::new(Duration::from_secs(10));
        let resolver = FrameGeometryResolver::new("base_link", Duration::ZERO);
        let scan = make_scan(-1.0, 1.0, 0.5, 5);

        assert!(matches!(
            resolver.resolve(tf.as_ref(), &scan),
            Err(SlamError::Transform(_))
        ));
    }
}
