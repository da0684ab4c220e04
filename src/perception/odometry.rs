//! Odometry pose tracking

use crate::common::types::{yaw_of, Pose2D, Stamp};
use crate::error::SlamError;
use crate::transform::{TransformDiagnostics, TransformSource};
use nalgebra::Isometry3;
use rclrs::log_warn;
use std::time::Duration;

const LOGGER_NAME: &str = "slam_gmapping.odometry";

/// Looks up where the centered laser sits in the odometry frame.
#[derive(Debug, Clone)]
pub struct OdometryPoseTracker {
    odom_frame: String,
    wait: Duration,
    diagnostics: Option<TransformDiagnostics>,
}

impl OdometryPoseTracker {
    /// Create a tracker with the default diagnostic fan-out on failure
    pub fn new(odom_frame: &str, wait: Duration) -> Self {
        OdometryPoseTracker {
            odom_frame: odom_frame.to_string(),
            wait,
            diagnostics: Some(TransformDiagnostics::default()),
        }
    }

    /// Disable the diagnostic fan-out
    pub fn without_diagnostics(mut self) -> Self {
        self.diagnostics = None;
        self
    }

    pub fn odom_frame(&self) -> &str {
        &self.odom_frame
    }

    /// Pose of the centered laser frame in the odometry frame at `stamp`.
    ///
    /// `centered_laser_pose` maps the centered frame into `laser_frame`.
    pub fn pose_at(
        &self,
        tf: &dyn TransformSource,
        laser_frame: &str,
        centered_laser_pose: &Isometry3<f64>,
        stamp: Stamp,
    ) -> Result<Pose2D, SlamError> {
        let odom_from_laser = match tf.lookup_transform(&self.odom_frame, laser_frame, stamp, self.wait)
        {
            Ok(transform) => transform,
            Err(e) => {
                log_warn!(
                    LOGGER_NAME,
                    "Failed to compute odom pose, skipping scan ({})",
                    e
                );
                if let Some(diagnostics) = &self.diagnostics {
                    diagnostics.report(tf, &self.odom_frame, laser_frame, stamp);
                }
                return Err(e.into());
            }
        };

        let odom_from_centered = odom_from_laser * centered_laser_pose;
        let translation = odom_from_centered.translation.vector;

        Ok(Pose2D::new(
            translation.x,
            translation.y,
            yaw_of(&odom_from_centered.rotation),
        ))
    }
}
