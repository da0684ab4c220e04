//! Diagnostic fan-out after a failed odometry lookup.
//!
//! Probes a handful of commonly used frames to report which hops of the
//! odom -> sensor chain are missing. This never yields a pose; it only makes
//! the failure log line actionable.

use super::TransformSource;
use crate::common::types::Stamp;
use rclrs::log_warn;
use std::time::Duration;

const LOGGER_NAME: &str = "slam_gmapping.tf_diagnostics";

/// Frames commonly found between odometry and a laser.
pub const COMMON_FRAMES: [&str; 4] = ["base_link", "base_footprint", "base_laser_link", "laser"];

/// Availability of one checked hop.
#[derive(Debug, Clone, PartialEq)]
pub struct HopStatus {
    pub target_frame: String,
    pub source_frame: String,
    /// `None` if available, otherwise the failure text
    pub error: Option<String>,
}

/// Logging-only helper probing intermediate transforms.
#[derive(Debug, Clone)]
pub struct TransformDiagnostics {
    frames: Vec<String>,
}

impl Default for TransformDiagnostics {
    fn default() -> Self {
        Self::new(COMMON_FRAMES.iter().map(|f| f.to_string()).collect())
    }
}

impl TransformDiagnostics {
    pub fn new(frames: Vec<String>) -> Self {
        Self { frames }
    }

    /// Probe odom -> frame and frame -> sensor for every known frame and
    /// log each hop that is missing. Probes never wait.
    pub fn report(
        &self,
        tf: &dyn TransformSource,
        odom_frame: &str,
        sensor_frame: &str,
        stamp: Stamp,
    ) -> Vec<HopStatus> {
        let mut hops = Vec::new();

        for frame in self.frames.iter().filter(|f| f.as_str() != sensor_frame) {
            for (target, source) in [(odom_frame, frame.as_str()), (frame.as_str(), sensor_frame)] {
                let error = tf
                    .can_transform(target, source, stamp, Duration::ZERO)
                    .err()
                    .map(|e| e.to_string());

                if let Some(reason) = &error {
                    log_warn!(
                        LOGGER_NAME,
                        "  {} -> {} unavailable: {}",
                        source,
                        target,
                        reason
                    );
                }

                hops.push(HopStatus {
                    target_frame: target.to_string(),
                    source_frame: source.to_string(),
                    error,
                });
            }
        }

        hops
    }
}
