//! Sensor data for the SLAM pipeline

use crate::common::types::Stamp;

/// One laser sweep, as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeScan {
    /// Frame the ranges are measured in
    pub frame_id: String,
    /// Capture time
    pub stamp: Stamp,
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    pub range_min: f64,
    pub range_max: f64,
    pub ranges: Vec<f64>,
}

impl RangeScan {
    /// Number of beams in the sweep
    pub fn beam_count(&self) -> usize {
        self.ranges.len()
    }

    /// Angle between the first and last beam bounds, centered on the sweep.
    pub fn angle_center(&self) -> f64 {
        (self.angle_min + self.angle_max) / 2.0
    }
}
