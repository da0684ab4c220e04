//! Scan ingestion gate
//!
//! Decides which incoming scans reach the mapper. Every scan is counted,
//! only every `throttle`-th one goes on, and of those only scans whose
//! sensor frame can be transformed into odometry are admitted.

use super::filters::{Filter, MissingRangeFilter};
use super::geometry::SensorGeometry;
use super::sensors::RangeScan;
use crate::error::SlamError;
use crate::transform::{TransformError, TransformSource};
use rclrs::log_debug;
use std::time::Duration;

const LOGGER_NAME: &str = "slam_gmapping.gate";

/// Whether the sensor geometry has been fixed yet.
#[derive(Debug, Clone)]
pub enum GateState {
    AwaitingGeometry,
    Active(SensorGeometry),
}

/// What the gate decided for one scan.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Dropped by count
    Throttled,
    /// Odometry could not be related to the scan frame
    NoTransform(TransformError),
    Admitted,
}

pub struct ScanGate {
    throttle: u32,
    count: u64,
    state: GateState,
}

impl ScanGate {
    /// Create a gate admitting every `throttle`-th scan. A throttle of 0
    /// behaves like 1.
    pub fn new(throttle: u32) -> Self {
        ScanGate {
            throttle: throttle.max(1),
            count: 0,
            state: GateState::AwaitingGeometry,
        }
    }

    /// Scans seen so far, admitted or not
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn geometry(&self) -> Option<&SensorGeometry> {
        match &self.state {
            GateState::Active(geometry) => Some(geometry),
            GateState::AwaitingGeometry => None,
        }
    }

    /// Fix the sensor geometry for the rest of the session.
    pub fn activate(&mut self, geometry: SensorGeometry) {
        self.state = GateState::Active(geometry);
    }

    /// Forget the geometry and the scan count.
    pub fn reset(&mut self) {
        self.count = 0;
        self.state = GateState::AwaitingGeometry;
    }

    /// Count the scan and decide whether it is admitted.
    ///
    /// The throttle is applied before any transform lookup, so throttled
    /// scans never block on the transform system.
    pub fn admit(
        &mut self,
        tf: &dyn TransformSource,
        odom_frame: &str,
        scan: &RangeScan,
        wait: Duration,
    ) -> GateDecision {
        self.count += 1;
        if self.count % u64::from(self.throttle) != 0 {
            log_debug!(LOGGER_NAME, "Throttled scan #{}", self.count);
            return GateDecision::Throttled;
        }

        match tf.can_transform(odom_frame, &scan.frame_id, scan.stamp, wait) {
            Ok(()) => GateDecision::Admitted,
            Err(e) => GateDecision::NoTransform(e),
        }
    }
}

/// Ranges in filter order: reversed if needed, then missing readings
/// replaced with the sensor's maximum.
pub fn prepare_ranges(geometry: &SensorGeometry, scan: &RangeScan) -> Result<Vec<f64>, SlamError> {
    if scan.beam_count() != geometry.beam_count() {
        return Err(SlamError::BeamCountMismatch {
            expected: geometry.beam_count(),
            actual: scan.beam_count(),
        });
    }

    let missing = MissingRangeFilter::new(scan.range_min, scan.range_max);
    let ordered: Box<dyn Iterator<Item = &f64>> = if geometry.do_reverse_range {
        Box::new(scan.ranges.iter().rev())
    } else {
        Box::new(scan.ranges.iter())
    };

    Ok(ordered.map(|&r| missing.filter(r)).collect())
}
