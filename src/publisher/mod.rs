//! Correction transform publisher
//!
//! The scan path writes the map -> odom correction after every processed
//! scan; a timer task broadcasts the latest value at a fixed period,
//! independent of scan arrival.

use crate::common::types::{Clock, Pose2D, Stamp};
use crate::transform::{StampedTransform, TransformSink};
use nalgebra::Isometry3;
use parking_lot::Mutex;
use rclrs::{log_debug, log_warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const LOGGER_NAME: &str = "slam_gmapping.publisher";

/// map -> odom correction from the mapper's pose and the odometry pose of
/// the same laser frame.
pub fn compute_correction(mapper_pose: &Pose2D, odom_pose: &Pose2D) -> Isometry3<f64> {
    let laser_to_map = mapper_pose.to_isometry().inverse();
    let odom_to_laser = odom_pose.to_isometry();
    (odom_to_laser * laser_to_map).inverse()
}

/// The shared correction. Last write wins.
#[derive(Debug)]
pub struct CorrectionTransform {
    map_to_odom: Mutex<Isometry3<f64>>,
}

impl Default for CorrectionTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrectionTransform {
    pub fn new() -> Self {
        CorrectionTransform {
            map_to_odom: Mutex::new(Isometry3::identity()),
        }
    }

    /// Recompute and store the correction.
    pub fn update(&self, mapper_pose: &Pose2D, odom_pose: &Pose2D) -> Isometry3<f64> {
        let correction = compute_correction(mapper_pose, odom_pose);
        *self.map_to_odom.lock() = correction;
        correction
    }

    pub fn current(&self) -> Isometry3<f64> {
        *self.map_to_odom.lock()
    }

    pub fn reset(&self) {
        *self.map_to_odom.lock() = Isometry3::identity();
    }
}

/// Broadcasts the correction as `map_frame -> odom_frame`.
pub struct CorrectionPublisher {
    correction: Arc<CorrectionTransform>,
    sink: Arc<dyn TransformSink>,
    clock: Arc<dyn Clock>,
    map_frame: String,
    odom_frame: String,
    tf_delay: Stamp,
}

impl CorrectionPublisher {
    pub fn new(
        correction: Arc<CorrectionTransform>,
        sink: Arc<dyn TransformSink>,
        clock: Arc<dyn Clock>,
        map_frame: &str,
        odom_frame: &str,
        tf_delay: Stamp,
    ) -> Self {
        CorrectionPublisher {
            correction,
            sink,
            clock,
            map_frame: map_frame.to_string(),
            odom_frame: odom_frame.to_string(),
            tf_delay,
        }
    }

    /// Send the current correction, stamped `tf_delay` into the future.
    pub fn publish_once(&self) -> StampedTransform {
        let transform = StampedTransform {
            parent_frame: self.map_frame.clone(),
            child_frame: self.odom_frame.clone(),
            stamp: self.clock.now() + self.tf_delay,
            transform: self.correction.current(),
        };
        self.sink.send_transform(&transform);
        transform
    }

    /// Start the periodic broadcast on `runtime`. A zero period disables it.
    pub fn spawn(self: Arc<Self>, period: Duration, runtime: &Handle) -> Option<PublishLoop> {
        if period.is_zero() {
            log_warn!(
                LOGGER_NAME,
                "transform_publish_period is 0, not broadcasting {} -> {}",
                self.map_frame,
                self.odom_frame
            );
            return None;
        }

        log_debug!(LOGGER_NAME, "Broadcasting correction every {:?}", period);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                self.publish_once();
            }
        });

        Some(PublishLoop { task })
    }
}

/// Handle to the running broadcast; stops it when dropped.
pub struct PublishLoop {
    task: JoinHandle<()>,
}

impl PublishLoop {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PublishLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<StampedTransform>>,
    }

    impl TransformSink for RecordingSink {
        fn send_transform(&self, transform: &StampedTransform) {
            self.sent.lock().push(transform.clone());
        }
    }

    struct FixedClock(Stamp);

    impl Clock for FixedClock {
        fn now(&self) -> Stamp {
            self.0
        }
    }

    #[test]
    fn test_correction_maps_odometry_onto_mapper_pose() {
        let mapper = Pose2D::new(2.0, 1.0, FRAC_PI_2);
        let odom = Pose2D::new(1.0, -0.5, 0.3);

        let correction = compute_correction(&mapper, &odom);
        let corrected = Pose2D::from_isometry(&(correction * odom.to_isometry()));

        assert!((corrected.x - mapper.x).abs() < 1e-9);
        assert!((corrected.y - mapper.y).abs() < 1e-9);
        assert!((corrected.theta - mapper.theta).abs() < 1e-9);
    }

    #[test]
    fn test_pure_translation_drift() {
        let correction = compute_correction(&Pose2D::new(1.0, 0.0, 0.0), &Pose2D::default());
        assert!((correction.translation.x - 1.0).abs() < 1e-12);
        assert!(correction.translation.y.abs() < 1e-12);
    }

    #[test]
    fn test_update_and_reset() {
        let shared = CorrectionTransform::new();
        assert_eq!(shared.current(), Isometry3::identity());

        let written = shared.update(&Pose2D::new(0.5, 0.0, 0.0), &Pose2D::default());
        assert_eq!(shared.current(), written);

        shared.reset();
        assert_eq!(shared.current(), Isometry3::identity());
    }

    #[test]
    fn test_publish_once_applies_tf_delay() {
        let correction = Arc::new(CorrectionTransform::new());
        correction.update(&Pose2D::new(1.0, 0.0, 0.0), &Pose2D::default());
        let sink = Arc::new(RecordingSink::default());
        let publisher = CorrectionPublisher::new(
            correction,
            sink.clone(),
            Arc::new(FixedClock(1_000)),
            "map",
            "odom",
            50,
        );

        let sent = publisher.publish_once();

        assert_eq!(sent.stamp, 1_050);
        assert_eq!(sent.parent_frame, "map");
        assert_eq!(sent.child_frame, "odom");
        assert_eq!(sink.sent.lock().len(), 1);
        assert!((sink.sent.lock()[0].transform.translation.x - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_loop_broadcasts_periodically() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(CorrectionPublisher::new(
            Arc::new(CorrectionTransform::new()),
            sink.clone(),
            Arc::new(FixedClock(0)),
            "map",
            "odom",
            0,
        ));

        let handle = publisher
            .spawn(Duration::from_millis(10), &Handle::current())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(handle.is_running());
        handle.stop();

        let count = sink.sent.lock().len();
        assert!(count >= 2, "only {} broadcasts", count);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sink.sent.lock().len(), count);
    }

    #[tokio::test]
    async fn test_zero_period_disables_loop() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(CorrectionPublisher::new(
            Arc::new(CorrectionTransform::new()),
            sink.clone(),
            Arc::new(FixedClock(0)),
            "map",
            "odom",
            0,
        ));

        assert!(publisher.spawn(Duration::ZERO, &Handle::current()).is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.sent.lock().is_empty());
    }
}
