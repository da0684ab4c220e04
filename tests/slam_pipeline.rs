use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use parking_lot::Mutex;
use prometheus_slam::common::types::{stamp_from_secs, Clock, Pose2D, Stamp};
use prometheus_slam::lifecycle::{LifecycleNode, State};
use prometheus_slam::mapping::{
    FilterConfig, MapMetaData, OccupancyGrid, Particle, ParticleFilter, RangeReading,
    TrajectoryArena,
};
use prometheus_slam::perception::RangeScan;
use prometheus_slam::transform::{
    StampedTransform, TfBuffer, TransformError, TransformSink, TransformSource,
};
use prometheus_slam::{MapOutput, ScanOutcome, SlamError, SlamGmapping, SlamParams};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

const NOW: Stamp = 42;

#[derive(Default)]
struct FilterLog {
    configs: Vec<FilterConfig>,
    readings: Vec<RangeReading>,
}

/// Filter that follows odometry, offset by a fixed correction.
struct ScriptedFilter {
    log: Arc<Mutex<FilterLog>>,
    weights: Vec<f64>,
    correction: Pose2D,
    accept: bool,
    particles: Vec<Particle>,
    trajectory: TrajectoryArena,
}

impl ScriptedFilter {
    fn new(log: Arc<Mutex<FilterLog>>) -> Self {
        ScriptedFilter {
            log,
            weights: vec![1.0],
            correction: Pose2D::default(),
            accept: true,
            particles: Vec::new(),
            trajectory: TrajectoryArena::new(),
        }
    }

    fn with_weights(mut self, weights: &[f64]) -> Self {
        self.weights = weights.to_vec();
        self
    }

    fn with_correction(mut self, correction: Pose2D) -> Self {
        self.correction = correction;
        self
    }

    fn rejecting(mut self) -> Self {
        self.accept = false;
        self
    }
}

impl ParticleFilter for ScriptedFilter {
    fn configure(&mut self, config: &FilterConfig) -> Result<(), SlamError> {
        self.log.lock().configs.push(config.clone());
        self.trajectory.clear();
        let root = self.trajectory.push(config.initial_pose, None, None)?;
        self.particles = self
            .weights
            .iter()
            .map(|&weight| Particle {
                pose: config.initial_pose,
                weight,
                node: root,
            })
            .collect();
        Ok(())
    }

    fn process_scan(&mut self, reading: &RangeReading) -> Result<bool, SlamError> {
        self.log.lock().readings.push(reading.clone());
        if !self.accept {
            return Ok(false);
        }

        let odom = reading.odom_pose;
        let pose = Pose2D::new(
            odom.x + self.correction.x,
            odom.y + self.correction.y,
            odom.theta + self.correction.theta,
        );
        let parent = self.particles[0].node;
        let node = self
            .trajectory
            .push(pose, Some(Arc::new(reading.clone())), Some(parent))?;
        for particle in &mut self.particles {
            particle.pose = pose;
            particle.node = node;
        }
        Ok(true)
    }

    fn particles(&self) -> &[Particle] {
        &self.particles
    }

    fn best_particle_index(&self) -> usize {
        0
    }

    fn trajectory(&self) -> &TrajectoryArena {
        &self.trajectory
    }
}

#[derive(Default)]
struct RecordingOutput {
    maps: Mutex<Vec<OccupancyGrid>>,
    metadata: Mutex<Vec<MapMetaData>>,
    entropy: Mutex<Vec<f64>>,
}

impl MapOutput for RecordingOutput {
    fn publish_map(&self, grid: &OccupancyGrid) {
        self.maps.lock().push(grid.clone());
    }

    fn publish_metadata(&self, info: &MapMetaData) {
        self.metadata.lock().push(info.clone());
    }

    fn publish_entropy(&self, entropy: f64) {
        self.entropy.lock().push(entropy);
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<StampedTransform>>,
}

impl TransformSink for RecordingSink {
    fn send_transform(&self, transform: &StampedTransform) {
        self.sent.lock().push(transform.clone());
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> Stamp {
        NOW
    }
}

/// Identity laser mount, with an odometry frame that fails a fixed number of
/// lookups before reporting the robot at x = 2.
struct FlakyOdometry {
    odom_failures: Mutex<usize>,
}

impl TransformSource for FlakyOdometry {
    fn lookup_transform(
        &self,
        target_frame: &str,
        _source_frame: &str,
        _stamp: Stamp,
        _timeout: Duration,
    ) -> Result<Isometry3<f64>, TransformError> {
        if target_frame != "odom" {
            return Ok(Isometry3::identity());
        }
        let mut failures = self.odom_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(TransformError::UnknownFrame("odom".to_string()));
        }
        Ok(Isometry3::translation(2.0, 0.0, 0.0))
    }

    fn can_transform(
        &self,
        _target_frame: &str,
        _source_frame: &str,
        _stamp: Stamp,
        _timeout: Duration,
    ) -> Result<(), TransformError> {
        Ok(())
    }
}

fn static_transform(parent: &str, child: &str, transform: Isometry3<f64>) -> StampedTransform {
    StampedTransform {
        parent_frame: parent.to_string(),
        child_frame: child.to_string(),
        stamp: 0,
        transform,
    }
}

fn robot_tf(base_from_laser: Isometry3<f64>) -> Arc<TfBuffer> {
    let tf = TfBuffer::new(Duration::from_secs(10));
    tf.set_transform(static_transform("odom", "base_link", Isometry3::identity()), true);
    tf.set_transform(static_transform("base_link", "laser", base_from_laser), true);
    tf
}

fn test_params() -> SlamParams {
    let mut params = SlamParams::default();
    params.seed = Some(1);
    params.timing.transform_wait = 0.0;
    params.map.xmin = -10.0;
    params.map.ymin = -10.0;
    params.map.xmax = 10.0;
    params.map.ymax = 10.0;
    params.map.delta = 0.1;
    params
}

struct Harness {
    slam: SlamGmapping,
    log: Arc<Mutex<FilterLog>>,
    output: Arc<RecordingOutput>,
}

fn start(
    params: SlamParams,
    tf: Arc<dyn TransformSource>,
    filter: impl FnOnce(Arc<Mutex<FilterLog>>) -> ScriptedFilter,
) -> Harness {
    let log = Arc::new(Mutex::new(FilterLog::default()));
    let output = Arc::new(RecordingOutput::default());
    let slam = SlamGmapping::new(
        params,
        tf,
        Box::new(filter(Arc::clone(&log))),
        output.clone(),
        Arc::new(FixedClock),
    )
    .unwrap()
    .without_transform_diagnostics();
    slam.on_configure().unwrap();
    slam.on_activate().unwrap();
    Harness { slam, log, output }
}

fn scan_at(secs: f64, ranges: Vec<f64>) -> RangeScan {
    RangeScan {
        frame_id: "laser".to_string(),
        stamp: stamp_from_secs(secs),
        angle_min: -1.0,
        angle_max: 1.0,
        angle_increment: 1.0,
        range_min: 0.1,
        range_max: 10.0,
        ranges,
    }
}

fn three_beams(secs: f64) -> RangeScan {
    scan_at(secs, vec![0.05, 5.0, 9.99])
}

/// Cell of `grid` containing the world point.
fn cell_at(grid: &OccupancyGrid, x: f64, y: f64) -> Option<i8> {
    let origin = &grid.info.origin;
    let cx = ((x - origin.x) / grid.info.resolution).round() as u32;
    let cy = ((y - origin.y) / grid.info.resolution).round() as u32;
    grid.at(cx, cy)
}

#[test]
fn test_first_scan_initializes_and_builds_map() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), ScriptedFilter::new);

    let outcome = h.slam.handle_scan(&three_beams(1.0));
    assert!(matches!(outcome, ScanOutcome::Processed { map_updated: true }));
    assert!(h.slam.is_initialized());

    let log = h.log.lock();
    assert_eq!(log.configs.len(), 1);
    let config = &log.configs[0];
    assert_eq!(config.beam_angles, vec![-1.0, 0.0, 1.0]);
    assert!((config.max_range - 9.99).abs() < 1e-9);
    assert!((config.max_urange - 9.99).abs() < 1e-9);
    assert_eq!(config.seed, 1);

    assert_eq!(log.readings.len(), 1);
    let reading = &log.readings[0];
    assert_eq!(reading.ranges, vec![10.0, 5.0, 9.99]);
    assert_eq!(reading.odom_pose, Pose2D::new(0.0, 0.0, 0.0));
    assert_eq!(reading.stamp, stamp_from_secs(1.0));

    let maps = h.output.maps.lock();
    assert_eq!(maps.len(), 1);
    assert_eq!(h.output.metadata.lock().len(), 1);
    let grid = &maps[0];
    assert_eq!(grid.frame_id, "map");
    assert_eq!(grid.stamp, NOW);
    assert_eq!((grid.info.width, grid.info.height), (200, 200));
    assert_eq!(grid.data.len(), 200 * 200);

    // Straight ahead hit at 5 m, free space before it
    assert_eq!(cell_at(grid, 5.0, 0.0), Some(100));
    assert_eq!(cell_at(grid, 2.5, 0.0), Some(0));
    // Beam beyond the maximum range leaves its side unknown
    assert_eq!(cell_at(grid, 1.0, -1.6), Some(-1));
}

#[test]
fn test_throttle_admits_every_nth_scan() {
    let mut params = test_params();
    params.timing.throttle_scans = 3;
    let h = start(params, robot_tf(Isometry3::identity()), ScriptedFilter::new);

    let outcomes: Vec<ScanOutcome> = (1..=6)
        .map(|i| h.slam.handle_scan(&three_beams(i as f64)))
        .collect();

    assert!(matches!(outcomes[0], ScanOutcome::Throttled));
    assert!(matches!(outcomes[1], ScanOutcome::Throttled));
    assert!(matches!(outcomes[2], ScanOutcome::Processed { map_updated: true }));
    assert!(matches!(outcomes[3], ScanOutcome::Throttled));
    assert!(matches!(outcomes[4], ScanOutcome::Throttled));
    // 6 s - 3 s is within the 5 s map interval
    assert!(matches!(outcomes[5], ScanOutcome::Processed { map_updated: false }));

    assert_eq!(h.slam.scan_count(), 6);
    assert_eq!(h.log.lock().readings.len(), 2);
}

#[test]
fn test_scan_without_transform_is_dropped() {
    let tf = TfBuffer::new(Duration::from_secs(10));
    tf.set_transform(static_transform("odom", "base_link", Isometry3::identity()), true);
    let h = start(test_params(), tf, ScriptedFilter::new);

    let outcome = h.slam.handle_scan(&three_beams(1.0));

    assert!(matches!(outcome, ScanOutcome::NoTransform(_)));
    assert_eq!(h.slam.scan_count(), 1);
    assert!(!h.slam.is_initialized());
    assert!(h.log.lock().configs.is_empty());
    assert!(h.output.maps.lock().is_empty());
}

#[test]
fn test_beam_count_change_is_rejected() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), ScriptedFilter::new);

    h.slam.handle_scan(&three_beams(1.0));
    let outcome = h.slam.handle_scan(&scan_at(2.0, vec![1.0, 2.0, 3.0, 4.0]));

    assert!(matches!(
        outcome,
        ScanOutcome::Rejected(SlamError::BeamCountMismatch {
            expected: 3,
            actual: 4
        })
    ));
    assert_eq!(h.log.lock().readings.len(), 1);
}

#[test]
fn test_tilted_laser_retries_until_planar() {
    let tilted = Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_euler_angles(0.5, 0.0, 0.0),
    );
    let tf = robot_tf(tilted);
    let h = start(test_params(), tf.clone(), ScriptedFilter::new);

    let outcome = h.slam.handle_scan(&three_beams(1.0));
    assert!(matches!(
        outcome,
        ScanOutcome::GeometryUnavailable(SlamError::NonPlanarMount { .. })
    ));
    assert!(!h.slam.is_initialized());
    assert!(h.log.lock().configs.is_empty());

    tf.set_transform(static_transform("base_link", "laser", Isometry3::identity()), true);
    let outcome = h.slam.handle_scan(&three_beams(2.0));

    assert!(matches!(outcome, ScanOutcome::Processed { .. }));
    assert_eq!(h.log.lock().configs.len(), 1);
}

#[test]
fn test_upside_down_laser_reverses_ranges() {
    let flipped = Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_euler_angles(PI, 0.0, 0.0),
    );
    let h = start(test_params(), robot_tf(flipped), ScriptedFilter::new);

    h.slam.handle_scan(&three_beams(1.0));

    let log = h.log.lock();
    assert_eq!(log.configs[0].beam_angles, vec![-1.0, 0.0, 1.0]);
    let reading = &log.readings[0];
    assert_eq!(reading.ranges, vec![9.99, 5.0, 10.0]);
    assert!(reading.odom_pose.x.abs() < 1e-9);
    assert!(reading.odom_pose.y.abs() < 1e-9);
    assert!(reading.odom_pose.theta.abs() < 1e-9);
}

#[test]
fn test_map_request_declined_until_map_exists() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), |log| {
        ScriptedFilter::new(log).rejecting()
    });

    assert!(h.slam.map_request().is_none());
    assert!(matches!(
        h.slam.handle_scan(&three_beams(1.0)),
        ScanOutcome::NotProcessed
    ));
    assert!(h.slam.map_request().is_none());
    assert_eq!(h.slam.correction().current(), Isometry3::identity());
}

#[test]
fn test_map_request_returns_latest_map() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), ScriptedFilter::new);
    h.slam.handle_scan(&three_beams(1.0));

    let map = h.slam.map_request().unwrap();
    assert_eq!(map.info.width, 200);
    assert_eq!(map.data, h.output.maps.lock()[0].data);
}

#[test]
fn test_map_rebuilt_after_interval() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), ScriptedFilter::new);

    let updated: Vec<bool> = [1.0, 2.0, 7.0]
        .iter()
        .map(|&secs| match h.slam.handle_scan(&three_beams(secs)) {
            ScanOutcome::Processed { map_updated } => map_updated,
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();

    assert_eq!(updated, vec![true, false, true]);
    assert_eq!(h.output.maps.lock().len(), 2);
}

#[test]
fn test_entropy_published_only_when_positive() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), |log| {
        ScriptedFilter::new(log).with_weights(&[0.5, 0.5])
    });
    h.slam.handle_scan(&three_beams(1.0));

    let entropy = h.output.entropy.lock();
    assert_eq!(entropy.len(), 1);
    assert!((entropy[0] - 2.0f64.ln()).abs() < 1e-12);

    let h = start(test_params(), robot_tf(Isometry3::identity()), ScriptedFilter::new);
    h.slam.handle_scan(&three_beams(1.0));
    assert!(h.output.entropy.lock().is_empty());
    assert_eq!(h.output.maps.lock().len(), 1);
}

#[test]
fn test_correction_published_as_map_to_odom() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), |log| {
        ScriptedFilter::new(log).with_correction(Pose2D::new(1.0, 0.5, 0.0))
    });
    h.slam.handle_scan(&three_beams(1.0));

    let correction = h.slam.correction().current();
    assert!((correction.translation.vector - Vector3::new(1.0, 0.5, 0.0)).norm() < 1e-9);

    let sink = Arc::new(RecordingSink::default());
    let publisher = h.slam.correction_publisher(sink.clone());
    publisher.publish_once();

    let sent = sink.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].parent_frame, "map");
    assert_eq!(sent[0].child_frame, "odom");
    assert_eq!(sent[0].stamp, NOW + stamp_from_secs(0.05));
    assert!((sent[0].transform.translation.x - 1.0).abs() < 1e-9);
}

#[test]
fn test_restart_reinitializes_mapper() {
    let h = start(test_params(), robot_tf(Isometry3::identity()), ScriptedFilter::new);
    h.slam.handle_scan(&three_beams(1.0));

    h.slam.on_deactivate().unwrap();
    assert!(matches!(
        h.slam.handle_scan(&three_beams(2.0)),
        ScanOutcome::Inactive
    ));
    h.slam.on_cleanup().unwrap();
    assert_eq!(h.slam.state(), State::Unconfigured);

    h.slam.on_configure().unwrap();
    h.slam.on_activate().unwrap();
    assert!(matches!(
        h.slam.handle_scan(&three_beams(3.0)),
        ScanOutcome::Processed { map_updated: true }
    ));

    let log = h.log.lock();
    assert_eq!(log.configs.len(), 2);
    assert_eq!(log.readings.len(), 2);
}

#[test]
fn test_initial_pose_falls_back_to_origin_when_odometry_missing() {
    let tf = Arc::new(FlakyOdometry {
        odom_failures: Mutex::new(1),
    });
    let h = start(test_params(), tf, ScriptedFilter::new);

    let outcome = h.slam.handle_scan(&three_beams(1.0));
    assert!(matches!(outcome, ScanOutcome::Processed { .. }));
    assert!(h.slam.is_initialized());

    let log = h.log.lock();
    assert_eq!(log.configs.len(), 1);
    assert_eq!(log.configs[0].initial_pose, Pose2D::default());
    assert_eq!(log.readings.len(), 1);
    assert!((log.readings[0].odom_pose.x - 2.0).abs() < 1e-9);
    assert!(log.readings[0].odom_pose.y.abs() < 1e-9);
}
