//! SLAM coordinator
//!
//! Ties the pipeline together: scans pass the ingestion gate, the sensor
//! geometry is resolved once, odometry poses and filter-ordered ranges go to
//! the mapper, and every processed scan refreshes the map -> odom correction.
//! The map is rebuilt from the best trajectory whenever it is due.
//!
//! Scan processing and the published map are guarded by separate locks, so
//! map requests are only ever blocked by a rebuild, never by a transform
//! lookup. The correction has its own lock inside [`CorrectionTransform`].

use crate::common::types::{Clock, Pose2D, Stamp, NANOS_PER_SEC};
use crate::config::SlamParams;
use crate::error::SlamError;
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use crate::mapping::entropy::publishable_entropy;
use crate::mapping::{MapMetaData, MapperAdapter, OccupancyGrid, OccupancyGridSynthesizer, ParticleFilter};
use crate::perception::{
    prepare_ranges, FrameGeometryResolver, GateDecision, OdometryPoseTracker, RangeScan, ScanGate,
};
use crate::publisher::{CorrectionPublisher, CorrectionTransform};
use crate::transform::{TransformError, TransformSink, TransformSource};
use parking_lot::Mutex;
use rclrs::{log_debug, log_error, log_info, log_warn};
use std::sync::Arc;

const LOGGER_NAME: &str = "slam_gmapping";

/// Where rebuilt maps and diagnostics go.
pub trait MapOutput: Send + Sync {
    fn publish_map(&self, grid: &OccupancyGrid);

    fn publish_metadata(&self, info: &MapMetaData);

    fn publish_entropy(&self, entropy: f64);
}

/// What happened to one scan.
#[derive(Debug)]
pub enum ScanOutcome {
    /// The node is not active
    Inactive,
    Throttled,
    /// The scan frame could not be related to odometry
    NoTransform(TransformError),
    /// Sensor geometry could not be resolved; retried on the next scan
    GeometryUnavailable(SlamError),
    /// No odometry pose at the scan time
    OdometryUnavailable(SlamError),
    /// The scan does not fit the session, e.g. a different beam count
    Rejected(SlamError),
    /// The filter did not take the reading as a new step
    NotProcessed,
    Processed { map_updated: bool },
}

struct ScanPipeline {
    gate: ScanGate,
    resolver: FrameGeometryResolver,
    tracker: OdometryPoseTracker,
    mapper: MapperAdapter,
}

pub struct SlamGmapping {
    base: LifecycleNodeBase,
    params: SlamParams,
    seed: u64,
    tf: Arc<dyn TransformSource>,
    output: Arc<dyn MapOutput>,
    clock: Arc<dyn Clock>,
    pipeline: Mutex<ScanPipeline>,
    map: Mutex<OccupancyGridSynthesizer>,
    correction: Arc<CorrectionTransform>,
}

impl SlamGmapping {
    pub fn new(
        params: SlamParams,
        tf: Arc<dyn TransformSource>,
        engine: Box<dyn ParticleFilter>,
        output: Arc<dyn MapOutput>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SlamError> {
        params.validate()?;

        let seed = params
            .seed
            .unwrap_or_else(|| (clock.now() / NANOS_PER_SEC).max(0) as u64);
        let wait = params.transform_wait();

        let pipeline = ScanPipeline {
            gate: ScanGate::new(params.timing.throttle_scans),
            resolver: FrameGeometryResolver::new(&params.frames.base_frame, wait),
            tracker: OdometryPoseTracker::new(&params.frames.odom_frame, wait),
            mapper: MapperAdapter::new(engine),
        };
        let map = OccupancyGridSynthesizer::new(
            &params.map,
            &params.frames.map_frame,
            params.map_update_interval(),
        );

        Ok(SlamGmapping {
            base: LifecycleNodeBase::new("slam_gmapping"),
            params,
            seed,
            tf,
            output,
            clock,
            pipeline: Mutex::new(pipeline),
            map: Mutex::new(map),
            correction: Arc::new(CorrectionTransform::new()),
        })
    }

    /// Skip the diagnostic probing after failed odometry lookups.
    pub fn without_transform_diagnostics(mut self) -> Self {
        let pipeline = self.pipeline.get_mut();
        pipeline.tracker = pipeline.tracker.clone().without_diagnostics();
        self
    }

    pub fn params(&self) -> &SlamParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> State {
        self.base.get_state()
    }

    pub fn correction(&self) -> Arc<CorrectionTransform> {
        Arc::clone(&self.correction)
    }

    /// Broadcaster for the correction, configured from the parameters.
    pub fn correction_publisher(&self, sink: Arc<dyn TransformSink>) -> CorrectionPublisher {
        CorrectionPublisher::new(
            self.correction(),
            sink,
            Arc::clone(&self.clock),
            &self.params.frames.map_frame,
            &self.params.frames.odom_frame,
            self.params.tf_delay(),
        )
    }

    /// Scans seen while active
    pub fn scan_count(&self) -> u64 {
        self.pipeline.lock().gate.count()
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.lock().gate.geometry().is_some()
    }

    pub fn best_pose(&self) -> Option<Pose2D> {
        self.pipeline.lock().mapper.best_pose()
    }

    /// The last published map, if there is one with a non-zero size.
    pub fn map_request(&self) -> Option<OccupancyGrid> {
        self.map.lock().map().cloned()
    }

    /// Run one scan through the pipeline.
    pub fn handle_scan(&self, scan: &RangeScan) -> ScanOutcome {
        if self.base.get_state() != State::Active {
            log_debug!(LOGGER_NAME, "Ignoring scan, node is not active");
            return ScanOutcome::Inactive;
        }

        let mut guard = self.pipeline.lock();
        let pipeline = &mut *guard;

        match pipeline.gate.admit(
            self.tf.as_ref(),
            &self.params.frames.odom_frame,
            scan,
            self.params.transform_wait(),
        ) {
            GateDecision::Admitted => {}
            GateDecision::Throttled => return ScanOutcome::Throttled,
            GateDecision::NoTransform(e) => {
                log_warn!(
                    LOGGER_NAME,
                    "Dropping scan, cannot transform {} to {}: {}",
                    scan.frame_id,
                    self.params.frames.odom_frame,
                    e
                );
                return ScanOutcome::NoTransform(e);
            }
        }

        if pipeline.gate.geometry().is_none() {
            if let Err(e) = self.init_mapper(pipeline, scan) {
                return match e {
                    SlamError::Transform(_) | SlamError::NonPlanarMount { .. } => {
                        ScanOutcome::GeometryUnavailable(e)
                    }
                    other => {
                        log_error!(LOGGER_NAME, "Mapper initialization failed: {}", other);
                        ScanOutcome::Rejected(other)
                    }
                };
            }
        }

        let Some(geometry) = pipeline.gate.geometry() else {
            return ScanOutcome::GeometryUnavailable(SlamError::NotInitialized);
        };

        let odom_pose = match pipeline.tracker.pose_at(
            self.tf.as_ref(),
            &geometry.laser_frame,
            &geometry.centered_laser_pose,
            scan.stamp,
        ) {
            Ok(pose) => pose,
            Err(e) => return ScanOutcome::OdometryUnavailable(e),
        };

        let ranges = match prepare_ranges(geometry, scan) {
            Ok(ranges) => ranges,
            Err(e) => {
                log_error!(LOGGER_NAME, "{}", e);
                return ScanOutcome::Rejected(e);
            }
        };

        let processed = match pipeline.mapper.process_scan(odom_pose, ranges, scan.stamp) {
            Ok(processed) => processed,
            Err(e) => {
                log_error!(LOGGER_NAME, "Mapper failed on scan: {}", e);
                return ScanOutcome::Rejected(e);
            }
        };
        if !processed {
            log_debug!(LOGGER_NAME, "cannot process scan");
            return ScanOutcome::NotProcessed;
        }

        log_debug!(LOGGER_NAME, "scan processed");
        let Some(mapper_pose) = pipeline.mapper.best_pose() else {
            return ScanOutcome::Rejected(SlamError::Filter("filter has no particles".to_string()));
        };
        log_debug!(
            LOGGER_NAME,
            "new best pose: {:.3} {:.3} {:.3}",
            mapper_pose.x,
            mapper_pose.y,
            mapper_pose.theta
        );
        log_debug!(
            LOGGER_NAME,
            "correction: {:.3} {:.3} {:.3}",
            mapper_pose.x - odom_pose.x,
            mapper_pose.y - odom_pose.y,
            mapper_pose.theta - odom_pose.theta
        );
        self.correction.update(&mapper_pose, &odom_pose);

        let map_updated = self.update_map_if_due(&pipeline.mapper, scan.stamp);
        ScanOutcome::Processed { map_updated }
    }

    fn init_mapper(&self, pipeline: &mut ScanPipeline, scan: &RangeScan) -> Result<(), SlamError> {
        let geometry = pipeline.resolver.resolve(self.tf.as_ref(), scan)?;

        let initial_pose = pipeline
            .tracker
            .pose_at(
                self.tf.as_ref(),
                &geometry.laser_frame,
                &geometry.centered_laser_pose,
                scan.stamp,
            )
            .unwrap_or_else(|_| {
                log_warn!(
                    LOGGER_NAME,
                    "Unable to determine initial pose of laser! Starting point will be set to zero."
                );
                Pose2D::default()
            });

        pipeline
            .mapper
            .initialize(&self.params, &geometry, initial_pose, self.seed)?;
        pipeline.gate.activate(geometry);
        Ok(())
    }

    fn update_map_if_due(&self, mapper: &MapperAdapter, stamp: Stamp) -> bool {
        let mut map = self.map.lock();
        if !map.needs_rebuild(stamp) {
            return false;
        }
        let Some(beams) = mapper.beam_model() else {
            return false;
        };

        log_debug!(LOGGER_NAME, "Update map");
        if let Some(entropy) = publishable_entropy(mapper.particles()) {
            self.output.publish_entropy(entropy);
        }

        let grid = map.rebuild(mapper.best_trajectory(), &beams, stamp, self.clock.now());
        self.output.publish_map(grid);
        self.output.publish_metadata(&grid.info);
        log_debug!(LOGGER_NAME, "Updated the map");
        true
    }
}

impl LifecycleNode for SlamGmapping {
    fn on_configure(&self) -> Result<(), SlamError> {
        self.params.validate()?;
        self.base.transition(State::Unconfigured, State::Inactive)?;
        log_info!(
            LOGGER_NAME,
            "Configured: base {}, odom {}, map {}, seed {}",
            self.params.frames.base_frame,
            self.params.frames.odom_frame,
            self.params.frames.map_frame,
            self.seed
        );
        Ok(())
    }

    fn on_activate(&self) -> Result<(), SlamError> {
        self.base.transition(State::Inactive, State::Active)?;
        log_info!(LOGGER_NAME, "Activated");
        Ok(())
    }

    fn on_deactivate(&self) -> Result<(), SlamError> {
        self.base.transition(State::Active, State::Inactive)?;
        log_info!(LOGGER_NAME, "Deactivated");
        Ok(())
    }

    fn on_cleanup(&self) -> Result<(), SlamError> {
        self.base.transition(State::Inactive, State::Unconfigured)?;

        let mut pipeline = self.pipeline.lock();
        pipeline.gate.reset();
        pipeline.mapper.reset();
        self.map.lock().reset();
        self.correction.reset();

        log_info!(LOGGER_NAME, "Cleaned up, session reset");
        Ok(())
    }
}
