//! Mapper adapter
//!
//! Owns the particle filter engine. Configures it once from the node
//! parameters and the resolved sensor geometry, then feeds it readings.

use super::engine::{FilterConfig, Particle, ParticleFilter, RangeReading, TrajectoryNode};
use super::scan_grid::BeamModel;
use crate::common::types::{Pose2D, Stamp};
use crate::config::SlamParams;
use crate::error::SlamError;
use crate::perception::SensorGeometry;
use rclrs::{log_debug, log_info};

const LOGGER_NAME: &str = "slam_gmapping.mapper";

pub struct MapperAdapter {
    engine: Box<dyn ParticleFilter>,
    config: Option<FilterConfig>,
}

impl MapperAdapter {
    pub fn new(engine: Box<dyn ParticleFilter>) -> Self {
        MapperAdapter {
            engine,
            config: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&FilterConfig> {
        self.config.as_ref()
    }

    /// One-time engine setup. The maximum range defaults to the sensor's
    /// reported maximum minus a margin, the usable range to the maximum.
    pub fn initialize(
        &mut self,
        params: &SlamParams,
        geometry: &SensorGeometry,
        initial_pose: Pose2D,
        seed: u64,
    ) -> Result<(), SlamError> {
        let max_range = params
            .laser
            .max_range
            .unwrap_or_else(|| geometry.default_max_range());
        let max_urange = params.laser.max_urange.unwrap_or(max_range);

        let config = FilterConfig {
            particles: params.update.particles,
            beam_angles: geometry.beam_angles.clone(),
            max_range,
            max_urange,
            matching: params.matching.clone(),
            motion: params.motion.clone(),
            update: params.update.clone(),
            sampling: params.sampling.clone(),
            bounds: params.map.clone(),
            initial_pose,
            seed,
        };

        self.engine.configure(&config)?;

        log_info!(
            LOGGER_NAME,
            "Initialization complete: {} particles, {} beams, maxRange {:.2}, maxUrange {:.2}",
            config.particles,
            config.beam_angles.len(),
            max_range,
            max_urange
        );
        self.config = Some(config);
        Ok(())
    }

    /// Hand a reading to the engine. `Ok(false)` means the engine did not
    /// take it as a new step.
    pub fn process_scan(&mut self, pose: Pose2D, ranges: Vec<f64>, stamp: Stamp) -> Result<bool, SlamError> {
        if self.config.is_none() {
            return Err(SlamError::NotInitialized);
        }

        let reading = RangeReading {
            ranges,
            stamp,
            odom_pose: pose,
        };
        log_debug!(
            LOGGER_NAME,
            "processing scan at {:.3} {:.3} {:.3}",
            pose.x,
            pose.y,
            pose.theta
        );
        self.engine.process_scan(&reading)
    }

    pub fn particles(&self) -> &[Particle] {
        self.engine.particles()
    }

    fn best_particle(&self) -> Option<&Particle> {
        self.engine
            .particles()
            .get(self.engine.best_particle_index())
    }

    /// Pose of the best particle
    pub fn best_pose(&self) -> Option<Pose2D> {
        self.best_particle().map(|p| p.pose)
    }

    /// Best particle's trajectory, leaf to root.
    pub fn best_trajectory(&self) -> impl Iterator<Item = &TrajectoryNode> {
        let trajectory = self.engine.trajectory();
        self.best_particle()
            .map(|p| trajectory.ancestors(p.node))
            .into_iter()
            .flatten()
    }

    /// Beam layout and range limits for map synthesis.
    pub fn beam_model(&self) -> Option<BeamModel> {
        self.config
            .as_ref()
            .map(|c| BeamModel::new(c.beam_angles.clone(), c.max_range, c.max_urange))
    }

    /// Require a fresh initialization before the next reading.
    pub fn reset(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::OdometryParticleFilter;
    use crate::perception::MountOrientation;
    use nalgebra::Isometry3;

    fn geometry() -> SensorGeometry {
        SensorGeometry {
            laser_frame: "laser".to_string(),
            orientation: MountOrientation::Upright,
            do_reverse_range: false,
            beam_angles: vec![-1.0, 0.0, 1.0],
            angle_increment: 1.0,
            centered_laser_pose: Isometry3::identity(),
            sensor_range_max: 10.0,
        }
    }

    #[test]
    fn test_process_before_initialize_fails() {
        let mut adapter = MapperAdapter::new(Box::new(OdometryParticleFilter::new()));
        assert!(matches!(
            adapter.process_scan(Pose2D::default(), vec![1.0; 3], 0),
            Err(SlamError::NotInitialized)
        ));
        assert!(adapter.best_pose().is_none());
        assert_eq!(adapter.best_trajectory().count(), 0);
    }

    #[test]
    fn test_range_defaults_derive_from_sensor() {
        let mut adapter = MapperAdapter::new(Box::new(OdometryParticleFilter::new()));
        adapter
            .initialize(&SlamParams::default(), &geometry(), Pose2D::default(), 1)
            .unwrap();

        let config = adapter.config().unwrap();
        assert!((config.max_range - 9.99).abs() < 1e-12);
        assert!((config.max_urange - 9.99).abs() < 1e-12);
        assert_eq!(config.particles, 30);
    }

    #[test]
    fn test_range_overrides() {
        let mut params = SlamParams::default();
        params.laser.max_range = Some(8.0);
        params.laser.max_urange = Some(6.0);
        let mut adapter = MapperAdapter::new(Box::new(OdometryParticleFilter::new()));
        adapter
            .initialize(&params, &geometry(), Pose2D::default(), 1)
            .unwrap();

        let config = adapter.config().unwrap();
        assert_eq!((config.max_range, config.max_urange), (8.0, 6.0));

        // Usable range falls back to the overridden max range
        params.laser.max_urange = None;
        adapter
            .initialize(&params, &geometry(), Pose2D::default(), 1)
            .unwrap();
        assert_eq!(adapter.config().unwrap().max_urange, 8.0);
    }

    #[test]
    fn test_processed_scan_extends_best_trajectory() {
        let mut adapter = MapperAdapter::new(Box::new(OdometryParticleFilter::new()));
        adapter
            .initialize(&SlamParams::default(), &geometry(), Pose2D::new(1.0, 2.0, 0.0), 1)
            .unwrap();

        assert!(adapter
            .process_scan(Pose2D::default(), vec![1.0, 2.0, 3.0], 10)
            .unwrap());

        let best = adapter.best_pose().unwrap();
        assert_eq!((best.x, best.y), (1.0, 2.0));

        let chain: Vec<_> = adapter.best_trajectory().collect();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].reading.as_ref().unwrap().ranges, vec![1.0, 2.0, 3.0]);
        assert!(chain[1].reading.is_none());
    }
}
