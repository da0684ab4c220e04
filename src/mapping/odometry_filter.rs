//! Motion-model particle filter
//!
//! A concrete [`ParticleFilter`] that propagates particles with a sampled
//! odometry motion model and weights them by how well each particle's motion
//! agrees with the measured odometry. It performs no scan matching, so the
//! best pose follows odometry closely; scan matching engines plug in through
//! the same trait.

use super::engine::{FilterConfig, NodeId, Particle, ParticleFilter, RangeReading, TrajectoryArena};
use crate::common::types::{normalize_angle, stamp_to_secs, Pose2D, Stamp};
use crate::config::{MotionModelParams, UpdateParams};
use crate::error::SlamError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rclrs::log_debug;
use std::sync::Arc;

const LOGGER_NAME: &str = "slam_gmapping.odometry_filter";

/// Linear/angular cross-coupling factor of the motion model.
const SXY_FACTOR: f64 = 0.3;

/// Gaussian odometry motion model.
#[derive(Debug, Clone)]
pub struct MotionModel {
    params: MotionModelParams,
}

impl MotionModel {
    pub fn new(params: MotionModelParams) -> Self {
        MotionModel { params }
    }

    /// Move `pose` by the odometry step `old -> new` plus sampled noise.
    pub fn draw_from_motion<R: Rng>(&self, rng: &mut R, pose: &Pose2D, new: &Pose2D, old: &Pose2D) -> Pose2D {
        let p = &self.params;
        let sxy = SXY_FACTOR * p.srr;
        let delta = new.relative_to(old);

        let noisy = Pose2D {
            x: delta.x
                + sample_gaussian(rng, p.srr * delta.x.abs() + p.str * delta.theta.abs() + sxy * delta.y.abs()),
            y: delta.y
                + sample_gaussian(rng, p.srr * delta.y.abs() + p.str * delta.theta.abs() + sxy * delta.x.abs()),
            theta: normalize_angle(
                delta.theta
                    + sample_gaussian(
                        rng,
                        p.stt * delta.theta.abs() + p.srt * delta.x.hypot(delta.y),
                    ),
            ),
        };

        pose.compose(&noisy)
    }
}

fn sample_gaussian<R: Rng>(rng: &mut R, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    let z: f64 = rng.sample(StandardNormal);
    z * sigma
}

#[derive(Debug, Clone)]
struct Hypothesis {
    pose: Pose2D,
    /// Pose at the last accepted update
    previous_pose: Pose2D,
    log_weight: f64,
    weight: f64,
    node: NodeId,
}

/// Particle filter driven by odometry alone.
pub struct OdometryParticleFilter {
    config: Option<FilterConfig>,
    motion: MotionModel,
    rng: ChaCha8Rng,
    hypotheses: Vec<Hypothesis>,
    particles: Vec<Particle>,
    arena: TrajectoryArena,
    odom_pose: Pose2D,
    /// Odometry pose at the last accepted update
    last_update_odom: Pose2D,
    linear_distance: f64,
    angular_distance: f64,
    last_update_time: Stamp,
    count: u64,
    readings: u64,
}

impl Default for OdometryParticleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl OdometryParticleFilter {
    pub fn new() -> Self {
        OdometryParticleFilter {
            config: None,
            motion: MotionModel::new(MotionModelParams {
                srr: 0.0,
                srt: 0.0,
                str: 0.0,
                stt: 0.0,
            }),
            rng: ChaCha8Rng::seed_from_u64(0),
            hypotheses: Vec::new(),
            particles: Vec::new(),
            arena: TrajectoryArena::new(),
            odom_pose: Pose2D::default(),
            last_update_odom: Pose2D::default(),
            linear_distance: 0.0,
            angular_distance: 0.0,
            last_update_time: 0,
            count: 0,
            readings: 0,
        }
    }

    /// Updates accepted so far
    pub fn update_count(&self) -> u64 {
        self.count
    }

    /// Readings offered so far, accepted or not
    pub fn reading_count(&self) -> u64 {
        self.readings
    }

    fn should_update(&self, update: &UpdateParams, stamp: Stamp) -> bool {
        self.count == 0
            || self.linear_distance >= update.linear_update
            || self.angular_distance >= update.angular_update
            || (update.temporal_update >= 0.0
                && stamp_to_secs(stamp - self.last_update_time) > update.temporal_update)
    }

    /// Weight each particle by how closely its motion since the last update
    /// matches the odometry motion.
    fn weigh(&mut self, config: &FilterConfig) {
        let odom_step = self.odom_pose.relative_to(&self.last_update_odom);
        let linear = odom_step.x.hypot(odom_step.y);
        let sigma_linear = config.matching.lsigma + config.motion.srr * linear;
        let sigma_angular = config.matching.lsigma + config.motion.stt * odom_step.theta.abs();

        for h in &mut self.hypotheses {
            let step = h.pose.relative_to(&h.previous_pose);
            let ex = step.x - odom_step.x;
            let ey = step.y - odom_step.y;
            let et = normalize_angle(step.theta - odom_step.theta);
            h.log_weight += -0.5
                * ((ex * ex + ey * ey) / (sigma_linear * sigma_linear)
                    + (et * et) / (sigma_angular * sigma_angular));
        }
    }

    /// Turn log weights into normalized weights, smoothed by the
    /// likelihood gain.
    fn normalize(&mut self, config: &FilterConfig) {
        let n = self.hypotheses.len().max(1) as f64;
        let gain = 1.0 / (config.matching.ogain * n);
        let max = self
            .hypotheses
            .iter()
            .map(|h| h.log_weight)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut total = 0.0;
        for h in &mut self.hypotheses {
            h.weight = (gain * (h.log_weight - max)).exp();
            total += h.weight;
        }
        for h in &mut self.hypotheses {
            h.weight = if total > 0.0 { h.weight / total } else { 1.0 / n };
        }
    }

    fn effective_particles(&self) -> f64 {
        let sum_sq: f64 = self.hypotheses.iter().map(|h| h.weight * h.weight).sum();
        if sum_sq > 0.0 {
            1.0 / sum_sq
        } else {
            0.0
        }
    }

    /// Systematic resampling.
    fn resample(&mut self) {
        let n = self.hypotheses.len();
        if n == 0 {
            return;
        }
        let step = 1.0 / n as f64;
        let mut target = self.rng.gen::<f64>() * step;
        let mut cumulative = 0.0;
        let mut resampled = Vec::with_capacity(n);

        for h in &self.hypotheses {
            cumulative += h.weight;
            while target < cumulative && resampled.len() < n {
                resampled.push(Hypothesis {
                    log_weight: 0.0,
                    weight: step,
                    ..h.clone()
                });
                target += step;
            }
        }
        // Rounding can leave the last slots unfilled
        while resampled.len() < n {
            resampled.push(Hypothesis {
                log_weight: 0.0,
                weight: step,
                ..self.hypotheses[n - 1].clone()
            });
        }

        self.hypotheses = resampled;
    }

    fn extend_trajectories(&mut self, reading: &RangeReading) -> Result<(), SlamError> {
        let reading = Arc::new(reading.clone());
        for h in &mut self.hypotheses {
            h.node = self.arena.push(h.pose, Some(Arc::clone(&reading)), Some(h.node))?;
        }
        Ok(())
    }

    /// Release trajectory nodes that no particle descends from.
    fn compact_trajectories(&mut self) -> Result<(), SlamError> {
        let leaves: Vec<NodeId> = self.hypotheses.iter().map(|h| h.node).collect();
        let before = self.arena.len();
        let leaves = self.arena.compact(&leaves)?;
        for (h, node) in self.hypotheses.iter_mut().zip(leaves) {
            h.node = node;
        }
        log_debug!(
            LOGGER_NAME,
            "Compacted trajectories from {} to {} nodes",
            before,
            self.arena.len()
        );
        Ok(())
    }

    fn publish_particles(&mut self) {
        self.particles = self
            .hypotheses
            .iter()
            .map(|h| Particle {
                pose: h.pose,
                weight: h.weight,
                node: h.node,
            })
            .collect();
    }
}

impl ParticleFilter for OdometryParticleFilter {
    fn configure(&mut self, config: &FilterConfig) -> Result<(), SlamError> {
        if config.particles == 0 {
            return Err(SlamError::Filter("at least one particle is required".to_string()));
        }
        if config.matching.ogain <= 0.0 {
            return Err(SlamError::Filter("likelihood gain must be positive".to_string()));
        }
        if config.matching.lsigma <= 0.0 {
            return Err(SlamError::Filter("lsigma must be positive".to_string()));
        }

        self.motion = MotionModel::new(config.motion.clone());
        self.rng = ChaCha8Rng::seed_from_u64(config.seed);
        self.arena.clear();
        let root = self.arena.push(config.initial_pose, None, None)?;

        let weight = 1.0 / config.particles as f64;
        self.hypotheses = (0..config.particles)
            .map(|_| Hypothesis {
                pose: config.initial_pose,
                previous_pose: config.initial_pose,
                log_weight: 0.0,
                weight,
                node: root,
            })
            .collect();

        self.odom_pose = Pose2D::default();
        self.last_update_odom = Pose2D::default();
        self.linear_distance = 0.0;
        self.angular_distance = 0.0;
        self.last_update_time = 0;
        self.count = 0;
        self.readings = 0;
        self.config = Some(config.clone());
        self.publish_particles();

        log_debug!(
            LOGGER_NAME,
            "Configured {} particles, seed {}",
            config.particles,
            config.seed
        );
        Ok(())
    }

    fn process_scan(&mut self, reading: &RangeReading) -> Result<bool, SlamError> {
        let config = self.config.clone().ok_or(SlamError::NotInitialized)?;
        if reading.ranges.len() != config.beam_angles.len() {
            return Err(SlamError::BeamCountMismatch {
                expected: config.beam_angles.len(),
                actual: reading.ranges.len(),
            });
        }

        let odom = reading.odom_pose;
        if self.count == 0 {
            self.odom_pose = odom;
            self.last_update_odom = odom;
        }

        for h in &mut self.hypotheses {
            h.pose = self
                .motion
                .draw_from_motion(&mut self.rng, &h.pose, &odom, &self.odom_pose);
        }

        let step = odom.relative_to(&self.odom_pose);
        self.linear_distance += step.x.hypot(step.y);
        self.angular_distance += step.theta.abs();
        self.odom_pose = odom;
        self.readings += 1;

        if !self.should_update(&config.update, reading.stamp) {
            self.publish_particles();
            return Ok(false);
        }

        self.last_update_time = reading.stamp;

        let mut resampled = false;
        if self.count > 0 {
            self.weigh(&config);
            self.normalize(&config);
            let neff = self.effective_particles();
            let threshold = config.update.resample_threshold * self.hypotheses.len() as f64;
            if neff < threshold {
                log_debug!(LOGGER_NAME, "Resampling, neff {:.2} < {:.2}", neff, threshold);
                self.resample();
                resampled = true;
            }
        }
        self.extend_trajectories(reading)?;
        if resampled {
            self.compact_trajectories()?;
        }

        for h in &mut self.hypotheses {
            h.previous_pose = h.pose;
        }
        self.last_update_odom = odom;
        self.linear_distance = 0.0;
        self.angular_distance = 0.0;
        self.count += 1;
        self.publish_particles();

        Ok(true)
    }

    fn particles(&self) -> &[Particle] {
        &self.particles
    }

    fn best_particle_index(&self) -> usize {
        let mut best = 0;
        for (i, p) in self.particles.iter().enumerate() {
            if p.weight > self.particles[best].weight {
                best = i;
            }
        }
        best
    }

    fn trajectory(&self) -> &TrajectoryArena {
        &self.arena
    }
}
