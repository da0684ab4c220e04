//! SLAM node parameters
//!
//! Defaults follow the classic gmapping wrapper. Parameters can be
//! overridden from a numeric key/value map (offline use and tests) or
//! declared on a ROS node.

use crate::common::types::stamp_from_secs;
use crate::common::types::Stamp;
use crate::error::SlamError;
use anyhow::Result;
use rclrs::Node;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Frame configuration
#[derive(Debug, Clone)]
pub struct FrameParams {
    pub base_frame: String,
    pub map_frame: String,
    pub odom_frame: String,
}

/// Scheduling and transform timing
#[derive(Debug, Clone)]
pub struct TimingParams {
    /// Process only every n-th scan (1 = every scan)
    pub throttle_scans: u32,
    /// Period of the map->odom broadcast in seconds; 0 disables it
    pub transform_publish_period: f64,
    /// Seconds of scan time between two map rebuilds
    pub map_update_interval: f64,
    /// Forward shift applied to the broadcast stamp in seconds
    pub tf_delay: f64,
    /// Bounded wait for transform availability in seconds
    pub transform_wait: f64,
    /// History kept by the transform buffer in seconds
    pub tf_cache_time: f64,
}

/// Laser range limits. `None` means "derive from the first scan".
#[derive(Debug, Clone, Default)]
pub struct LaserParams {
    pub max_range: Option<f64>,
    pub max_urange: Option<f64>,
}

/// Scan matching parameters handed to the filter engine
#[derive(Debug, Clone)]
pub struct MatchingParams {
    pub sigma: f64,
    pub kernel_size: i32,
    pub lstep: f64,
    pub astep: f64,
    pub iterations: i32,
    pub lsigma: f64,
    pub ogain: f64,
    pub lskip: i32,
    pub minimum_score: f64,
}

/// Motion model noise (standard deviations of a gaussian model)
#[derive(Debug, Clone)]
pub struct MotionModelParams {
    /// linear -> linear
    pub srr: f64,
    /// linear -> angular
    pub srt: f64,
    /// angular -> linear
    pub str: f64,
    /// angular -> angular
    pub stt: f64,
}

/// Update gating and particle count
#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub linear_update: f64,
    pub angular_update: f64,
    /// Seconds between forced updates; negative disables
    pub temporal_update: f64,
    pub resample_threshold: f64,
    pub particles: usize,
}

/// Likelihood sampling used during scan matching
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub llsamplerange: f64,
    pub llsamplestep: f64,
    pub lasamplerange: f64,
    pub lasamplestep: f64,
}

/// Initial map extent and rasterization
#[derive(Debug, Clone)]
pub struct MapParams {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub delta: f64,
    pub occ_thresh: f64,
}

/// All SLAM parameters
#[derive(Debug, Clone)]
pub struct SlamParams {
    pub frames: FrameParams,
    pub timing: TimingParams,
    pub laser: LaserParams,
    pub matching: MatchingParams,
    pub motion: MotionModelParams,
    pub update: UpdateParams,
    pub sampling: SamplingParams,
    pub map: MapParams,
    /// Seed for the filter's sampling; `None` derives one from the wall clock
    pub seed: Option<u64>,
}

impl Default for SlamParams {
    fn default() -> Self {
        SlamParams {
            frames: FrameParams {
                base_frame: "base_link".to_string(),
                map_frame: "map".to_string(),
                odom_frame: "odom".to_string(),
            },
            timing: TimingParams {
                throttle_scans: 1,
                transform_publish_period: 0.05,
                map_update_interval: 5.0,
                tf_delay: 0.05,
                transform_wait: 0.1,
                tf_cache_time: 10.0,
            },
            laser: LaserParams::default(),
            matching: MatchingParams {
                sigma: 0.05,
                kernel_size: 1,
                lstep: 0.05,
                astep: 0.05,
                iterations: 5,
                lsigma: 0.075,
                ogain: 3.0,
                lskip: 0,
                minimum_score: 0.0,
            },
            motion: MotionModelParams {
                srr: 0.1,
                srt: 0.2,
                str: 0.1,
                stt: 0.2,
            },
            update: UpdateParams {
                linear_update: 1.0,
                angular_update: 0.5,
                temporal_update: -1.0,
                resample_threshold: 0.5,
                particles: 30,
            },
            sampling: SamplingParams {
                llsamplerange: 0.01,
                llsamplestep: 0.01,
                lasamplerange: 0.005,
                lasamplestep: 0.005,
            },
            map: MapParams {
                xmin: -100.0,
                ymin: -100.0,
                xmax: 100.0,
                ymax: 100.0,
                delta: 0.05,
                occ_thresh: 0.25,
            },
            seed: None,
        }
    }
}

impl SlamParams {
    /// Apply numeric overrides keyed by their ROS parameter names.
    pub fn configure(&mut self, params: &HashMap<String, f64>) -> Result<(), SlamError> {
        let tf_delay_follows_period = !params.contains_key("tf_delay")
            && self.timing.tf_delay == self.timing.transform_publish_period;
        for (key, &value) in params {
            match key.as_str() {
                "throttle_scans" => {
                    if value < 1.0 {
                        return Err(SlamError::invalid_parameter(key, "must be at least 1"));
                    }
                    self.timing.throttle_scans = value as u32;
                }
                "transform_publish_period" => self.timing.transform_publish_period = value,
                "map_update_interval" => self.timing.map_update_interval = value,
                "tf_delay" => self.timing.tf_delay = value,
                "transform_wait" => self.timing.transform_wait = value,
                "tf_cache_time" => self.timing.tf_cache_time = value,
                "maxRange" => self.laser.max_range = Some(value),
                "maxUrange" => self.laser.max_urange = Some(value),
                "sigma" => self.matching.sigma = value,
                "kernelSize" => self.matching.kernel_size = value as i32,
                "lstep" => self.matching.lstep = value,
                "astep" => self.matching.astep = value,
                "iterations" => self.matching.iterations = value as i32,
                "lsigma" => self.matching.lsigma = value,
                "ogain" => self.matching.ogain = value,
                "lskip" => self.matching.lskip = value as i32,
                "minimumScore" => self.matching.minimum_score = value,
                "srr" => self.motion.srr = value,
                "srt" => self.motion.srt = value,
                "str" => self.motion.str = value,
                "stt" => self.motion.stt = value,
                "linearUpdate" => self.update.linear_update = value,
                "angularUpdate" => self.update.angular_update = value,
                "temporalUpdate" => self.update.temporal_update = value,
                "resampleThreshold" => self.update.resample_threshold = value,
                "particles" => {
                    if value < 1.0 {
                        return Err(SlamError::invalid_parameter(key, "must be at least 1"));
                    }
                    self.update.particles = value as usize;
                }
                "xmin" => self.map.xmin = value,
                "ymin" => self.map.ymin = value,
                "xmax" => self.map.xmax = value,
                "ymax" => self.map.ymax = value,
                "delta" => self.map.delta = value,
                "occ_thresh" => self.map.occ_thresh = value,
                "llsamplerange" => self.sampling.llsamplerange = value,
                "llsamplestep" => self.sampling.llsamplestep = value,
                "lasamplerange" => self.sampling.lasamplerange = value,
                "lasamplestep" => self.sampling.lasamplestep = value,
                "seed" => self.seed = Some(value as u64),
                _ => return Err(SlamError::invalid_parameter(key, "unknown parameter")),
            }
        }

        // tf_delay follows the publish period unless set explicitly
        if tf_delay_follows_period {
            if let Some(&period) = params.get("transform_publish_period") {
                self.timing.tf_delay = period;
            }
        }

        self.validate()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), SlamError> {
        if self.timing.throttle_scans == 0 {
            return Err(SlamError::invalid_parameter("throttle_scans", "must be at least 1"));
        }
        if self.timing.transform_publish_period < 0.0 {
            return Err(SlamError::invalid_parameter(
                "transform_publish_period",
                "must be non-negative",
            ));
        }
        if self.timing.map_update_interval < 0.0 {
            return Err(SlamError::invalid_parameter(
                "map_update_interval",
                "must be non-negative",
            ));
        }
        if self.timing.transform_wait < 0.0 {
            return Err(SlamError::invalid_parameter("transform_wait", "must be non-negative"));
        }
        if self.timing.tf_cache_time <= 0.0 {
            return Err(SlamError::invalid_parameter("tf_cache_time", "must be positive"));
        }
        if self.map.delta <= 0.0 {
            return Err(SlamError::invalid_parameter("delta", "must be positive"));
        }
        if self.map.xmin >= self.map.xmax {
            return Err(SlamError::invalid_parameter("xmin", "must be smaller than xmax"));
        }
        if self.map.ymin >= self.map.ymax {
            return Err(SlamError::invalid_parameter("ymin", "must be smaller than ymax"));
        }
        if !(0.0..=1.0).contains(&self.map.occ_thresh) {
            return Err(SlamError::invalid_parameter("occ_thresh", "must lie in [0, 1]"));
        }
        if self.update.particles == 0 {
            return Err(SlamError::invalid_parameter("particles", "must be at least 1"));
        }
        if let Some(max_range) = self.laser.max_range {
            if max_range <= 0.0 {
                return Err(SlamError::invalid_parameter("maxRange", "must be positive"));
            }
        }
        if let Some(max_urange) = self.laser.max_urange {
            if max_urange <= 0.0 {
                return Err(SlamError::invalid_parameter("maxUrange", "must be positive"));
            }
        }
        Ok(())
    }

    pub fn transform_wait(&self) -> Duration {
        Duration::from_secs_f64(self.timing.transform_wait)
    }

    pub fn map_update_interval(&self) -> Stamp {
        stamp_from_secs(self.timing.map_update_interval)
    }

    pub fn tf_delay(&self) -> Stamp {
        stamp_from_secs(self.timing.tf_delay)
    }

    /// Load parameters from ROS node
    pub fn from_node(node: &Node) -> Result<Self> {
        let transform_publish_period: f64 = node
            .declare_parameter("transform_publish_period")
            .default(0.05)
            .mandatory()?
            .get();

        let optional_range = |value: f64| if value > 0.0 { Some(value) } else { None };

        let params = SlamParams {
            frames: FrameParams {
                base_frame: node
                    .declare_parameter::<Arc<str>>("base_frame")
                    .default("base_link".into())
                    .mandatory()?
                    .get()
                    .to_string(),
                map_frame: node
                    .declare_parameter::<Arc<str>>("map_frame")
                    .default("map".into())
                    .mandatory()?
                    .get()
                    .to_string(),
                odom_frame: node
                    .declare_parameter::<Arc<str>>("odom_frame")
                    .default("odom".into())
                    .mandatory()?
                    .get()
                    .to_string(),
            },
            timing: TimingParams {
                throttle_scans: node
                    .declare_parameter("throttle_scans")
                    .default(1)
                    .mandatory()?
                    .get()
                    .max(1) as u32,
                transform_publish_period,
                map_update_interval: node
                    .declare_parameter("map_update_interval")
                    .default(5.0)
                    .mandatory()?
                    .get(),
                // tf_delay follows the publish period unless set explicitly
                tf_delay: node
                    .declare_parameter("tf_delay")
                    .default(transform_publish_period)
                    .mandatory()?
                    .get(),
                transform_wait: node
                    .declare_parameter("transform_wait")
                    .default(0.1)
                    .mandatory()?
                    .get(),
                tf_cache_time: node
                    .declare_parameter("tf_cache_time")
                    .default(10.0)
                    .mandatory()?
                    .get(),
            },
            laser: LaserParams {
                // 0 means derive from the first scan
                max_range: optional_range(
                    node.declare_parameter("maxRange")
                        .default(0.0)
                        .mandatory()?
                        .get(),
                ),
                max_urange: optional_range(
                    node.declare_parameter("maxUrange")
                        .default(0.0)
                        .mandatory()?
                        .get(),
                ),
            },
            matching: MatchingParams {
                sigma: node
                    .declare_parameter("sigma")
                    .default(0.05)
                    .mandatory()?
                    .get(),
                kernel_size: node
                    .declare_parameter("kernelSize")
                    .default(1)
                    .mandatory()?
                    .get() as i32,
                lstep: node
                    .declare_parameter("lstep")
                    .default(0.05)
                    .mandatory()?
                    .get(),
                astep: node
                    .declare_parameter("astep")
                    .default(0.05)
                    .mandatory()?
                    .get(),
                iterations: node
                    .declare_parameter("iterations")
                    .default(5)
                    .mandatory()?
                    .get() as i32,
                lsigma: node
                    .declare_parameter("lsigma")
                    .default(0.075)
                    .mandatory()?
                    .get(),
                ogain: node
                    .declare_parameter("ogain")
                    .default(3.0)
                    .mandatory()?
                    .get(),
                lskip: node
                    .declare_parameter("lskip")
                    .default(0)
                    .mandatory()?
                    .get() as i32,
                minimum_score: node
                    .declare_parameter("minimumScore")
                    .default(0.0)
                    .mandatory()?
                    .get(),
            },
            motion: MotionModelParams {
                srr: node
                    .declare_parameter("srr")
                    .default(0.1)
                    .mandatory()?
                    .get(),
                srt: node
                    .declare_parameter("srt")
                    .default(0.2)
                    .mandatory()?
                    .get(),
                str: node
                    .declare_parameter("str")
                    .default(0.1)
                    .mandatory()?
                    .get(),
                stt: node
                    .declare_parameter("stt")
                    .default(0.2)
                    .mandatory()?
                    .get(),
            },
            update: UpdateParams {
                linear_update: node
                    .declare_parameter("linearUpdate")
                    .default(1.0)
                    .mandatory()?
                    .get(),
                angular_update: node
                    .declare_parameter("angularUpdate")
                    .default(0.5)
                    .mandatory()?
                    .get(),
                temporal_update: node
                    .declare_parameter("temporalUpdate")
                    .default(-1.0)
                    .mandatory()?
                    .get(),
                resample_threshold: node
                    .declare_parameter("resampleThreshold")
                    .default(0.5)
                    .mandatory()?
                    .get(),
                particles: node
                    .declare_parameter("particles")
                    .default(30)
                    .mandatory()?
                    .get()
                    .max(1) as usize,
            },
            sampling: SamplingParams {
                llsamplerange: node
                    .declare_parameter("llsamplerange")
                    .default(0.01)
                    .mandatory()?
                    .get(),
                llsamplestep: node
                    .declare_parameter("llsamplestep")
                    .default(0.01)
                    .mandatory()?
                    .get(),
                lasamplerange: node
                    .declare_parameter("lasamplerange")
                    .default(0.005)
                    .mandatory()?
                    .get(),
                lasamplestep: node
                    .declare_parameter("lasamplestep")
                    .default(0.005)
                    .mandatory()?
                    .get(),
            },
            map: MapParams {
                xmin: node
                    .declare_parameter("xmin")
                    .default(-100.0)
                    .mandatory()?
                    .get(),
                ymin: node
                    .declare_parameter("ymin")
                    .default(-100.0)
                    .mandatory()?
                    .get(),
                xmax: node
                    .declare_parameter("xmax")
                    .default(100.0)
                    .mandatory()?
                    .get(),
                ymax: node
                    .declare_parameter("ymax")
                    .default(100.0)
                    .mandatory()?
                    .get(),
                delta: node
                    .declare_parameter("delta")
                    .default(0.05)
                    .mandatory()?
                    .get(),
                occ_thresh: node
                    .declare_parameter("occ_thresh")
                    .default(0.25)
                    .mandatory()?
                    .get(),
            },
            seed: {
                // 0 means derive from the wall clock
                let seed: i64 = node
                    .declare_parameter("seed")
                    .default(0)
                    .mandatory()?
                    .get();
                if seed > 0 {
                    Some(seed as u64)
                } else {
                    None
                }
            },
        };

        params.validate()?;
        Ok(params)
    }
}
