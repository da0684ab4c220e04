//! In-process TF buffer.
//!
//! Subscribes to `/tf` and `/tf_static` and keeps a frame tree of
//! child -> parent edges. Dynamic edges keep a bounded history of samples
//! and are interpolated at the requested time; static edges hold one sample
//! valid at all times. Lookups may block for a bounded time waiting for data.
//!
//! # Example
//!
//! ```ignore
//! let tf = TfBuffer::new(Duration::from_secs(10));
//! let _subs = tf.subscribe(&node)?;
//!
//! // Pose of the laser in the odometry frame at the scan time
//! let odom_from_laser =
//!     tf.lookup_transform("odom", "laser", stamp, Duration::from_millis(100))?;
//! ```

use super::{StampedTransform, TransformError, TransformSource};
use crate::common::types::{stamp_from_parts, stamp_from_secs, Stamp};
use geometry_msgs::msg::TransformStamped;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use parking_lot::{Condvar, Mutex};
use rclrs::{log_debug, Node, QoSDurabilityPolicy, QoSProfile, Subscription, QOS_PROFILE_DEFAULT};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tf2_msgs::msg::TFMessage;

const LOGGER_NAME: &str = "slam_gmapping.tf_buffer";

/// A single sample of an edge.
#[derive(Clone, Debug)]
struct Sample {
    stamp: Stamp,
    transform: Isometry3<f64>,
}

/// Edge from a child frame to its parent.
#[derive(Clone, Debug)]
struct FrameEdge {
    parent: String,
    is_static: bool,
    /// Sorted by stamp, oldest first
    samples: VecDeque<Sample>,
}

impl FrameEdge {
    /// Parent-from-child transform at `stamp` (0 = latest).
    fn sample_at(&self, child: &str, stamp: Stamp) -> Result<Isometry3<f64>, TransformError> {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(TransformError::UnknownFrame(child.to_string())),
        };

        if self.is_static || stamp == 0 {
            return Ok(last.transform);
        }

        if stamp < first.stamp || stamp > last.stamp {
            return Err(TransformError::Extrapolation {
                parent: self.parent.clone(),
                child: child.to_string(),
                requested: stamp,
                earliest: first.stamp,
                latest: last.stamp,
            });
        }

        // First sample at or after the requested time
        let upper = self.samples.partition_point(|s| s.stamp < stamp);
        let after = &self.samples[upper];
        if after.stamp == stamp || upper == 0 {
            return Ok(after.transform);
        }

        let before = &self.samples[upper - 1];
        let t = (stamp - before.stamp) as f64 / (after.stamp - before.stamp) as f64;
        Ok(interpolate(&before.transform, &after.transform, t))
    }
}

/// Linear interpolation of translation, spherical of rotation.
fn interpolate(a: &Isometry3<f64>, b: &Isometry3<f64>, t: f64) -> Isometry3<f64> {
    let translation = a.translation.vector.lerp(&b.translation.vector, t);
    let rotation = a.rotation.slerp(&b.rotation, t);
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

fn normalize(frame: &str) -> &str {
    frame.trim_start_matches('/')
}

/// Frame tree keyed by child frame.
#[derive(Default, Debug)]
struct FrameGraph {
    edges: HashMap<String, FrameEdge>,
}

impl FrameGraph {
    fn contains(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.edges.values().any(|e| e.parent == frame)
    }

    /// Frames from `frame` up to the root, `frame` first.
    fn ancestry(&self, frame: &str) -> Vec<String> {
        let mut chain = vec![frame.to_string()];
        let mut current = frame;
        while let Some(edge) = self.edges.get(current) {
            // Malformed input can introduce a cycle
            if chain.len() > self.edges.len() || chain.iter().any(|f| *f == edge.parent) {
                break;
            }
            chain.push(edge.parent.clone());
            current = &edge.parent;
        }
        chain
    }

    /// `ancestor`-from-`frame` transform, walking up the tree.
    fn to_ancestor(
        &self,
        frame: &str,
        ancestor: &str,
        stamp: Stamp,
    ) -> Result<Isometry3<f64>, TransformError> {
        let mut acc = Isometry3::identity();
        let mut current = frame;
        while current != ancestor {
            let edge = self
                .edges
                .get(current)
                .ok_or_else(|| TransformError::UnknownFrame(current.to_string()))?;
            acc = edge.sample_at(current, stamp)? * acc;
            current = &edge.parent;
        }
        Ok(acc)
    }

    /// Newest time at which every dynamic edge between `frame` and `ancestor`
    /// has data, or `None` when the path is static.
    fn latest_common_stamp(&self, frame: &str, ancestor: &str) -> Option<Stamp> {
        let mut latest: Option<Stamp> = None;
        let mut current = frame;
        while current != ancestor {
            let Some(edge) = self.edges.get(current) else {
                break;
            };
            if !edge.is_static {
                if let Some(last) = edge.samples.back() {
                    latest = Some(latest.map_or(last.stamp, |l| l.min(last.stamp)));
                }
            }
            current = &edge.parent;
        }
        latest
    }

    fn resolve(
        &self,
        target: &str,
        source: &str,
        stamp: Stamp,
    ) -> Result<Isometry3<f64>, TransformError> {
        let target = normalize(target);
        let source = normalize(source);

        for frame in [target, source] {
            if !self.contains(frame) {
                return Err(TransformError::UnknownFrame(frame.to_string()));
            }
        }

        if source == target {
            return Ok(Isometry3::identity());
        }

        let source_chain = self.ancestry(source);
        let target_chain: HashSet<String> = self.ancestry(target).into_iter().collect();

        let common = source_chain
            .iter()
            .find(|f| target_chain.contains(*f))
            .ok_or_else(|| TransformError::NotConnected {
                source_frame: source.to_string(),
                target_frame: target.to_string(),
            })?;

        // "Latest" means the newest time shared by the whole chain
        let stamp = if stamp == 0 {
            match (
                self.latest_common_stamp(source, common),
                self.latest_common_stamp(target, common),
            ) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => 0,
            }
        } else {
            stamp
        };

        let common_from_source = self.to_ancestor(source, common, stamp)?;
        let common_from_target = self.to_ancestor(target, common, stamp)?;

        Ok(common_from_target.inverse() * common_from_source)
    }

    fn insert(&mut self, transform: StampedTransform, is_static: bool, cache_time: Stamp) {
        let child = normalize(&transform.child_frame).to_string();
        let parent = normalize(&transform.parent_frame).to_string();

        let edge = self.edges.entry(child).or_insert_with(|| FrameEdge {
            parent: parent.clone(),
            is_static,
            samples: VecDeque::new(),
        });

        // Re-parenting or switching between static and dynamic starts over
        if edge.parent != parent || edge.is_static != is_static {
            edge.parent = parent;
            edge.is_static = is_static;
            edge.samples.clear();
        }

        let sample = Sample {
            stamp: transform.stamp,
            transform: transform.transform,
        };

        if is_static {
            edge.samples.clear();
            edge.samples.push_back(sample);
            return;
        }

        let position = edge.samples.partition_point(|s| s.stamp < sample.stamp);
        if edge
            .samples
            .get(position)
            .is_some_and(|s| s.stamp == sample.stamp)
        {
            edge.samples[position] = sample;
        } else {
            edge.samples.insert(position, sample);
        }

        // Keep only the cache window behind the newest sample
        if let Some(newest) = edge.samples.back().map(|s| s.stamp) {
            while edge
                .samples
                .front()
                .is_some_and(|s| newest - s.stamp > cache_time)
            {
                edge.samples.pop_front();
            }
        }
    }
}

/// Subscriptions feeding a [`TfBuffer`]. Dropping them stops the updates.
pub struct TfSubscriptions {
    _tf: Arc<Subscription<TFMessage>>,
    _tf_static: Arc<Subscription<TFMessage>>,
}

/// TF2 transform buffer with bounded history and blocking lookups.
pub struct TfBuffer {
    graph: Mutex<FrameGraph>,
    updated: Condvar,
    cache_time: Stamp,
}

impl TfBuffer {
    /// Create an empty buffer keeping `cache_time` of dynamic history.
    pub fn new(cache_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            graph: Mutex::new(FrameGraph::default()),
            updated: Condvar::new(),
            cache_time: stamp_from_secs(cache_time.as_secs_f64()),
        })
    }

    /// Subscribe to `/tf` and `/tf_static` on `node`.
    pub fn subscribe(self: &Arc<Self>, node: &Node) -> Result<TfSubscriptions, rclrs::RclrsError> {
        let buffer = Arc::clone(self);
        let tf = node.create_subscription::<TFMessage, _>(
            "/tf",
            QOS_PROFILE_DEFAULT,
            move |msg: TFMessage| {
                buffer.on_tf_message(msg, false);
            },
        )?;

        let static_qos = QoSProfile {
            durability: QoSDurabilityPolicy::TransientLocal,
            ..QOS_PROFILE_DEFAULT
        };
        let buffer = Arc::clone(self);
        let tf_static = node.create_subscription::<TFMessage, _>(
            "/tf_static",
            static_qos,
            move |msg: TFMessage| {
                buffer.on_tf_message(msg, true);
            },
        )?;

        log_debug!(
            LOGGER_NAME,
            "TF buffer listening to /tf and /tf_static"
        );

        Ok(TfSubscriptions {
            _tf: tf,
            _tf_static: tf_static,
        })
    }

    /// Handle incoming TF messages.
    pub fn on_tf_message(&self, msg: TFMessage, is_static: bool) {
        let mut graph = self.graph.lock();
        for ts in msg.transforms {
            graph.insert(Self::from_msg(&ts), is_static, self.cache_time);
        }
        drop(graph);
        self.updated.notify_all();
    }

    /// Insert a single transform.
    pub fn set_transform(&self, transform: StampedTransform, is_static: bool) {
        self.graph
            .lock()
            .insert(transform, is_static, self.cache_time);
        self.updated.notify_all();
    }

    /// Known frame names.
    pub fn frames(&self) -> Vec<String> {
        let graph = self.graph.lock();
        let mut frames: HashSet<String> = HashSet::new();
        for (child, edge) in graph.edges.iter() {
            frames.insert(child.clone());
            frames.insert(edge.parent.clone());
        }
        frames.into_iter().collect()
    }

    /// Convert ROS TransformStamped into the buffer representation.
    fn from_msg(ts: &TransformStamped) -> StampedTransform {
        let t = &ts.transform;
        let translation = Translation3::new(t.translation.x, t.translation.y, t.translation.z);
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
            t.rotation.w,
            t.rotation.x,
            t.rotation.y,
            t.rotation.z,
        ));

        StampedTransform {
            parent_frame: ts.header.frame_id.clone(),
            child_frame: ts.child_frame_id.clone(),
            stamp: stamp_from_parts(ts.header.stamp.sec, ts.header.stamp.nanosec),
            transform: Isometry3::from_parts(translation, rotation),
        }
    }
}

impl TransformSource for TfBuffer {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<Isometry3<f64>, TransformError> {
        let deadline = Instant::now() + timeout;
        let mut graph = self.graph.lock();

        loop {
            let err = match graph.resolve(target_frame, source_frame, stamp) {
                Ok(transform) => return Ok(transform),
                Err(err) => err,
            };

            if timeout.is_zero() {
                return Err(err);
            }
            if Instant::now() >= deadline {
                return Err(TransformError::Timeout {
                    source_frame: source_frame.to_string(),
                    target_frame: target_frame.to_string(),
                    waited: timeout,
                    last: Box::new(err),
                });
            }

            self.updated.wait_until(&mut graph, deadline);
        }
    }
}
