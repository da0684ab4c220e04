//! ROS 2 glue: message conversions, the `/tf` broadcaster and the map
//! publishers.

use crate::common::types::{stamp_from_parts, stamp_to_parts, Stamp};
use crate::mapping::{MapMetaData, OccupancyGrid};
use crate::perception::RangeScan;
use crate::slam::MapOutput;
use crate::transform::{StampedTransform, TransformSink};
use builtin_interfaces::msg::Time;
use geometry_msgs::msg::{Point, Pose, Quaternion, Transform, TransformStamped, Vector3};
use nalgebra::UnitQuaternion;
use rclrs::{log_warn, Node, Publisher, QoSDurabilityPolicy, QoSProfile, RclrsError, QOS_PROFILE_DEFAULT};
use sensor_msgs::msg::LaserScan;
use std::sync::Arc;
use std_msgs::msg::{Float64, Header};
use tf2_msgs::msg::TFMessage;

const LOGGER_NAME: &str = "slam_gmapping.ros";

pub fn time_from_stamp(stamp: Stamp) -> Time {
    let (sec, nanosec) = stamp_to_parts(stamp);
    Time { sec, nanosec }
}

pub fn stamp_from_time(time: &Time) -> Stamp {
    stamp_from_parts(time.sec, time.nanosec)
}

fn quaternion_to_msg(q: &UnitQuaternion<f64>) -> Quaternion {
    Quaternion {
        x: q.i,
        y: q.j,
        z: q.k,
        w: q.w,
    }
}

pub fn range_scan_from_msg(msg: &LaserScan) -> RangeScan {
    RangeScan {
        frame_id: msg.header.frame_id.clone(),
        stamp: stamp_from_time(&msg.header.stamp),
        angle_min: f64::from(msg.angle_min),
        angle_max: f64::from(msg.angle_max),
        angle_increment: f64::from(msg.angle_increment),
        range_min: f64::from(msg.range_min),
        range_max: f64::from(msg.range_max),
        ranges: msg.ranges.iter().map(|&r| f64::from(r)).collect(),
    }
}

pub fn transform_to_msg(transform: &StampedTransform) -> TransformStamped {
    let t = &transform.transform;
    TransformStamped {
        header: Header {
            stamp: time_from_stamp(transform.stamp),
            frame_id: transform.parent_frame.clone(),
        },
        child_frame_id: transform.child_frame.clone(),
        transform: Transform {
            translation: Vector3 {
                x: t.translation.x,
                y: t.translation.y,
                z: t.translation.z,
            },
            rotation: quaternion_to_msg(&t.rotation),
        },
    }
}

pub fn map_metadata_to_msg(info: &MapMetaData) -> nav_msgs::msg::MapMetaData {
    let origin = &info.origin;
    nav_msgs::msg::MapMetaData {
        map_load_time: Time::default(),
        resolution: info.resolution as f32,
        width: info.width,
        height: info.height,
        origin: Pose {
            position: Point {
                x: origin.x,
                y: origin.y,
                z: 0.0,
            },
            orientation: quaternion_to_msg(&UnitQuaternion::from_euler_angles(0.0, 0.0, origin.theta)),
        },
    }
}

pub fn occupancy_grid_to_msg(grid: &OccupancyGrid) -> nav_msgs::msg::OccupancyGrid {
    nav_msgs::msg::OccupancyGrid {
        header: Header {
            stamp: time_from_stamp(grid.stamp),
            frame_id: grid.frame_id.clone(),
        },
        info: map_metadata_to_msg(&grid.info),
        data: grid.data.clone(),
    }
}

/// `dynamic_map` answer. Without a map the response carries an empty grid.
pub fn get_map_response(grid: Option<OccupancyGrid>) -> nav_msgs::srv::GetMap_Response {
    match grid {
        Some(grid) => nav_msgs::srv::GetMap_Response {
            map: occupancy_grid_to_msg(&grid),
        },
        None => {
            log_warn!(LOGGER_NAME, "dynamic_map requested before a map was built");
            nav_msgs::srv::GetMap_Response::default()
        }
    }
}

/// Latched QoS for topics late joiners need to see.
fn latched() -> QoSProfile {
    QoSProfile {
        durability: QoSDurabilityPolicy::TransientLocal,
        ..QOS_PROFILE_DEFAULT
    }
}

/// Publishes transforms on `/tf`.
pub struct TfBroadcaster {
    publisher: Arc<Publisher<TFMessage>>,
}

impl TfBroadcaster {
    pub fn new(node: &Node) -> Result<Self, RclrsError> {
        let publisher = node.create_publisher::<TFMessage>("/tf", QOS_PROFILE_DEFAULT)?;
        Ok(TfBroadcaster { publisher })
    }
}

impl TransformSink for TfBroadcaster {
    fn send_transform(&self, transform: &StampedTransform) {
        let msg = TFMessage {
            transforms: vec![transform_to_msg(transform)],
        };
        if let Err(e) = self.publisher.publish(&msg) {
            log_warn!(LOGGER_NAME, "Failed to broadcast transform: {}", e);
        }
    }
}

/// Publishes `map`, `map_metadata` and `entropy`.
pub struct RosMapSink {
    map: Arc<Publisher<nav_msgs::msg::OccupancyGrid>>,
    metadata: Arc<Publisher<nav_msgs::msg::MapMetaData>>,
    entropy: Arc<Publisher<Float64>>,
}

impl RosMapSink {
    pub fn new(node: &Node) -> Result<Self, RclrsError> {
        Ok(RosMapSink {
            map: node.create_publisher::<nav_msgs::msg::OccupancyGrid>("map", latched())?,
            metadata: node.create_publisher::<nav_msgs::msg::MapMetaData>("map_metadata", latched())?,
            entropy: node.create_publisher::<Float64>("entropy", QOS_PROFILE_DEFAULT)?,
        })
    }
}

impl MapOutput for RosMapSink {
    fn publish_map(&self, grid: &OccupancyGrid) {
        if let Err(e) = self.map.publish(&occupancy_grid_to_msg(grid)) {
            log_warn!(LOGGER_NAME, "Failed to publish map: {}", e);
        }
    }

    fn publish_metadata(&self, info: &MapMetaData) {
        if let Err(e) = self.metadata.publish(&map_metadata_to_msg(info)) {
            log_warn!(LOGGER_NAME, "Failed to publish map metadata: {}", e);
        }
    }

    fn publish_entropy(&self, entropy: f64) {
        if let Err(e) = self.entropy.publish(&Float64 { data: entropy }) {
            log_warn!(LOGGER_NAME, "Failed to publish entropy: {}", e);
        }
    }
}
