//! Perception side of the SLAM pipeline: turning raw scans into
//! filter-ready readings and poses.
pub mod filters;
pub mod gate;
pub mod geometry;
pub mod odometry;
pub mod sensors;

pub use gate::{prepare_ranges, GateDecision, GateState, ScanGate};
pub use geometry::{FrameGeometryResolver, MountOrientation, SensorGeometry};
pub use odometry::OdometryPoseTracker;
pub use sensors::RangeScan;
