//! Mapping: the particle filter seam, and everything built on its output.
pub mod adapter;
pub mod engine;
pub mod entropy;
pub mod occupancy;
pub mod odometry_filter;
pub mod scan_grid;

pub use adapter::MapperAdapter;
pub use engine::{FilterConfig, NodeId, Particle, ParticleFilter, RangeReading, TrajectoryArena, TrajectoryNode};
pub use occupancy::{MapMetaData, OccupancyGrid, OccupancyGridSynthesizer};
pub use odometry_filter::OdometryParticleFilter;
pub use scan_grid::{BeamModel, ScanGrid};
