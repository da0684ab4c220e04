//! Error types for the SLAM pipeline

use crate::lifecycle::State;
use crate::transform::TransformError;
use thiserror::Error;

/// Errors raised by the SLAM coordination layer.
#[derive(Debug, Error)]
pub enum SlamError {
    #[error("transform lookup failed: {0}")]
    Transform(#[from] TransformError),

    #[error("laser has to be mounted planar! Z-coordinate has to be 1 or -1, but gave: {up_z:.5}")]
    NonPlanarMount { up_z: f64 },

    #[error("scan has {actual} beams but the mapper was initialized with {expected}")]
    BeamCountMismatch { expected: usize, actual: usize },

    #[error("mapper has not been initialized")]
    NotInitialized,

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("filter engine error: {0}")]
    Filter(String),

    #[error("{node}: cannot move to {to:?} from {from:?}")]
    InvalidTransition { node: String, from: State, to: State },
}

impl SlamError {
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        SlamError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
