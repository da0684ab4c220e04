//! Transform lookup and broadcast interfaces
//!
//! The SLAM pipeline only needs two things from a transform system: look up
//! a rigid transform between named frames at a time (optionally waiting a
//! bounded amount for it to show up), and broadcast one. Both are traits so
//! the pipeline can run against the in-process [`TfBuffer`] or anything else.

pub mod buffer;
pub mod diagnostics;

pub use buffer::TfBuffer;
pub use diagnostics::TransformDiagnostics;

use crate::common::types::Stamp;
use nalgebra::Isometry3;
use std::time::Duration;
use thiserror::Error;

/// Why a transform could not be produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("frame `{0}` does not exist")]
    UnknownFrame(String),

    #[error("frames `{source_frame}` and `{target_frame}` are not part of the same tree")]
    NotConnected {
        source_frame: String,
        target_frame: String,
    },

    #[error(
        "lookup of `{parent}` -> `{child}` would require extrapolation to {requested} \
         (buffered {earliest}..={latest})"
    )]
    Extrapolation {
        parent: String,
        child: String,
        requested: Stamp,
        earliest: Stamp,
        latest: Stamp,
    },

    #[error("timed out after {waited:?} waiting for `{source_frame}` -> `{target_frame}`: {last}")]
    Timeout {
        source_frame: String,
        target_frame: String,
        waited: Duration,
        last: Box<TransformError>,
    },
}

/// A rigid transform between two named frames at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    /// Frame the transform is expressed in.
    pub parent_frame: String,
    /// Frame being described.
    pub child_frame: String,
    pub stamp: Stamp,
    /// Maps points in `child_frame` into `parent_frame`.
    pub transform: Isometry3<f64>,
}

/// Read side of the transform system.
pub trait TransformSource: Send + Sync {
    /// Transform mapping points in `source_frame` into `target_frame` at
    /// `stamp` (0 = latest), waiting up to `timeout` for the data to arrive.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<Isometry3<f64>, TransformError>;

    /// Whether the lookup would currently succeed within `timeout`.
    fn can_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<(), TransformError> {
        self.lookup_transform(target_frame, source_frame, stamp, timeout)
            .map(|_| ())
    }
}

/// Write side of the transform system.
pub trait TransformSink: Send + Sync {
    fn send_transform(&self, transform: &StampedTransform);
}
