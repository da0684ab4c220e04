pub mod common;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mapping;
pub mod perception;
pub mod publisher;
pub mod ros;
pub mod slam;
pub mod transform;

pub use config::SlamParams;
pub use error::SlamError;
pub use slam::{MapOutput, ScanOutcome, SlamGmapping};
