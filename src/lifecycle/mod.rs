//! Lifecycle management for SLAM components

use crate::error::SlamError;
use parking_lot::Mutex;

/// Trait for components that follow a lifecycle pattern.
///
/// Transitions take `&self` so a component can keep serving callbacks from
/// other threads while it is being reconfigured.
pub trait LifecycleNode: Send + Sync {
    /// Configure the node
    fn on_configure(&self) -> Result<(), SlamError>;

    /// Activate the node
    fn on_activate(&self) -> Result<(), SlamError>;

    /// Deactivate the node
    fn on_deactivate(&self) -> Result<(), SlamError>;

    /// Clean up the node
    fn on_cleanup(&self) -> Result<(), SlamError>;
}

/// Base implementation for lifecycle nodes
#[derive(Debug)]
pub struct LifecycleNodeBase {
    pub name: String,
    state: Mutex<State>,
}

/// State of a lifecycle node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Inactive,
    Active,
}

impl LifecycleNodeBase {
    /// Create a new lifecycle node base
    pub fn new(name: &str) -> Self {
        LifecycleNodeBase {
            name: name.to_string(),
            state: Mutex::new(State::Unconfigured),
        }
    }

    /// Get the current state
    pub fn get_state(&self) -> State {
        *self.state.lock()
    }

    /// Move to `to` if currently in `from`.
    pub fn transition(&self, from: State, to: State) -> Result<(), SlamError> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(SlamError::InvalidTransition {
                node: self.name.clone(),
                from: *state,
                to,
            });
        }
        *state = to;
        Ok(())
    }
}
