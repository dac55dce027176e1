//! Error types for node provisioning

use crate::node::LifecycleState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Command `{command}` failed: {reason}")]
    Execution { command: String, reason: String },

    #[error("NAT rule rejected: {0}")]
    RuleTranslation(String),

    #[error("Node '{node}' cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        node: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeError {
    /// Execution failures are reported but never abort a lifecycle step
    pub fn is_execution(&self) -> bool {
        matches!(self, NodeError::Execution { .. })
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
