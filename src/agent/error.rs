use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::model::ModelError;
use crate::registry::RegistryError;

/// Errors surfaced by the agent core. `generate`/`stream` reject only when
/// the model call itself fails after retries or a structural invariant is
/// violated; tool and hook problems never land here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Agent configuration error: {0}")]
    Configuration(String),

    #[error("Agent error: {0}")]
    Other(String),
}
