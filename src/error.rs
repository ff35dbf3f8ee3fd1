use thiserror::Error;

use crate::bridge::BridgeError;
use crate::gateway::ReturnParseError;

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("failed to serialize app message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Return(#[from] ReturnParseError),
    #[error("no configuration staged for submission")]
    NothingStaged,
    #[error("no stored preset")]
    NoPreset,
    #[error("configuration overlay already closed")]
    Closed,
}
