use snapshot_sink::StoreError;
use thiserror::Error;

/// Per-target failure classification. Transport and validation problems are
/// both "try again later" conditions and retry within the run; persistence
/// faults surface immediately.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid upstream payload: {0}")]
    Validation(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}
