//! Engine-level errors.

use mirror_core::error::ExchangeError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Classified exchange failure, passed through unchanged.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// The mirror store could not be read or written.
    #[error("order store: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// The exchange error behind this failure, if any.
    pub fn as_exchange(&self) -> Option<&ExchangeError> {
        match self {
            Self::Exchange(e) => Some(e),
            Self::Store(_) => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
