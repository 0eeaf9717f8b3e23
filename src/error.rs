//! Error taxonomy shared by every stage of the pipeline.
//!
//! Only `Burned` is ever turned into a persisted state change; everything
//! else is surfaced to the caller unmodified.

use thiserror::Error;

use crate::exchanges::Exchange;
use crate::ledger::PositionId;

#[derive(Debug, Error)]
pub enum Error {
    /// The position id no longer resolves on-chain (NFT burned). Terminal.
    #[error("position {position_id} on {exchange} has been burned")]
    Burned { position_id: PositionId, exchange: Exchange },

    /// RPC, HTTP or store failure. Not retried at this layer.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Missing or invalid input.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("position {position_id} on {exchange} is already tracked by {tracker_id}")]
    DuplicateTracking {
        position_id: PositionId,
        exchange: Exchange,
        tracker_id: String,
    },

    #[error("position {position_id} on {exchange} is not tracked by {tracker_id}")]
    NotTracked {
        position_id: PositionId,
        exchange: Exchange,
        tracker_id: String,
    },
}

impl Error {
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn is_burned(&self) -> bool {
        matches!(self, Error::Burned { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Transient(format!("store: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transient(format!("http: {}", err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
