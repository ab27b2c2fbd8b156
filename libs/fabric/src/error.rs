use std::time::Duration;

use courier_core::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("RPC timeout: no reply to {method} within {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Error envelope no typed error table claimed; callers treat it as an
    /// internal failure of the remote service
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::BrokerUnavailable(err.to_string())
    }

    pub fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding(err.to_string())
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::BrokerUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::encoding(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a typed call: either an RPC failure or the callee's domain error
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error(transparent)]
    Rpc(#[from] Error),

    #[error("{0}")]
    Domain(E),
}

impl<E> CallError<E> {
    pub fn domain(&self) -> Option<&E> {
        match self {
            Self::Domain(err) => Some(err),
            Self::Rpc(_) => None,
        }
    }

    pub fn rpc(&self) -> Option<&Error> {
        match self {
            Self::Rpc(err) => Some(err),
            Self::Domain(_) => None,
        }
    }
}
