//! Courier Core - shared error taxonomy for broker RPC
//!
//! Every RPC response that fails carries a `{code, message}` pair. This crate
//! defines the code vocabulary ([`ErrorCode`]), the wire form of a failure
//! ([`RemoteError`]) and the table that maps a service's domain errors onto
//! codes and back ([`ErrorTable`]).
//!
//! # Example
//!
//! ```
//! use courier_core::{ErrorCode, ErrorTable};
//!
//! #[derive(Debug, thiserror::Error)]
//! enum LookupError {
//!     #[error("{0}")]
//!     NotFound(String),
//!     #[error("storage offline")]
//!     Offline,
//! }
//!
//! let table = ErrorTable::new().map(
//!     ErrorCode::NOT_FOUND,
//!     |e| matches!(e, LookupError::NotFound(_)),
//!     LookupError::NotFound,
//! );
//!
//! let remote = table.encode(&LookupError::NotFound("no such user".into()));
//! assert_eq!(remote.code, ErrorCode::NOT_FOUND);
//! assert!(matches!(table.decode(&remote), Some(LookupError::NotFound(_))));
//!
//! // Unmapped variants never leak their text
//! let remote = table.encode(&LookupError::Offline);
//! assert_eq!(remote.code, ErrorCode::INTERNAL);
//! ```

pub mod code;
pub mod error;
pub mod table;

pub use code::{ErrorCode, RemoteError};
pub use error::{Error, Result};
pub use table::ErrorTable;
