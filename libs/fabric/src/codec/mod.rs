use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub mod json;

pub use self::json::JsonCodec;

/// Codec trait for request and response payloads
pub trait Codec: Send + Sync {
    /// Content type stamped on messages encoded with this codec
    fn content_type(&self) -> &'static str;

    /// Encode a value into bytes
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a value
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}
