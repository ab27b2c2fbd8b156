use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::message::CONTENT_TYPE_JSON;

/// JSON codec, the format of every envelope on the wire
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Encoding(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Lookup {
        username: String,
    }

    #[test]
    fn encodes_compact_json() {
        let bytes = JsonCodec
            .encode(&Lookup {
                username: "jdoe".into(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"username":"jdoe"}"#);
    }

    #[test]
    fn malformed_input_is_an_encoding_error() {
        let result: Result<Lookup> = JsonCodec.decode(b"{\"username\":");
        assert!(matches!(result, Err(Error::Encoding(_))));
    }
}
