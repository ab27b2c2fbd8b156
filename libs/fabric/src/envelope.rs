use courier_core::RemoteError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Result};

/// The `{data | error}` wrapper around every RPC response
///
/// On the wire it is `{"data": <raw JSON>}` or
/// `{"error": {"code": "...", "message": "..."}}`. The `data` payload is
/// carried verbatim: the bytes a handler produced are the bytes the caller
/// receives. Whitespace around the payload cannot survive the wrapper, so
/// padded payloads are refused rather than trimmed.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(
        default,
        alias = "Data",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    data: Option<Box<RawValue>>,

    #[serde(default, alias = "Error", skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

/// Keep an explicit `null` payload instead of folding it into "absent"
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Wrap a successful response; `data` must be a JSON document with no
    /// surrounding whitespace
    pub fn success(data: Vec<u8>) -> Result<Self> {
        let text = String::from_utf8(data).map_err(Error::encoding)?;
        if text.trim().len() != text.len() {
            return Err(Error::Encoding(
                "payload has whitespace around the JSON value".to_string(),
            ));
        }
        let raw = RawValue::from_string(text).map_err(Error::encoding)?;
        Ok(Self {
            data: Some(raw),
            error: None,
        })
    }

    pub fn failure(error: RemoteError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::encoding)
    }

    /// Parse an envelope, rejecting bodies that carry neither or both halves
    ///
    /// A `null` payload next to an error counts as absent.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(Error::encoding)?;
        let has_data = envelope
            .data
            .as_ref()
            .is_some_and(|raw| envelope.error.is_none() || raw.get() != "null");

        match (has_data, envelope.error.is_some()) {
            (true, true) => Err(Error::Encoding(
                "envelope carries both data and error".to_string(),
            )),
            (false, false) => Err(Error::Encoding(
                "envelope carries neither data nor error".to_string(),
            )),
            _ => Ok(envelope),
        }
    }

    /// The payload bytes, or the remote failure
    pub fn into_result(self) -> std::result::Result<Vec<u8>, RemoteError> {
        match (self.error, self.data) {
            (Some(error), _) => Err(error),
            (None, Some(raw)) => Ok(String::from(Box::<str>::from(raw)).into_bytes()),
            (None, None) => Err(RemoteError::internal()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ErrorCode;

    #[test]
    fn success_keeps_payload_bytes() {
        let payload = br#"{"id":"0b6f13da","username":"jdoe","tags":[1, 2]}"#.to_vec();
        let bytes = Envelope::success(payload.clone()).unwrap().to_vec().unwrap();
        let decoded = Envelope::from_slice(&bytes).unwrap().into_result().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn failure_wire_shape() {
        let envelope = Envelope::failure(RemoteError::not_found("user not found"));
        let value: serde_json::Value = serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"error": {"code": "NOT_FOUND", "message": "user not found"}})
        );
    }

    #[test]
    fn null_payload_is_a_success() {
        let envelope = Envelope::from_slice(br#"{"data":null}"#).unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.into_result().unwrap(), b"null");
    }

    #[test]
    fn null_payload_next_to_error_is_a_failure() {
        let body = br#"{"Data":null,"Error":{"code":"DATABASE_ERROR","message":"write failed"}}"#;
        let err = Envelope::from_slice(body).unwrap().into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::DATABASE_ERROR);
    }

    #[test]
    fn rejects_ambiguous_envelopes() {
        let both = br#"{"data":{"a":1},"error":{"code":"INTERNAL","message":"x"}}"#;
        assert!(matches!(Envelope::from_slice(both), Err(Error::Encoding(_))));
        assert!(matches!(Envelope::from_slice(b"{}"), Err(Error::Encoding(_))));
        assert!(matches!(Envelope::from_slice(b"not json"), Err(Error::Encoding(_))));
    }

    #[test]
    fn non_json_payload_cannot_be_wrapped() {
        assert!(matches!(
            Envelope::success(b"plain text".to_vec()),
            Err(Error::Encoding(_))
        ));
        assert!(Envelope::success(Vec::new()).is_err());
    }

    #[test]
    fn padded_payload_is_refused() {
        let padded: [&[u8]; 3] = [b"{\"a\":1}\n", b" [1,2]", b"\t\"jdoe\"\r\n"];
        for payload in padded {
            assert!(matches!(
                Envelope::success(payload.to_vec()),
                Err(Error::Encoding(_))
            ));
        }
        // Inner whitespace is part of the value and kept
        let bytes = Envelope::success(b"{ \"a\" : 1 }".to_vec()).unwrap().to_vec().unwrap();
        let decoded = Envelope::from_slice(&bytes).unwrap().into_result().unwrap();
        assert_eq!(decoded, b"{ \"a\" : 1 }");
    }

    #[test]
    fn capitalised_error_fields_decode() {
        let body = br#"{"Data":null,"Error":{"Code":"NOT_FOUND","Message":"user not found"}}"#;
        let err = Envelope::from_slice(body).unwrap().into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::NOT_FOUND);
        assert_eq!(err.message, "user not found");
    }
}
