use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Machine-readable failure code carried in an error envelope
///
/// Codes are upper-case snake identifiers such as `NOT_FOUND` or
/// `DUPLICATED_PATIENT_NATIONAL_ID`. Codes received from the wire are kept
/// verbatim; [`ErrorCode::new`] validates codes built locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(Cow<'static, str>);

impl ErrorCode {
    /// The requested entity does not exist
    pub const NOT_FOUND: ErrorCode = ErrorCode::from_static("NOT_FOUND");

    /// Catch-all for failures that have no dedicated code
    pub const INTERNAL: ErrorCode = ErrorCode::from_static("INTERNAL");

    /// The request body could not be decoded
    pub const INVALID_REQUEST: ErrorCode = ErrorCode::from_static("INVALID_REQUEST");

    /// The domain service's storage rejected the operation
    pub const DATABASE_ERROR: ErrorCode = ErrorCode::from_static("DATABASE_ERROR");

    /// Build a code from a literal without validation
    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    /// Build a validated code
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if is_valid(&code) {
            Ok(Self(Cow::Owned(code)))
        } else {
            Err(Error::InvalidCode(code))
        }
    }

    /// `DUPLICATED_<ENTITY>_<FIELD>`, e.g. `duplicated("patient", "national_id")`
    pub fn duplicated(entity: &str, field: &str) -> Result<Self> {
        Self::new(format!(
            "DUPLICATED_{}_{}",
            entity.to_ascii_uppercase(),
            field.to_ascii_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(code: &str) -> bool {
    !code.is_empty()
        && !code.starts_with('_')
        && !code.ends_with('_')
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ErrorCode {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ErrorCode {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// The `error` half of a response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct RemoteError {
    #[serde(alias = "Code")]
    pub code: ErrorCode,
    #[serde(alias = "Message")]
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Generic internal failure; the message never carries internal detail
    pub fn internal() -> Self {
        Self::new(ErrorCode::INTERNAL, "internal error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NOT_FOUND, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicated_builds_entity_field_code() {
        let code = ErrorCode::duplicated("patient", "national_id").unwrap();
        assert_eq!(code, "DUPLICATED_PATIENT_NATIONAL_ID");
    }

    #[test]
    fn new_rejects_malformed_codes() {
        assert!(ErrorCode::new("not_found").is_err());
        assert!(ErrorCode::new("").is_err());
        assert!(ErrorCode::new("_LEADING").is_err());
        assert!(ErrorCode::new("WITH SPACE").is_err());
        assert_eq!(ErrorCode::new("HTTP_404").unwrap(), "HTTP_404");
    }

    #[test]
    fn remote_error_wire_shape() {
        let err = RemoteError::not_found("user jdoe not found");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": "NOT_FOUND", "message": "user jdoe not found"})
        );
    }

    #[test]
    fn wire_codes_are_kept_verbatim() {
        let err: RemoteError =
            serde_json::from_str(r#"{"code":"some-legacy-code","message":"m"}"#).unwrap();
        assert_eq!(err.code, "some-legacy-code");
    }

    #[test]
    fn capitalised_field_names_are_accepted() {
        let err: RemoteError =
            serde_json::from_str(r#"{"Code":"NOT_FOUND","Message":"user not found"}"#).unwrap();
        assert_eq!(err, RemoteError::not_found("user not found"));
        // Output always uses the lowercase names
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"code":"NOT_FOUND","message":"user not found"}"#);
    }

    #[test]
    fn internal_message_is_generic() {
        let err = RemoteError::internal();
        assert_eq!(err.code, ErrorCode::INTERNAL);
        assert_eq!(err.message, "internal error");
    }
}
