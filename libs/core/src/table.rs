use std::fmt;

use crate::code::{ErrorCode, RemoteError};

/// Two-way mapping between a service's domain errors and wire codes
///
/// The listener side uses [`ErrorTable::encode`] to turn a domain error into
/// the `{code, message}` pair of an error envelope; the client side uses
/// [`ErrorTable::decode`] to rebuild the typed error from that pair.
///
/// Each entry holds a predicate that recognises the variant and a
/// constructor that rebuilds it from the envelope message. Errors no entry
/// recognises encode as `INTERNAL` with a generic message.
pub struct ErrorTable<E> {
    entries: Vec<Entry<E>>,
}

struct Entry<E> {
    code: ErrorCode,
    matches: fn(&E) -> bool,
    rebuild: fn(String) -> E,
}

impl<E> ErrorTable<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a code for the variant `matches` recognises
    ///
    /// The first entry registered for a code wins on decode, and the first
    /// entry whose predicate matches wins on encode.
    pub fn map(mut self, code: ErrorCode, matches: fn(&E) -> bool, rebuild: fn(String) -> E) -> Self {
        self.entries.push(Entry {
            code,
            matches,
            rebuild,
        });
        self
    }

    /// Rebuild the typed error for a known code
    pub fn decode(&self, remote: &RemoteError) -> Option<E> {
        self.entries
            .iter()
            .find(|entry| entry.code == remote.code)
            .map(|entry| (entry.rebuild)(remote.message.clone()))
    }

    /// Whether any entry claims `code`
    pub fn knows(&self, code: &ErrorCode) -> bool {
        self.entries.iter().any(|entry| &entry.code == code)
    }

    /// Codes in registration order
    pub fn codes(&self) -> impl Iterator<Item = &ErrorCode> {
        self.entries.iter().map(|entry| &entry.code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: fmt::Display> ErrorTable<E> {
    /// Map a domain error onto its wire form
    pub fn encode(&self, err: &E) -> RemoteError {
        match self.entries.iter().find(|entry| (entry.matches)(err)) {
            Some(entry) => RemoteError::new(entry.code.clone(), err.to_string()),
            None => RemoteError::internal(),
        }
    }
}

impl<E> Default for ErrorTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ErrorTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.code.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, thiserror::Error)]
    enum AccountError {
        #[error("{0}")]
        NotFound(String),
        #[error("{0}")]
        DuplicatedEmail(String),
        #[error("connection pool exhausted at db-3:5432")]
        Pool,
    }

    fn table() -> ErrorTable<AccountError> {
        ErrorTable::new()
            .map(
                ErrorCode::NOT_FOUND,
                |e| matches!(e, AccountError::NotFound(_)),
                AccountError::NotFound,
            )
            .map(
                ErrorCode::from_static("DUPLICATED_USER_EMAIL"),
                |e| matches!(e, AccountError::DuplicatedEmail(_)),
                AccountError::DuplicatedEmail,
            )
    }

    #[test]
    fn every_entry_survives_encode_then_decode() {
        let table = table();
        let samples = [
            AccountError::NotFound("user jdoe not found".into()),
            AccountError::DuplicatedEmail("jdoe@mail.com is taken".into()),
        ];

        for original in samples {
            let remote = table.encode(&original);
            let rebuilt = table.decode(&remote).expect("mapped code decodes");
            let again = table.encode(&rebuilt);
            assert_eq!(remote, again);
            assert_eq!(rebuilt, original);
        }
    }

    #[test]
    fn unmapped_error_becomes_generic_internal() {
        let remote = table().encode(&AccountError::Pool);
        assert_eq!(remote, RemoteError::internal());
        assert!(!remote.message.contains("db-3"));
    }

    #[test]
    fn unknown_code_does_not_decode() {
        let remote = RemoteError::new(ErrorCode::from_static("TEAPOT"), "short and stout");
        assert!(table().decode(&remote).is_none());
        assert!(!table().knows(&remote.code));
    }

    #[test]
    fn codes_keep_registration_order() {
        let table = table();
        let codes: Vec<&str> = table.codes().map(ErrorCode::as_str).collect();
        assert_eq!(codes, ["NOT_FOUND", "DUPLICATED_USER_EMAIL"]);
        assert_eq!(table.len(), 2);
    }
}
