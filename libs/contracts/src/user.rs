//! Account lookups and registration
//!
//! | queue              | request    | response | error codes |
//! |--------------------|------------|----------|-------------|
//! | `find_by_username` | `"jdoe"`   | [`User`] | `NOT_FOUND` |
//! | `persist`          | [`User`]   | `null`   | `DUPLICATED_USER_ID`, `DUPLICATED_USERNAME`, `DUPLICATED_EMAIL`, `DATABASE_ERROR` |
//!
//! The `find_by_username` request is a JSON string, quotes included, not
//! the bare username bytes.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{ErrorCode, ErrorTable};
use courier_fabric::{CallError, Client, Listener};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const FIND_BY_USERNAME: &str = "find_by_username";
pub const PERSIST: &str = "persist";

pub const DUPLICATED_USER_ID: ErrorCode = ErrorCode::from_static("DUPLICATED_USER_ID");
pub const DUPLICATED_USERNAME: ErrorCode = ErrorCode::from_static("DUPLICATED_USERNAME");
pub const DUPLICATED_EMAIL: ErrorCode = ErrorCode::from_static("DUPLICATED_EMAIL");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Password hash, never the plain text
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DuplicatedId(String),

    #[error("{0}")]
    DuplicatedUsername(String),

    #[error("{0}")]
    DuplicatedEmail(String),

    #[error("{0}")]
    Database(String),
}

impl UserError {
    pub fn not_found(username: &str) -> Self {
        Self::NotFound(format!("no user named '{username}'"))
    }

    pub fn username_taken(username: &str) -> Self {
        Self::DuplicatedUsername(format!("username '{username}' is already taken"))
    }

    pub fn email_taken(email: &str) -> Self {
        Self::DuplicatedEmail(format!("email '{email}' is already registered"))
    }
}

pub fn errors() -> ErrorTable<UserError> {
    ErrorTable::new()
        .map(
            ErrorCode::NOT_FOUND,
            |e| matches!(e, UserError::NotFound(_)),
            UserError::NotFound,
        )
        .map(
            DUPLICATED_USER_ID,
            |e| matches!(e, UserError::DuplicatedId(_)),
            UserError::DuplicatedId,
        )
        .map(
            DUPLICATED_USERNAME,
            |e| matches!(e, UserError::DuplicatedUsername(_)),
            UserError::DuplicatedUsername,
        )
        .map(
            DUPLICATED_EMAIL,
            |e| matches!(e, UserError::DuplicatedEmail(_)),
            UserError::DuplicatedEmail,
        )
        .map(
            ErrorCode::DATABASE_ERROR,
            |e| matches!(e, UserError::Database(_)),
            UserError::Database,
        )
}

/// Account storage as exposed by the service owning it
#[async_trait]
pub trait UserService: Send + Sync + 'static {
    async fn find_by_username(&self, username: String) -> Result<User, UserError>;

    async fn persist(&self, user: User) -> Result<(), UserError>;
}

/// Register `service` on both user queues
pub async fn serve<S: UserService>(listener: &Listener, service: Arc<S>) -> courier_fabric::Result<()> {
    let svc = Arc::clone(&service);
    listener
        .serve_typed(FIND_BY_USERNAME, errors(), move |username: String| {
            let svc = Arc::clone(&svc);
            async move { svc.find_by_username(username).await }
        })
        .await?;

    listener
        .serve_typed(PERSIST, errors(), move |user: User| {
            let svc = Arc::clone(&service);
            async move { svc.persist(user).await }
        })
        .await
}

/// Caller side of the user queues
pub struct UserClient {
    client: Arc<Client>,
    errors: ErrorTable<UserError>,
}

impl UserClient {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            errors: errors(),
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<User, CallError<UserError>> {
        self.client
            .invoke(FIND_BY_USERNAME, username, &self.errors)
            .await
    }

    pub async fn persist(&self, user: &User) -> Result<(), CallError<UserError>> {
        self.client.invoke(PERSIST, user, &self.errors).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_request_is_a_json_string() {
        let body = serde_json::to_vec("jdoe").unwrap();
        assert_eq!(body, br#""jdoe""#);
        assert!(serde_json::from_slice::<String>(b"jdoe").is_err());
    }

    #[test]
    fn user_wire_shape() {
        let user = User {
            id: Uuid::nil(),
            username: "jdoe".into(),
            email: "jdoe@mail.com".into(),
            password: "$2a$12$hash".into(),
            role: Role::Patient,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["role"], "patient");
        assert_eq!(value["id"], "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn every_variant_has_a_code() {
        let table = errors();
        let samples = [
            UserError::not_found("a"),
            UserError::DuplicatedId("b".into()),
            UserError::username_taken("c"),
            UserError::email_taken("d"),
            UserError::Database("e".into()),
        ];
        for err in samples {
            let remote = table.encode(&err);
            assert_ne!(remote.code, ErrorCode::INTERNAL);
            assert_eq!(table.decode(&remote), Some(err));
        }
    }
}
