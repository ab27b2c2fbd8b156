//! Patient records
//!
//! `validate_unique_patient` checks a record against existing ones without
//! storing it; `add_patient_record` stores it. Both answer `null` on
//! success.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{ErrorCode, ErrorTable};
use courier_fabric::{CallError, Client, Listener};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ADD_PATIENT_RECORD: &str = "add_patient_record";
pub const VALIDATE_UNIQUE_PATIENT: &str = "validate_unique_patient";

pub const DUPLICATED_PATIENT_ID: ErrorCode = ErrorCode::from_static("DUPLICATED_PATIENT_ID");
pub const DUPLICATED_PATIENT_NATIONAL_ID: ErrorCode =
    ErrorCode::from_static("DUPLICATED_PATIENT_NATIONAL_ID");
pub const INVALID_PATIENT_NATIONAL_ID: ErrorCode =
    ErrorCode::from_static("INVALID_PATIENT_NATIONAL_ID");

const NATIONAL_ID_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
}

impl PatientRecord {
    /// Check the national id format: exactly eleven ASCII digits, if present
    pub fn validate(&self) -> Result<(), PatientError> {
        match &self.national_id {
            Some(id) if !is_valid_national_id(id) => {
                Err(PatientError::InvalidNationalId(format!("invalid national id '{id}'")))
            }
            _ => Ok(()),
        }
    }
}

pub fn is_valid_national_id(id: &str) -> bool {
    id.len() == NATIONAL_ID_LEN && id.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatientError {
    #[error("{0}")]
    DuplicatedId(String),

    #[error("{0}")]
    DuplicatedNationalId(String),

    #[error("{0}")]
    InvalidNationalId(String),

    #[error("{0}")]
    Database(String),
}

pub fn errors() -> ErrorTable<PatientError> {
    ErrorTable::new()
        .map(
            DUPLICATED_PATIENT_ID,
            |e| matches!(e, PatientError::DuplicatedId(_)),
            PatientError::DuplicatedId,
        )
        .map(
            DUPLICATED_PATIENT_NATIONAL_ID,
            |e| matches!(e, PatientError::DuplicatedNationalId(_)),
            PatientError::DuplicatedNationalId,
        )
        .map(
            INVALID_PATIENT_NATIONAL_ID,
            |e| matches!(e, PatientError::InvalidNationalId(_)),
            PatientError::InvalidNationalId,
        )
        .map(
            ErrorCode::DATABASE_ERROR,
            |e| matches!(e, PatientError::Database(_)),
            PatientError::Database,
        )
}

#[async_trait]
pub trait PatientService: Send + Sync + 'static {
    async fn add_patient_record(&self, record: PatientRecord) -> Result<(), PatientError>;

    async fn validate_unique_patient(&self, record: PatientRecord) -> Result<(), PatientError>;
}

pub async fn serve<S: PatientService>(
    listener: &Listener,
    service: Arc<S>,
) -> courier_fabric::Result<()> {
    let svc = Arc::clone(&service);
    listener
        .serve_typed(ADD_PATIENT_RECORD, errors(), move |record: PatientRecord| {
            let svc = Arc::clone(&svc);
            async move {
                record.validate()?;
                svc.add_patient_record(record).await
            }
        })
        .await?;

    listener
        .serve_typed(VALIDATE_UNIQUE_PATIENT, errors(), move |record: PatientRecord| {
            let svc = Arc::clone(&service);
            async move {
                record.validate()?;
                svc.validate_unique_patient(record).await
            }
        })
        .await
}

pub struct PatientClient {
    client: Arc<Client>,
    errors: ErrorTable<PatientError>,
}

impl PatientClient {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            errors: errors(),
        }
    }

    pub async fn add_patient_record(
        &self,
        record: &PatientRecord,
    ) -> Result<(), CallError<PatientError>> {
        self.client
            .invoke(ADD_PATIENT_RECORD, record, &self.errors)
            .await
    }

    pub async fn validate_unique_patient(
        &self,
        record: &PatientRecord,
    ) -> Result<(), CallError<PatientError>> {
        self.client
            .invoke(VALIDATE_UNIQUE_PATIENT, record, &self.errors)
            .await
    }
}
