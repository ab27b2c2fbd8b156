//! Reverse geocoding
//!
//! The geo service resolves coordinates through an external API, so its
//! client waits longer than the default call timeout. Every failure is
//! reported as `INTERNAL`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{ErrorCode, ErrorTable};
use courier_fabric::{CallError, Client, Listener};
use serde::{Deserialize, Serialize};

pub const REVERSE_GEOCODE: &str = "reverse_geocode";

pub const GEO_CALL_TIMEOUT: Duration = Duration::from_secs(8);

/// Coordinates as decimal strings, e.g. `"40.7579554"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseGeocodeRequest {
    pub lat: String,
    pub lon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub osm_id: i64,
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeoError {
    #[error("{0}")]
    Failed(String),
}

impl GeoError {
    pub fn failed() -> Self {
        Self::Failed("Failed to perform reverse geocoding".to_string())
    }
}

pub fn errors() -> ErrorTable<GeoError> {
    ErrorTable::new().map(
        ErrorCode::INTERNAL,
        |e| matches!(e, GeoError::Failed(_)),
        GeoError::Failed,
    )
}

#[async_trait]
pub trait GeoService: Send + Sync + 'static {
    async fn reverse_geocode(&self, request: ReverseGeocodeRequest) -> Result<Location, GeoError>;
}

pub async fn serve<S: GeoService>(listener: &Listener, service: Arc<S>) -> courier_fabric::Result<()> {
    listener
        .serve_typed(REVERSE_GEOCODE, errors(), move |request: ReverseGeocodeRequest| {
            let svc = Arc::clone(&service);
            async move { svc.reverse_geocode(request).await }
        })
        .await
}

pub struct GeoClient {
    client: Arc<Client>,
    errors: ErrorTable<GeoError>,
    timeout: Duration,
}

impl GeoClient {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            errors: errors(),
            timeout: GEO_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn reverse_geocode(
        &self,
        lat: &str,
        lon: &str,
    ) -> Result<Location, CallError<GeoError>> {
        let request = ReverseGeocodeRequest {
            lat: lat.to_string(),
            lon: lon.to_string(),
        };
        self.client
            .invoke_with_timeout(REVERSE_GEOCODE, &request, &self.errors, self.timeout)
            .await
    }
}
