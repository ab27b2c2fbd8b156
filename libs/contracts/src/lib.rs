//! Courier Contracts - the queues services expose to each other
//!
//! Each module names its queues and owns the payload types, the domain
//! error enum with its [`ErrorTable`](courier_core::ErrorTable), a service
//! trait for the owning side and a typed client for callers. `serve`
//! registers a service implementation on a [`Listener`](courier_fabric::Listener).
//!
//! Every payload is JSON, including bare strings: a username travels as
//! `"jdoe"` with quotes and mail bodies are plain UTF-8 text. Peers that
//! read request bodies as raw bytes or expect base64-encoded byte arrays
//! cannot talk to these queues without an adapter.

pub mod geo;
pub mod mail;
pub mod patient;
pub mod user;

pub use geo::{GeoClient, GeoError, GeoService, Location, ReverseGeocodeRequest};
pub use mail::{MailClient, MailError, MailService, SendMailRequest};
pub use patient::{PatientClient, PatientError, PatientRecord, PatientService};
pub use user::{Role, User, UserClient, UserError, UserService};
