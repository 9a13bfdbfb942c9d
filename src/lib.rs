//! Client for the clinic backend's payment endpoints (`pagos/`).

pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;

pub use error::{Error, TransportError, ValidationError};
pub use repositories::api::{ApiClient, Transport};
pub use repositories::pagos::PaymentsClient;
