//! # Resclaw Core
//!
//! Shared foundation for the Resclaw reservation dispatch service:
//! configuration, error types, and the data model passed between the
//! scheduler, the UiPath client, and the gateway.

pub mod config;
pub mod error;
pub mod types;

pub use config::ResclawConfig;
pub use error::{ResclawError, Result};
pub use types::{Area, Customer, ReservationAttempt, ReservationSlot, ReservationStatus};
