//! # Resclaw Gateway
//!
//! Axum HTTP surface: admin CRUD for areas/customers/slots/attempts, the
//! public callback endpoint the automation service reports back to, and
//! health probes.

pub mod external;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
