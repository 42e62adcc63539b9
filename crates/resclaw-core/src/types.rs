//! Data model shared by the scheduler, dispatcher, and gateway.
//!
//! Records are owned by the database and referenced by id across component
//! boundaries — never by live pointer. The scheduler holds only slot ids;
//! the callback consumer looks customers up by national id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reservation status of a customer.
///
/// OPEN on creation; moved to SUCCESS or FAILED exclusively by the external
/// callback consumer. Stays OPEN forever if no callback ever arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Open,
    Success,
    Failed,
}

impl ReservationStatus {
    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the database/wire representation. Unknown values map to OPEN.
    pub fn parse(s: &str) -> Self {
        match s {
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            _ => Self::Open,
        }
    }
}

/// A geographical area customers and slots belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Link to the land location / details page.
    pub link: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A customer eligible for reservation dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone_number: String,
    /// Stable external key — the correlation id carried by callbacks.
    pub national_id: String,
    pub area_id: i64,
    pub reservation_status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scheduled dispatch slot for one area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationSlot {
    pub id: i64,
    pub area_id: i64,
    pub scheduled_datetime: DateTime<Utc>,
    /// Irreversibly true once the dispatch routine has finished the batch.
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One dispatch attempt: a customer × slot pairing with outbound request
/// data, completed later by the callback with the inbound result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationAttempt {
    pub id: i64,
    pub customer_id: i64,
    pub reservation_slot_id: i64,

    // Outbound side — written by the dispatch routine.
    pub request_sent_at: Option<DateTime<Utc>>,
    pub request_payload: Option<serde_json::Value>,

    // Inbound side — written by the callback consumer, null until resolved.
    pub response_received_at: Option<DateTime<Utc>>,
    pub response_status: Option<ReservationStatus>,
    pub response_code: Option<i64>,
    /// Stored exactly as received — no reformatting.
    pub response_message: Option<String>,
    pub response_payload: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationAttempt {
    /// An attempt is unresolved until the callback stamps the inbound side.
    pub fn is_resolved(&self) -> bool {
        self.response_received_at.is_some()
    }
}
