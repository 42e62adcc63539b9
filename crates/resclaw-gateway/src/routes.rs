//! Admin API route handlers for the gateway.
//!
//! Response shape follows one convention: `{"success": bool, ...}` with the
//! record under `"data"`. Validation failures are 400, missing records 404,
//! database failures 500.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use resclaw_core::types::ReservationStatus;

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(data: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(serde_json::json!({"success": true, "data": data})))
}

fn created(message: &str, data: serde_json::Value) -> ApiResponse {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({"success": true, "message": message, "data": data})),
    )
}

fn bad_request(message: &str) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"success": false, "message": message})),
    )
}

fn not_found(message: &str) -> ApiResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"success": false, "message": message})),
    )
}

fn db_error(e: String) -> ApiResponse {
    tracing::error!("Database error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"success": false, "message": e})),
    )
}

fn to_value<T: serde::Serialize>(v: &T) -> serde_json::Value {
    serde_json::to_value(v).unwrap_or_default()
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "resclaw-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "armed_timers": state.scheduler.armed_count(),
    }))
}

// ── Areas ──────────────────────────────

pub async fn list_areas(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.list_areas() {
        Ok(areas) => ok(to_value(&areas)),
        Err(e) => db_error(e),
    }
}

pub async fn create_area(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(name) = body["name"].as_str().filter(|s| !s.is_empty()) else {
        return bad_request("Missing 'name'");
    };
    let description = body["description"].as_str().unwrap_or("");
    let link = body["link"].as_str().unwrap_or("");

    match state.db.create_area(name, description, link) {
        Ok(area) => created("Area created successfully", to_value(&area)),
        Err(e) if e.contains("UNIQUE") => bad_request("Area name already exists"),
        Err(e) => db_error(e),
    }
}

pub async fn get_area(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_area(id) {
        Ok(Some(area)) => ok(to_value(&area)),
        Ok(None) => not_found("Area not found"),
        Err(e) => db_error(e),
    }
}

pub async fn update_area(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let area = match state.db.get_area(id) {
        Ok(Some(a)) => a,
        Ok(None) => return not_found("Area not found"),
        Err(e) => return db_error(e),
    };

    let name = body["name"].as_str().unwrap_or(&area.name);
    let description = body["description"].as_str().unwrap_or(&area.description);
    let link = body["link"].as_str().unwrap_or(&area.link);
    let is_active = body["is_active"].as_bool().unwrap_or(area.is_active);

    if let Err(e) = state.db.update_area(id, name, description, link, is_active) {
        return db_error(e);
    }
    match state.db.get_area(id) {
        Ok(Some(a)) => ok(to_value(&a)),
        Ok(None) => not_found("Area not found"),
        Err(e) => db_error(e),
    }
}

pub async fn delete_area(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_area(id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Area not found"),
        Err(e) => return db_error(e),
    }
    match state.db.delete_area(id) {
        Ok(()) => ok(serde_json::json!({"deleted": id})),
        Err(e) => db_error(e),
    }
}

// ── Customers ──────────────────────────────

#[derive(Deserialize)]
pub struct CustomerFilter {
    pub area_id: Option<i64>,
    pub status: Option<String>,
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<CustomerFilter>,
) -> ApiResponse {
    let status = filter.status.as_deref().map(ReservationStatus::parse);
    match state.db.list_customers(filter.area_id, status) {
        Ok(customers) => ok(to_value(&customers)),
        Err(e) => db_error(e),
    }
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(name) = body["name"].as_str().filter(|s| !s.is_empty()) else {
        return bad_request("Missing 'name'");
    };
    let Some(phone_number) = body["phone_number"].as_str().filter(|s| !s.is_empty()) else {
        return bad_request("Missing 'phone_number'");
    };
    let Some(national_id) = body["national_id"].as_str().filter(|s| !s.is_empty()) else {
        return bad_request("Missing 'national_id'");
    };
    let Some(area_id) = body["area_id"].as_i64() else {
        return bad_request("Missing 'area_id'");
    };

    match state.db.get_area(area_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Area not found"),
        Err(e) => return db_error(e),
    }

    match state.db.create_customer(name, phone_number, national_id, area_id) {
        Ok(customer) => created("Customer created successfully", to_value(&customer)),
        Err(e) if e.contains("UNIQUE") => bad_request("National ID already registered"),
        Err(e) => db_error(e),
    }
}

pub async fn get_customer(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_customer(id) {
        Ok(Some(customer)) => ok(to_value(&customer)),
        Ok(None) => not_found("Customer not found"),
        Err(e) => db_error(e),
    }
}

pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let customer = match state.db.get_customer(id) {
        Ok(Some(c)) => c,
        Ok(None) => return not_found("Customer not found"),
        Err(e) => return db_error(e),
    };

    let name = body["name"].as_str().unwrap_or(&customer.name);
    let phone_number = body["phone_number"].as_str().unwrap_or(&customer.phone_number);
    let area_id = body["area_id"].as_i64().unwrap_or(customer.area_id);

    if body["area_id"].is_i64() {
        match state.db.get_area(area_id) {
            Ok(Some(_)) => {}
            Ok(None) => return not_found("Area not found"),
            Err(e) => return db_error(e),
        }
    }

    if let Err(e) = state.db.update_customer(id, name, phone_number, area_id) {
        return db_error(e);
    }
    match state.db.get_customer(id) {
        Ok(Some(c)) => ok(to_value(&c)),
        Ok(None) => not_found("Customer not found"),
        Err(e) => db_error(e),
    }
}

pub async fn delete_customer(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_customer(id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Customer not found"),
        Err(e) => return db_error(e),
    }
    match state.db.delete_customer(id) {
        Ok(()) => ok(serde_json::json!({"deleted": id})),
        Err(e) => db_error(e),
    }
}

// ── Reservation slots ──────────────────────────────

#[derive(Deserialize)]
pub struct SlotFilter {
    pub area_id: Option<i64>,
    pub is_processed: Option<bool>,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SlotFilter>,
) -> ApiResponse {
    match state.db.list_slots(filter.area_id, filter.is_processed) {
        Ok(slots) => ok(to_value(&slots)),
        Err(e) => db_error(e),
    }
}

fn parse_datetime(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

pub async fn create_slot(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(area_id) = body["area_id"].as_i64() else {
        return bad_request("Missing 'area_id'");
    };
    let Some(at) = parse_datetime(&body["scheduled_datetime"]) else {
        return bad_request("Missing or invalid 'scheduled_datetime' (RFC 3339 expected)");
    };

    match state.db.get_area(area_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Area not found"),
        Err(e) => return db_error(e),
    }

    if at <= Utc::now() {
        return bad_request("Scheduled datetime must be in the future");
    }

    let slot = match state.db.create_slot(area_id, at) {
        Ok(s) => s,
        Err(e) => return db_error(e),
    };

    state.scheduler.schedule(slot.id, slot.scheduled_datetime);

    created("Reservation slot created and scheduled successfully", to_value(&slot))
}

pub async fn get_slot(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_slot(id) {
        Ok(Some(slot)) => ok(to_value(&slot)),
        Ok(None) => not_found("Reservation slot not found"),
        Err(e) => db_error(e),
    }
}

pub async fn update_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let slot = match state.db.get_slot(id) {
        Ok(Some(s)) => s,
        Ok(None) => return not_found("Reservation slot not found"),
        Err(e) => return db_error(e),
    };

    if slot.is_processed {
        return bad_request("Cannot update a processed reservation slot");
    }

    let Some(at) = parse_datetime(&body["scheduled_datetime"]) else {
        return bad_request("Missing or invalid 'scheduled_datetime' (RFC 3339 expected)");
    };
    if at <= Utc::now() {
        return bad_request("Scheduled datetime must be in the future");
    }

    if let Err(e) = state.db.update_slot_datetime(id, at) {
        return db_error(e);
    }

    // replaces the armed timer — only the new instant fires
    state.scheduler.schedule(id, at);

    match state.db.get_slot(id) {
        Ok(Some(s)) => ok(to_value(&s)),
        Ok(None) => not_found("Reservation slot not found"),
        Err(e) => db_error(e),
    }
}

pub async fn delete_slot(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    let slot = match state.db.get_slot(id) {
        Ok(Some(s)) => s,
        Ok(None) => return not_found("Reservation slot not found"),
        Err(e) => return db_error(e),
    };

    if slot.is_processed {
        return bad_request("Cannot delete a processed reservation slot");
    }

    state.scheduler.cancel(id);

    match state.db.delete_slot(id) {
        Ok(()) => ok(serde_json::json!({"deleted": id})),
        Err(e) => db_error(e),
    }
}

// ── Attempts ──────────────────────────────

#[derive(Deserialize)]
pub struct AttemptFilter {
    pub customer_id: Option<i64>,
    pub slot_id: Option<i64>,
}

pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AttemptFilter>,
) -> ApiResponse {
    match state.db.list_attempts(filter.customer_id, filter.slot_id) {
        Ok(attempts) => ok(to_value(&attempts)),
        Err(e) => db_error(e),
    }
}

pub async fn get_attempt(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_attempt(id) {
        Ok(Some(attempt)) => ok(to_value(&attempt)),
        Ok(None) => not_found("Attempt not found"),
        Err(e) => db_error(e),
    }
}

// ── Stats ──────────────────────────────

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.stats() {
        Ok(s) => ok(s),
        Err(e) => db_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resclaw_core::config::UiPathConfig;
    use resclaw_db::ReservationDb;
    use resclaw_scheduler::SlotScheduler;
    use resclaw_uipath::UiPathClient;
    use std::path::PathBuf;

    fn test_state() -> Arc<AppState> {
        let db = Arc::new(ReservationDb::open(&PathBuf::from(":memory:")).unwrap());
        let client = Arc::new(UiPathClient::new(&UiPathConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..UiPathConfig::default()
        }));
        let scheduler = SlotScheduler::new(db.clone(), client, 300);
        Arc::new(AppState {
            db,
            scheduler,
            admin_token: None,
            start_time: std::time::Instant::now(),
        })
    }

    fn seeded_area(state: &Arc<AppState>) -> i64 {
        state.db.create_area("north", "", "").unwrap().id
    }

    #[tokio::test]
    async fn test_create_slot_requires_future_datetime() {
        let state = test_state();
        let area_id = seeded_area(&state);

        let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let (status, _) = create_slot(
            State(state.clone()),
            Json(serde_json::json!({"area_id": area_id, "scheduled_datetime": past})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_create_slot_schedules_timer() {
        let state = test_state();
        let area_id = seeded_area(&state);

        let at = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let (status, Json(body)) = create_slot(
            State(state.clone()),
            Json(serde_json::json!({"area_id": area_id, "scheduled_datetime": at})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(state.scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn test_create_slot_unknown_area_404() {
        let state = test_state();
        let at = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let (status, _) = create_slot(
            State(state),
            Json(serde_json::json!({"area_id": 42, "scheduled_datetime": at})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_processed_slot_rejected() {
        let state = test_state();
        let area_id = seeded_area(&state);
        let slot = state
            .db
            .create_slot(area_id, Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        state.db.mark_slot_processed(slot.id).unwrap();

        let at = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        let (status, _) = update_slot(
            State(state.clone()),
            Path(slot.id),
            Json(serde_json::json!({"scheduled_datetime": at})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_slot_cancels_timer() {
        let state = test_state();
        let area_id = seeded_area(&state);

        let at = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let (_, Json(body)) = create_slot(
            State(state.clone()),
            Json(serde_json::json!({"area_id": area_id, "scheduled_datetime": at})),
        )
        .await;
        let slot_id = body["data"]["id"].as_i64().unwrap();
        assert_eq!(state.scheduler.armed_count(), 1);

        let (status, _) = delete_slot(State(state.clone()), Path(slot_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.scheduler.armed_count(), 0);
        assert!(state.db.get_slot(slot_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_customer_duplicate_national_id_rejected() {
        let state = test_state();
        let area_id = seeded_area(&state);

        let body = serde_json::json!({
            "name": "Alice", "phone_number": "0911", "national_id": "A123", "area_id": area_id,
        });
        let (status, _) = create_customer(State(state.clone()), Json(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, Json(resp)) = create_customer(State(state.clone()), Json(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["message"], "National ID already registered");
    }

    #[tokio::test]
    async fn test_get_missing_customer_404() {
        let state = test_state();
        let (status, _) = get_customer(State(state), Path(77)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_area_crud_roundtrip() {
        let state = test_state();

        let (status, Json(body)) = create_area(
            State(state.clone()),
            Json(serde_json::json!({"name": "west", "description": "west side"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_i64().unwrap();

        let (_, Json(body)) = update_area(
            State(state.clone()),
            Path(id),
            Json(serde_json::json!({"is_active": false})),
        )
        .await;
        assert_eq!(body["data"]["is_active"], false);
        assert_eq!(body["data"]["name"], "west");

        let (status, _) = delete_area(State(state.clone()), Path(id)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get_area(State(state), Path(id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
