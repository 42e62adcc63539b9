//! External integration endpoints — called by the UiPath automation, not by
//! admin users.
//!
//! The update endpoint is the callback consumer: it correlates a result that
//! arrives minutes or hours after dispatch back to the customer and attempt
//! that produced it, and advances both in one atomic commit.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

use resclaw_core::types::ReservationStatus;
use resclaw_db::CallbackOutcome;

use super::server::AppState;

/// Callback endpoint for UiPath to report a reservation outcome.
///
/// Body: `{national_id, status: SUCCESS|FAILED, response_code, message,
/// additional_data?, attempt_id?}`. The customer's status is set to the
/// reported one and the correlated attempt — `attempt_id` when given, the
/// most recent unresolved attempt otherwise — is stamped with the inbound
/// result, message stored exactly as received. Both updates commit together
/// or not at all.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(national_id) = body["national_id"].as_str().filter(|s| !s.is_empty()) else {
        return validation_error("Missing 'national_id'");
    };
    let status = match body["status"].as_str() {
        Some("SUCCESS") => ReservationStatus::Success,
        Some("FAILED") => ReservationStatus::Failed,
        Some(other) => {
            return validation_error(&format!("Invalid status '{other}' (SUCCESS or FAILED expected)"));
        }
        None => return validation_error("Missing 'status'"),
    };
    let Some(response_code) = body["response_code"].as_i64() else {
        return validation_error("Missing 'response_code'");
    };
    let Some(message) = body["message"].as_str() else {
        return validation_error("Missing 'message'");
    };
    let additional_data = body
        .get("additional_data")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let attempt_id = body["attempt_id"].as_i64();

    tracing::info!(
        "Received external update for national_id {national_id}: {}",
        status.as_str()
    );

    match state.db.apply_callback(
        national_id,
        status,
        response_code,
        message,
        &additional_data,
        attempt_id,
    ) {
        Ok(CallbackOutcome::CustomerNotFound) => {
            tracing::error!("External update for unknown national_id {national_id}");
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"success": false, "message": "Customer not found"})),
            )
        }
        Ok(CallbackOutcome::Applied { customer_id, attempt_id }) => {
            if attempt_id.is_none() {
                tracing::warn!("No unresolved reservation attempt for customer {customer_id}");
            }
            tracing::info!(
                "Updated status for customer {customer_id} to {}",
                status.as_str()
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Status updated successfully",
                    "customer_id": customer_id,
                    "updated_status": status.as_str(),
                })),
            )
        }
        Err(e) => {
            tracing::error!("External update for {national_id} failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"success": false, "message": e})),
            )
        }
    }
}

fn validation_error(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("Validation error in external update: {message}");
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"success": false, "errors": message})),
    )
}

/// Health check for the automation service.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::post};
    use resclaw_core::config::UiPathConfig;
    use resclaw_db::ReservationDb;
    use resclaw_scheduler::{SlotScheduler, process_slot};
    use resclaw_uipath::UiPathClient;
    use std::path::PathBuf;

    fn state_with_client(url: &str) -> Arc<AppState> {
        let db = Arc::new(ReservationDb::open(&PathBuf::from(":memory:")).unwrap());
        let client = Arc::new(UiPathClient::new(&UiPathConfig {
            api_url: url.into(),
            auth_timeout_secs: 2,
            send_timeout_secs: 2,
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

    async fn spawn_accepting_stub() -> String {
        let app = Router::new()
            .route("/oauth/token", post(|| async {
                Json(serde_json::json!({"access_token": "tok", "expires_in": 3600}))
            }))
            .route("/reservations", post(|| async {
                Json(serde_json::json!({"message": "queued"}))
            }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_dispatch_then_callback_end_to_end() {
        let url = spawn_accepting_stub().await;
        let state = state_with_client(&url);
        let db = &state.db;

        // slot for "north" with two OPEN customers
        let area = db.create_area("north", "", "").unwrap();
        let a = db.create_customer("Alice", "0911", "A123", area.id).unwrap();
        let b = db.create_customer("Bob", "0922", "B456", area.id).unwrap();
        let slot = db.create_slot(area.id, Utc::now()).unwrap();

        // dispatch fires: two attempts, two sends
        let client = Arc::new(UiPathClient::new(&UiPathConfig {
            api_url: url.clone(),
            ..UiPathConfig::default()
        }));
        process_slot(db, &client, slot.id).await.unwrap();
        assert_eq!(db.list_attempts(None, Some(slot.id)).unwrap().len(), 2);

        // the automation reports back for A123 only
        let (status, Json(resp)) = update_status(
            State(state.clone()),
            Json(serde_json::json!({
                "national_id": "A123",
                "status": "SUCCESS",
                "response_code": 200,
                "message": "OK",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["success"], true);
        assert_eq!(resp["updated_status"], "SUCCESS");

        let alice = db.get_customer(a.id).unwrap().unwrap();
        assert_eq!(alice.reservation_status, ReservationStatus::Success);
        let attempt = db.list_attempts(Some(a.id), None).unwrap().remove(0);
        assert!(attempt.is_resolved());
        assert_eq!(attempt.response_status, Some(ReservationStatus::Success));
        assert_eq!(attempt.response_code, Some(200));
        assert_eq!(attempt.response_message.as_deref(), Some("OK"));

        // B456 is untouched: still OPEN, attempt unresolved
        let bob = db.get_customer(b.id).unwrap().unwrap();
        assert_eq!(bob.reservation_status, ReservationStatus::Open);
        let bob_attempt = db.list_attempts(Some(b.id), None).unwrap().remove(0);
        assert!(!bob_attempt.is_resolved());
    }

    #[tokio::test]
    async fn test_callback_unknown_national_id_404() {
        let state = state_with_client("http://127.0.0.1:9");

        let (status, Json(resp)) = update_status(
            State(state.clone()),
            Json(serde_json::json!({
                "national_id": "Z999",
                "status": "FAILED",
                "response_code": 500,
                "message": "no slot available",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp["message"], "Customer not found");
    }

    #[tokio::test]
    async fn test_callback_malformed_body_400() {
        let state = state_with_client("http://127.0.0.1:9");
        let area = state.db.create_area("north", "", "").unwrap();
        state.db.create_customer("Alice", "0911", "A123", area.id).unwrap();

        // missing status
        let (status, _) = update_status(
            State(state.clone()),
            Json(serde_json::json!({"national_id": "A123", "response_code": 200, "message": "OK"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // OPEN is not a reportable outcome
        let (status, _) = update_status(
            State(state.clone()),
            Json(serde_json::json!({
                "national_id": "A123", "status": "OPEN", "response_code": 200, "message": "OK",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // nothing was mutated
        let alice = state.db.get_customer_by_national_id("A123").unwrap().unwrap();
        assert_eq!(alice.reservation_status, ReservationStatus::Open);
    }

    #[tokio::test]
    async fn test_callback_without_attempt_still_updates_status() {
        let state = state_with_client("http://127.0.0.1:9");
        let area = state.db.create_area("north", "", "").unwrap();
        state.db.create_customer("Alice", "0911", "A123", area.id).unwrap();

        let (status, Json(resp)) = update_status(
            State(state.clone()),
            Json(serde_json::json!({
                "national_id": "A123",
                "status": "FAILED",
                "response_code": 422,
                "message": "slot already taken",
                "additional_data": {"queue_position": null},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["success"], true);

        let alice = state.db.get_customer_by_national_id("A123").unwrap().unwrap();
        assert_eq!(alice.reservation_status, ReservationStatus::Failed);
    }

    #[tokio::test]
    async fn test_callback_message_preserved_verbatim() {
        let state = state_with_client("http://127.0.0.1:9");
        let db = &state.db;
        let area = db.create_area("north", "", "").unwrap();
        let alice = db.create_customer("Alice", "0911", "A123", area.id).unwrap();
        let slot = db.create_slot(area.id, Utc::now()).unwrap();
        db.create_attempt(alice.id, slot.id, &serde_json::json!({})).unwrap();

        let raw = "  خطأ: الموعد غير متاح \n(code=E-17)  ";
        let (status, _) = update_status(
            State(state.clone()),
            Json(serde_json::json!({
                "national_id": "A123",
                "status": "FAILED",
                "response_code": 417,
                "message": raw,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let attempt = db.list_attempts(Some(alice.id), None).unwrap().remove(0);
        assert_eq!(attempt.response_message.as_deref(), Some(raw));
        assert_eq!(attempt.response_payload.unwrap()["message"], raw);
    }

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].as_str().is_some());
    }
}
