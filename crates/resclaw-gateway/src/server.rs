//! HTTP server implementation using Axum.

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use resclaw_core::config::GatewayConfig;
use resclaw_db::ReservationDb;
use resclaw_scheduler::SlotScheduler;

/// Shared state for the gateway server.
pub struct AppState {
    /// Long-lived owner of every area/customer/slot/attempt record.
    pub db: Arc<ReservationDb>,
    /// Owner of the armed slot timers.
    pub scheduler: Arc<SlotScheduler>,
    /// Admin token guarding CRUD routes. None = open (development).
    pub admin_token: Option<String>,
    pub start_time: std::time::Instant,
}

/// Admin auth middleware — validates X-Admin-Token header or ?token= query.
/// Callback and health routes never pass through here.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // If no token configured, allow all
    let Some(expected) = &state.admin_token else {
        return next.run(req).await;
    };

    let from_header = req
        .headers()
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if token == expected {
                    return next.run(req).await;
                }
            }
        }
    }

    axum::response::Response::builder()
        .status(axum::http::StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"success": false, "message": "Unauthorized — invalid or missing admin token"})
                .to_string(),
        ))
        .unwrap()
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    // Protected admin routes
    let protected = Router::new()
        .route("/api/areas", get(super::routes::list_areas).post(super::routes::create_area))
        .route(
            "/api/areas/{id}",
            get(super::routes::get_area)
                .put(super::routes::update_area)
                .delete(super::routes::delete_area),
        )
        .route(
            "/api/customers",
            get(super::routes::list_customers).post(super::routes::create_customer),
        )
        .route(
            "/api/customers/{id}",
            get(super::routes::get_customer)
                .put(super::routes::update_customer)
                .delete(super::routes::delete_customer),
        )
        .route("/api/slots", get(super::routes::list_slots).post(super::routes::create_slot))
        .route(
            "/api/slots/{id}",
            get(super::routes::get_slot)
                .put(super::routes::update_slot)
                .delete(super::routes::delete_slot),
        )
        .route("/api/attempts", get(super::routes::list_attempts))
        .route("/api/attempts/{id}", get(super::routes::get_attempt))
        .route("/api/stats", get(super::routes::stats))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&shared),
            require_admin,
        ));

    // Public routes — the automation service calls these
    let public = Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/external/update", post(super::external::update_status))
        .route("/api/external/health", get(super::external::health));

    protected
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                ])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(
    config: &GatewayConfig,
    db: Arc<ReservationDb>,
    scheduler: Arc<SlotScheduler>,
) -> std::io::Result<()> {
    let state = Arc::new(AppState {
        db,
        scheduler,
        admin_token: if config.admin_token.is_empty() {
            None
        } else {
            Some(config.admin_token.clone())
        },
        start_time: std::time::Instant::now(),
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway server listening on http://{addr}");

    axum::serve(listener, app).await
}
