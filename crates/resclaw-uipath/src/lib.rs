//! UiPath automation API client.
//!
//! Exchanges client credentials for a bearer token, caches it until just
//! before expiry, and posts reservation requests. The public boundary never
//! returns `Err`: every failure mode — auth, timeout, transport, non-2xx —
//! is folded into a [`DispatchOutcome`] so the dispatch routine can treat
//! failure as data and keep walking its batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

use resclaw_core::config::UiPathConfig;

/// Uniform result of one reservation send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub ok: bool,
    /// HTTP-shaped code: real status for responses, 401/408/500 for
    /// auth failure, timeout, and other transport errors.
    pub code: u16,
    pub message: String,
    /// Parsed response body on success, empty object otherwise.
    pub data: serde_json::Value,
}

impl DispatchOutcome {
    fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            message: message.into(),
            data: serde_json::json!({}),
        }
    }
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Client for the UiPath automation API.
pub struct UiPathClient {
    api_url: String,
    api_key: String,
    client_id: String,
    client_secret: String,
    auth_timeout: Duration,
    send_timeout: Duration,
    refresh_margin: chrono::Duration,
    token: Mutex<Option<CachedToken>>,
    client: reqwest::Client,
}

impl UiPathClient {
    /// Build a client from config.
    pub fn new(cfg: &UiPathConfig) -> Self {
        Self {
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            auth_timeout: Duration::from_secs(cfg.auth_timeout_secs),
            send_timeout: Duration::from_secs(cfg.send_timeout_secs),
            refresh_margin: chrono::Duration::seconds(cfg.token_refresh_margin_secs as i64),
            token: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    /// Exchange client credentials for a fresh access token.
    async fn authenticate(&self) -> Result<CachedToken, String> {
        let url = format!("{}/oauth/token", self.api_url);
        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.auth_timeout)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("token endpoint returned {}", resp.status()));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("token response parse failed: {e}"))?;

        let access_token = json["access_token"]
            .as_str()
            .ok_or_else(|| "token response missing access_token".to_string())?
            .to_string();
        let expires_in = json["expires_in"].as_i64().unwrap_or(3600);

        tracing::info!("Authenticated with UiPath API (token valid {expires_in}s)");
        Ok(CachedToken {
            access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in) - self.refresh_margin,
        })
    }

    /// Return a valid cached token, re-authenticating when absent or expired.
    async fn ensure_authenticated(&self) -> Result<String, String> {
        let mut token = self.token.lock().await;
        let expired = match token.as_ref() {
            Some(t) => Utc::now() >= t.expires_at,
            None => true,
        };
        if expired {
            *token = Some(self.authenticate().await?);
        }
        Ok(token.as_ref().map(|t| t.access_token.clone()).unwrap_or_default())
    }

    /// Send one reservation request.
    ///
    /// Never fails the caller: auth failure → 401, timeout → 408, other
    /// transport error → 500 with the cause in `message`, HTTP response →
    /// the actual status with `ok` true only for 200/201.
    pub async fn send_reservation(
        &self,
        national_id: &str,
        phone_number: &str,
        area: &str,
        additional_data: Option<&serde_json::Value>,
    ) -> DispatchOutcome {
        let token = match self.ensure_authenticated().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("UiPath authentication failed: {e}");
                return DispatchOutcome::failure(401, "Failed to authenticate with UiPath API");
            }
        };

        let mut payload = serde_json::json!({
            "national_id": national_id,
            "phone_number": phone_number,
            "area": area,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(extra) = additional_data.and_then(|v| v.as_object()) {
            for (k, v) in extra {
                payload[k] = v.clone();
            }
        }

        tracing::info!("Sending reservation request for national_id {national_id} (area {area})");

        let resp = self
            .client
            .post(format!("{}/reservations", self.api_url))
            .header("Authorization", format!("Bearer {token}"))
            .header("X-API-Key", &self.api_key)
            .json(&payload)
            .timeout(self.send_timeout)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                tracing::error!("UiPath reservation request timed out");
                return DispatchOutcome::failure(408, "Request timed out");
            }
            Err(e) => {
                tracing::error!("UiPath reservation request failed: {e}");
                return DispatchOutcome::failure(500, format!("Request failed: {e}"));
            }
        };

        let status = resp.status();
        let data: serde_json::Value = resp.json().await.unwrap_or_else(|_| serde_json::json!({}));
        let message = data["message"]
            .as_str()
            .unwrap_or("Request sent successfully")
            .to_string();

        let outcome = DispatchOutcome {
            ok: status.as_u16() == 200 || status.as_u16() == 201,
            code: status.as_u16(),
            message,
            data,
        };
        tracing::info!(
            "UiPath API response for {national_id}: {} {}",
            outcome.code,
            outcome.message
        );
        outcome
    }
}
