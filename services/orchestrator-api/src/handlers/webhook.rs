//! Inbound WhatsApp webhook ingestion.
//!
//! Durably records the event and returns immediately — actual processing
//! (intent parsing, order mutation, vendor dispatch) happens off the request
//! path, driven by the recovery worker's claim loop against `event_store`.
//! Grounded on `gateway::handlers`'s thin-wrapper-over-a-handler-struct shape.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use orchestrator_core::event_store::EventStore;
use orchestrator_core::Context;
use serde_json::json;
use tracing::warn;

use crate::models::{core_error_response, ApiResponse, WebhookAckResponse, WhatsAppWebhookRequest};

#[derive(Clone)]
pub struct WebhookHandlers {
    ctx: Context,
}

impl WebhookHandlers {
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// `POST /api/v1/whatsapp/webhook`. Backpressure: if the event store
    /// can't accept the write (DB unreachable, pool exhausted), this returns
    /// 503 via `CoreError::Transient`'s mapping rather than 500 — the
    /// messaging gateway is expected to retry on 503 per its own backoff.
    pub async fn ingest(
        State(handlers): State<Self>,
        Json(body): Json<WhatsAppWebhookRequest>,
    ) -> Result<Json<ApiResponse<WebhookAckResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
        let payload = json!({
            "channel_id": body.channel_id,
            "text": body.text,
            "media": body.media,
        });
        let store = EventStore::new(&handlers.ctx);
        match store.record(&body.channel_id, &body.external_id, payload).await {
            Ok(outcome) => Ok(Json(ApiResponse::success(WebhookAckResponse {
                stored: outcome.stored,
                event_id: outcome.event_id.to_string(),
            }))),
            Err(err) => {
                warn!(error = %err, "failed to durably store inbound webhook event");
                Err(core_error_response(&err))
            }
        }
    }
}
