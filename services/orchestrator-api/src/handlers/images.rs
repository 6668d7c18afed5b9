//! `POST /api/v1/orders/upload-image` and its status-poll sibling.
//!
//! The multipart body's raw bytes are base64-encoded into a data URI and
//! handed to `image_intake` as the opaque `image_ref` the extraction
//! pipeline resolves — grounded on `secrets-manager`'s
//! `base64::Engine`/`STANDARD` usage, the one place in the teacher pack that
//! encodes bytes for an outbound call rather than decoding an inbound one.
//! Extraction itself is spawned off the request path: the handler only
//! creates the `PROCESSING` row and returns.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use orchestrator_common::error::CoreError;
use orchestrator_common::ids::RetailerId;
use orchestrator_core::image_intake::{self, UploadStatus};
use orchestrator_core::Context;
use tracing::warn;

use crate::models::{core_error_response, ApiResponse, UploadImageResponse, UploadImageStatusResponse};

#[derive(Clone)]
pub struct ImageHandlers {
    ctx: Context,
}

impl ImageHandlers {
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn upload(
        State(handlers): State<Self>,
        mut multipart: Multipart,
    ) -> Result<Json<ApiResponse<UploadImageResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
        let mut retailer_id: Option<RetailerId> = None;
        let mut image_bytes: Option<Vec<u8>> = None;

        loop {
            let field = multipart.next_field().await.map_err(|e| {
                core_error_response(&CoreError::Validation { message: format!("invalid multipart body: {e}") })
            })?;
            let Some(field) = field else { break };
            match field.name().unwrap_or_default() {
                "retailer_id" => {
                    let text = field.text().await.map_err(|e| {
                        core_error_response(&CoreError::Validation { message: format!("invalid retailer_id field: {e}") })
                    })?;
                    let id = text.parse::<uuid::Uuid>().map_err(|_| {
                        core_error_response(&CoreError::Validation { message: "retailer_id must be a uuid".to_string() })
                    })?;
                    retailer_id = Some(RetailerId::from_uuid(id));
                }
                "image" => {
                    let data = field.bytes().await.map_err(|e| {
                        core_error_response(&CoreError::Validation { message: format!("invalid image field: {e}") })
                    })?;
                    image_bytes = Some(data.to_vec());
                }
                _ => {}
            }
        }

        let Some(retailer_id) = retailer_id else {
            return Err(core_error_response(&CoreError::Validation { message: "retailer_id field is required".to_string() }));
        };
        let Some(image_bytes) = image_bytes else {
            return Err(core_error_response(&CoreError::Validation { message: "image field is required".to_string() }));
        };

        let upload_id = image_intake::create_pending(&handlers.ctx, retailer_id)
            .await
            .map_err(|e| core_error_response(&e))?;

        let image_ref = format!("data:application/octet-stream;base64,{}", BASE64.encode(&image_bytes));
        let ctx = handlers.ctx.clone();
        tokio::spawn(async move {
            image_intake::process(&ctx, upload_id, retailer_id, &image_ref).await;
        });

        Ok(Json(ApiResponse::success(UploadImageResponse { uploaded_order_id: upload_id.to_string(), status: "PROCESSING" })))
    }

    pub async fn status(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
    ) -> Result<Json<ApiResponse<UploadImageStatusResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
        let upload_id = orchestrator_common::ids::UploadId::from_uuid(id);
        let view = image_intake::status(&handlers.ctx, upload_id).await.map_err(|e| {
            warn!(%upload_id, error = %e, "upload status lookup failed");
            core_error_response(&e)
        })?;
        Ok(Json(ApiResponse::success(UploadImageStatusResponse {
            uploaded_order_id: upload_id.to_string(),
            status: status_label(view.status),
        })))
    }
}

const fn status_label(status: UploadStatus) -> &'static str {
    match status {
        UploadStatus::Processing => "PROCESSING",
        UploadStatus::Completed => "COMPLETED",
        UploadStatus::Failed => "FAILED",
        UploadStatus::PendingReview => "PENDING_REVIEW",
    }
}
