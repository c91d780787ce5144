use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::{
    error::{AppError, AppResult},
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

const SIGNATURE_HEADER: &str = "x-gateway-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(gateway_webhook))
}

/// The body is taken as raw bytes so the HMAC runs over exactly what the
/// gateway signed; parsing happens only after verification.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid signature or payload")
    ),
    tag = "Payments"
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing webhook signature header".into()))?;

    let resp = payment_service::handle_webhook(&state, signature, &body).await?;
    Ok(resp)
}
