use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::orders::{CheckoutRequest, CheckoutResponse, OrderList, OrderWithItems, VerifyPaymentRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{order_service, payment_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/checkout", post(checkout))
        .route("/{id}", get(get_order))
        .route("/{id}/verify-payment", post(verify_payment))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "asc, desc")
    ),
    responses(
        (status = 200, description = "List the caller's orders", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<ApiResponse<OrderList>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(resp)
}

#[utoipa::path(
    post,
    path = "/api/orders/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Pending order created from the cart", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Empty cart or invalid input"),
        (status = 409, description = "Product unavailable or insufficient stock"),
        (status = 502, description = "Payment gateway unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    let resp = order_service::checkout(&state, &user, payload).await?;
    Ok(resp)
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with items and status history", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(resp)
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/verify-payment",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified and order confirmed", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Signature verification failed"),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let resp = payment_service::verify_and_confirm(&state, &user, id, payload).await?;
    Ok(resp)
}
