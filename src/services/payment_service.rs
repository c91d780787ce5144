use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::Deserialize;
use uuid::Uuid;

use crate::dto::orders::{OrderWithItems, VerifyPaymentRequest};
use crate::{
    audit::log_audit,
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        orders::{self, Column as OrderCol, Entity as Orders, Model as OrderModel},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    response::{ApiResponse, Meta},
    services::{inventory, order_service},
    state::AppState,
};

/// Payment details an entry point has already authenticated. Both the
/// synchronous verify call and the webhook build one of these only after
/// their own signature check passed.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub gateway_payment_id: String,
}

/// Result of pushing a verified event through the state machine.
pub enum SettleOutcome {
    /// The claim won: side effects were applied in this call.
    Applied(OrderModel),
    /// The order had already left `pending`; nothing was changed.
    AlreadySettled(OrderModel),
}

impl SettleOutcome {
    pub fn into_order(self) -> OrderModel {
        match self {
            SettleOutcome::Applied(order) | SettleOutcome::AlreadySettled(order) => order,
        }
    }
}

/// The single transition routine for a captured payment.
///
/// The claim is one conditional UPDATE on `payment_status = 'pending'`,
/// so a duplicate webhook and the synchronous verify call cannot both
/// apply the side effects: whoever loses the claim observes the order
/// already settled and skips. Stock decrement, cart clearing and the
/// history entry share the claim's transaction.
pub async fn settle_payment_captured(
    state: &AppState,
    order_id: Uuid,
    payment: VerifiedPayment,
) -> AppResult<SettleOutcome> {
    let txn = state.orm.begin().await?;
    let now = Utc::now();

    let claim = Orders::update_many()
        .set(orders::ActiveModel {
            payment_status: Set("completed".into()),
            status: Set("confirmed".into()),
            gateway_payment_id: Set(Some(payment.gateway_payment_id.clone())),
            paid_at: Set(Some(now.into())),
            updated_at: Set(now.into()),
            ..Default::default()
        })
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::PaymentStatus.eq("pending"))
        .exec(&txn)
        .await?;

    let order = Orders::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if claim.rows_affected == 0 {
        // Duplicate delivery of the same success event is a no-op.
        tracing::info!(
            order_id = %order_id,
            payment_status = %order.payment_status,
            "payment already settled, skipping"
        );
        return Ok(SettleOutcome::AlreadySettled(order));
    }

    // The money is captured; settle even if stock drifted concurrently.
    inventory::decrement_for_order(&txn, order_id, false).await?;

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(order.user_id))
        .exec(&txn)
        .await?;

    order_service::append_status_history(
        &txn,
        order_id,
        Some("pending"),
        "confirmed",
        Some("payment captured"),
        None,
    )
    .await?;

    txn.commit().await?;

    notify_user(
        state,
        order.user_id,
        &format!("Payment received for {}", order.order_number),
        &format!(
            "<p>Your payment for order <b>{}</b> was received. We are preparing your items.</p>",
            order.order_number
        ),
    )
    .await;

    if let Err(err) = log_audit(
        &state.pool,
        None,
        "payment_captured",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "gateway_payment_id": payment.gateway_payment_id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(SettleOutcome::Applied(order))
}

/// Record a gateway-reported payment failure. Order status and stock are
/// untouched; only `pending` payments move to `failed`.
pub async fn mark_payment_failed(
    state: &AppState,
    order_id: Uuid,
    reason: Option<&str>,
) -> AppResult<()> {
    let result = Orders::update_many()
        .set(orders::ActiveModel {
            payment_status: Set("failed".into()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        })
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::PaymentStatus.eq("pending"))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        tracing::info!(order_id = %order_id, "payment not pending, failure event skipped");
        return Ok(());
    }

    if let Err(err) = log_audit(
        &state.pool,
        None,
        "payment_failed",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id, "reason": reason })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}

/// Transition `completed -> refunded`: cancel the order and restore every
/// item's stock. Idempotent against duplicate refund events.
pub async fn apply_refund(
    state: &AppState,
    order_id: Uuid,
    gateway_refund_id: &str,
    changed_by: Option<Uuid>,
) -> AppResult<SettleOutcome> {
    let txn = state.orm.begin().await?;
    let now = Utc::now();

    // Snapshot taken for the history entry; the claim below is what
    // decides whether this call applies the transition.
    let snapshot = Orders::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let claim = Orders::update_many()
        .set(orders::ActiveModel {
            payment_status: Set("refunded".into()),
            status: Set("cancelled".into()),
            gateway_refund_id: Set(Some(gateway_refund_id.to_string())),
            updated_at: Set(now.into()),
            ..Default::default()
        })
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::PaymentStatus.eq("completed"))
        .exec(&txn)
        .await?;

    if claim.rows_affected == 0 {
        if snapshot.payment_status == "refunded" {
            tracing::info!(order_id = %order_id, "refund already applied, skipping");
            return Ok(SettleOutcome::AlreadySettled(snapshot));
        }
        return Err(AppError::Conflict(format!(
            "order payment is {}, not completed",
            snapshot.payment_status
        )));
    }

    inventory::restore_for_order(&txn, order_id).await?;

    order_service::append_status_history(
        &txn,
        order_id,
        Some(snapshot.status.as_str()),
        "cancelled",
        Some("refund processed"),
        changed_by,
    )
    .await?;

    let order = Orders::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    txn.commit().await?;

    notify_user(
        state,
        order.user_id,
        &format!("Refund issued for {}", order.order_number),
        &format!(
            "<p>Your payment for order <b>{}</b> has been refunded.</p>",
            order.order_number
        ),
    )
    .await;

    if let Err(err) = log_audit(
        &state.pool,
        changed_by,
        "payment_refunded",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "gateway_refund_id": gateway_refund_id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(SettleOutcome::Applied(order))
}

/// Synchronous entry point: the client posts the gateway's payment id and
/// signature after completing payment.
pub async fn verify_and_confirm(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: VerifyPaymentRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let gateway_order_id = order
        .gateway_order_id
        .clone()
        .ok_or_else(|| AppError::BadRequest("order has no payment intent".into()))?;

    if !state.gateway.verify_payment_signature(
        &gateway_order_id,
        &payload.gateway_payment_id,
        &payload.signature,
    ) {
        mark_payment_failed(state, order_id, Some("signature verification failed")).await?;
        return Err(AppError::BadRequest(
            "payment signature verification failed".into(),
        ));
    }

    let outcome = settle_payment_captured(
        state,
        order_id,
        VerifiedPayment {
            gateway_payment_id: payload.gateway_payment_id,
        },
    )
    .await?;

    let order = outcome.into_order();
    if order.payment_status == "failed" {
        return Err(AppError::Conflict(
            "payment was previously marked failed for this order".into(),
        ));
    }

    let data = order_service::order_with_items(&state.orm, order).await?;
    Ok(ApiResponse::success(
        "Payment verified",
        data,
        Some(Meta::empty()),
    ))
}

/// Admin-initiated refund: call the gateway first, then run the refund
/// transition. A later `refund.processed` webhook for the same payment
/// lands on the idempotency guard and is skipped.
pub async fn refund_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    reason: Option<String>,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;

    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.payment_status != "completed" {
        return Err(AppError::Conflict(format!(
            "order payment is {}, not completed",
            order.payment_status
        )));
    }
    let payment_id = order
        .gateway_payment_id
        .clone()
        .ok_or_else(|| AppError::Conflict("order has no captured payment".into()))?;

    let refund = state
        .gateway
        .refund(&payment_id, order.total_amount, reason.as_deref())
        .await?;

    let outcome = apply_refund(state, order_id, &refund.id, Some(user.user_id)).await?;

    let data = order_service::order_with_items(&state.orm, outcome.into_order()).await?;
    Ok(ApiResponse::success(
        "Refund processed",
        data,
        Some(Meta::empty()),
    ))
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<EntityEnvelope<PaymentEntity>>,
    refund: Option<EntityEnvelope<RefundEntity>>,
}

#[derive(Debug, Deserialize)]
struct EntityEnvelope<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundEntity {
    id: String,
    payment_id: String,
}

/// Asynchronous entry point. The signature is checked over the exact raw
/// body bytes before anything is parsed; an invalid signature mutates
/// nothing. Events for unknown orders are logged and acknowledged so the
/// gateway stops redelivering them.
pub async fn handle_webhook(
    state: &AppState,
    signature: &str,
    raw_body: &[u8],
) -> AppResult<ApiResponse<serde_json::Value>> {
    if !state.gateway.verify_webhook_signature(raw_body, signature) {
        return Err(AppError::BadRequest("invalid webhook signature".into()));
    }

    let event: WebhookEvent = serde_json::from_slice(raw_body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {e}")))?;

    match event.event.as_str() {
        "payment.captured" => {
            let Some(payment) = event.payload.payment else {
                return Err(AppError::BadRequest("missing payment entity".into()));
            };
            let payment = payment.entity;
            match find_by_gateway_order(state, &payment.order_id).await? {
                Some(order) => {
                    settle_payment_captured(
                        state,
                        order.id,
                        VerifiedPayment {
                            gateway_payment_id: payment.id,
                        },
                    )
                    .await?;
                }
                None => {
                    tracing::warn!(gateway_order_id = %payment.order_id, "captured event for unknown order");
                }
            }
        }
        "payment.failed" => {
            let Some(payment) = event.payload.payment else {
                return Err(AppError::BadRequest("missing payment entity".into()));
            };
            let payment = payment.entity;
            match find_by_gateway_order(state, &payment.order_id).await? {
                Some(order) => {
                    mark_payment_failed(state, order.id, payment.error_description.as_deref())
                        .await?;
                }
                None => {
                    tracing::warn!(gateway_order_id = %payment.order_id, "failed event for unknown order");
                }
            }
        }
        "refund.processed" => {
            let Some(refund) = event.payload.refund else {
                return Err(AppError::BadRequest("missing refund entity".into()));
            };
            let refund = refund.entity;
            let order = Orders::find()
                .filter(OrderCol::GatewayPaymentId.eq(refund.payment_id.clone()))
                .one(&state.orm)
                .await?;
            match order {
                Some(order) => {
                    // A refund the admin already applied shows up here again;
                    // the guard inside apply_refund makes that a no-op.
                    match apply_refund(state, order.id, &refund.id, None).await {
                        Ok(_) => {}
                        Err(AppError::Conflict(msg)) => {
                            tracing::warn!(order_id = %order.id, %msg, "refund event skipped");
                        }
                        Err(err) => return Err(err),
                    }
                }
                None => {
                    tracing::warn!(gateway_payment_id = %refund.payment_id, "refund event for unknown payment");
                }
            }
        }
        other => {
            tracing::info!(event = %other, "unhandled webhook event");
        }
    }

    Ok(ApiResponse::success(
        "ok",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn find_by_gateway_order(
    state: &AppState,
    gateway_order_id: &str,
) -> AppResult<Option<OrderModel>> {
    let order = Orders::find()
        .filter(OrderCol::GatewayOrderId.eq(gateway_order_id))
        .one(&state.orm)
        .await?;
    Ok(order)
}

async fn notify_user(state: &AppState, user_id: Uuid, subject: &str, html: &str) {
    match Users::find_by_id(user_id).one(&state.orm).await {
        Ok(Some(user)) => state.notifier.send(&user.email, subject, html),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "could not load user for notification"),
    }
}
