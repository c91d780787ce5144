use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::orders::{OrderList, OrderWithItems};
use crate::dto::products::ProductList;
use crate::{
    audit::log_audit,
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, Product},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Pagination, SortOrder},
    services::{inventory, order_service},
    state::AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LowStockQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    /// Overrides the per-product threshold when set.
    pub threshold: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryAdjustRequest {
    pub delta: i32,
}

const ORDER_STATUSES: [&str; 7] = [
    "pending",
    "confirmed",
    "processing",
    "shipped",
    "delivered",
    "cancelled",
    "returned",
];

/// Forward path is strictly sequential; `cancelled` and `returned` are
/// alternate terminals reachable from any non-terminal state.
fn allowed_transition(from: &str, to: &str) -> bool {
    let forward = matches!(
        (from, to),
        ("pending", "confirmed")
            | ("confirmed", "processing")
            | ("processing", "shipped")
            | ("shipped", "delivered")
    );
    let to_terminal = matches!(to, "cancelled" | "returned")
        && matches!(from, "pending" | "confirmed" | "processing" | "shipped");
    forward || to_terminal
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let data = order_service::order_with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

/// Move an order through its lifecycle. Confirming a cash-on-delivery
/// order runs the same stock-decrement and cart-clear routine as the
/// payment reconciler; it is not reimplemented here.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let to_status = payload.status.as_str();
    if !ORDER_STATUSES.contains(&to_status) {
        return Err(AppError::BadRequest(format!(
            "invalid order status: {to_status}"
        )));
    }

    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let from_status = order.status.clone();
    if !allowed_transition(&from_status, to_status) {
        return Err(AppError::Conflict(format!(
            "cannot transition order from {from_status} to {to_status}"
        )));
    }

    if to_status == "confirmed" {
        if order.payment_method == order_service::PAYMENT_METHOD_GATEWAY
            && order.payment_status != "completed"
        {
            return Err(AppError::Conflict(
                "gateway order is awaiting payment confirmation".into(),
            ));
        }
        if order.payment_method == order_service::PAYMENT_METHOD_COD {
            inventory::decrement_for_order(&txn, order.id, true).await?;
            CartItems::delete_many()
                .filter(CartCol::UserId.eq(order.user_id))
                .exec(&txn)
                .await?;
        }
    }

    if to_status == "cancelled" {
        if order.payment_status == "completed" {
            return Err(AppError::Conflict(
                "order has a captured payment; refund it instead".into(),
            ));
        }
        // Stock was taken at confirmation; give it back when cancelling
        // past that point.
        if matches!(from_status.as_str(), "confirmed" | "processing" | "shipped") {
            inventory::restore_for_order(&txn, order.id).await?;
        }
    }

    let mut active: OrderActive = order.into();
    active.status = Set(to_status.to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    order_service::append_status_history(
        &txn,
        order.id,
        Some(&from_status),
        to_status,
        payload.note.as_deref(),
        Some(user.user_id),
    )
    .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "from": from_status, "to": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all().add(ProdCol::IsActive.eq(true));
    condition = match query.threshold {
        Some(threshold) => condition.add(ProdCol::Stock.lte(threshold)),
        None => condition.add(Expr::col(ProdCol::Stock).lte(Expr::col(ProdCol::LowStockThreshold))),
    };

    let finder = Products::find()
        .filter(condition)
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let data = ProductList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let new_stock = product.stock + payload.delta;
    if new_stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }

    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    active.is_in_stock = Set(new_stock > 0);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Inventory updated",
        Product::from(updated),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::allowed_transition;

    #[test]
    fn forward_path_is_sequential() {
        assert!(allowed_transition("pending", "confirmed"));
        assert!(allowed_transition("confirmed", "processing"));
        assert!(allowed_transition("processing", "shipped"));
        assert!(allowed_transition("shipped", "delivered"));

        assert!(!allowed_transition("pending", "shipped"));
        assert!(!allowed_transition("confirmed", "delivered"));
        assert!(!allowed_transition("delivered", "pending"));
    }

    #[test]
    fn terminals_reachable_from_non_terminal_states() {
        for from in ["pending", "confirmed", "processing", "shipped"] {
            assert!(allowed_transition(from, "cancelled"), "{from} -> cancelled");
            assert!(allowed_transition(from, "returned"), "{from} -> returned");
        }
        for from in ["delivered", "cancelled", "returned"] {
            assert!(!allowed_transition(from, "cancelled"), "{from} -> cancelled");
            assert!(!allowed_transition(from, "returned"), "{from} -> returned");
        }
    }
}
