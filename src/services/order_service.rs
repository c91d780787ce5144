use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::dto::orders::{CheckoutRequest, CheckoutResponse, OrderList, OrderWithItems};
use crate::{
    audit::log_audit,
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
        },
        order_status_history::{
            ActiveModel as HistoryActive, Column as HistoryCol, Entity as OrderStatusHistory,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatusEntry},
    pricing::{self, PricedLine},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::coupon_service,
    state::AppState,
};

pub const PAYMENT_METHOD_GATEWAY: &str = "gateway";
pub const PAYMENT_METHOD_COD: &str = "cod";

/// One cart line joined with the current product state it must be
/// re-validated against.
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub making_charge: Decimal,
    pub weight_grams: Decimal,
    pub stock: i32,
    pub is_active: bool,
}

pub async fn load_cart_lines<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<Vec<CartLine>> {
    let rows = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .find_also_related(products::Entity)
        .all(conn)
        .await?;

    let mut lines = Vec::with_capacity(rows.len());
    for (item, product) in rows {
        let Some(product) = product else {
            return Err(AppError::Conflict("cart references a missing product".into()));
        };
        lines.push(CartLine {
            product_id: product.id,
            name: product.name,
            quantity: item.quantity,
            unit_price: product.selling_price,
            making_charge: product.making_charge,
            weight_grams: product.weight_grams,
            stock: product.stock,
            is_active: product.is_active,
        });
    }
    Ok(lines)
}

pub fn priced_lines(lines: &[CartLine]) -> Vec<PricedLine> {
    lines
        .iter()
        .map(|line| PricedLine {
            unit_price: line.unit_price,
            making_charge: line.making_charge,
            quantity: line.quantity,
            weight_grams: line.weight_grams,
        })
        .collect()
}

/// Convert the caller's cart into exactly one pending order.
///
/// Stock is validated here but not taken, and the cart is left in place;
/// both happen once, at payment confirmation.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    if payload.shipping_address.trim().is_empty() {
        return Err(AppError::BadRequest("shipping address is required".into()));
    }
    let payment_method = payload.payment_method.as_str();
    if payment_method != PAYMENT_METHOD_GATEWAY && payment_method != PAYMENT_METHOD_COD {
        return Err(AppError::BadRequest(format!(
            "unknown payment method: {payment_method}"
        )));
    }

    let txn = state.orm.begin().await?;

    // No lock taken here: checkout only validates stock. The guarded
    // decrement at payment confirmation is what enforces availability.
    let rows = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .find_also_related(products::Entity)
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut lines = Vec::with_capacity(rows.len());
    for (item, product) in rows {
        let Some(product) = product else {
            return Err(AppError::Conflict("cart references a missing product".into()));
        };
        if !product.is_active {
            return Err(AppError::Conflict(format!(
                "product {} is unavailable",
                product.name
            )));
        }
        if item.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        if product.stock < item.quantity {
            return Err(AppError::Conflict(format!(
                "insufficient stock for {}: {} available",
                product.name, product.stock
            )));
        }
        lines.push(CartLine {
            product_id: product.id,
            name: product.name,
            quantity: item.quantity,
            unit_price: product.selling_price,
            making_charge: product.making_charge,
            weight_grams: product.weight_grams,
            stock: product.stock,
            is_active: product.is_active,
        });
    }

    let mut pricing = pricing::quote(&priced_lines(&lines));

    let mut coupon_code = None;
    if let Some(code) = payload.coupon_code.as_ref().filter(|c| !c.trim().is_empty()) {
        let now = Utc::now();
        let coupon = coupon_service::find_by_code(&txn, code)
            .await?
            .ok_or_else(|| AppError::BadRequest("invalid coupon: unknown code".into()))?;
        let discount = coupon_service::compute_discount(&coupon, pricing.pre_discount_total(), now)
            .map_err(|reason| AppError::BadRequest(format!("invalid coupon: {reason}")))?;
        coupon_service::claim_usage(&txn, coupon.id, now).await?;
        pricing = pricing.with_discount(discount);
        coupon_code = Some(coupon.code);
    }

    let order_id = Uuid::new_v4();
    let order_number = next_order_number(&txn).await?;

    let mut order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        order_number: Set(order_number.clone()),
        status: Set("pending".into()),
        shipping_address: Set(payload.shipping_address),
        subtotal: Set(pricing.subtotal),
        making_charges: Set(pricing.making_charges),
        gst: Set(pricing.gst),
        shipping_charges: Set(pricing.shipping_charges),
        discount: Set(pricing.discount),
        total_amount: Set(pricing.total_amount),
        coupon_code: Set(coupon_code),
        payment_method: Set(payment_method.to_string()),
        payment_status: Set("pending".into()),
        gateway_order_id: Set(None),
        gateway_payment_id: Set(None),
        gateway_refund_id: Set(None),
        paid_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in &lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            name: Set(line.name.clone()),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            making_charge: Set(line.making_charge),
            weight_grams: Set(line.weight_grams),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(OrderItem::from(item));
    }

    append_status_history(
        &txn,
        order.id,
        None,
        "pending",
        Some("order created"),
        Some(user.user_id),
    )
    .await?;

    let mut payment_intent = None;
    if payment_method == PAYMENT_METHOD_GATEWAY {
        let intent = state
            .gateway
            .create_intent(order.total_amount, &order_number)
            .await?;

        let mut active: OrderActive = order.into();
        active.gateway_order_id = Set(Some(intent.id.clone()));
        active.updated_at = Set(Utc::now().into());
        order = active.update(&txn).await?;
        payment_intent = Some(intent);
    }

    txn.commit().await?;

    state.notifier.send(
        &user.email,
        &format!("Order {} placed", order.order_number),
        &format!(
            "<p>Your order <b>{}</b> for {} has been placed.</p>",
            order.order_number, order.total_amount
        ),
    );

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "order_number": order.order_number })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let gateway_key_id = payment_intent
        .as_ref()
        .map(|_| state.gateway.key_id().to_string());

    Ok(ApiResponse::created(
        "Checkout success",
        CheckoutResponse {
            order: Order::from(order),
            items: order_items,
            payment_intent,
            gateway_key_id,
        },
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
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
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let data = order_with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

/// Load the item snapshots and status history for an order model.
pub async fn order_with_items<C: ConnectionTrait>(
    conn: &C,
    order: crate::entity::orders::Model,
) -> AppResult<OrderWithItems> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect();

    let status_history = OrderStatusHistory::find()
        .filter(HistoryCol::OrderId.eq(order.id))
        .order_by_asc(HistoryCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderStatusEntry::from)
        .collect();

    Ok(OrderWithItems {
        order: Order::from(order),
        items,
        status_history,
    })
}

/// Append-only audit trail of order status transitions.
pub async fn append_status_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    from_status: Option<&str>,
    to_status: &str,
    note: Option<&str>,
    changed_by: Option<Uuid>,
) -> AppResult<()> {
    HistoryActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        from_status: Set(from_status.map(str::to_string)),
        to_status: Set(to_status.to_string()),
        note: Set(note.map(str::to_string)),
        changed_by: Set(changed_by),
        created_at: NotSet,
    }
    .insert(conn)
    .await?;
    Ok(())
}

/// Order numbers come off a database sequence: human-readable,
/// date-prefixed, and unique by construction rather than by chance.
async fn next_order_number<C: ConnectionTrait>(conn: &C) -> AppResult<String> {
    let stmt = Statement::from_string(
        conn.get_database_backend(),
        "SELECT nextval('order_number_seq') AS seq",
    );
    let row = conn
        .query_one(stmt)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order number sequence unavailable")))?;
    let seq: i64 = row.try_get("", "seq")?;
    Ok(format!("ORD-{}-{:06}", Utc::now().format("%Y%m%d"), seq))
}
