use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        products::{self, Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
};

/// Decrement stock for every item of an order. This is the only routine
/// that takes stock for an order, shared by the payment reconciler and
/// the admin confirmation path, so the decrement happens exactly once per
/// order.
///
/// With `enforce_stock` each guarded update requires `stock >= quantity`
/// and the whole call fails (rolling back the caller's transaction) when
/// any line cannot be satisfied. Without it the decrement is applied
/// unconditionally: a captured payment is settled even if stock drifted
/// low in the meantime.
pub async fn decrement_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    enforce_stock: bool,
) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in &items {
        let mut update = Products::update_many()
            .set(products::ActiveModel {
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .col_expr(
                ProdCol::Stock,
                Expr::col(ProdCol::Stock).sub(item.quantity),
            )
            .col_expr(
                ProdCol::IsInStock,
                Expr::expr(Expr::col(ProdCol::Stock).sub(item.quantity)).gt(0),
            )
            .filter(ProdCol::Id.eq(item.product_id));
        if enforce_stock {
            update = update.filter(ProdCol::Stock.gte(item.quantity));
        }

        let result = update.exec(conn).await?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(format!(
                "insufficient stock for {}",
                item.name
            )));
        }
    }

    Ok(())
}

/// Restore stock for every item of an order, by exactly the ordered
/// quantities. Counterpart of [`decrement_for_order`], used when a paid
/// order is refunded or an unpaid confirmed order is cancelled.
pub async fn restore_for_order<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in &items {
        Products::update_many()
            .set(products::ActiveModel {
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .col_expr(
                ProdCol::Stock,
                Expr::col(ProdCol::Stock).add(item.quantity),
            )
            .col_expr(
                ProdCol::IsInStock,
                Expr::expr(Expr::col(ProdCol::Stock).add(item.quantity)).gt(0),
            )
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(conn)
            .await?;
    }

    Ok(())
}
