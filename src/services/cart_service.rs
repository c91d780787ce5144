use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    pricing::round_money,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Cart lines idle longer than this are purged by the background task.
const CART_TTL_DAYS: i32 = 30;

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let lines: Vec<CartItem> = sqlx::query_as(
        "SELECT * FROM cart_items WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products: Vec<Product> =
        sqlx::query_as("SELECT * FROM products WHERE id = ANY($1)")
            .bind(&product_ids)
            .fetch_all(&state.pool)
            .await?;
    let mut by_id: HashMap<Uuid, Product> =
        products.into_iter().map(|p| (p.id, p)).collect();

    let mut total_amount = Decimal::ZERO;
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let Some(product) = by_id.remove(&line.product_id) else {
            continue;
        };
        total_amount += line.unit_price_snapshot * Decimal::from(line.quantity);
        items.push(CartItemDto {
            id: line.id,
            product,
            quantity: line.quantity,
        });
    }

    let data = CartList {
        items,
        total_amount: round_money(total_amount),
    };
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

/// Upsert: adding a product already in the cart replaces its quantity and
/// refreshes the price snapshot.
pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product: Option<(Uuid, Decimal)> =
        sqlx::query_as("SELECT id, selling_price FROM products WHERE id = $1 AND is_active")
            .bind(payload.product_id)
            .fetch_optional(&state.pool)
            .await?;
    let Some((product_id, selling_price)) = product else {
        return Err(AppError::BadRequest("product not found".to_string()));
    };

    let cart_item: CartItem = sqlx::query_as(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, quantity, unit_price_snapshot)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = EXCLUDED.quantity,
                      unit_price_snapshot = EXCLUDED.unit_price_snapshot,
                      updated_at = now()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(product_id)
    .bind(payload.quantity)
    .bind(selling_price)
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item, None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Drop cart lines idle past the TTL. Invoked periodically from the
/// server's background task.
pub async fn purge_stale_cart_items(pool: &crate::db::DbPool) -> AppResult<u64> {
    let result = sqlx::query(
        "DELETE FROM cart_items WHERE updated_at < now() - make_interval(days => $1)",
    )
    .bind(CART_TTL_DAYS)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
