use rust_decimal::Decimal;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::dto::reviews::{CreateReviewRequest, ReviewList};
use crate::{
    audit::log_audit,
    entity::{
        products::{Column as ProdCol, Entity as Products},
        reviews::{ActiveModel, Column, Entity as Reviews},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Review,
    pricing::round_money,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn create_review(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: CreateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    if !(1i16..=5).contains(&payload.rating) {
        return Err(AppError::BadRequest("rating must be between 1 and 5".into()));
    }

    let product = Products::find_by_id(product_id)
        .filter(ProdCol::IsActive.eq(true))
        .one(&state.orm)
        .await?;
    if product.is_none() {
        return Err(AppError::NotFound);
    }

    let existing = Reviews::find()
        .filter(Column::UserId.eq(user.user_id))
        .filter(Column::ProductId.eq(product_id))
        .one(&state.orm)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(
            "you have already reviewed this product".into(),
        ));
    }

    let review = ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        product_id: Set(product_id),
        rating: Set(payload.rating),
        comment: Set(payload.comment),
        is_approved: Set(false),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "review_create",
        Some("reviews"),
        Some(serde_json::json!({ "review_id": review.id, "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::created(
        "Review submitted for approval",
        Review::from(review),
    ))
}

/// Public listing: approved reviews only.
pub async fn list_product_reviews(
    state: &AppState,
    product_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<ReviewList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Reviews::find()
        .filter(Column::ProductId.eq(product_id))
        .filter(Column::IsApproved.eq(true))
        .order_by_desc(Column::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Review::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Reviews", ReviewList { items }, Some(meta)))
}

pub async fn approve_review(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Review>> {
    ensure_admin(user)?;
    let review = Reviews::find_by_id(id).one(&state.orm).await?;
    let review = match review {
        Some(r) => r,
        None => return Err(AppError::NotFound),
    };

    let product_id = review.product_id;
    let review = if review.is_approved {
        review
    } else {
        let mut active: ActiveModel = review.into();
        active.is_approved = Set(true);
        let updated = active.update(&state.orm).await?;
        recompute_rating(state, product_id).await?;
        updated
    };

    Ok(ApiResponse::success(
        "Review approved",
        Review::from(review),
        Some(Meta::empty()),
    ))
}

pub async fn delete_review(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let review = Reviews::find_by_id(id).one(&state.orm).await?;
    let review = match review {
        Some(r) => r,
        None => return Err(AppError::NotFound),
    };

    let product_id = review.product_id;
    let was_approved = review.is_approved;
    Reviews::delete_by_id(id).exec(&state.orm).await?;

    if was_approved {
        recompute_rating(state, product_id).await?;
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Recompute the product rating aggregate over all approved reviews.
async fn recompute_rating(state: &AppState, product_id: Uuid) -> AppResult<()> {
    let row: (Option<Decimal>, i64) = sqlx::query_as(
        "SELECT AVG(rating)::numeric, COUNT(*) FROM reviews WHERE product_id = $1 AND is_approved",
    )
    .bind(product_id)
    .fetch_one(&state.pool)
    .await?;

    let rating_avg = round_money(row.0.unwrap_or(Decimal::ZERO));
    let rating_count = row.1 as i32;

    sqlx::query(
        "UPDATE products SET rating_avg = $2, rating_count = $3, updated_at = now() WHERE id = $1",
    )
    .bind(product_id)
    .bind(rating_avg)
    .bind(rating_count)
    .execute(&state.pool)
    .await?;

    Ok(())
}
