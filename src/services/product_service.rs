use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::dto::products::{CreateProductRequest, ProductList, UpdateProductRequest};
use crate::{
    audit::log_audit,
    entity::{
        categories::Entity as Categories,
        products::{ActiveModel, Column, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, slugify},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(Column::IsActive.eq(true));

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(metal) = query.metal_type.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(Column::MetalType.eq(metal.clone()));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::SellingPrice.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::SellingPrice.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::SellingPrice,
        ProductSortBy::Name => Column::Name,
        ProductSortBy::Rating => Column::RatingAvg,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = ProductList { items };
    Ok(ApiResponse::success("Products", data, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let result = Products::find_by_id(id)
        .filter(Column::IsActive.eq(true))
        .one(&state.orm)
        .await?
        .map(Product::from);
    let result = match result {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Product", result, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    validate_price(payload.base_price)?;
    validate_price(payload.selling_price)?;
    if payload.stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }
    if let Some(category_id) = payload.category_id {
        let exists = Categories::find_by_id(category_id).one(&state.orm).await?;
        if exists.is_none() {
            return Err(AppError::BadRequest("category not found".into()));
        }
    }

    let id = Uuid::new_v4();
    let slug = slugify(&payload.name);
    let active = ActiveModel {
        id: Set(id),
        category_id: Set(payload.category_id),
        name: Set(payload.name),
        slug: Set(slug),
        description: Set(payload.description),
        metal_type: Set(payload.metal_type),
        base_price: Set(payload.base_price),
        selling_price: Set(payload.selling_price),
        discount_percent: Set(payload.discount_percent.unwrap_or(Decimal::ZERO)),
        making_charge: Set(payload.making_charge.unwrap_or(Decimal::ZERO)),
        weight_grams: Set(payload.weight_grams),
        stock: Set(payload.stock),
        low_stock_threshold: Set(payload.low_stock_threshold.unwrap_or(5)),
        is_in_stock: Set(payload.stock > 0),
        images: Set(serde_json::json!(payload.images.unwrap_or_default())),
        rating_avg: Set(Decimal::ZERO),
        rating_count: Set(0),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::created("Product created", Product::from(product)))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.slug = Set(slugify(&name));
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(category_id) = payload.category_id {
        let exists = Categories::find_by_id(category_id).one(&state.orm).await?;
        if exists.is_none() {
            return Err(AppError::BadRequest("category not found".into()));
        }
        active.category_id = Set(Some(category_id));
    }
    if let Some(metal_type) = payload.metal_type {
        active.metal_type = Set(metal_type);
    }
    if let Some(base_price) = payload.base_price {
        validate_price(base_price)?;
        active.base_price = Set(base_price);
    }
    if let Some(selling_price) = payload.selling_price {
        validate_price(selling_price)?;
        active.selling_price = Set(selling_price);
    }
    if let Some(discount_percent) = payload.discount_percent {
        active.discount_percent = Set(discount_percent);
    }
    if let Some(making_charge) = payload.making_charge {
        validate_price(making_charge)?;
        active.making_charge = Set(making_charge);
    }
    if let Some(weight_grams) = payload.weight_grams {
        active.weight_grams = Set(weight_grams);
    }
    if let Some(threshold) = payload.low_stock_threshold {
        active.low_stock_threshold = Set(threshold);
    }
    if let Some(images) = payload.images {
        active.images = Set(serde_json::json!(images));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

/// Soft delete. Products stay in place while orders reference them.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::update_many()
        .set(crate::entity::products::ActiveModel {
            is_active: Set(false),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        })
        .filter(Column::Id.eq(id))
        .filter(Column::IsActive.eq(true))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn validate_price(value: Decimal) -> Result<(), AppError> {
    if value < Decimal::ZERO {
        return Err(AppError::BadRequest("price cannot be negative".into()));
    }
    Ok(())
}
