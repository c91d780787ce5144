use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::fmt;
use uuid::Uuid;

use crate::dto::coupons::{
    CouponList, CouponQuote, CreateCouponRequest, UpdateCouponRequest, ValidateCouponRequest,
};
use crate::{
    audit::log_audit,
    entity::coupons::{ActiveModel, Column, Entity as Coupons, Model as CouponModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Coupon,
    pricing::{self, round_money},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::order_service,
    state::AppState,
};

#[derive(Debug, PartialEq)]
pub enum CouponRejection {
    Inactive,
    NotStarted,
    Expired,
    UsageCapReached,
    BelowMinimum { minimum: Decimal },
    UnknownType,
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CouponRejection::Inactive => write!(f, "coupon is not active"),
            CouponRejection::NotStarted => write!(f, "coupon is not valid yet"),
            CouponRejection::Expired => write!(f, "coupon has expired"),
            CouponRejection::UsageCapReached => write!(f, "coupon usage limit reached"),
            CouponRejection::BelowMinimum { minimum } => {
                write!(f, "order total is below the coupon minimum of {minimum}")
            }
            CouponRejection::UnknownType => write!(f, "coupon has an unknown discount type"),
        }
    }
}

/// Evaluate a coupon against a pre-discount order total. Pure; claiming a
/// usage is a separate, atomic step.
pub fn compute_discount(
    coupon: &CouponModel,
    pre_discount_total: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if now < coupon.valid_from.with_timezone(&Utc) {
        return Err(CouponRejection::NotStarted);
    }
    if now > coupon.valid_until.with_timezone(&Utc) {
        return Err(CouponRejection::Expired);
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return Err(CouponRejection::UsageCapReached);
        }
    }
    if pre_discount_total < coupon.min_order_amount {
        return Err(CouponRejection::BelowMinimum {
            minimum: coupon.min_order_amount,
        });
    }

    let discount = match coupon.discount_type.as_str() {
        "percentage" => {
            let raw = pre_discount_total * coupon.discount_value / Decimal::from(100);
            match coupon.max_discount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        "fixed" => coupon.discount_value,
        _ => return Err(CouponRejection::UnknownType),
    };

    Ok(round_money(discount.min(pre_discount_total).max(Decimal::ZERO)))
}

pub async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> AppResult<Option<CouponModel>> {
    let coupon = Coupons::find()
        .filter(Column::Code.eq(code.trim().to_uppercase()))
        .one(conn)
        .await?;
    Ok(coupon)
}

/// Claim one usage with a single conditional UPDATE, so the counter
/// increments exactly once per order even when checkouts race.
pub async fn claim_usage<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let result = Coupons::update_many()
        .col_expr(Column::UsedCount, Expr::col(Column::UsedCount).add(1))
        .filter(Column::Id.eq(coupon_id))
        .filter(Column::IsActive.eq(true))
        .filter(Column::ValidFrom.lte(now))
        .filter(Column::ValidUntil.gte(now))
        .filter(
            Condition::any()
                .add(Column::UsageLimit.is_null())
                .add(Expr::col(Column::UsedCount).lt(Expr::col(Column::UsageLimit))),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::BadRequest(
            "invalid coupon: no longer available".into(),
        ));
    }
    Ok(())
}

/// Preview a coupon against the caller's current cart. Never claims usage.
pub async fn validate_for_cart(
    state: &AppState,
    user: &AuthUser,
    payload: ValidateCouponRequest,
) -> AppResult<ApiResponse<CouponQuote>> {
    let lines = order_service::load_cart_lines(&state.orm, user.user_id).await?;
    if lines.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let pricing = pricing::quote(&order_service::priced_lines(&lines));
    let total_before = pricing.pre_discount_total();

    let coupon = find_by_code(&state.orm, &payload.code)
        .await?
        .ok_or_else(|| AppError::BadRequest("invalid coupon: unknown code".into()))?;

    let discount = compute_discount(&coupon, total_before, Utc::now())
        .map_err(|reason| AppError::BadRequest(format!("invalid coupon: {reason}")))?;

    Ok(ApiResponse::success(
        "Coupon valid",
        CouponQuote {
            code: coupon.code,
            discount,
            total_before,
            total_after: round_money(total_before - discount),
        },
        None,
    ))
}

pub async fn list_coupons(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Coupons::find().order_by_desc(Column::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Coupon::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Coupons", CouponList { items }, Some(meta)))
}

pub async fn create_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;

    let code = payload.code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("code must not be empty".into()));
    }
    match payload.discount_type.as_str() {
        "percentage" => {
            if payload.discount_value <= Decimal::ZERO
                || payload.discount_value > Decimal::from(100)
            {
                return Err(AppError::BadRequest(
                    "percentage must be between 0 and 100".into(),
                ));
            }
        }
        "fixed" => {
            if payload.discount_value <= Decimal::ZERO {
                return Err(AppError::BadRequest("discount must be positive".into()));
            }
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "unknown discount type: {other}"
            )));
        }
    }
    if payload.valid_until <= payload.valid_from {
        return Err(AppError::BadRequest(
            "valid_until must be after valid_from".into(),
        ));
    }

    if find_by_code(&state.orm, &code).await?.is_some() {
        return Err(AppError::Conflict("coupon code already exists".into()));
    }

    let coupon = ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        discount_type: Set(payload.discount_type),
        discount_value: Set(payload.discount_value),
        max_discount: Set(payload.max_discount),
        min_order_amount: Set(payload.min_order_amount.unwrap_or(Decimal::ZERO)),
        valid_from: Set(payload.valid_from.into()),
        valid_until: Set(payload.valid_until.into()),
        usage_limit: Set(payload.usage_limit),
        used_count: Set(0),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_create",
        Some("coupons"),
        Some(serde_json::json!({ "coupon_id": coupon.id, "code": coupon.code })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::created("Coupon created", Coupon::from(coupon)))
}

pub async fn update_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let existing = Coupons::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(discount_value) = payload.discount_value {
        if discount_value <= Decimal::ZERO {
            return Err(AppError::BadRequest("discount must be positive".into()));
        }
        active.discount_value = Set(discount_value);
    }
    if let Some(max_discount) = payload.max_discount {
        active.max_discount = Set(Some(max_discount));
    }
    if let Some(min_order_amount) = payload.min_order_amount {
        active.min_order_amount = Set(min_order_amount);
    }
    if let Some(valid_from) = payload.valid_from {
        active.valid_from = Set(valid_from.into());
    }
    if let Some(valid_until) = payload.valid_until {
        active.valid_until = Set(valid_until.into());
    }
    if let Some(usage_limit) = payload.usage_limit {
        active.usage_limit = Set(Some(usage_limit));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    let coupon = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Updated",
        Coupon::from(coupon),
        Some(Meta::empty()),
    ))
}

pub async fn delete_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Coupons::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(discount_type: &str, value: Decimal) -> CouponModel {
        let now = Utc::now();
        CouponModel {
            id: Uuid::new_v4(),
            code: "FESTIVE10".into(),
            discount_type: discount_type.into(),
            discount_value: value,
            max_discount: None,
            min_order_amount: Decimal::ZERO,
            valid_from: (now - Duration::days(1)).into(),
            valid_until: (now + Duration::days(1)).into(),
            usage_limit: None,
            used_count: 0,
            is_active: true,
            created_at: now.into(),
        }
    }

    #[test]
    fn percentage_discount_with_cap() {
        let mut c = coupon("percentage", dec!(10));
        assert_eq!(
            compute_discount(&c, dec!(2263), Utc::now()).unwrap(),
            dec!(226.30)
        );

        c.max_discount = Some(dec!(100));
        assert_eq!(
            compute_discount(&c, dec!(2263), Utc::now()).unwrap(),
            dec!(100.00)
        );
    }

    #[test]
    fn fixed_discount_never_exceeds_total() {
        let c = coupon("fixed", dec!(500));
        assert_eq!(
            compute_discount(&c, dec!(2000), Utc::now()).unwrap(),
            dec!(500.00)
        );
        assert_eq!(
            compute_discount(&c, dec!(300), Utc::now()).unwrap(),
            dec!(300.00)
        );
    }

    #[test]
    fn rejects_outside_validity_window() {
        let mut c = coupon("fixed", dec!(50));
        c.valid_from = (Utc::now() + Duration::days(1)).into();
        c.valid_until = (Utc::now() + Duration::days(2)).into();
        assert_eq!(
            compute_discount(&c, dec!(1000), Utc::now()),
            Err(CouponRejection::NotStarted)
        );

        c.valid_from = (Utc::now() - Duration::days(2)).into();
        c.valid_until = (Utc::now() - Duration::days(1)).into();
        assert_eq!(
            compute_discount(&c, dec!(1000), Utc::now()),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn rejects_on_usage_cap_and_minimum() {
        let mut c = coupon("fixed", dec!(50));
        c.usage_limit = Some(3);
        c.used_count = 3;
        assert_eq!(
            compute_discount(&c, dec!(1000), Utc::now()),
            Err(CouponRejection::UsageCapReached)
        );

        c.used_count = 2;
        c.min_order_amount = dec!(5000);
        assert_eq!(
            compute_discount(&c, dec!(1000), Utc::now()),
            Err(CouponRejection::BelowMinimum {
                minimum: dec!(5000)
            })
        );
    }

    #[test]
    fn rejects_inactive_and_unknown_type() {
        let mut c = coupon("fixed", dec!(50));
        c.is_active = false;
        assert_eq!(
            compute_discount(&c, dec!(1000), Utc::now()),
            Err(CouponRejection::Inactive)
        );

        let c = coupon("bogo", dec!(50));
        assert_eq!(
            compute_discount(&c, dec!(1000), Utc::now()),
            Err(CouponRejection::UnknownType)
        );
    }
}
