use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity;

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub metal_type: String,
    pub base_price: Decimal,
    pub selling_price: Decimal,
    pub discount_percent: Decimal,
    pub making_charge: Decimal,
    pub weight_grams: Decimal,
    pub stock: i32,
    pub low_stock_threshold: i32,
    pub is_in_stock: bool,
    #[schema(value_type = Vec<String>)]
    pub images: serde_json::Value,
    pub rating_avg: Decimal,
    pub rating_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Favorite {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub quantity: i32,
    /// Selling price captured when the line was added. May go stale;
    /// checkout re-validates against the current product.
    pub unit_price_snapshot: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    pub status: String,
    pub shipping_address: String,
    pub subtotal: Decimal,
    pub making_charges: Decimal,
    pub gst: Decimal,
    pub shipping_charges: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub payment_method: String,
    pub payment_status: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub making_charge: Decimal,
    pub weight_grams: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub note: Option<String>,
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: String,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub rating: i16,
    pub comment: Option<String>,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

/// URL slug derived from a display name. Derived fields are computed by
/// explicit factories like this one, never by implicit persistence hooks.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

impl From<entity::categories::Model> for Category {
    fn from(model: entity::categories::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            slug: model.slug,
            description: model.description,
            is_active: model.is_active,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::products::Model> for Product {
    fn from(model: entity::products::Model) -> Self {
        Self {
            id: model.id,
            category_id: model.category_id,
            name: model.name,
            slug: model.slug,
            description: model.description,
            metal_type: model.metal_type,
            base_price: model.base_price,
            selling_price: model.selling_price,
            discount_percent: model.discount_percent,
            making_charge: model.making_charge,
            weight_grams: model.weight_grams,
            stock: model.stock,
            low_stock_threshold: model.low_stock_threshold,
            is_in_stock: model.is_in_stock,
            images: model.images,
            rating_avg: model.rating_avg,
            rating_count: model.rating_count,
            is_active: model.is_active,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::orders::Model> for Order {
    fn from(model: entity::orders::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_number: model.order_number,
            status: model.status,
            shipping_address: model.shipping_address,
            subtotal: model.subtotal,
            making_charges: model.making_charges,
            gst: model.gst,
            shipping_charges: model.shipping_charges,
            discount: model.discount,
            total_amount: model.total_amount,
            coupon_code: model.coupon_code,
            payment_method: model.payment_method,
            payment_status: model.payment_status,
            gateway_order_id: model.gateway_order_id,
            gateway_payment_id: model.gateway_payment_id,
            gateway_refund_id: model.gateway_refund_id,
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::order_items::Model> for OrderItem {
    fn from(model: entity::order_items::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            name: model.name,
            quantity: model.quantity,
            price: model.price,
            making_charge: model.making_charge,
            weight_grams: model.weight_grams,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::order_status_history::Model> for OrderStatusEntry {
    fn from(model: entity::order_status_history::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            from_status: model.from_status,
            to_status: model.to_status,
            note: model.note,
            changed_by: model.changed_by,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::coupons::Model> for Coupon {
    fn from(model: entity::coupons::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            max_discount: model.max_discount,
            min_order_amount: model.min_order_amount,
            valid_from: model.valid_from.with_timezone(&Utc),
            valid_until: model.valid_until.with_timezone(&Utc),
            usage_limit: model.usage_limit,
            used_count: model.used_count,
            is_active: model.is_active,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::reviews::Model> for Review {
    fn from(model: entity::reviews::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            product_id: model.product_id,
            rating: model.rating,
            comment: model.comment,
            is_approved: model.is_approved,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("22K Gold Chain"), "22k-gold-chain");
        assert_eq!(slugify("  Silver / Anklet  "), "silver-anklet");
        assert_eq!(slugify("Rings"), "rings");
    }
}
