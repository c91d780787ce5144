use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub metal_type: String,
    pub base_price: Decimal,
    pub selling_price: Decimal,
    pub discount_percent: Option<Decimal>,
    pub making_charge: Option<Decimal>,
    pub weight_grams: Decimal,
    pub stock: i32,
    pub low_stock_threshold: Option<i32>,
    pub images: Option<Vec<String>>,
}

/// Allow-listed update fields. Anything not listed here cannot be
/// mutated through the API.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub metal_type: Option<String>,
    pub base_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub discount_percent: Option<Decimal>,
    pub making_charge: Option<Decimal>,
    pub weight_grams: Option<Decimal>,
    pub low_stock_threshold: Option<i32>,
    pub images: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}
