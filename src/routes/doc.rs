use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{CartItemDto, CartList},
        categories::CategoryList,
        coupons::{CouponList, CouponQuote},
        favorites::FavoriteProductList,
        orders::{CheckoutResponse, OrderList, OrderWithItems},
        products::ProductList,
        reviews::ReviewList,
    },
    error::ErrorBody,
    models::{
        CartItem, Category, Coupon, Favorite, Order, OrderItem, OrderStatusEntry, Product, Review,
        User,
    },
    payment::gateway::PaymentIntent,
    response::{ApiResponse, Meta},
    routes::{
        admin, auth, cart, categories, coupons, favorites, health, orders, params,
        products as product_routes, webhook,
    },
    services::admin_service,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        product_routes::list_products,
        product_routes::get_product,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        product_routes::list_product_reviews,
        product_routes::create_review,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        cart::cart_list,
        cart::add_to_cart,
        cart::clear_cart,
        cart::remove_from_cart,
        favorites::add_favorite,
        favorites::remove_favorite,
        favorites::list_favorites,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::verify_payment,
        coupons::validate_coupon,
        coupons::list_coupons,
        coupons::create_coupon,
        coupons::update_coupon,
        coupons::delete_coupon,
        webhook::gateway_webhook,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::refund_order,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::approve_review,
        admin::delete_review
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            Favorite,
            CartItem,
            CartItemDto,
            Order,
            OrderItem,
            OrderStatusEntry,
            Coupon,
            Review,
            PaymentIntent,
            CartList,
            CategoryList,
            CouponList,
            CouponQuote,
            FavoriteProductList,
            OrderList,
            OrderWithItems,
            CheckoutResponse,
            ProductList,
            ReviewList,
            admin_service::UpdateOrderStatusRequest,
            admin_service::RefundOrderRequest,
            admin_service::InventoryAdjustRequest,
            admin_service::LowStockQuery,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ErrorBody,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CheckoutResponse>,
            ApiResponse<CouponQuote>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Reviews", description = "Product review endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Favorites", description = "Favorite endpoints"),
        (name = "Orders", description = "Order and checkout endpoints"),
        (name = "Coupons", description = "Coupon endpoints"),
        (name = "Payments", description = "Payment gateway callbacks"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
