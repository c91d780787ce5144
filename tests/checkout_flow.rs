use axum_jewelry_api::{
    config::GatewayConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::AddToCartRequest,
        coupons::CreateCouponRequest,
        orders::{CheckoutRequest, VerifyPaymentRequest},
    },
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::{ActiveModel as ProductActive, Entity as Products},
        users::ActiveModel as UserActive,
    },
    middleware::auth::AuthUser,
    notifier::Notifier,
    payment::gateway::{GatewayClient, hmac_sha256_hex},
    services::{
        admin_service::{self, UpdateOrderStatusRequest},
        cart_service, coupon_service, order_service,
        payment_service::{self, SettleOutcome, VerifiedPayment},
    },
    state::AppState,
};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use uuid::Uuid;

const KEY_SECRET: &str = "test_key_secret";
const WEBHOOK_SECRET: &str = "test_webhook_secret";

// Integration flows against a real database. Tests use distinct users and
// products so they can run concurrently without truncation.
async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let gateway = GatewayClient::new(GatewayConfig {
        base_url: "http://127.0.0.1:9".into(),
        key_id: "rzp_test".into(),
        key_secret: KEY_SECRET.into(),
        webhook_secret: WEBHOOK_SECRET.into(),
        currency: "INR".into(),
    });

    Ok(Some(AppState {
        pool,
        orm,
        gateway,
        notifier: Notifier::new(None, "no-reply@example.com".into()),
    }))
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        email: user.email,
        role: user.role,
    })
}

async fn create_product(
    state: &AppState,
    name: &str,
    stock: i32,
) -> anyhow::Result<axum_jewelry_api::entity::products::Model> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        category_id: Set(None),
        name: Set(name.into()),
        slug: Set(axum_jewelry_api::models::slugify(name)),
        description: Set(Some("test piece".into())),
        metal_type: Set("gold".into()),
        base_price: Set(dec!(1100)),
        selling_price: Set(dec!(1000)),
        discount_percent: Set(dec!(0)),
        making_charge: Set(dec!(50)),
        weight_grams: Set(dec!(10000)),
        stock: Set(stock),
        low_stock_threshold: Set(5),
        is_in_stock: Set(stock > 0),
        images: Set(serde_json::json!([])),
        rating_avg: Set(dec!(0)),
        rating_count: Set(0),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product");
    Ok(product.stock)
}

async fn cart_len(state: &AppState, user_id: Uuid) -> anyhow::Result<u64> {
    Ok(CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .count(&state.orm)
        .await?)
}

fn checkout_request(method: &str, coupon: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: "12 MG Road, Bengaluru".into(),
        payment_method: method.into(),
        coupon_code: coupon.map(str::to_string),
    }
}

/// Promote a cod order into a gateway order with a known intent id, as if
/// the intent had been created remotely at checkout.
async fn attach_gateway_intent(
    state: &AppState,
    order_id: Uuid,
    gateway_order_id: &str,
) -> anyhow::Result<()> {
    Orders::update_many()
        .set(axum_jewelry_api::entity::orders::ActiveModel {
            payment_method: Set("gateway".into()),
            gateway_order_id: Set(Some(gateway_order_id.to_string())),
            ..Default::default()
        })
        .filter(OrderCol::Id.eq(order_id))
        .exec(&state.orm)
        .await?;
    Ok(())
}

#[tokio::test]
async fn cod_checkout_confirms_through_admin_path() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "user", "cod-buyer@test.example").await?;
    let admin = create_user(&state, "admin", "cod-admin@test.example").await?;
    let product = create_product(&state, "COD Test Band", 10).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?;

    let resp = order_service::checkout(&state, &user, checkout_request("cod", None)).await?;
    let checkout = resp.data.unwrap();
    let order = checkout.order;

    // 2x1000 + 100 making + 63 gst + 100 shipping (20kg) = 2263, no discount.
    assert_eq!(order.subtotal, dec!(2000.00));
    assert_eq!(order.making_charges, dec!(100.00));
    assert_eq!(order.gst, dec!(63.00));
    assert_eq!(order.shipping_charges, dec!(100));
    assert_eq!(order.discount, dec!(0));
    assert_eq!(order.total_amount, dec!(2263.00));
    assert_eq!(order.status, "pending");
    assert_eq!(order.payment_status, "pending");
    assert!(order.order_number.starts_with("ORD-"));
    assert!(checkout.payment_intent.is_none());

    // Checkout must not touch stock or the cart.
    assert_eq!(stock_of(&state, product.id).await?, 10);
    assert_eq!(cart_len(&state, user.user_id).await?, 1);

    // Admin confirmation of a cod order takes stock and clears the cart.
    let updated = admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        UpdateOrderStatusRequest {
            status: "confirmed".into(),
            note: None,
        },
    )
    .await?;
    assert_eq!(updated.data.unwrap().status, "confirmed");
    assert_eq!(stock_of(&state, product.id).await?, 8);
    assert_eq!(cart_len(&state, user.user_id).await?, 0);

    // Re-confirming is rejected by the transition map.
    let again = admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        UpdateOrderStatusRequest {
            status: "confirmed".into(),
            note: None,
        },
    )
    .await;
    assert!(again.is_err());
    assert_eq!(stock_of(&state, product.id).await?, 8);

    Ok(())
}

#[tokio::test]
async fn gateway_payment_settles_exactly_once_and_refunds() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "user", "gw-buyer@test.example").await?;
    let product = create_product(&state, "Gateway Test Chain", 10).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?;

    let resp = order_service::checkout(&state, &user, checkout_request("cod", None)).await?;
    let order = resp.data.unwrap().order;
    let gateway_order_id = format!("order_{}", order.id.simple());
    attach_gateway_intent(&state, order.id, &gateway_order_id).await?;

    // A webhook with a bad signature is rejected and mutates nothing.
    let event = serde_json::json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_test_1",
            "order_id": gateway_order_id,
        }}}
    });
    let raw = serde_json::to_vec(&event)?;
    let bad = payment_service::handle_webhook(&state, "deadbeef", &raw).await;
    assert!(bad.is_err());
    assert_eq!(stock_of(&state, product.id).await?, 10);
    let unchanged = Orders::find_by_id(order.id).one(&state.orm).await?.unwrap();
    assert_eq!(unchanged.payment_status, "pending");

    // Synchronous verify with a valid signature settles the order.
    let signature =
        hmac_sha256_hex(KEY_SECRET.as_bytes(), format!("{gateway_order_id}|pay_test_1").as_bytes())
            .unwrap();
    let verified = payment_service::verify_and_confirm(
        &state,
        &user,
        order.id,
        VerifyPaymentRequest {
            gateway_payment_id: "pay_test_1".into(),
            signature,
        },
    )
    .await?;
    let settled = verified.data.unwrap().order;
    assert_eq!(settled.status, "confirmed");
    assert_eq!(settled.payment_status, "completed");
    assert!(settled.paid_at.is_some());
    assert_eq!(stock_of(&state, product.id).await?, 8);
    assert_eq!(cart_len(&state, user.user_id).await?, 0);

    // The same success event arriving again (webhook raced the verify
    // call) is a no-op: stock is taken exactly once.
    let outcome = payment_service::settle_payment_captured(
        &state,
        order.id,
        VerifiedPayment {
            gateway_payment_id: "pay_test_1".into(),
        },
    )
    .await?;
    assert!(matches!(outcome, SettleOutcome::AlreadySettled(_)));
    assert_eq!(stock_of(&state, product.id).await?, 8);

    let webhook_sig = hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), &raw).unwrap();
    payment_service::handle_webhook(&state, &webhook_sig, &raw).await?;
    assert_eq!(stock_of(&state, product.id).await?, 8);

    // Refund cancels the order and restores every quantity, once.
    let refunded = payment_service::apply_refund(&state, order.id, "rfnd_test_1", None).await?;
    assert!(matches!(refunded, SettleOutcome::Applied(_)));
    let after = Orders::find_by_id(order.id).one(&state.orm).await?.unwrap();
    assert_eq!(after.status, "cancelled");
    assert_eq!(after.payment_status, "refunded");
    assert_eq!(stock_of(&state, product.id).await?, 10);

    let duplicate = payment_service::apply_refund(&state, order.id, "rfnd_test_1", None).await?;
    assert!(matches!(duplicate, SettleOutcome::AlreadySettled(_)));
    assert_eq!(stock_of(&state, product.id).await?, 10);

    Ok(())
}

#[tokio::test]
async fn invalid_payment_signature_fails_payment_without_side_effects() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "user", "sig-buyer@test.example").await?;
    let product = create_product(&state, "Signature Test Ring", 5).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: product.id,
            quantity: 1,
        },
    )
    .await?;

    let resp = order_service::checkout(&state, &user, checkout_request("cod", None)).await?;
    let order = resp.data.unwrap().order;
    attach_gateway_intent(&state, order.id, "order_sig_test").await?;

    let result = payment_service::verify_and_confirm(
        &state,
        &user,
        order.id,
        VerifyPaymentRequest {
            gateway_payment_id: "pay_forged".into(),
            signature: "0000".into(),
        },
    )
    .await;
    assert!(result.is_err());

    let after = Orders::find_by_id(order.id).one(&state.orm).await?.unwrap();
    assert_eq!(after.payment_status, "failed");
    assert_eq!(after.status, "pending");
    assert_eq!(stock_of(&state, product.id).await?, 5);
    assert_eq!(cart_len(&state, user.user_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn insufficient_stock_aborts_checkout_with_no_side_effects() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "user", "oos-buyer@test.example").await?;
    let product = create_product(&state, "Scarce Test Pendant", 1).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?;

    let result = order_service::checkout(&state, &user, checkout_request("cod", None)).await;
    assert!(result.is_err());

    let orders = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(orders, 0);
    assert_eq!(stock_of(&state, product.id).await?, 1);
    assert_eq!(cart_len(&state, user.user_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn coupon_discounts_total_and_claims_one_usage() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "user", "coupon-buyer@test.example").await?;
    let admin = create_user(&state, "admin", "coupon-admin@test.example").await?;
    let product = create_product(&state, "Coupon Test Bangle", 10).await?;

    let created = coupon_service::create_coupon(
        &state,
        &admin,
        CreateCouponRequest {
            code: "flow10".into(),
            discount_type: "percentage".into(),
            discount_value: dec!(10),
            max_discount: None,
            min_order_amount: Some(dec!(1000)),
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Utc::now() + Duration::days(1),
            usage_limit: Some(5),
        },
    )
    .await?;
    let coupon = created.data.unwrap();
    assert_eq!(coupon.code, "FLOW10");

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?;

    let resp =
        order_service::checkout(&state, &user, checkout_request("cod", Some("flow10"))).await?;
    let order = resp.data.unwrap().order;

    // 10% of the 2263 pre-discount total.
    assert_eq!(order.discount, dec!(226.30));
    assert_eq!(order.total_amount, dec!(2036.70));
    assert_eq!(order.coupon_code.as_deref(), Some("FLOW10"));

    let claimed = coupon_service::find_by_code(&state.orm, "FLOW10")
        .await?
        .unwrap();
    assert_eq!(claimed.used_count, 1);

    // An unknown code aborts checkout entirely.
    let fresh = create_user(&state, "user", "coupon-buyer2@test.example").await?;
    cart_service::add_to_cart(
        &state,
        &fresh,
        AddToCartRequest {
            product_id: product.id,
            quantity: 1,
        },
    )
    .await?;
    let bad =
        order_service::checkout(&state, &fresh, checkout_request("cod", Some("NOPE"))).await;
    assert!(bad.is_err());
    let orders = Orders::find()
        .filter(OrderCol::UserId.eq(fresh.user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(orders, 0);

    Ok(())
}
