use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum_jewelry_api::{config::AppConfig, db::create_pool};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user(&pool, "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user(&pool, "user@example.com", "user1234", "user").await?;
    seed_catalog(&pool).await?;
    seed_coupons(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn ensure_category(
    pool: &sqlx::PgPool,
    name: &str,
    slug: &str,
) -> anyhow::Result<Uuid> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO categories (id, name, slug)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET slug = EXCLUDED.slug
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(slug)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

struct SeedProduct {
    name: &'static str,
    description: &'static str,
    metal_type: &'static str,
    base_price: Decimal,
    selling_price: Decimal,
    making_charge: Decimal,
    weight_grams: Decimal,
    stock: i32,
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let rings = ensure_category(pool, "Rings", "rings").await?;
    let chains = ensure_category(pool, "Chains", "chains").await?;
    let earrings = ensure_category(pool, "Earrings", "earrings").await?;

    let products = vec![
        (
            rings,
            SeedProduct {
                name: "Classic Gold Band",
                description: "22K gold band, comfort fit",
                metal_type: "gold",
                base_price: dec!(28000),
                selling_price: dec!(26500),
                making_charge: dec!(1200),
                weight_grams: dec!(4.20),
                stock: 12,
            },
        ),
        (
            chains,
            SeedProduct {
                name: "Rope Chain 20in",
                description: "Solid silver rope chain",
                metal_type: "silver",
                base_price: dec!(5400),
                selling_price: dec!(4999),
                making_charge: dec!(350),
                weight_grams: dec!(18.50),
                stock: 30,
            },
        ),
        (
            earrings,
            SeedProduct {
                name: "Pearl Drop Earrings",
                description: "Freshwater pearls on gold hooks",
                metal_type: "gold",
                base_price: dec!(9200),
                selling_price: dec!(8750),
                making_charge: dec!(600),
                weight_grams: dec!(6.80),
                stock: 8,
            },
        ),
    ];

    for (category_id, p) in products {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, category_id, name, slug, description, metal_type,
                base_price, selling_price, making_charge, weight_grams,
                stock, is_in_stock
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(category_id)
        .bind(p.name)
        .bind(axum_jewelry_api::models::slugify(p.name))
        .bind(p.description)
        .bind(p.metal_type)
        .bind(p.base_price)
        .bind(p.selling_price)
        .bind(p.making_charge)
        .bind(p.weight_grams)
        .bind(p.stock)
        .bind(p.stock > 0)
        .execute(pool)
        .await?;
    }

    println!("Seeded catalog");
    Ok(())
}

async fn seed_coupons(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO coupons (
            id, code, discount_type, discount_value, max_discount,
            min_order_amount, valid_from, valid_until, usage_limit
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (code) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind("WELCOME10")
    .bind("percentage")
    .bind(dec!(10))
    .bind(dec!(2000))
    .bind(dec!(1000))
    .bind(Utc::now())
    .bind(Utc::now() + Duration::days(90))
    .bind(500)
    .execute(pool)
    .await?;

    println!("Seeded coupons");
    Ok(())
}
