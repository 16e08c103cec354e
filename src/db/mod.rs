pub mod models;

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::ApiError;

static DB_POOL: OnceCell<Arc<PgPool>> = OnceCell::const_new();

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/terranova".to_string()),
            max_connections: std::env::var("DB_POOL_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_POOL_MIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        }
    }
}

/// Masks everything but the URL skeleton so credentials never reach the logs.
fn redact_url(url: &str) -> String {
    url.replace(
        |c: char| !c.is_ascii_alphanumeric() && c != ':' && c != '/' && c != '@' && c != '.',
        "*",
    )
}

pub async fn init_pool(config: Option<DbConfig>) -> Result<Arc<PgPool>, sqlx::Error> {
    let config = config.unwrap_or_default();

    tracing::info!("Initializing database connection pool...");
    tracing::debug!("Database URL: {}", redact_url(&config.url));

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    tracing::info!("Database connection pool initialized successfully");

    let pool = Arc::new(pool);
    let _ = DB_POOL.set(pool.clone());

    Ok(pool)
}

pub fn get_pool() -> Option<Arc<PgPool>> {
    DB_POOL.get().cloned()
}

/// Pool or `503 Database not available`.
pub fn require_pool() -> Result<Arc<PgPool>, ApiError> {
    get_pool().ok_or(ApiError::DatabaseUnavailable)
}

pub async fn health_check() -> Result<std::time::Duration, sqlx::Error> {
    let pool = get_pool()
        .ok_or_else(|| sqlx::Error::Configuration("Database pool not initialized".into()))?;

    let start = std::time::Instant::now();
    sqlx::query("SELECT 1").fetch_one(pool.as_ref()).await?;

    Ok(start.elapsed())
}

const SCHEMA: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE property_status AS ENUM
            ('EN_VENTA', 'EN_ALQUILER', 'RESERVADO', 'VENDIDO', 'ALQUILADO');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE lead_status AS ENUM
            ('NUEVO', 'CONTACTADO', 'VISITA_PROGRAMADA', 'NEGOCIACION', 'CERRADO', 'DESCARTADO');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE lead_source AS ENUM
            ('WEB', 'CONTACTO', 'TASACION', 'TELEFONO', 'EMAIL', 'REFERIDO');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE agent_role AS ENUM ('admin', 'agent');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        email TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        full_name TEXT,
        phone TEXT,
        role agent_role NOT NULL DEFAULT 'agent',
        avatar_url TEXT,
        login_attempts INTEGER NOT NULL DEFAULT 0,
        last_login_at TIMESTAMPTZ,
        last_login_ip TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_refresh_tokens (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        token_hash TEXT NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS property_types (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS amenities (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        icon_name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS properties (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        title TEXT NOT NULL,
        description TEXT,
        street_address TEXT,
        neighborhood TEXT,
        city TEXT,
        province TEXT,
        price DOUBLE PRECISION,
        currency TEXT DEFAULT 'USD',
        normalized_price DOUBLE PRECISION,
        status property_status NOT NULL DEFAULT 'EN_VENTA',
        operation_type TEXT,
        property_type_id INTEGER REFERENCES property_types(id) ON DELETE SET NULL,
        bedrooms INTEGER,
        bathrooms INTEGER,
        rooms INTEGER,
        total_area DOUBLE PRECISION,
        covered_area DOUBLE PRECISION,
        expensas DOUBLE PRECISION,
        antiguedad TEXT,
        cocheras INTEGER,
        latitude DOUBLE PRECISION,
        longitude DOUBLE PRECISION,
        agent_id UUID REFERENCES agents(id) ON DELETE SET NULL,
        views BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS property_images (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        property_id UUID NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
        image_url TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS property_amenities (
        property_id UUID NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
        amenity_id INTEGER NOT NULL REFERENCES amenities(id) ON DELETE CASCADE,
        PRIMARY KEY (property_id, amenity_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        status lead_status NOT NULL DEFAULT 'NUEVO',
        source lead_source NOT NULL,
        property_id UUID REFERENCES properties(id) ON DELETE SET NULL,
        user_id UUID REFERENCES agents(id) ON DELETE SET NULL,
        notes TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lead_notes (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        lead_id UUID NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
        user_id UUID REFERENCES agents(id) ON DELETE SET NULL,
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exchange_rates (
        id INTEGER PRIMARY KEY,
        usd_to_ars DOUBLE PRECISION NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "INSERT INTO exchange_rates (id, usd_to_ars) VALUES (1, 1500) ON CONFLICT (id) DO NOTHING",
    "CREATE INDEX IF NOT EXISTS idx_agent_refresh_tokens_agent_id ON agent_refresh_tokens(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_agent_refresh_tokens_expires_at ON agent_refresh_tokens(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_properties_created_at ON properties(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_properties_city ON properties(city)",
    "CREATE INDEX IF NOT EXISTS idx_properties_status ON properties(status)",
    "CREATE INDEX IF NOT EXISTS idx_properties_agent_id ON properties(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_property_images_property_id ON property_images(property_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_property_amenities_amenity_id ON property_amenities(amenity_id)",
    "CREATE INDEX IF NOT EXISTS idx_leads_user_id ON leads(user_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_lead_notes_lead_id ON lead_notes(lead_id, created_at DESC)",
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database migrations completed successfully");

    Ok(())
}
