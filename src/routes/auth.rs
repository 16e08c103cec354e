/**
 * Authentication Routes
 * JWT-based agent sessions: register, login, verify, refresh, and logout
 */
use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use validator::Validate;

use crate::access::Role;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::routes::ValidatedJson;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_JWT_SECRET: &str = "default-jwt-secret-change-in-production";

lazy_static::lazy_static! {
    /// JWT secret key from environment
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string());

    /// Pepper mixed into stored refresh token hashes
    pub static ref REFRESH_SECRET: String = std::env::var("REFRESH_TOKEN_SECRET")
        .unwrap_or_else(|_| JWT_SECRET.clone());

    /// Refresh tokens issued by this process, keyed by hash
    pub static ref REFRESH_TOKENS: Arc<RwLock<HashMap<String, RefreshTokenData>>> =
        Arc::new(RwLock::new(HashMap::new()));

    /// Login and register attempts per client IP
    pub static ref AUTH_LIMITER: RateLimiter =
        RateLimiter::new(RATE_LIMIT_WINDOW_SECS, RATE_LIMIT_MAX_ATTEMPTS);
}

/// Access token expiry in minutes
const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 15;

/// Refresh token expiry in days
const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,   // Agent ID
    pub email: String, // Agent email
    pub role: String,  // admin | agent
    pub exp: i64,
    pub iat: i64,
}

/// Cached refresh token state
#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    pub agent_id: Uuid,
    pub expires_at: i64,
    pub revoked: bool,
}

/// Session owner returned to the dashboard
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub agent_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Adds a refresh token to the cache, dropping entries that have expired.
/// Revoked entries stay until they expire so a replay is refused locally.
pub fn cache_refresh_token(
    tokens: &mut HashMap<String, RefreshTokenData>,
    token_hash: String,
    data: RefreshTokenData,
    now: i64,
) {
    tokens.retain(|_, cached| cached.expires_at > now);
    tokens.insert(token_hash, data);
}

/// Fixed-window attempt counter keyed by client address.
pub struct RateLimiter {
    window_secs: i64,
    max_attempts: u32,
    entries: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    pub fn new(window_secs: i64, max_attempts: u32) -> Self {
        Self {
            window_secs,
            max_attempts,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt at `now` (unix seconds); false once the window is full.
    pub async fn check(&self, key: &str, now: i64) -> bool {
        let mut entries = self.entries.lock().await;

        // Drop expired windows so the map tracks only active clients.
        entries.retain(|_, (start, _)| now - *start < self.window_secs);

        let entry = entries.entry(key.to_string()).or_insert((now, 0));
        if entry.1 >= self.max_attempts {
            return false;
        }
        entry.1 += 1;
        true
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: SessionUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub user: SessionUser,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub is_valid: bool,
    pub user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// SHA-256 of the refresh secret and the token; only this digest is stored.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(REFRESH_SECRET.as_bytes());
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn create_access_token(
    agent_id: &Uuid,
    email: &str,
    role: Role,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES);

    let claims = Claims {
        sub: agent_id.to_string(),
        email: email.to_string(),
        role: role.as_str().to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
}

/// Verify and decode access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Bcrypt runs on the blocking pool to keep the executor free.
pub async fn hash_password(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash(&password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {}", e)))
}

async fn check_password(password: String, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify(&password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

async fn enforce_rate_limit(addr: &SocketAddr) -> ApiResult<()> {
    let ip = addr.ip().to_string();
    if AUTH_LIMITER.check(&ip, Utc::now().timestamp()).await {
        Ok(())
    } else {
        tracing::warn!("Rate limit reached for {}", ip);
        Err(ApiError::TooManyRequests)
    }
}

/// Issues an access token and a fresh refresh token, persisting the latter.
async fn issue_session(pool: &PgPool, user: &SessionUser) -> ApiResult<(String, String)> {
    let access_token = create_access_token(&user.agent_id, &user.email, user.role)
        .map_err(|e| ApiError::Internal(format!("failed to create token: {}", e)))?;

    let refresh_token = generate_refresh_token();
    let token_hash = hash_refresh_token(&refresh_token);
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    sqlx::query(
        "INSERT INTO agent_refresh_tokens (agent_id, token_hash, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(user.agent_id)
    .bind(&token_hash)
    .bind(expires_at)
    .execute(pool)
    .await?;

    cache_refresh_token(
        &mut *REFRESH_TOKENS.write().await,
        token_hash,
        RefreshTokenData {
            agent_id: user.agent_id,
            expires_at: expires_at.timestamp(),
            revoked: false,
        },
        Utc::now().timestamp(),
    );

    Ok((access_token, refresh_token))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register
/// Creates the first admin agent; closed once any agent exists
pub async fn register(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    enforce_rate_limit(&addr).await?;
    let pool = db::require_pool()?;

    let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents")
        .fetch_one(pool.as_ref())
        .await?;
    if existing > 0 {
        return Err(ApiError::Forbidden(
            "Registration is closed. An admin account already exists.".to_string(),
        ));
    }

    let password_hash = hash_password(payload.password).await?;

    let (agent_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO agents (email, password_hash, full_name, phone, role)
        VALUES ($1, $2, $3, $4, 'admin')
        RETURNING id
        "#,
    )
    .bind(payload.email.trim().to_lowercase())
    .bind(&password_hash)
    .bind(&payload.full_name)
    .bind(&payload.phone)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| ApiError::from_insert(e, "Email already registered"))?;

    tracing::info!("Admin agent registered: {}", payload.email);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            user: SessionUser {
                agent_id,
                email: payload.email,
                role: Role::Admin,
            },
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    enforce_rate_limit(&addr).await?;
    let pool = db::require_pool()?;

    let row: Option<(Uuid, String, String, Role)> = sqlx::query_as(
        "SELECT id, email, password_hash, role FROM agents WHERE LOWER(email) = LOWER($1)",
    )
    .bind(&payload.email)
    .fetch_optional(pool.as_ref())
    .await?;

    let Some((agent_id, email, password_hash, role)) = row else {
        tracing::warn!("Login attempt for unknown agent: {}", payload.email);
        return Err(ApiError::InvalidCredentials);
    };

    if !check_password(payload.password, password_hash).await {
        sqlx::query(
            "UPDATE agents SET login_attempts = login_attempts + 1, updated_at = now() WHERE id = $1",
        )
        .bind(agent_id)
        .execute(pool.as_ref())
        .await?;
        tracing::warn!("Failed login attempt for: {}", email);
        return Err(ApiError::InvalidCredentials);
    }

    sqlx::query(
        "UPDATE agents SET last_login_at = now(), last_login_ip = $1, login_attempts = 0, \
         updated_at = now() WHERE id = $2",
    )
    .bind(addr.ip().to_string())
    .bind(agent_id)
    .execute(pool.as_ref())
    .await?;

    let user = SessionUser {
        agent_id,
        email,
        role,
    };
    let (access_token, refresh_token) = issue_session(pool.as_ref(), &user).await?;

    tracing::info!("Successful login for agent: {}", user.email);

    Ok(Json(LoginResponse {
        success: true,
        user,
        access_token,
        refresh_token,
    }))
}

/// POST /api/auth/verify
/// Always 200; the body says whether the token is usable
pub async fn verify_token(headers: HeaderMap) -> Json<VerifyResponse> {
    let invalid = |error: &str| {
        Json(VerifyResponse {
            success: false,
            is_valid: false,
            user: None,
            error: Some(error.to_string()),
        })
    };

    let Some(token) = extract_bearer_token(&headers) else {
        return invalid("No authorization token provided");
    };

    let claims = match verify_access_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            return invalid("Invalid or expired token");
        }
    };

    match (Uuid::parse_str(&claims.sub), Role::parse(&claims.role)) {
        (Ok(agent_id), Some(role)) => Json(VerifyResponse {
            success: true,
            is_valid: true,
            user: Some(SessionUser {
                agent_id,
                email: claims.email,
                role,
            }),
            error: None,
        }),
        _ => invalid("Invalid or expired token"),
    }
}

/// POST /api/auth/refresh
/// Rotates the refresh token; the new access token carries the agent's current role
pub async fn refresh(
    ValidatedJson(payload): ValidatedJson<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let token_hash = hash_refresh_token(&payload.refresh_token);
    let now = Utc::now();

    let revoked_locally = REFRESH_TOKENS
        .read()
        .await
        .get(&token_hash)
        .map(|data| data.revoked || data.expires_at <= now.timestamp())
        .unwrap_or(false);
    if revoked_locally {
        return Err(ApiError::InvalidToken);
    }

    let pool = db::require_pool()?;

    let row: Option<(Uuid, String, Role, DateTime<Utc>, bool)> = sqlx::query_as(
        r#"SELECT a.id, a.email, a.role, t.expires_at, t.revoked
           FROM agent_refresh_tokens t
           JOIN agents a ON a.id = t.agent_id
           WHERE t.token_hash = $1"#,
    )
    .bind(&token_hash)
    .fetch_optional(pool.as_ref())
    .await?;

    let user = match row {
        Some((agent_id, email, role, expires_at, revoked)) if !revoked && expires_at > now => {
            SessionUser {
                agent_id,
                email,
                role,
            }
        }
        _ => return Err(ApiError::InvalidToken),
    };

    sqlx::query("UPDATE agent_refresh_tokens SET revoked = true WHERE token_hash = $1")
        .bind(&token_hash)
        .execute(pool.as_ref())
        .await?;
    if let Some(data) = REFRESH_TOKENS.write().await.get_mut(&token_hash) {
        data.revoked = true;
    }

    let (access_token, refresh_token) = issue_session(pool.as_ref(), &user).await?;

    Ok(Json(RefreshResponse {
        success: true,
        access_token,
        refresh_token,
    }))
}

/// POST /api/auth/logout
/// Revokes the given refresh token, or every token of the access token's owner.
/// Idempotent: always succeeds.
pub async fn logout(
    headers: HeaderMap,
    Json(payload): Json<LogoutRequest>,
) -> Json<LogoutResponse> {
    let pool = db::get_pool();

    if let Some(refresh_token) = payload.refresh_token {
        let token_hash = hash_refresh_token(&refresh_token);

        if let Some(ref p) = pool {
            if let Err(e) =
                sqlx::query("UPDATE agent_refresh_tokens SET revoked = true WHERE token_hash = $1")
                    .bind(&token_hash)
                    .execute(p.as_ref())
                    .await
            {
                tracing::error!("Failed to revoke refresh token: {}", e);
            }
        }

        if let Some(data) = REFRESH_TOKENS.write().await.get_mut(&token_hash) {
            data.revoked = true;
        }
    }

    let owner = payload
        .access_token
        .or_else(|| extract_bearer_token(&headers))
        .and_then(|token| verify_access_token(&token).ok())
        .and_then(|claims| Uuid::parse_str(&claims.sub).ok());

    if let Some(agent_id) = owner {
        if let Some(ref p) = pool {
            if let Err(e) =
                sqlx::query("UPDATE agent_refresh_tokens SET revoked = true WHERE agent_id = $1")
                    .bind(agent_id)
                    .execute(p.as_ref())
                    .await
            {
                tracing::error!("Failed to revoke agent sessions: {}", e);
            }
        }

        let mut tokens = REFRESH_TOKENS.write().await;
        for data in tokens.values_mut() {
            if data.agent_id == agent_id {
                data.revoked = true;
            }
        }
    }

    Json(LogoutResponse { success: true })
}
