/**
 * Agent management
 * Admin-only team administration plus each agent's own profile
 */
use axum::{extract::Path, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::access::{Admin, Role, Viewer};
use crate::db::{self, models::Agent};
use crate::error::{ApiError, ApiResult};
use crate::routes::{
    auth::hash_password, blank_as_none, phone_digits, trimmed, ValidatedJson, PHONE_RE,
};

const AGENT_COLUMNS: &str =
    "id, email, password_hash, full_name, phone, role, avatar_url, created_at";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewAgentForm {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub password: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub full_name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "phone_digits"),
        regex(path = *PHONE_RE, message = "Invalid phone")
    )]
    pub phone: String,
    pub role: Role,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdateForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub full_name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "phone_digits"),
        regex(path = *PHONE_RE, message = "Invalid phone")
    )]
    pub phone: String,
    pub role: Role,
    /// Absent keeps the current photo
    #[serde(default, deserialize_with = "blank_as_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub full_name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(
        custom(function = "phone_digits"),
        regex(path = *PHONE_RE, message = "Invalid phone")
    )]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub avatar_url: Option<String>,
}

/// GET /api/dashboard/agents
pub async fn list(_admin: Admin) -> ApiResult<Json<Vec<Agent>>> {
    let pool = db::require_pool()?;

    let agents = sqlx::query_as::<_, Agent>(&format!(
        "SELECT {} FROM agents ORDER BY created_at ASC",
        AGENT_COLUMNS
    ))
    .fetch_all(pool.as_ref())
    .await?;

    Ok(Json(agents))
}

/// POST /api/dashboard/agents
pub async fn create(
    Admin(viewer): Admin,
    ValidatedJson(form): ValidatedJson<NewAgentForm>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let pool = db::require_pool()?;

    let password_hash = hash_password(form.password).await?;
    let email = form.email.trim().to_lowercase();

    let agent = sqlx::query_as::<_, Agent>(&format!(
        "INSERT INTO agents (email, password_hash, full_name, phone, role, avatar_url) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        AGENT_COLUMNS
    ))
    .bind(&email)
    .bind(&password_hash)
    .bind(&form.full_name)
    .bind(&form.phone)
    .bind(form.role)
    .bind(&form.avatar_url)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| ApiError::from_insert(e, "Email already registered"))?;

    tracing::info!(
        agent_id = %agent.id,
        role = agent.role.as_str(),
        "Agent created by {}",
        viewer.email
    );
    Ok((StatusCode::CREATED, Json(agent)))
}

/// PATCH /api/dashboard/agents/{id}
pub async fn update(
    _admin: Admin,
    Path(id): Path<Uuid>,
    ValidatedJson(form): ValidatedJson<AgentUpdateForm>,
) -> ApiResult<Json<Agent>> {
    let pool = db::require_pool()?;

    let agent = sqlx::query_as::<_, Agent>(&format!(
        "UPDATE agents SET full_name = $1, phone = $2, role = $3, \
         avatar_url = COALESCE($4, avatar_url), updated_at = NOW() \
         WHERE id = $5 RETURNING {}",
        AGENT_COLUMNS
    ))
    .bind(&form.full_name)
    .bind(&form.phone)
    .bind(form.role)
    .bind(&form.avatar_url)
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    tracing::info!(agent_id = %id, role = agent.role.as_str(), "Agent updated");
    Ok(Json(agent))
}

/// DELETE /api/dashboard/agents/{id}
/// Listings and leads of the removed agent stay, unassigned.
pub async fn delete(Admin(viewer): Admin, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    if id == viewer.agent_id {
        return Err(ApiError::BadRequest(
            "You cannot delete your own account".to_string(),
        ));
    }
    let pool = db::require_pool()?;

    let deleted = sqlx::query("DELETE FROM agents WHERE id = $1")
        .bind(id)
        .execute(pool.as_ref())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound);
    }

    tracing::info!(agent_id = %id, "Agent deleted by {}", viewer.email);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/dashboard/profile
pub async fn profile(viewer: Viewer) -> ApiResult<Json<Agent>> {
    let pool = db::require_pool()?;

    let agent = sqlx::query_as::<_, Agent>(&format!(
        "SELECT {} FROM agents WHERE id = $1",
        AGENT_COLUMNS
    ))
    .bind(viewer.agent_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    Ok(Json(agent))
}

/// PATCH /api/dashboard/profile
pub async fn update_profile(
    viewer: Viewer,
    ValidatedJson(form): ValidatedJson<ProfileForm>,
) -> ApiResult<Json<Agent>> {
    let pool = db::require_pool()?;

    let agent = sqlx::query_as::<_, Agent>(&format!(
        "UPDATE agents SET full_name = $1, phone = $2, \
         avatar_url = COALESCE($3, avatar_url), updated_at = NOW() \
         WHERE id = $4 RETURNING {}",
        AGENT_COLUMNS
    ))
    .bind(&form.full_name)
    .bind(&form.phone)
    .bind(&form.avatar_url)
    .bind(viewer.agent_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    Ok(Json(agent))
}
