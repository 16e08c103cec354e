//! Role-based visibility for dashboard data.
//!
//! Admins see and change every row. Agents only see and change rows whose
//! owner column holds their own id.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::routes::auth::{extract_bearer_token, verify_access_token};

/// Dashboard role (`agent_role` enum in the database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[serde(alias = "agente")]
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "agent" | "agente" => Some(Role::Agent),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Which rows a viewer may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Owner(Uuid),
}

impl Scope {
    pub fn permits(&self, owner: Option<Uuid>) -> bool {
        match self {
            Scope::All => true,
            Scope::Owner(id) => owner == Some(*id),
        }
    }

    /// Appends ` AND <column> = $n` when the scope is restricted.
    /// Expects a builder that already has a `WHERE` clause.
    pub fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, column: &str) {
        if let Scope::Owner(id) = self {
            qb.push(" AND ").push(column).push(" = ").push_bind(*id);
        }
    }
}

/// Authenticated dashboard user, taken from the bearer access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub agent_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Viewer {
    pub fn scope(&self) -> Scope {
        if self.role.is_admin() {
            Scope::All
        } else {
            Scope::Owner(self.agent_id)
        }
    }

    pub fn can_view(&self, owner: Option<Uuid>) -> bool {
        self.scope().permits(owner)
    }

    pub fn can_mutate(&self, owner: Option<Uuid>) -> bool {
        self.scope().permits(owner)
    }

    pub fn ensure_can_mutate(&self, owner: Option<Uuid>) -> ApiResult<()> {
        if self.can_mutate(owner) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "You can only modify your own records".to_string(),
            ))
        }
    }

    /// Rows outside the viewer's scope are reported as missing.
    pub fn ensure_can_view(&self, owner: Option<Uuid>) -> ApiResult<()> {
        if self.can_view(owner) {
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admin access required".to_string()))
        }
    }
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;

        let claims = verify_access_token(&token).map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            ApiError::InvalidToken
        })?;

        let agent_id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::InvalidToken)?;
        let role = Role::parse(&claims.role).ok_or(ApiError::InvalidToken)?;

        Ok(Viewer {
            agent_id,
            email: claims.email,
            role,
        })
    }
}

/// Dashboard user holding the admin role.
///
/// Declared before a body extractor, it rejects non-admins with 403 before
/// the body is read or validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin(pub Viewer);

impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let viewer = Viewer::from_request_parts(parts, state).await?;
        viewer.require_admin()?;
        Ok(Admin(viewer))
    }
}
