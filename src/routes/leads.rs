/**
 * Dashboard lead routes
 * Lead table, manual lead entry, status changes and follow-up notes
 */
use axum::{
    extract::Path,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::access::Viewer;
use crate::db::{
    self,
    models::{Lead, LeadListItem, LeadNote, NewLead, LEAD_COLUMNS},
};
use crate::error::{ApiError, ApiResult};
use crate::leads::{status_options, LeadSource, LeadStatus, StatusOption};
use crate::routes::{blank_as_none, trimmed, ValidatedJson, PHONE_RE};

const LEAD_RETURNING: &str =
    "id, name, email, phone, status, source, property_id, user_id, notes, created_at";

pub async fn insert_lead(pool: &PgPool, lead: &NewLead) -> Result<Lead, sqlx::Error> {
    sqlx::query_as::<_, Lead>(&format!(
        "INSERT INTO leads (name, email, phone, notes, property_id, user_id, status, source) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
        LEAD_RETURNING
    ))
    .bind(&lead.name)
    .bind(&lead.email)
    .bind(&lead.phone)
    .bind(&lead.notes)
    .bind(lead.property_id)
    .bind(lead.user_id)
    .bind(lead.status)
    .bind(lead.source)
    .fetch_one(pool)
    .await
}

/// Lead rows visible to `viewer`, newest first, with `canEdit` filled in.
pub async fn visible_leads(
    pool: &PgPool,
    viewer: &Viewer,
    limit: Option<i64>,
) -> Result<Vec<LeadListItem>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {}, p.title AS property_title, a.full_name AS agent_name FROM leads l \
         LEFT JOIN properties p ON p.id = l.property_id \
         LEFT JOIN agents a ON a.id = l.user_id WHERE TRUE",
        LEAD_COLUMNS
    ));
    viewer.scope().push_filter(&mut qb, "l.user_id");
    qb.push(" ORDER BY l.created_at DESC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit);
    }

    let mut rows = qb
        .build_query_as::<LeadListItem>()
        .fetch_all(pool)
        .await?;
    for row in &mut rows {
        row.can_edit = viewer.can_mutate(row.lead.user_id);
    }
    Ok(rows)
}

/// Owner of a lead; `NotFound` when the lead does not exist.
async fn lead_owner(pool: &PgPool, id: Uuid) -> ApiResult<Option<Uuid>> {
    let (owner,): (Option<Uuid>,) = sqlx::query_as("SELECT user_id FROM leads WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(owner)
}

fn manual_source(source: &LeadSource) -> Result<(), ValidationError> {
    if source.is_manual() {
        Ok(())
    } else {
        Err(ValidationError::new("source")
            .with_message("Source must be TELEFONO, EMAIL, WEB or REFERIDO".into()))
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new("blank").with_message("The note cannot be empty".into()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LeadForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(regex(path = *PHONE_RE, message = "Invalid phone"))]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub notes: Option<String>,
    #[validate(custom(function = "manual_source"))]
    pub source: LeadSource,
    #[serde(default)]
    pub property_id: Option<Uuid>,
}

impl LeadForm {
    pub fn into_new_lead(self, owner: Uuid) -> NewLead {
        NewLead {
            name: self.name,
            email: self.email,
            phone: self.phone,
            notes: self.notes,
            property_id: self.property_id,
            user_id: Some(owner),
            status: LeadStatus::Nuevo,
            source: self.source,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusUpdate {
    pub status: LeadStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NoteForm {
    #[validate(custom(function = "not_blank"))]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct LeadsPage {
    pub leads: Vec<LeadListItem>,
    pub statuses: Vec<StatusOption>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDetail {
    #[serde(flatten)]
    pub lead: LeadListItem,
    pub notes: Vec<LeadNote>,
    pub statuses: Vec<StatusOption>,
}

/// GET /api/dashboard/leads
pub async fn list(viewer: Viewer) -> ApiResult<Json<LeadsPage>> {
    let pool = db::require_pool()?;
    let leads = visible_leads(pool.as_ref(), &viewer, None).await?;

    Ok(Json(LeadsPage {
        leads,
        statuses: status_options(),
    }))
}

/// POST /api/dashboard/leads
/// Manual entry; the lead is assigned to its creator
pub async fn create(
    viewer: Viewer,
    ValidatedJson(form): ValidatedJson<LeadForm>,
) -> ApiResult<(StatusCode, Json<Lead>)> {
    let pool = db::require_pool()?;
    let lead = insert_lead(pool.as_ref(), &form.into_new_lead(viewer.agent_id)).await?;

    tracing::info!(lead_id = %lead.id, agent_id = %viewer.agent_id, "Lead created from dashboard");
    Ok((StatusCode::CREATED, Json(lead)))
}

/// GET /api/dashboard/leads/{id}
/// Leads outside the viewer's scope answer 404
pub async fn detail(viewer: Viewer, Path(id): Path<Uuid>) -> ApiResult<Json<LeadDetail>> {
    let pool = db::require_pool()?;

    let mut lead = sqlx::query_as::<_, LeadListItem>(&format!(
        "SELECT {}, p.title AS property_title, a.full_name AS agent_name FROM leads l \
         LEFT JOIN properties p ON p.id = l.property_id \
         LEFT JOIN agents a ON a.id = l.user_id WHERE l.id = $1",
        LEAD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    viewer.ensure_can_view(lead.lead.user_id)?;
    lead.can_edit = viewer.can_mutate(lead.lead.user_id);

    let notes = sqlx::query_as::<_, LeadNote>(
        "SELECT id, lead_id, user_id, content, created_at FROM lead_notes \
         WHERE lead_id = $1 ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(pool.as_ref())
    .await?;

    Ok(Json(LeadDetail {
        lead,
        notes,
        statuses: status_options(),
    }))
}

/// PATCH /api/dashboard/leads/{id}/status
/// Any status may follow any other
pub async fn update_status(
    viewer: Viewer,
    Path(id): Path<Uuid>,
    ValidatedJson(update): ValidatedJson<StatusUpdate>,
) -> ApiResult<Json<Lead>> {
    let pool = db::require_pool()?;
    viewer.ensure_can_mutate(lead_owner(pool.as_ref(), id).await?)?;

    let lead = sqlx::query_as::<_, Lead>(&format!(
        "UPDATE leads SET status = $1 WHERE id = $2 RETURNING {}",
        LEAD_RETURNING
    ))
    .bind(update.status)
    .bind(id)
    .fetch_one(pool.as_ref())
    .await?;

    tracing::info!(lead_id = %id, status = ?update.status, "Lead status updated");
    Ok(Json(lead))
}

/// POST /api/dashboard/leads/{id}/notes
pub async fn add_note(
    viewer: Viewer,
    Path(id): Path<Uuid>,
    ValidatedJson(form): ValidatedJson<NoteForm>,
) -> ApiResult<(StatusCode, Json<LeadNote>)> {
    let pool = db::require_pool()?;
    let owner = lead_owner(pool.as_ref(), id).await?;
    viewer.ensure_can_view(owner)?;

    let note = sqlx::query_as::<_, LeadNote>(
        "INSERT INTO lead_notes (lead_id, user_id, content) VALUES ($1, $2, $3) \
         RETURNING id, lead_id, user_id, content, created_at",
    )
    .bind(id)
    .bind(viewer.agent_id)
    .bind(form.content.trim())
    .fetch_one(pool.as_ref())
    .await?;

    Ok((StatusCode::CREATED, Json(note)))
}

/// DELETE /api/dashboard/leads/{id}
pub async fn delete(viewer: Viewer, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let pool = db::require_pool()?;
    viewer.ensure_can_mutate(lead_owner(pool.as_ref(), id).await?)?;

    sqlx::query("DELETE FROM leads WHERE id = $1")
        .bind(id)
        .execute(pool.as_ref())
        .await?;

    tracing::info!(lead_id = %id, agent_id = %viewer.agent_id, "Lead deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::routes::test_support::{bearer, error_of, send};
    use axum::routing::{get, patch, post};
    use axum::Router;
    use serde_json::json;

    fn app() -> Router {
        Router::new()
            .route("/api/dashboard/leads", get(list).post(create))
            .route("/api/dashboard/leads/{id}", get(detail).delete(delete))
            .route("/api/dashboard/leads/{id}/status", patch(update_status))
            .route("/api/dashboard/leads/{id}/notes", post(add_note))
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (status, _) = send(app(), "GET", "/api/dashboard/leads", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/leads",
            None,
            Some(json!({ "name": "Ju", "source": "CONTACTO" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_lead_is_rejected_before_database() {
        let (_, auth) = bearer(Role::Agent);
        let (status, bytes) = send(
            app(),
            "POST",
            "/api/dashboard/leads",
            Some(&auth),
            Some(json!({ "name": "Ju", "email": "nope", "source": "CONTACTO" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = error_of(&bytes).message.unwrap();
        assert!(message.contains("name:"));
        assert!(message.contains("email:"));
        assert!(message.contains("source:"));
    }

    #[tokio::test]
    async fn test_valid_lead_reaches_database_layer() {
        let (_, auth) = bearer(Role::Agent);
        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/leads",
            Some(&auth),
            Some(json!({
                "name": "Juan Perez",
                "email": "",
                "phone": "3491000000",
                "source": "TELEFONO"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_blank_note_and_unknown_status_are_rejected() {
        let (_, auth) = bearer(Role::Admin);
        let id = Uuid::new_v4();

        let (status, _) = send(
            app(),
            "POST",
            &format!("/api/dashboard/leads/{}/notes", id),
            Some(&auth),
            Some(json!({ "content": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app(),
            "PATCH",
            &format!("/api/dashboard/leads/{}/status", id),
            Some(&auth),
            Some(json!({ "status": "GANADO" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_every_status_is_accepted_from_any_status() {
        let (_, auth) = bearer(Role::Agent);
        for next in LeadStatus::ALL {
            let (status, _) = send(
                app(),
                "PATCH",
                &format!("/api/dashboard/leads/{}/status", Uuid::new_v4()),
                Some(&auth),
                Some(json!({ "status": next })),
            )
            .await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{:?}", next);
        }
    }

    #[tokio::test]
    async fn test_padded_name_is_rejected_before_database() {
        let (_, auth) = bearer(Role::Agent);
        for name in ["  a  ", "     "] {
            let (status, bytes) = send(
                app(),
                "POST",
                "/api/dashboard/leads",
                Some(&auth),
                Some(json!({ "name": name, "source": "TELEFONO" })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(error_of(&bytes).message.unwrap().contains("name:"));
        }
    }

    #[test]
    fn test_form_builds_new_lead_for_creator() {
        let owner = Uuid::new_v4();
        let form: LeadForm = serde_json::from_value(json!({
            "name": " Ana Gomez ",
            "email": "",
            "phone": "3492 501234",
            "source": "REFERIDO"
        }))
        .unwrap();
        assert!(form.validate().is_ok());

        let lead = form.into_new_lead(owner);
        assert_eq!(lead.name, "Ana Gomez");
        assert_eq!(lead.email, None);
        assert_eq!(lead.user_id, Some(owner));
        assert_eq!(lead.status, LeadStatus::Nuevo);
        assert_eq!(lead.source, LeadSource::Referido);
    }
}
