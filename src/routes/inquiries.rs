/**
 * Public lead intake
 * Contact, appraisal and property inquiry forms from the public site
 */
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::db::{self, models::NewLead};
use crate::error::{ApiError, ApiResult};
use crate::leads::{LeadSource, LeadStatus};
use crate::routes::{
    blank_as_none, leads::insert_lead, phone_digits, trimmed, ValidatedJson, PHONE_RE,
};

#[derive(Debug, Deserialize, Validate)]
pub struct ContactForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "phone_digits"),
        regex(path = *PHONE_RE, message = "Invalid phone")
    )]
    pub phone: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 10, message = "Message must have at least 10 characters"))]
    pub message: String,
}

impl ContactForm {
    pub fn into_lead(self, agent_id: Uuid) -> NewLead {
        NewLead {
            name: self.name,
            email: Some(self.email),
            phone: Some(self.phone),
            notes: Some(self.message),
            property_id: None,
            user_id: Some(agent_id),
            status: LeadStatus::Nuevo,
            source: LeadSource::Contacto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppraisalOperation {
    Venta,
    Alquiler,
}

impl AppraisalOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppraisalOperation::Venta => "VENTA",
            AppraisalOperation::Alquiler => "ALQUILER",
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AppraisalForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "phone_digits"),
        regex(path = *PHONE_RE, message = "Invalid phone")
    )]
    pub phone: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 5, message = "Address must have at least 5 characters"))]
    pub address: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, message = "Select a property type"))]
    pub property_type: String,
    pub operation_type: AppraisalOperation,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub consulta: Option<String>,
}

impl AppraisalForm {
    /// Notes block the agents read on the lead detail page.
    pub fn notes(&self) -> String {
        format!(
            "SOLICITUD DE TASACIÓN\n\
             - Dirección: {}\n\
             - Tipo: {}\n\
             - Operación: {}\n\
             --------------------------------\n\
             Mensaje: {}",
            self.address,
            self.property_type,
            self.operation_type.as_str(),
            self.consulta.as_deref().unwrap_or("Sin mensaje adicional.")
        )
    }

    pub fn into_lead(self, agent_id: Uuid) -> NewLead {
        let notes = self.notes();
        NewLead {
            name: self.name,
            email: self.email,
            phone: Some(self.phone),
            notes: Some(notes),
            property_id: None,
            user_id: Some(agent_id),
            status: LeadStatus::Nuevo,
            source: LeadSource::Tasacion,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InquiryForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "phone_digits"),
        regex(path = *PHONE_RE, message = "Invalid phone")
    )]
    pub phone: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub consulta: Option<String>,
    pub property_id: Uuid,
}

impl InquiryForm {
    pub fn into_lead(self, agent_id: Uuid) -> NewLead {
        NewLead {
            name: self.name,
            email: self.email,
            phone: Some(self.phone),
            notes: self.consulta,
            property_id: Some(self.property_id),
            user_id: Some(agent_id),
            status: LeadStatus::Nuevo,
            source: LeadSource::Web,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryResponse {
    pub success: bool,
    pub message: String,
    pub lead_id: Uuid,
}

/// Agent who receives leads not tied to a listing: the first one registered.
async fn default_agent(pool: &PgPool) -> ApiResult<Uuid> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM agents ORDER BY created_at ASC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    row.map(|(id,)| id).ok_or_else(|| {
        tracing::error!("Lead received but no agent exists to assign it");
        ApiError::Internal("No agent available to assign the lead".to_string())
    })
}

async fn store(
    pool: &PgPool,
    lead: NewLead,
    message: &str,
) -> ApiResult<(StatusCode, Json<InquiryResponse>)> {
    let lead = insert_lead(pool, &lead).await?;

    tracing::info!(
        lead_id = %lead.id,
        source = ?lead.source,
        agent_id = ?lead.user_id,
        "Lead received"
    );

    Ok((
        StatusCode::CREATED,
        Json(InquiryResponse {
            success: true,
            message: message.to_string(),
            lead_id: lead.id,
        }),
    ))
}

/// POST /api/leads/contact
pub async fn contact(
    ValidatedJson(form): ValidatedJson<ContactForm>,
) -> ApiResult<(StatusCode, Json<InquiryResponse>)> {
    let pool = db::require_pool()?;
    let agent_id = default_agent(pool.as_ref()).await?;

    store(
        pool.as_ref(),
        form.into_lead(agent_id),
        "¡Mensaje enviado! Te contactaremos a la brevedad.",
    )
    .await
}

/// POST /api/leads/appraisal
pub async fn appraisal(
    ValidatedJson(form): ValidatedJson<AppraisalForm>,
) -> ApiResult<(StatusCode, Json<InquiryResponse>)> {
    let pool = db::require_pool()?;
    let agent_id = default_agent(pool.as_ref()).await?;

    store(
        pool.as_ref(),
        form.into_lead(agent_id),
        "¡Solicitud enviada! Te contactaremos a la brevedad.",
    )
    .await
}

/// POST /api/leads/inquiry
/// The lead goes to the listing's agent, or the default agent when unassigned
pub async fn inquiry(
    ValidatedJson(form): ValidatedJson<InquiryForm>,
) -> ApiResult<(StatusCode, Json<InquiryResponse>)> {
    let pool = db::require_pool()?;

    let (listing_agent,): (Option<Uuid>,) =
        sqlx::query_as("SELECT agent_id FROM properties WHERE id = $1")
            .bind(form.property_id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound)?;

    let agent_id = match listing_agent {
        Some(id) => id,
        None => default_agent(pool.as_ref()).await?,
    };

    store(
        pool.as_ref(),
        form.into_lead(agent_id),
        "¡Consulta enviada! Te contactaremos a la brevedad.",
    )
    .await
}
