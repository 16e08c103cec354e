//! Database Models - structs representing database tables (used by sqlx/serde).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::access::Role;
use crate::leads::{LeadSource, LeadStatus};

/// Listing status (`property_status` enum in the database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "property_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyStatus {
    EnVenta,
    EnAlquiler,
    Reservado,
    Vendido,
    Alquilado,
}

impl PropertyStatus {
    pub const ALL: [PropertyStatus; 5] = [
        PropertyStatus::EnVenta,
        PropertyStatus::EnAlquiler,
        PropertyStatus::Reservado,
        PropertyStatus::Vendido,
        PropertyStatus::Alquilado,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::EnVenta => "EN_VENTA",
            PropertyStatus::EnAlquiler => "EN_ALQUILER",
            PropertyStatus::Reservado => "RESERVADO",
            PropertyStatus::Vendido => "VENDIDO",
            PropertyStatus::Alquilado => "ALQUILADO",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PropertyStatus::EnVenta => "En Venta",
            PropertyStatus::EnAlquiler => "En Alquiler",
            PropertyStatus::Reservado => "Reservado",
            PropertyStatus::Vendido => "Vendido",
            PropertyStatus::Alquilado => "Alquilado",
        }
    }

    /// Still on the market (counted as "active" on the dashboard, "InStock" for SEO)
    pub fn is_available(&self) -> bool {
        matches!(self, PropertyStatus::EnVenta | PropertyStatus::EnAlquiler)
    }
}

/// Property model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub street_address: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub normalized_price: Option<f64>,
    pub status: PropertyStatus,
    pub operation_type: Option<String>,
    pub property_type_id: Option<i32>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub rooms: Option<i32>,
    pub total_area: Option<f64>,
    pub covered_area: Option<f64>,
    pub expensas: Option<f64>,
    pub antiguedad: Option<String>,
    pub cocheras: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub agent_id: Option<Uuid>,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`Property`], for `SELECT` and `RETURNING` clauses.
pub const PROPERTY_COLUMNS: &str = "p.id, p.title, p.description, p.street_address, \
    p.neighborhood, p.city, p.province, p.price, p.currency, p.normalized_price, p.status, \
    p.operation_type, p.property_type_id, p.bedrooms, p.bathrooms, p.rooms, p.total_area, \
    p.covered_area, p.expensas, p.antiguedad, p.cocheras, p.latitude, p.longitude, \
    p.agent_id, p.views, p.created_at, p.updated_at";

/// Listing card shown in public search results
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyCard {
    pub id: Uuid,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub normalized_price: Option<f64>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub total_area: Option<f64>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub street_address: Option<String>,
    pub status: PropertyStatus,
    pub operation_type: Option<String>,
    pub property_type_id: Option<i32>,
    pub image_urls: Vec<String>,
    pub amenity_ids: Vec<i32>,
    pub created_at: DateTime<Utc>,
}

/// Column list matching [`PropertyCard`]; expects the `properties` table aliased as `p`.
pub const PROPERTY_CARD_COLUMNS: &str = r#"p.id, p.title, p.price, p.currency, p.normalized_price,
    p.bedrooms, p.bathrooms, p.total_area, p.city, p.province, p.street_address, p.status,
    p.operation_type, p.property_type_id,
    COALESCE((SELECT array_agg(pi.image_url ORDER BY pi.position)
              FROM property_images pi WHERE pi.property_id = p.id), '{}') AS image_urls,
    COALESCE((SELECT array_agg(pa.amenity_id ORDER BY pa.amenity_id)
              FROM property_amenities pa WHERE pa.property_id = p.id), '{}') AS amenity_ids,
    p.created_at"#;

/// Dashboard table row: property plus type name and image URLs
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardProperty {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub property: Property,
    pub type_name: Option<String>,
    pub image_urls: Vec<String>,
    #[sqlx(skip)]
    pub can_edit: bool,
}

/// Property image row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyImage {
    pub id: Uuid,
    pub property_id: Uuid,
    pub image_url: String,
    #[serde(rename = "order")]
    pub position: i32,
}

/// Amenity lookup row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Amenity {
    pub id: i32,
    pub name: String,
    pub icon_name: Option<String>,
}

/// Property type lookup row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyType {
    pub id: i32,
    pub name: String,
}

/// Agent model (dashboard user)
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Agent fields safe to show on public pages
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// Lead model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: LeadStatus,
    pub source: LeadSource,
    pub property_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const LEAD_COLUMNS: &str =
    "l.id, l.name, l.email, l.phone, l.status, l.source, l.property_id, l.user_id, l.notes, \
     l.created_at";

/// New lead for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub property_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub status: LeadStatus,
    pub source: LeadSource,
}

/// Lead row in the dashboard table
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub lead: Lead,
    pub property_title: Option<String>,
    pub agent_name: Option<String>,
    #[sqlx(skip)]
    pub can_edit: bool,
}

/// Follow-up note on a lead
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadNote {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
