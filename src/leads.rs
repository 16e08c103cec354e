//! Lead pipeline: statuses and sources.

use serde::{Deserialize, Serialize};

/// Pipeline stage (`lead_status` enum in the database).
///
/// Any status may follow any other; the pipeline order only drives display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lead_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    Nuevo,
    Contactado,
    VisitaProgramada,
    Negociacion,
    Cerrado,
    Descartado,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::Nuevo,
        LeadStatus::Contactado,
        LeadStatus::VisitaProgramada,
        LeadStatus::Negociacion,
        LeadStatus::Cerrado,
        LeadStatus::Descartado,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LeadStatus::Nuevo => "Nuevo",
            LeadStatus::Contactado => "Contactado",
            LeadStatus::VisitaProgramada => "Visita Programada",
            LeadStatus::Negociacion => "Negociación",
            LeadStatus::Cerrado => "Cerrado",
            LeadStatus::Descartado => "Descartado",
        }
    }

    /// Badge color name used by the dashboard
    pub fn color(&self) -> &'static str {
        match self {
            LeadStatus::Nuevo => "blue",
            LeadStatus::Contactado => "yellow",
            LeadStatus::VisitaProgramada => "orange",
            LeadStatus::Negociacion => "green",
            LeadStatus::Cerrado => "zinc",
            LeadStatus::Descartado => "red",
        }
    }
}

/// Where a lead came from (`lead_source` enum in the database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lead_source", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadSource {
    Web,
    Contacto,
    Tasacion,
    Telefono,
    Email,
    Referido,
}

impl LeadSource {
    pub fn label(&self) -> &'static str {
        match self {
            LeadSource::Web => "Web",
            LeadSource::Contacto => "Contacto",
            LeadSource::Tasacion => "Tasación",
            LeadSource::Telefono => "Teléfono",
            LeadSource::Email => "Email",
            LeadSource::Referido => "Referido",
        }
    }

    /// Sources an agent can pick when loading a lead by hand
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            LeadSource::Telefono | LeadSource::Email | LeadSource::Web | LeadSource::Referido
        )
    }
}

/// Status labels and colors for the dashboard selector
#[derive(Debug, Clone, Serialize)]
pub struct StatusOption {
    pub value: LeadStatus,
    pub label: &'static str,
    pub color: &'static str,
}

pub fn status_options() -> Vec<StatusOption> {
    LeadStatus::ALL
        .iter()
        .map(|s| StatusOption {
            value: *s,
            label: s.label(),
            color: s.color(),
        })
        .collect()
}
