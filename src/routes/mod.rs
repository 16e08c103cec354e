/**
 * Routes Module
 * API route handlers
 */
pub mod agents;
pub mod auth;
pub mod geocode;
pub mod health;
pub mod inquiries;
pub mod leads;
pub mod listings;
pub mod logs;
pub mod properties;
pub mod settings;
pub mod sitemap;
pub mod upload;

use axum::{
    extract::{FromRequest, Request},
    Json,
};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use validator::{Validate, ValidationError};

use crate::error::ApiError;

pub use crate::error::ErrorResponse;

lazy_static::lazy_static! {
    /// Digits with optional `+`, spaces, dashes and parentheses
    pub static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9()\-\s]+$").expect("valid phone regex");
}

/// Form fields left blank arrive as `""`; treat them as absent.
pub fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Text fields are stored trimmed, so length rules see the trimmed value.
pub fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value.trim().to_string())
}

/// At least eight digits; separators allowed by `PHONE_RE` do not count.
pub fn phone_digits(phone: &str) -> Result<(), ValidationError> {
    if phone.chars().filter(char::is_ascii_digit).count() >= 8 {
        Ok(())
    } else {
        Err(ValidationError::new("phone_digits")
            .with_message("Phone must have at least 8 digits".into()))
    }
}

/// JSON body that has passed `validator` rules.
///
/// Handlers taking this never run for malformed or invalid payloads, so no
/// database or storage work happens before validation.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}
