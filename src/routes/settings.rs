/**
 * Dashboard settings
 * Exchange rate, amenity catalogue and property type catalogue
 */
use axum::{extract::Path, http::StatusCode, Json};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{PgExecutor, PgPool};
use validator::{Validate, ValidationError};

use crate::access::{Admin, Viewer};
use crate::db::{
    self,
    models::{Amenity, PropertyType},
};
use crate::error::{ApiError, ApiResult};
use crate::routes::{blank_as_none, trimmed, ValidatedJson};

/// Used when the `exchange_rates` row is missing.
pub const DEFAULT_USD_TO_ARS: f64 = 1500.0;

/// Current USD→ARS rate.
pub async fn current_rate<'e, E: PgExecutor<'e>>(executor: E) -> Result<f64, sqlx::Error> {
    let row: Option<(f64,)> = sqlx::query_as("SELECT usd_to_ars FROM exchange_rates WHERE id = 1")
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|(rate,)| rate).unwrap_or(DEFAULT_USD_TO_ARS))
}

/// Price in ARS, used to order listings published in different currencies.
pub fn normalize_price(price: Option<f64>, currency: Option<&str>, usd_to_ars: f64) -> Option<f64> {
    let price = price?;
    match currency {
        Some(c) if c.eq_ignore_ascii_case("ARS") => Some(price),
        _ => Some(price * usd_to_ars),
    }
}

/// Accepts the rate as a JSON number or as the raw text of a form field.
fn rate_from_any<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom("Enter a valid number")),
    }
}

fn positive_rate(rate: f64) -> Result<(), ValidationError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new("rate").with_message("Enter a valid number".into()))
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    #[serde(deserialize_with = "rate_from_any")]
    #[validate(custom(function = "positive_rate"))]
    pub usd_to_ars: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRateUpdated {
    pub usd_to_ars: f64,
    pub properties_updated: u64,
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AmenityForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Name must have at least 3 characters"))]
    pub name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub icon_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PropertyTypeForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 2, message = "Name must have at least 2 characters"))]
    pub name: String,
}

/// GET /api/dashboard/settings/exchange-rate
pub async fn get_exchange_rate(_viewer: Viewer) -> ApiResult<Json<ExchangeRate>> {
    let pool = db::require_pool()?;
    let usd_to_ars = current_rate(pool.as_ref()).await?;
    Ok(Json(ExchangeRate { usd_to_ars }))
}

/// PUT /api/dashboard/settings/exchange-rate
/// Stores the rate and recomputes every normalized price in one transaction.
pub async fn update_exchange_rate(
    Admin(viewer): Admin,
    ValidatedJson(form): ValidatedJson<ExchangeRate>,
) -> ApiResult<Json<ExchangeRateUpdated>> {
    let pool = db::require_pool()?;
    let rate = form.usd_to_ars;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO exchange_rates (id, usd_to_ars, updated_at) VALUES (1, $1, NOW()) \
         ON CONFLICT (id) DO UPDATE SET usd_to_ars = EXCLUDED.usd_to_ars, updated_at = NOW()",
    )
    .bind(rate)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE properties SET normalized_price = CASE \
            WHEN price IS NULL THEN NULL \
            WHEN UPPER(COALESCE(currency, 'USD')) = 'ARS' THEN price \
            ELSE price * $1 END",
    )
    .bind(rate)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    tracing::info!(
        rate,
        properties = updated,
        agent_id = %viewer.agent_id,
        "Exchange rate updated"
    );

    Ok(Json(ExchangeRateUpdated {
        usd_to_ars: rate,
        properties_updated: updated,
        message: format!("Exchange rate updated to ${}.", rate),
    }))
}

/// GET /api/dashboard/settings/amenities
pub async fn list_amenities(_viewer: Viewer) -> ApiResult<Json<Vec<Amenity>>> {
    let pool = db::require_pool()?;
    let rows =
        sqlx::query_as::<_, Amenity>("SELECT id, name, icon_name FROM amenities ORDER BY name")
            .fetch_all(pool.as_ref())
            .await?;
    Ok(Json(rows))
}

/// POST /api/dashboard/settings/amenities
pub async fn create_amenity(
    _admin: Admin,
    ValidatedJson(form): ValidatedJson<AmenityForm>,
) -> ApiResult<(StatusCode, Json<Amenity>)> {
    let pool = db::require_pool()?;

    let amenity = sqlx::query_as::<_, Amenity>(
        "INSERT INTO amenities (name, icon_name) VALUES ($1, $2) RETURNING id, name, icon_name",
    )
    .bind(&form.name)
    .bind(&form.icon_name)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| ApiError::from_insert(e, "Amenity already exists"))?;

    Ok((StatusCode::CREATED, Json(amenity)))
}

/// DELETE /api/dashboard/settings/amenities/{id}
pub async fn delete_amenity(_admin: Admin, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    let pool = db::require_pool()?;
    delete_catalogue_row(pool.as_ref(), "DELETE FROM amenities WHERE id = $1", id).await
}

/// GET /api/dashboard/settings/property-types
pub async fn list_property_types(_viewer: Viewer) -> ApiResult<Json<Vec<PropertyType>>> {
    let pool = db::require_pool()?;
    let rows =
        sqlx::query_as::<_, PropertyType>("SELECT id, name FROM property_types ORDER BY name")
            .fetch_all(pool.as_ref())
            .await?;
    Ok(Json(rows))
}

/// POST /api/dashboard/settings/property-types
pub async fn create_property_type(
    _admin: Admin,
    ValidatedJson(form): ValidatedJson<PropertyTypeForm>,
) -> ApiResult<(StatusCode, Json<PropertyType>)> {
    let pool = db::require_pool()?;

    let property_type = sqlx::query_as::<_, PropertyType>(
        "INSERT INTO property_types (name) VALUES ($1) RETURNING id, name",
    )
    .bind(&form.name)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| ApiError::from_insert(e, "Property type already exists"))?;

    Ok((StatusCode::CREATED, Json(property_type)))
}

/// DELETE /api/dashboard/settings/property-types/{id}
pub async fn delete_property_type(_admin: Admin, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    let pool = db::require_pool()?;
    delete_catalogue_row(pool.as_ref(), "DELETE FROM property_types WHERE id = $1", id).await
}

async fn delete_catalogue_row(pool: &PgPool, sql: &'static str, id: i32) -> ApiResult<StatusCode> {
    let deleted = sqlx::query(sql).bind(id).execute(pool).await?.rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::routes::test_support::{bearer, send};
    use axum::routing::{delete, get, post};
    use axum::Router;
    use serde_json::json;

    fn app() -> Router {
        Router::new()
            .route(
                "/api/dashboard/settings/exchange-rate",
                get(get_exchange_rate).put(update_exchange_rate),
            )
            .route(
                "/api/dashboard/settings/amenities",
                get(list_amenities).post(create_amenity),
            )
            .route("/api/dashboard/settings/amenities/{id}", delete(delete_amenity))
            .route(
                "/api/dashboard/settings/property-types",
                post(create_property_type),
            )
    }

    #[test]
    fn test_normalize_price() {
        assert_eq!(normalize_price(Some(100.0), Some("USD"), 1500.0), Some(150_000.0));
        assert_eq!(normalize_price(Some(100.0), Some("ars"), 1500.0), Some(100.0));
        assert_eq!(normalize_price(Some(100.0), None, 1000.0), Some(100_000.0));
        assert_eq!(normalize_price(None, Some("USD"), 1500.0), None);
    }

    #[test]
    fn test_rate_accepts_number_or_text() {
        let r: ExchangeRate = serde_json::from_value(json!({ "usdToArs": 1250.5 })).unwrap();
        assert_eq!(r.usd_to_ars, 1250.5);
        let r: ExchangeRate = serde_json::from_value(json!({ "usdToArs": " 1300,25 " })).unwrap();
        assert_eq!(r.usd_to_ars, 1300.25);
        assert!(serde_json::from_value::<ExchangeRate>(json!({ "usdToArs": "mil" })).is_err());
    }

    #[tokio::test]
    async fn test_non_positive_rate_rejected() {
        let (_, auth) = bearer(Role::Admin);
        for rate in [json!(0), json!(-5), json!("abc")] {
            let (status, _) = send(
                app(),
                "PUT",
                "/api/dashboard/settings/exchange-rate",
                Some(&auth),
                Some(json!({ "usdToArs": rate })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_mutations_are_admin_only() {
        let (_, auth) = bearer(Role::Agent);

        let (status, _) = send(
            app(),
            "PUT",
            "/api/dashboard/settings/exchange-rate",
            Some(&auth),
            Some(json!({ "usdToArs": 1400 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/settings/amenities",
            Some(&auth),
            Some(json!({ "name": "Pileta" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            app(),
            "DELETE",
            "/api/dashboard/settings/amenities/3",
            Some(&auth),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_non_admin_gets_forbidden_even_with_invalid_body() {
        let (_, auth) = bearer(Role::Agent);
        let (status, _) = send(
            app(),
            "PUT",
            "/api/dashboard/settings/exchange-rate",
            Some(&auth),
            Some(json!({ "usdToArs": -1 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/settings/amenities",
            Some(&auth),
            Some(json!({ "name": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_catalogue_names_are_trimmed_before_validation() {
        let form: AmenityForm =
            serde_json::from_value(json!({ "name": "   Gy  ", "iconName": "  " })).unwrap();
        assert_eq!(form.name, "Gy");
        assert!(form.icon_name.is_none());
        assert!(form.validate().is_err());

        let form: PropertyTypeForm = serde_json::from_value(json!({ "name": "  PH " })).unwrap();
        assert_eq!(form.name, "PH");
        assert!(form.validate().is_ok());
    }

    #[tokio::test]
    async fn test_catalogue_name_lengths() {
        let (_, auth) = bearer(Role::Admin);

        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/settings/amenities",
            Some(&auth),
            Some(json!({ "name": "Gy" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/settings/property-types",
            Some(&auth),
            Some(json!({ "name": "P" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/settings/property-types",
            Some(&auth),
            Some(json!({ "name": "PH" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_reading_settings_needs_a_session() {
        let (status, _) = send(app(), "GET", "/api/dashboard/settings/amenities", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
