use axum::{extract::Query, Json};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::access::Viewer;
use crate::config::SITE;
use crate::error::{ApiError, ApiResult};
use crate::routes::trimmed;

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("terranova-backend/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
});

#[derive(Debug, Deserialize, Validate)]
pub struct GeocodeQuery {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Street is required"))]
    pub street: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 2, message = "City is required"))]
    pub city: String,
    #[serde(default)]
    pub province: Option<String>,
}

impl GeocodeQuery {
    /// `street, city, province`
    pub fn search_text(&self) -> String {
        [Some(self.street.as_str()), Some(self.city.as_str()), self.province.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Nominatim answers coordinates as strings.
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

fn first_hit(places: &[Place]) -> Option<Coordinates> {
    let place = places.first()?;
    Some(Coordinates {
        latitude: place.lat.parse().ok()?,
        longitude: place.lon.parse().ok()?,
    })
}

/// Looks an address up; `Ok(None)` when the geocoder knows no such place.
pub async fn lookup(
    client: &reqwest::Client,
    endpoint: &str,
    query: &GeocodeQuery,
) -> ApiResult<Option<Coordinates>> {
    let text = query.search_text();

    let response = client
        .get(endpoint)
        .query(&[("format", "json"), ("limit", "1"), ("q", text.as_str())])
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "geocoder request failed");
            ApiError::Upstream(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = %status, "geocoder returned error");
        return Err(ApiError::Upstream(format!("geocoder status {}", status)));
    }

    let places: Vec<Place> = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "geocoder response could not be parsed");
        ApiError::Upstream(e.to_string())
    })?;

    Ok(first_hit(&places))
}

/// GET /api/geocode?street=&city=&province=
pub async fn geocode(
    _viewer: Viewer,
    Query(query): Query<GeocodeQuery>,
) -> ApiResult<Json<Coordinates>> {
    query.validate()?;

    match lookup(&HTTP_CLIENT, &SITE.geocoder_url, &query).await? {
        Some(coordinates) => Ok(Json(coordinates)),
        None => {
            tracing::debug!(address = %query.search_text(), "address not found by geocoder");
            Err(ApiError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::routes::test_support::{bearer, send};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    fn query(street: &str, city: &str, province: Option<&str>) -> GeocodeQuery {
        GeocodeQuery {
            street: street.to_string(),
            city: city.to_string(),
            province: province.map(str::to_string),
        }
    }

    #[test]
    fn test_search_text_skips_blank_parts() {
        assert_eq!(
            query("Bv. Santa Fe 455", "Rafaela", Some("Santa Fe")).search_text(),
            "Bv. Santa Fe 455, Rafaela, Santa Fe"
        );
        assert_eq!(query("Mitre 20", "Sunchales", Some("  ")).search_text(), "Mitre 20, Sunchales");
    }

    #[test]
    fn test_first_hit_parses_string_coordinates() {
        let places: Vec<Place> = serde_json::from_str(
            r#"[{"lat": "-31.2526", "lon": "-61.4916", "display_name": "Rafaela"}]"#,
        )
        .unwrap();
        assert_eq!(
            first_hit(&places),
            Some(Coordinates {
                latitude: -31.2526,
                longitude: -61.4916
            })
        );
        assert_eq!(first_hit(&[]), None);
    }

    #[tokio::test]
    async fn test_unreachable_geocoder_is_upstream_error() {
        let client = reqwest::Client::new();
        let result = lookup(
            &client,
            "http://127.0.0.1:9/search",
            &query("Mitre 20", "Rafaela", None),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_incomplete_address_is_bad_request() {
        let app = Router::new().route("/api/geocode", get(geocode));
        let (_, auth) = bearer(Role::Agent);
        let uri = "/api/geocode?street=&city=Rafaela";
        let (status, _) = send(app, "GET", uri, Some(&auth), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
