/**
 * Public property routes
 * Search, filter options, featured, detail, recommendations and view counter
 */
use axum::{
    extract::{Path, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::db::{
    self,
    models::{
        AgentCard, Amenity, Property, PropertyCard, PropertyImage, PropertyStatus, PropertyType,
        PROPERTY_CARD_COLUMNS, PROPERTY_COLUMNS,
    },
};
use crate::error::{ApiError, ApiResult};
use crate::filters::{PropertyFilter, SearchParams};

const FEATURED_LIMIT: i64 = 6;
const RECOMMENDED_LIMIT: i64 = 3;
const SEO_DESCRIPTION_CHARS: usize = 160;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub types: Vec<PropertyType>,
    pub amenities: Vec<Amenity>,
    pub cities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationOption {
    pub city: String,
    pub province: String,
    pub label: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoMeta {
    pub title: String,
    pub description: String,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDetail {
    #[serde(flatten)]
    pub property: Property,
    pub type_name: Option<String>,
    pub images: Vec<PropertyImage>,
    pub amenities: Vec<String>,
    pub agent: Option<AgentCard>,
    pub json_ld: serde_json::Value,
    pub seo: SeoMeta,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ViewsResponse {
    pub views: i64,
}

#[derive(Debug, FromRow)]
struct DetailRow {
    #[sqlx(flatten)]
    property: Property,
    type_name: Option<String>,
}

/// Public listings keep rendering without a database; failures are logged.
fn or_empty<T: Default>(what: &str, result: ApiResult<T>) -> T {
    result.unwrap_or_else(|e| {
        match &e {
            ApiError::DatabaseUnavailable => tracing::debug!("{}: database not available", what),
            other => tracing::error!("{} failed: {}", what, other),
        }
        T::default()
    })
}

/// Public search: the filter's predicates, then its ordering.
fn search_query(filter: &PropertyFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM properties p", PROPERTY_CARD_COLUMNS));
    filter.push_where(&mut qb);
    filter.push_order(&mut qb);
    qb
}

/// Listings in `city` with the same operation, `id` excluded.
fn recommended_query(
    id: Uuid,
    city: String,
    operation_type: Option<String>,
) -> QueryBuilder<'static, Postgres> {
    let filter = PropertyFilter {
        city: Some(city),
        ..Default::default()
    };

    let mut qb = QueryBuilder::new(format!("SELECT {} FROM properties p", PROPERTY_CARD_COLUMNS));
    filter.push_where(&mut qb);
    qb.push(" AND p.operation_type IS NOT DISTINCT FROM ")
        .push_bind(operation_type)
        .push(" AND p.id <> ")
        .push_bind(id);
    filter.push_order(&mut qb);
    qb.push(" LIMIT ").push_bind(RECOMMENDED_LIMIT);
    qb
}

async fn fetch_cards(filter: &PropertyFilter) -> ApiResult<Vec<PropertyCard>> {
    let pool = db::require_pool()?;

    Ok(search_query(filter)
        .build_query_as::<PropertyCard>()
        .fetch_all(pool.as_ref())
        .await?)
}

/// GET /api/properties
pub async fn search(Query(params): Query<SearchParams>) -> Json<Vec<PropertyCard>> {
    let filter = PropertyFilter::from_params(&params);
    Json(or_empty("property search", fetch_cards(&filter).await))
}

/// GET /api/properties/featured
/// Latest listings for sale
pub async fn featured() -> Json<Vec<PropertyCard>> {
    let result = async {
        let pool = db::require_pool()?;
        let cards = sqlx::query_as::<_, PropertyCard>(&format!(
            "SELECT {} FROM properties p WHERE p.status = $1 ORDER BY p.created_at DESC LIMIT $2",
            PROPERTY_CARD_COLUMNS
        ))
        .bind(PropertyStatus::EnVenta)
        .bind(FEATURED_LIMIT)
        .fetch_all(pool.as_ref())
        .await?;
        Ok::<_, ApiError>(cards)
    }
    .await;

    Json(or_empty("featured properties", result))
}

/// Sorted city names without duplicates or blanks
pub fn distinct_cities(cities: Vec<Option<String>>) -> Vec<String> {
    cities
        .into_iter()
        .flatten()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// GET /api/properties/filters
pub async fn filter_options() -> Json<FilterOptions> {
    let result = async {
        let pool = db::require_pool()?;

        let types = sqlx::query_as::<_, PropertyType>(
            "SELECT id, name FROM property_types ORDER BY name",
        )
        .fetch_all(pool.as_ref())
        .await?;

        let amenities = sqlx::query_as::<_, Amenity>(
            "SELECT id, name, icon_name FROM amenities ORDER BY name",
        )
        .fetch_all(pool.as_ref())
        .await?;

        let cities: Vec<(Option<String>,)> = sqlx::query_as("SELECT city FROM properties")
            .fetch_all(pool.as_ref())
            .await?;

        Ok::<_, ApiError>(FilterOptions {
            types,
            amenities,
            cities: distinct_cities(cities.into_iter().map(|(c,)| c).collect()),
        })
    }
    .await;

    Json(or_empty("filter options", result))
}

/// Unique `(city, province)` pairs in first-seen order; incomplete rows are skipped.
pub fn unique_locations(rows: Vec<(Option<String>, Option<String>)>) -> Vec<LocationOption> {
    let mut seen = BTreeSet::new();
    rows.into_iter()
        .filter_map(|(city, province)| match (city, province) {
            (Some(city), Some(province)) if !city.is_empty() && !province.is_empty() => {
                Some((city, province))
            }
            _ => None,
        })
        .filter(|pair| seen.insert(pair.clone()))
        .map(|(city, province)| LocationOption {
            label: format!("{}, {}", city, province),
            city,
            province,
        })
        .collect()
}

/// GET /api/locations
pub async fn locations() -> Json<Vec<LocationOption>> {
    let result = async {
        let pool = db::require_pool()?;
        let rows: Vec<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT city, province FROM properties ORDER BY city, province")
                .fetch_all(pool.as_ref())
                .await?;
        Ok::<_, ApiError>(unique_locations(rows))
    }
    .await;

    Json(or_empty("locations", result))
}

/// GET /api/team
pub async fn team() -> Json<Vec<AgentCard>> {
    let result = async {
        let pool = db::require_pool()?;
        let agents = sqlx::query_as::<_, AgentCard>(
            "SELECT id, full_name, phone, email, avatar_url FROM agents ORDER BY created_at",
        )
        .fetch_all(pool.as_ref())
        .await?;
        Ok::<_, ApiError>(agents)
    }
    .await;

    Json(or_empty("team", result))
}

/// `90000.0` -> `"90.000"` (es-AR grouping, no decimals)
pub fn format_price_ar(price: f64) -> String {
    let digits = format!("{:.0}", price.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if price < 0.0 {
        grouped.insert(0, '-');
    }
    grouped
}

pub fn seo_meta(property: &Property, images: &[PropertyImage]) -> SeoMeta {
    let title = match (property.price, property.currency.as_deref()) {
        (Some(price), Some(currency)) => format!(
            "{} | {} ${}",
            property.title,
            currency,
            format_price_ar(price)
        ),
        _ => property.title.clone(),
    };

    let description = property
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| d.chars().take(SEO_DESCRIPTION_CHARS).collect())
        .unwrap_or_else(|| "Consultá por esta propiedad en TerraNova.".to_string());

    SeoMeta {
        title,
        description,
        image: images.first().map(|img| img.image_url.clone()),
    }
}

/// schema.org listing markup for search engines
pub fn json_ld(property: &Property, images: &[PropertyImage]) -> serde_json::Value {
    let availability = if property.status.is_available() {
        "https://schema.org/InStock"
    } else {
        "https://schema.org/SoldOut"
    };

    json!({
        "@context": "https://schema.org",
        "@type": "SingleFamilyResidence",
        "name": property.title,
        "image": images.iter().map(|img| img.image_url.as_str()).collect::<Vec<_>>(),
        "description": property.description,
        "address": {
            "@type": "PostalAddress",
            "streetAddress": property.street_address,
            "addressLocality": property.city,
            "addressRegion": property.province,
            "addressCountry": "AR"
        },
        "numberOfRooms": property.rooms,
        "floorSize": {
            "@type": "QuantitativeValue",
            "value": property.total_area,
            "unitCode": "MTK"
        },
        "offers": {
            "@type": "Offer",
            "priceCurrency": property.currency,
            "price": property.price,
            "availability": availability
        }
    })
}

/// GET /api/properties/{id}
pub async fn detail(Path(id): Path<Uuid>) -> ApiResult<Json<PropertyDetail>> {
    let pool = db::require_pool()?;

    let row = sqlx::query_as::<_, DetailRow>(&format!(
        "SELECT {}, t.name AS type_name FROM properties p \
         LEFT JOIN property_types t ON t.id = p.property_type_id WHERE p.id = $1",
        PROPERTY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    let images = sqlx::query_as::<_, PropertyImage>(
        "SELECT id, property_id, image_url, position FROM property_images \
         WHERE property_id = $1 ORDER BY position, id",
    )
    .bind(id)
    .fetch_all(pool.as_ref())
    .await?;

    let amenities: Vec<(String,)> = sqlx::query_as(
        "SELECT a.name FROM property_amenities pa JOIN amenities a ON a.id = pa.amenity_id \
         WHERE pa.property_id = $1 ORDER BY a.name",
    )
    .bind(id)
    .fetch_all(pool.as_ref())
    .await?;

    let agent = match row.property.agent_id {
        Some(agent_id) => {
            sqlx::query_as::<_, AgentCard>(
                "SELECT id, full_name, phone, email, avatar_url FROM agents WHERE id = $1",
            )
            .bind(agent_id)
            .fetch_optional(pool.as_ref())
            .await?
        }
        None => None,
    };

    Ok(Json(PropertyDetail {
        json_ld: json_ld(&row.property, &images),
        seo: seo_meta(&row.property, &images),
        property: row.property,
        type_name: row.type_name,
        images,
        amenities: amenities.into_iter().map(|(name,)| name).collect(),
        agent,
    }))
}

/// GET /api/properties/{id}/recommended
/// Same city and operation, current listing excluded
pub async fn recommended(Path(id): Path<Uuid>) -> ApiResult<Json<Vec<PropertyCard>>> {
    let pool = db::require_pool()?;

    let (city, operation_type): (Option<String>, Option<String>) =
        sqlx::query_as("SELECT city, operation_type FROM properties WHERE id = $1")
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound)?;

    let Some(city) = city else {
        return Ok(Json(vec![]));
    };

    let cards = recommended_query(id, city, operation_type)
        .build_query_as::<PropertyCard>()
        .fetch_all(pool.as_ref())
        .await?;

    Ok(Json(cards))
}

/// POST /api/properties/{id}/views
pub async fn increment_views(Path(id): Path<Uuid>) -> ApiResult<Json<ViewsResponse>> {
    let pool = db::require_pool()?;

    let (views,): (i64,) =
        sqlx::query_as("UPDATE properties SET views = views + 1 WHERE id = $1 RETURNING views")
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound)?;

    Ok(Json(ViewsResponse { views }))
}
