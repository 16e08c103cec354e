/**
 * Dashboard listing routes
 * Property CRUD, photo management and the dashboard summary
 */
use std::future::Future;

use axum::{
    extract::{Multipart, Path, Query},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::access::{Scope, Viewer};
use crate::db::{
    self,
    models::{
        DashboardProperty, LeadListItem, Property, PropertyImage, PropertyStatus, PROPERTY_COLUMNS,
    },
};
use crate::error::{ApiError, ApiResult};
use crate::filters::DashboardQuery;
use crate::routes::{
    blank_as_none,
    leads::visible_leads,
    settings, trimmed,
    upload::{self, IncomingImage},
    ValidatedJson,
};
use crate::storage::{self, ObjectStore, PROPERTY_IMAGES};

const RECENT_LEADS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Ars,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Ars => "ARS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Venta,
    Alquiler,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Venta => "venta",
            OperationType::Alquiler => "alquiler",
        }
    }
}

/// Create and edit payload; an edit resubmits the whole form.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PropertyForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 5, message = "Title is too short"))]
    pub title: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub description: Option<String>,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 5, message = "Address is too short"))]
    pub street_address: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub neighborhood: Option<String>,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "City is too short"))]
    pub city: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Province is too short"))]
    pub province: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[validate(range(min = 1, message = "Select a property type"))]
    pub property_type_id: i32,
    #[validate(range(min = 1.0, message = "Price must be greater than 0"))]
    pub price: f64,
    pub currency: Currency,
    pub operation_type: OperationType,
    pub status: PropertyStatus,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub expensas: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub bedrooms: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub bathrooms: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub rooms: i32,
    #[validate(range(min = 1.0, message = "Total area must be at least 1"))]
    pub total_area: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub covered_area: f64,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub antiguedad: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub cocheras: Option<i32>,
    #[serde(default)]
    pub amenities: Vec<i32>,
}

impl PropertyForm {
    /// Positive amenity ids, sorted, each once.
    pub fn amenity_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.amenities.iter().copied().filter(|id| *id > 0).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn normalized_price(&self, usd_to_ars: f64) -> Option<f64> {
        settings::normalize_price(Some(self.price), Some(self.currency.as_str()), usd_to_ars)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditableProperty {
    #[serde(flatten)]
    pub property: Property,
    pub images: Vec<PropertyImage>,
    pub amenity_ids: Vec<i32>,
    pub can_edit: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_properties: i64,
    pub active_properties: i64,
    pub total_views: i64,
    pub leads_last_week: i64,
    pub recent_leads: Vec<LeadListItem>,
}

/// Owner of a listing; `NotFound` when it does not exist.
async fn property_owner(pool: &PgPool, id: Uuid) -> ApiResult<Option<Uuid>> {
    let (owner,): (Option<Uuid>,) = sqlx::query_as("SELECT agent_id FROM properties WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(owner)
}

/// Replaces the amenity set of a listing.
async fn sync_amenities(
    conn: &mut PgConnection,
    property_id: Uuid,
    amenity_ids: &[i32],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM property_amenities WHERE property_id = $1")
        .bind(property_id)
        .execute(&mut *conn)
        .await?;

    if !amenity_ids.is_empty() {
        sqlx::query(
            "INSERT INTO property_amenities (property_id, amenity_id) \
             SELECT $1, UNNEST($2::int4[]) ON CONFLICT DO NOTHING",
        )
        .bind(property_id)
        .bind(amenity_ids)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Dashboard table rows visible in `scope`.
fn dashboard_rows_query(scope: Scope) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {}, pt.name AS type_name, \
         COALESCE((SELECT array_agg(pi.image_url ORDER BY pi.position) \
                   FROM property_images pi WHERE pi.property_id = p.id), '{{}}') AS image_urls \
         FROM properties p LEFT JOIN property_types pt ON pt.id = p.property_type_id WHERE TRUE",
        PROPERTY_COLUMNS
    ));
    scope.push_filter(&mut qb, "p.agent_id");
    qb
}

/// GET /api/dashboard/properties
pub async fn list(
    viewer: Viewer,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<Json<Vec<DashboardProperty>>> {
    let pool = db::require_pool()?;

    let mut rows = dashboard_rows_query(viewer.scope())
        .build_query_as::<DashboardProperty>()
        .fetch_all(pool.as_ref())
        .await?;

    query.apply(&mut rows);
    for row in &mut rows {
        row.can_edit = viewer.can_mutate(row.property.agent_id);
    }
    Ok(Json(rows))
}

/// GET /api/dashboard/properties/{id}
pub async fn detail(viewer: Viewer, Path(id): Path<Uuid>) -> ApiResult<Json<EditableProperty>> {
    let pool = db::require_pool()?;

    let property = sqlx::query_as::<_, Property>(&format!(
        "SELECT {} FROM properties p WHERE p.id = $1",
        PROPERTY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    viewer.ensure_can_view(property.agent_id)?;

    let images = sqlx::query_as::<_, PropertyImage>(
        "SELECT id, property_id, image_url, position FROM property_images \
         WHERE property_id = $1 ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool.as_ref())
    .await?;

    let amenity_ids: Vec<i32> = sqlx::query_scalar(
        "SELECT amenity_id FROM property_amenities WHERE property_id = $1 ORDER BY amenity_id",
    )
    .bind(id)
    .fetch_all(pool.as_ref())
    .await?;

    let can_edit = viewer.can_mutate(property.agent_id);
    Ok(Json(EditableProperty {
        property,
        images,
        amenity_ids,
        can_edit,
    }))
}

/// POST /api/dashboard/properties
/// The new listing belongs to its creator
pub async fn create(
    viewer: Viewer,
    ValidatedJson(form): ValidatedJson<PropertyForm>,
) -> ApiResult<(StatusCode, Json<Property>)> {
    let pool = db::require_pool()?;
    let mut tx = pool.begin().await?;

    let rate = settings::current_rate(&mut *tx).await?;

    let property = sqlx::query_as::<_, Property>(&format!(
        "INSERT INTO properties AS p (title, description, street_address, neighborhood, city, \
         province, price, currency, normalized_price, status, operation_type, property_type_id, \
         bedrooms, bathrooms, rooms, total_area, covered_area, expensas, antiguedad, cocheras, \
         latitude, longitude, agent_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
         $18, $19, $20, $21, $22, $23) RETURNING {}",
        PROPERTY_COLUMNS
    ))
    .bind(&form.title)
    .bind(&form.description)
    .bind(&form.street_address)
    .bind(&form.neighborhood)
    .bind(&form.city)
    .bind(&form.province)
    .bind(form.price)
    .bind(form.currency.as_str())
    .bind(form.normalized_price(rate))
    .bind(form.status)
    .bind(form.operation_type.as_str())
    .bind(form.property_type_id)
    .bind(form.bedrooms)
    .bind(form.bathrooms)
    .bind(form.rooms)
    .bind(form.total_area)
    .bind(form.covered_area)
    .bind(form.expensas)
    .bind(&form.antiguedad)
    .bind(form.cocheras)
    .bind(form.latitude)
    .bind(form.longitude)
    .bind(viewer.agent_id)
    .fetch_one(&mut *tx)
    .await?;

    sync_amenities(&mut *tx, property.id, &form.amenity_ids()).await?;
    tx.commit().await?;

    tracing::info!(property_id = %property.id, agent_id = %viewer.agent_id, "Property created");
    Ok((StatusCode::CREATED, Json(property)))
}

/// PATCH /api/dashboard/properties/{id}
pub async fn update(
    viewer: Viewer,
    Path(id): Path<Uuid>,
    ValidatedJson(form): ValidatedJson<PropertyForm>,
) -> ApiResult<Json<Property>> {
    let pool = db::require_pool()?;
    viewer.ensure_can_mutate(property_owner(pool.as_ref(), id).await?)?;

    let mut tx = pool.begin().await?;
    let rate = settings::current_rate(&mut *tx).await?;

    let property = sqlx::query_as::<_, Property>(&format!(
        "UPDATE properties AS p SET title = $1, description = $2, street_address = $3, \
         neighborhood = $4, city = $5, province = $6, price = $7, currency = $8, \
         normalized_price = $9, status = $10, operation_type = $11, property_type_id = $12, \
         bedrooms = $13, bathrooms = $14, rooms = $15, total_area = $16, covered_area = $17, \
         expensas = $18, antiguedad = $19, cocheras = $20, latitude = $21, longitude = $22, \
         updated_at = NOW() WHERE p.id = $23 RETURNING {}",
        PROPERTY_COLUMNS
    ))
    .bind(&form.title)
    .bind(&form.description)
    .bind(&form.street_address)
    .bind(&form.neighborhood)
    .bind(&form.city)
    .bind(&form.province)
    .bind(form.price)
    .bind(form.currency.as_str())
    .bind(form.normalized_price(rate))
    .bind(form.status)
    .bind(form.operation_type.as_str())
    .bind(form.property_type_id)
    .bind(form.bedrooms)
    .bind(form.bathrooms)
    .bind(form.rooms)
    .bind(form.total_area)
    .bind(form.covered_area)
    .bind(form.expensas)
    .bind(&form.antiguedad)
    .bind(form.cocheras)
    .bind(form.latitude)
    .bind(form.longitude)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sync_amenities(&mut *tx, id, &form.amenity_ids()).await?;
    tx.commit().await?;

    tracing::info!(property_id = %id, agent_id = %viewer.agent_id, "Property updated");
    Ok(Json(property))
}

/// DELETE /api/dashboard/properties/{id}
/// Stored photos are removed best-effort; the row is always deleted.
pub async fn delete(viewer: Viewer, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let pool = db::require_pool()?;
    viewer.ensure_can_mutate(property_owner(pool.as_ref(), id).await?)?;

    let image_urls: Vec<String> =
        sqlx::query_scalar("SELECT image_url FROM property_images WHERE property_id = $1")
            .bind(id)
            .fetch_all(pool.as_ref())
            .await?;

    let images = image_urls.len();
    let conn = pool.as_ref();
    storage::remove_with_images(&*PROPERTY_IMAGES, &image_urls, move || async move {
        sqlx::query("DELETE FROM properties WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok::<_, ApiError>(())
    })
    .await?;

    tracing::info!(property_id = %id, images, agent_id = %viewer.agent_id, "Property deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Uploads each image and records it through `insert_row(url, position)`,
/// with `position = existing + index`.
///
/// A file that fails to upload is logged and skipped. A file whose row cannot
/// be written is removed from the bucket again and skipped, so every stored
/// object has a row.
pub async fn store_images<F, Fut>(
    bucket: &dyn ObjectStore,
    agent_id: Uuid,
    property_id: Uuid,
    images: &[IncomingImage],
    existing: i64,
    mut insert_row: F,
) -> Vec<PropertyImage>
where
    F: FnMut(String, i32) -> Fut,
    Fut: Future<Output = ApiResult<PropertyImage>>,
{
    let mut stored = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let path = storage::property_image_path(agent_id, &image.file_name);
        let url = match bucket.upload(&path, &image.bytes, image.content_type).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    property_id = %property_id,
                    file = %image.file_name,
                    error = %e,
                    "Image upload failed, skipping"
                );
                continue;
            }
        };

        let position = (existing + index as i64) as i32;
        match insert_row(url, position).await {
            Ok(row) => stored.push(row),
            Err(e) => {
                tracing::warn!(
                    property_id = %property_id,
                    file = %image.file_name,
                    error = %e,
                    "Image row insert failed, removing stored file"
                );
                if let Err(e) = bucket.remove(std::slice::from_ref(&path)).await {
                    tracing::warn!(path = %path, error = %e, "Orphaned image could not be removed");
                }
            }
        }
    }
    stored
}

/// POST /api/dashboard/properties/{id}/images
///
/// Files are validated before anything is stored.
pub async fn upload_images(
    viewer: Viewer,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Vec<PropertyImage>>)> {
    let images = upload::read_images(&mut multipart).await?;

    let pool = db::require_pool()?;
    viewer.ensure_can_mutate(property_owner(pool.as_ref(), id).await?)?;

    let (existing,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM property_images WHERE property_id = $1")
            .bind(id)
            .fetch_one(pool.as_ref())
            .await?;

    let conn = pool.as_ref();
    let stored = store_images(
        &*PROPERTY_IMAGES,
        viewer.agent_id,
        id,
        &images,
        existing,
        move |url, position| async move {
            let row = sqlx::query_as::<_, PropertyImage>(
                "INSERT INTO property_images (property_id, image_url, position) \
                 VALUES ($1, $2, $3) RETURNING id, property_id, image_url, position",
            )
            .bind(id)
            .bind(url)
            .bind(position)
            .fetch_one(conn)
            .await?;
            Ok(row)
        },
    )
    .await;

    tracing::info!(
        property_id = %id,
        received = images.len(),
        stored = stored.len(),
        "Property images uploaded"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /api/dashboard/properties/{id}/images/{image_id}
pub async fn delete_image(
    viewer: Viewer,
    Path((id, image_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let pool = db::require_pool()?;
    viewer.ensure_can_mutate(property_owner(pool.as_ref(), id).await?)?;

    let url: String = sqlx::query_scalar(
        "SELECT image_url FROM property_images WHERE id = $1 AND property_id = $2",
    )
    .bind(image_id)
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    let conn = pool.as_ref();
    storage::remove_with_images(&*PROPERTY_IMAGES, std::slice::from_ref(&url), move || async move {
        sqlx::query("DELETE FROM property_images WHERE id = $1")
            .bind(image_id)
            .execute(conn)
            .await?;
        Ok::<_, ApiError>(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/dashboard/stats
pub async fn stats(viewer: Viewer) -> ApiResult<Json<DashboardStats>> {
    let pool = db::require_pool()?;
    let scope = viewer.scope();

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT COUNT(*), \
         COUNT(*) FILTER (WHERE p.status IN ('EN_VENTA', 'EN_ALQUILER')), \
         COALESCE(SUM(p.views), 0)::BIGINT \
         FROM properties p WHERE TRUE",
    );
    scope.push_filter(&mut qb, "p.agent_id");
    let (total_properties, active_properties, total_views) = qb
        .build_query_as::<(i64, i64, i64)>()
        .fetch_one(pool.as_ref())
        .await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT COUNT(*) FROM leads l WHERE l.created_at >= NOW() - INTERVAL '7 days'",
    );
    scope.push_filter(&mut qb, "l.user_id");
    let (leads_last_week,) = qb
        .build_query_as::<(i64,)>()
        .fetch_one(pool.as_ref())
        .await?;

    let recent_leads = visible_leads(pool.as_ref(), &viewer, Some(RECENT_LEADS)).await?;

    Ok(Json(DashboardStats {
        total_properties,
        active_properties,
        total_views,
        leads_last_week,
        recent_leads,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::routes::test_support::{bearer, error_of, send};
    use crate::routes::upload::tests::{multipart_body, multipart_request};
    use axum::routing::{delete as delete_route, get, post};
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::Router;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/api/dashboard/stats", get(stats))
            .route("/api/dashboard/properties", get(list).post(create))
            .route(
                "/api/dashboard/properties/{id}",
                get(detail).patch(update).delete(delete),
            )
            .route("/api/dashboard/properties/{id}/images", post(upload_images))
            .route(
                "/api/dashboard/properties/{id}/images/{image_id}",
                delete_route(delete_image),
            )
    }

    fn valid_form() -> Value {
        json!({
            "title": "Casa en barrio Centro",
            "description": "",
            "streetAddress": "San Martin 1234",
            "city": "Rafaela",
            "province": "Santa Fe",
            "propertyTypeId": 1,
            "price": 120000,
            "currency": "USD",
            "operationType": "venta",
            "status": "EN_VENTA",
            "bedrooms": 3,
            "bathrooms": 2,
            "rooms": 5,
            "totalArea": 300,
            "coveredArea": 180,
            "amenities": [4, 1, 4, -2]
        })
    }

    #[test]
    fn test_form_parses_and_normalizes() {
        let form: PropertyForm = serde_json::from_value(valid_form()).unwrap();
        assert!(form.validate().is_ok());
        assert!(form.description.is_none());
        assert_eq!(form.amenity_ids(), vec![1, 4]);
        assert_eq!(form.normalized_price(1500.0), Some(180_000_000.0));
    }

    #[test]
    fn test_form_rejects_short_fields_and_negative_counts() {
        let mut value = valid_form();
        value["title"] = json!("Casa");
        value["city"] = json!("Ra");
        value["price"] = json!(0);
        value["bedrooms"] = json!(-1);
        value["propertyTypeId"] = json!(0);
        let form: PropertyForm = serde_json::from_value(value).unwrap();

        let errors = form.validate().unwrap_err();
        let fields = errors.field_errors();
        for field in ["title", "city", "price", "bedrooms", "property_type_id"] {
            assert!(fields.contains_key(field), "expected error on {}", field);
        }
    }

    #[tokio::test]
    async fn test_listing_routes_require_token() {
        let (status, _) = send(app(), "GET", "/api/dashboard/properties", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(app(), "GET", "/api/dashboard/stats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_property_rejected_before_database() {
        let (_, auth) = bearer(Role::Agent);
        let mut value = valid_form();
        value["streetAddress"] = json!("S/N");
        let (status, bytes) = send(
            app(),
            "POST",
            "/api/dashboard/properties",
            Some(&auth),
            Some(value),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_of(&bytes).message.unwrap().contains("street_address"));
    }

    #[tokio::test]
    async fn test_unknown_status_is_bad_request() {
        let (_, auth) = bearer(Role::Admin);
        let mut value = valid_form();
        value["status"] = json!("PERMUTADO");
        let (status, _) = send(
            app(),
            "PATCH",
            &format!("/api/dashboard/properties/{}", Uuid::new_v4()),
            Some(&auth),
            Some(value),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_valid_property_without_database_is_unavailable() {
        let (_, auth) = bearer(Role::Agent);
        let (status, _) = send(
            app(),
            "POST",
            "/api/dashboard/properties",
            Some(&auth),
            Some(valid_form()),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_image_batch_validated_before_database() {
        let (_, auth) = bearer(Role::Agent);
        let uri = format!("/api/dashboard/properties/{}/images", Uuid::new_v4());

        let body = multipart_body(&[
            ("front.png", &[0x89, 0x50, 0x4E, 0x47, 0, 0]),
            ("contract.pdf", b"%PDF-1.7"),
        ]);
        let res = app()
            .oneshot(multipart_request(&uri, Some(&auth), body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let body = multipart_body(&[("front.png", &[0x89, 0x50, 0x4E, 0x47, 0, 0])]);
        let res = app()
            .oneshot(multipart_request(&uri, Some(&auth), body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_agent_rows_are_scoped_to_owner() {
        let admin = dashboard_rows_query(Scope::All);
        assert!(admin.sql().ends_with("ON pt.id = p.property_type_id WHERE TRUE"));

        let agent = dashboard_rows_query(Scope::Owner(Uuid::new_v4()));
        assert!(agent
            .sql()
            .ends_with("ON pt.id = p.property_type_id WHERE TRUE AND p.agent_id = $1"));
    }

    /// Bucket that refuses files named `broken.png` and records removals.
    struct FlakyStore {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn upload(&self, path: &str, _: &[u8], _: &str) -> Result<String, StorageError> {
            if path.ends_with("broken.png") {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            Ok(self.public_url(path))
        }

        async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
            self.removed.lock().unwrap().extend(paths.iter().cloned());
            Ok(())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://cdn.test/properties/{}", path)
        }

        fn path_from_url(&self, url: &str) -> Option<String> {
            url.strip_prefix("https://cdn.test/properties/")
                .map(str::to_string)
        }
    }

    fn png(name: &str) -> IncomingImage {
        let bytes = Bytes::from_static(&[0x89, 0x50, 0x4E, 0x47, 0, 0]);
        upload::validate_image(name, bytes).unwrap()
    }

    #[tokio::test]
    async fn test_failed_row_insert_removes_stored_file() {
        let store = FlakyStore {
            removed: Mutex::new(vec![]),
        };
        let property_id = Uuid::new_v4();
        let images = vec![
            png("front.png"),
            png("kitchen.png"),
            png("broken.png"),
            png("yard.png"),
        ];
        let inserted = Mutex::new(Vec::new());

        let stored = store_images(
            &store,
            Uuid::new_v4(),
            property_id,
            &images,
            10,
            |url, position| {
                let inserted = &inserted;
                async move {
                    if url.ends_with("kitchen.png") {
                        return Err(ApiError::Database(sqlx::Error::RowNotFound));
                    }
                    inserted.lock().unwrap().push(url.clone());
                    Ok(PropertyImage {
                        id: Uuid::new_v4(),
                        property_id,
                        image_url: url,
                        position,
                    })
                }
            },
        )
        .await;

        let positions: Vec<i32> = stored.iter().map(|image| image.position).collect();
        assert_eq!(positions, vec![10, 13]);
        assert_eq!(inserted.lock().unwrap().len(), 2);

        let removed = store.removed.lock().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].ends_with("-kitchen.png"));
    }
}
