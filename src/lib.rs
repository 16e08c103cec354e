//! Terranova Backend - library for app logic and testing

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod leads;
pub mod logging;
pub mod routes;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, trace::TraceLayer,
};

use crate::config::SITE;
use crate::routes::upload::UPLOAD_BODY_LIMIT;

/// Body cap for JSON routes
const JSON_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
/// Falls back to the local front-end dev server.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

fn public_routes() -> Router {
    use routes::{inquiries, properties, sitemap};

    Router::new()
        .route("/api/properties", get(properties::search))
        .route("/api/properties/filters", get(properties::filter_options))
        .route("/api/properties/featured", get(properties::featured))
        .route("/api/properties/{id}", get(properties::detail))
        .route(
            "/api/properties/{id}/recommended",
            get(properties::recommended),
        )
        .route("/api/properties/{id}/views", post(properties::increment_views))
        .route("/api/locations", get(properties::locations))
        .route("/api/team", get(properties::team))
        .route("/api/leads/contact", post(inquiries::contact))
        .route("/api/leads/appraisal", post(inquiries::appraisal))
        .route("/api/leads/inquiry", post(inquiries::inquiry))
        .route("/sitemap.xml", get(sitemap::sitemap_xml))
        .route("/robots.txt", get(sitemap::robots_txt))
}

fn dashboard_routes() -> Router {
    use routes::{agents, geocode, leads, listings, settings};

    Router::new()
        .route("/api/dashboard/stats", get(listings::stats))
        .route(
            "/api/dashboard/properties",
            get(listings::list).post(listings::create),
        )
        .route(
            "/api/dashboard/properties/{id}",
            get(listings::detail)
                .patch(listings::update)
                .delete(listings::delete),
        )
        .route(
            "/api/dashboard/properties/{id}/images/{image_id}",
            delete(listings::delete_image),
        )
        .route("/api/dashboard/leads", get(leads::list).post(leads::create))
        .route(
            "/api/dashboard/leads/{id}",
            get(leads::detail).delete(leads::delete),
        )
        .route(
            "/api/dashboard/leads/{id}/status",
            patch(leads::update_status),
        )
        .route("/api/dashboard/leads/{id}/notes", post(leads::add_note))
        .route(
            "/api/dashboard/agents",
            get(agents::list).post(agents::create),
        )
        .route(
            "/api/dashboard/agents/{id}",
            patch(agents::update).delete(agents::delete),
        )
        .route(
            "/api/dashboard/profile",
            get(agents::profile).patch(agents::update_profile),
        )
        .route(
            "/api/dashboard/settings/exchange-rate",
            get(settings::get_exchange_rate).put(settings::update_exchange_rate),
        )
        .route(
            "/api/dashboard/settings/amenities",
            get(settings::list_amenities).post(settings::create_amenity),
        )
        .route(
            "/api/dashboard/settings/amenities/{id}",
            delete(settings::delete_amenity),
        )
        .route(
            "/api/dashboard/settings/property-types",
            get(settings::list_property_types).post(settings::create_property_type),
        )
        .route(
            "/api/dashboard/settings/property-types/{id}",
            delete(settings::delete_property_type),
        )
        .route("/api/geocode", get(geocode::geocode))
}

/// Multipart routes get their own, larger body cap.
fn upload_routes() -> Router {
    Router::new()
        .route(
            "/api/dashboard/properties/{id}/images",
            post(routes::listings::upload_images),
        )
        .route(
            "/api/dashboard/uploads/avatar",
            post(routes::upload::upload_avatar),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(UPLOAD_BODY_LIMIT))
}

/// Create and configure the application router.
pub fn create_app() -> Router {
    let cors = configure_cors();
    tracing::info!("CORS configured");

    let json_routes = Router::new()
        .route("/api/logs", post(routes::logs::receive_client_logs))
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/verify", post(routes::auth::verify_token))
        .route("/api/auth/refresh", post(routes::auth::refresh))
        .route("/api/auth/logout", post(routes::auth::logout))
        .merge(public_routes())
        .merge(dashboard_routes())
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/database", get(routes::health::health_database))
        .route("/health/ready", get(routes::health::health_ready))
        .layer(RequestBodyLimitLayer::new(JSON_BODY_LIMIT));

    json_routes
        .merge(upload_routes())
        .nest_service("/uploads", ServeDir::new(&SITE.upload_dir))
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}

/// Run the server (used by main).
pub async fn run() {
    dotenvy::dotenv().ok();

    // Dropping the guards stops the background log writers.
    let _log_guards = logging::init();

    routes::health::init_start_time();

    let environment = std::env::var("ENVIRONMENT").unwrap_or_default();
    if environment == "production" {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        if secret.is_empty() || secret == routes::auth::DEFAULT_JWT_SECRET {
            panic!(
                "FATAL: JWT_SECRET must be set to a secure, unique value in production. \
                 Refusing to start with the default secret."
            );
        }
        if std::env::var("REFRESH_TOKEN_SECRET").is_err() {
            tracing::warn!(
                "SECURITY: REFRESH_TOKEN_SECRET is not set; \
                 refresh tokens are hashed without a pepper."
            );
        }
    }

    if let Err(e) = tokio::fs::create_dir_all(&SITE.upload_dir).await {
        tracing::warn!(
            "Could not create upload directory {}: {}",
            SITE.upload_dir.display(),
            e
        );
    }

    if std::env::var("DATABASE_URL").is_ok() {
        match db::init_pool(None).await {
            Ok(pool) => {
                if let Err(e) = db::run_migrations(&pool).await {
                    tracing::error!("Failed to run database migrations: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize database pool: {}. Continuing without database.",
                    e
                );
            }
        }
    } else {
        tracing::info!("DATABASE_URL not set. Running without database connection.");
    }

    let app = create_app();

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3001);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid HOST/PORT configuration");
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::routes::test_support::{bearer, send};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_public_routes_degrade_without_database() {
        let (status, bytes) =
            send(create_app(), "GET", "/api/properties?tipo=venta", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[..], b"[]");

        let (status, _) = send(create_app(), "GET", "/robots.txt", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dashboard_is_behind_bearer_token() {
        let (status, _) = send(create_app(), "GET", "/api/dashboard/stats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, auth) = bearer(Role::Agent);
        let (status, _) =
            send(create_app(), "GET", "/api/dashboard/stats", Some(&auth), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_put_exchange_rate_is_routed() {
        let (_, auth) = bearer(Role::Agent);
        let (status, _) = send(
            create_app(),
            "PUT",
            "/api/dashboard/settings/exchange-rate",
            Some(&auth),
            Some(serde_json::json!({ "usdToArs": 1400 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (status, _) = send(create_app(), "GET", "/api/portada", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
