use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::SITE;
use crate::db;

const DISALLOWED: [&str; 3] = ["/dashboard/", "/admin/", "/login"];

#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub last_modified: DateTime<Utc>,
    pub change_frequency: &'static str,
    pub priority: f32,
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Home and contact pages followed by one entry per listing.
pub fn entries(
    base_url: &str,
    now: DateTime<Utc>,
    properties: &[(Uuid, DateTime<Utc>)],
) -> Vec<SitemapEntry> {
    let mut entries = vec![
        SitemapEntry {
            loc: base_url.to_string(),
            last_modified: now,
            change_frequency: "daily",
            priority: 1.0,
        },
        SitemapEntry {
            loc: format!("{}/contacto", base_url),
            last_modified: now,
            change_frequency: "yearly",
            priority: 0.5,
        },
    ];

    entries.extend(properties.iter().map(|(id, created_at)| SitemapEntry {
        loc: format!("{}/propiedades/{}", base_url, id),
        last_modified: *created_at,
        change_frequency: "weekly",
        priority: 0.8,
    }));
    entries
}

pub fn render(entries: &[SitemapEntry]) -> String {
    let mut urls = String::new();
    for entry in entries {
        urls.push_str(&format!(
            "  <url>\n\
                 <loc>{}</loc>\n\
                 <lastmod>{}</lastmod>\n\
                 <changefreq>{}</changefreq>\n\
                 <priority>{:.1}</priority>\n\
               </url>\n",
            escape_xml(&entry.loc),
            entry.last_modified.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            entry.change_frequency,
            entry.priority,
        ));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{}</urlset>\n",
        urls
    )
}

pub fn robots(base_url: &str) -> String {
    let mut body = String::from("User-agent: *\nAllow: /\n");
    for path in DISALLOWED {
        body.push_str(&format!("Disallow: {}\n", path));
    }
    body.push_str(&format!("\nSitemap: {}/sitemap.xml\n", base_url));
    body
}

/// GET /sitemap.xml
/// Without a database only the static pages are listed.
pub async fn sitemap_xml() -> Response {
    let properties: Vec<(Uuid, DateTime<Utc>)> = match db::get_pool() {
        Some(pool) => {
            sqlx::query_as("SELECT id, created_at FROM properties ORDER BY created_at DESC")
                .fetch_all(pool.as_ref())
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("Failed to load properties for sitemap: {}", e);
                    Vec::new()
                })
        }
        None => Vec::new(),
    };

    let xml = render(&entries(SITE.site_url(), Utc::now(), &properties));
    (
        [
            (header::CONTENT_TYPE, "application/xml; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        xml,
    )
        .into_response()
}

/// GET /robots.txt
pub async fn robots_txt() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        robots(SITE.site_url()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use crate::routes::test_support::send;

    #[test]
    fn test_entries_static_pages_then_listings() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let created = now - chrono::Duration::days(3);
        let list = entries("https://terranova.test", now, &[(id, created)]);

        assert_eq!(list.len(), 3);
        assert_eq!(list[0].loc, "https://terranova.test");
        assert_eq!(list[0].priority, 1.0);
        assert_eq!(list[1].loc, "https://terranova.test/contacto");
        assert_eq!(list[1].change_frequency, "yearly");
        assert_eq!(list[2].loc, format!("https://terranova.test/propiedades/{}", id));
        assert_eq!(list[2].last_modified, created);
        assert_eq!(list[2].change_frequency, "weekly");
    }

    #[test]
    fn test_render_escapes_and_formats() {
        let now = Utc::now();
        let xml = render(&entries("https://terranova.test/?a=1&b=2", now, &[]));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<loc>https://terranova.test/?a=1&amp;b=2</loc>"));
        assert!(xml.contains("<priority>0.5</priority>"));
        assert_eq!(xml.matches("<url>").count(), 2);
    }

    #[test]
    fn test_robots_blocks_private_areas() {
        let body = robots("https://terranova.test");
        assert!(body.contains("Allow: /\n"));
        assert!(body.contains("Disallow: /dashboard/\n"));
        assert!(body.contains("Disallow: /login\n"));
        assert!(body.ends_with("Sitemap: https://terranova.test/sitemap.xml\n"));
    }

    #[tokio::test]
    async fn test_sitemap_served_without_database() {
        let app = Router::new().route("/sitemap.xml", get(sitemap_xml));
        let (status, bytes) = send(app, "GET", "/sitemap.xml", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&bytes).contains("<urlset"));
    }
}
