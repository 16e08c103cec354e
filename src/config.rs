//! Site-level settings read from the environment.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Public front-end URL, used for sitemap and robots links
    pub site_url: String,
    /// Base URL under which this service is reachable (prefix for uploaded files)
    pub public_base_url: String,
    /// Root directory of the storage buckets
    pub upload_dir: PathBuf,
    /// Address-to-coordinate lookup endpoint
    pub geocoder_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_url: std::env::var("SITE_URL")
                .unwrap_or_else(|_| "https://terranova-inmobiliaria.vercel.app".to_string()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            geocoder_url: std::env::var("GEOCODER_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org/search".to_string()),
        }
    }
}

lazy_static::lazy_static! {
    pub static ref SITE: SiteConfig = SiteConfig::default();
}

impl SiteConfig {
    pub fn site_url(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }

    pub fn public_base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slashes_are_trimmed() {
        let config = SiteConfig {
            site_url: "https://example.com/".to_string(),
            public_base_url: "http://api.example.com//".to_string(),
            upload_dir: PathBuf::from("uploads"),
            geocoder_url: String::new(),
        };
        assert_eq!(config.site_url(), "https://example.com");
        assert_eq!(config.public_base_url(), "http://api.example.com");
    }
}
