/*!
 * Logging Module
 * tracing subscriber setup: console plus daily rolling files
 */
pub mod config;
pub mod middleware;

use std::io;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking,
    non_blocking::{NonBlocking, WorkerGuard},
    rolling,
};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_DIR: &str = "logs";

/// Default directive when `RUST_LOG` is unset.
pub fn default_filter(log_level: &str) -> String {
    format!(
        "terranova_backend={},tower_http=debug,axum=debug,sqlx=warn",
        log_level
    )
}

/// Errors always go to their own file, in JSON so they can be shipped as-is.
/// Generic over the subscriber so each branch of `init` gets its own layer type.
fn error_layer<S>(writer: NonBlocking) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(LevelFilter::ERROR)
}

/// Initialize the logging system.
///
/// The returned guards flush the background writers on drop and must be held
/// for the lifetime of the process.
pub fn init() -> Vec<WorkerGuard> {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    let is_production = environment == "production";

    std::fs::create_dir_all(LOG_DIR).ok();

    let (file_writer, file_guard) = non_blocking(rolling::daily(LOG_DIR, "app.log"));
    let (error_writer, error_guard) = non_blocking(rolling::daily(LOG_DIR, "error.log"));
    let (console_writer, console_guard) = non_blocking(io::stdout());

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if is_production {
            "info".to_string()
        } else {
            "debug".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&log_level)));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if is_production {
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .json()
            .with_writer(console_writer)
            .with_target(false);

        subscriber
            .with(file_layer)
            .with(error_layer(error_writer))
            .with(console_layer)
            .init();
    } else {
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_target(true)
            .pretty();

        subscriber
            .with(file_layer)
            .with(error_layer(error_writer))
            .with(console_layer)
            .init();
    }

    tracing::info!("Logging initialized for {} environment", environment);

    vec![file_guard, error_guard, console_guard]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_targets_this_crate() {
        let filter = default_filter("info");
        assert!(filter.starts_with("terranova_backend=info"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_error_layer_fits_both_subscriber_stacks() {
        let (writer, _guard) = non_blocking(io::sink());
        let json = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(fmt::layer().json().with_writer(io::sink))
            .with(error_layer(writer.clone()));
        let pretty = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(fmt::layer().pretty().with_writer(io::sink))
            .with(error_layer(writer));

        tracing::subscriber::with_default(json, || tracing::error!("json stack"));
        tracing::subscriber::with_default(pretty, || tracing::error!("pretty stack"));
    }
}
