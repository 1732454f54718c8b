//! Process-wide tracing setup.

use std::sync::Once;

use tracing::warn;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use voxrelay_core::config::LoggingConfig;

/// Chatty dependencies held down regardless of the base level. Anything in
/// `RUST_LOG` or `logging.filters` comes later and wins for the same target.
pub const NOISE_DIRECTIVES: &[&str] = &[
    "hyper=warn",
    "h2=warn",
    "reqwest=warn",
    "tungstenite=warn",
    "tokio_tungstenite=warn",
    "tower_http=info",
];

static INIT: Once = Once::new();

/// Pick the base filter: `RUST_LOG`, then `-v`, then the configured level.
fn base_spec(rust_log: Option<String>, verbose: bool, configured: Option<&str>) -> String {
    match rust_log {
        Some(spec) if !spec.trim().is_empty() => spec,
        _ if verbose => "debug".to_string(),
        _ => configured.unwrap_or("info").to_string(),
    }
}

/// Build the filter. Returns the directives that failed to parse.
fn build_filter(base: &str, extra: &[String]) -> (EnvFilter, Vec<String>) {
    let mut filter = EnvFilter::default();
    let mut rejected = Vec::new();

    let directives = NOISE_DIRECTIVES
        .iter()
        .copied()
        .chain(base.split(','))
        .chain(extra.iter().map(String::as_str))
        .map(str::trim)
        .filter(|d| !d.is_empty());

    for raw in directives {
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => rejected.push(raw.to_string()),
        }
    }
    (filter, rejected)
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init(config: &LoggingConfig, verbose: bool) {
    INIT.call_once(|| {
        let base = base_spec(
            std::env::var("RUST_LOG").ok(),
            verbose,
            config.level.as_deref(),
        );
        let (filter, rejected) = build_filter(&base, &config.filters);

        let installed = match config.format.as_str() {
            "json" => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init(),
            _ => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
        };
        if installed.is_err() {
            return;
        }

        if !matches!(config.format.as_str(), "plain" | "json") {
            warn!(format = %config.format, "Unknown log format, using plain");
        }
        for directive in rejected {
            warn!(%directive, "Ignoring invalid log filter directive");
        }
    });
}
