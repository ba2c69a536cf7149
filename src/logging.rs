//! Subscriber setup shared by both binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Default filter for a configured level; `RUST_LOG` wins when set
pub fn default_filter(level: &str) -> String {
    format!("pawpair={level},pawpair_cli={level},tower_http={level}", level = level)
}

/// Install the global subscriber; `format = "json"` emits one JSON object per line
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.level)));

    let json = config.format.eq_ignore_ascii_case("json");
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = (!json).then(|| tracing_subscriber::fmt::layer());

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();
}
