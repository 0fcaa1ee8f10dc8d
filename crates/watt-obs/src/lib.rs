use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,watt=debug";

/// Initialize logging for a watt service.
/// - JSON logs by default, plain text when `WATT_LOG_FORMAT=pretty`
/// - RUST_LOG respected; default to "info,watt=debug"
pub fn init(service_name: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let pretty = std::env::var("WATT_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(env_filter));
    if pretty {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }

    tracing::info!(service = %service_name, "Observability initialized");
}
