//! Tracing setup for the sqlbind binary
//!
//! Usage:
//!   sqlbind --debug serve                       # Debug logging, lease transitions included
//!   sqlbind --otel serve                        # Export spans to an OTLP collector
//!   RUST_LOG=sqlbind_core=debug sqlbind serve   # Fine-grained log control
//!
//! Environment variables:
//!   RUST_LOG                      # Log filter (default: info for sqlbind crates, warn elsewhere)
//!   OTEL_EXPORTER_OTLP_ENDPOINT   # OTLP endpoint (default: http://localhost:4317)
//!   OTEL_SERVICE_NAME             # Service name (default: sqlbind)

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConfig {
    /// Debug level unless RUST_LOG says otherwise
    pub debug: bool,
    /// OTLP export (only honoured with the `telemetry` feature)
    pub otel: bool,
}

impl TracingConfig {
    /// Directives used when RUST_LOG is unset.
    ///
    /// sqlx only logs statements at debug under `sqlx::query`, and only when
    /// `DB_ECHO` turned statement logging on, so that target stays open.
    /// Lease transitions are debug events in `sqlbind_core::lease`.
    fn default_directives(&self) -> String {
        let level = if self.debug { "debug" } else { "info" };
        format!(
            "warn,sqlbind={level},sqlbind_core={level},sqlbind_server={level},\
             tower_http={level},sqlx::query=debug"
        )
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

fn init_console(config: &TracingConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.debug)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}

#[cfg(feature = "telemetry")]
fn init_with_otel(config: &TracingConfig) -> Result<()> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "sqlbind".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .map_err(|e| anyhow!("Failed to create OTLP exporter: {}", e))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("sqlbind"));

    // Export stops once the provider is dropped
    let _ = opentelemetry::global::set_tracer_provider(provider);

    tracing_subscriber::registry()
        .with(config.filter())
        .with(tracing_subscriber::fmt::layer().with_target(config.debug).compact())
        .with(telemetry_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    tracing::info!(endpoint = %endpoint, service = %service_name, "OpenTelemetry tracing initialized");
    Ok(())
}

/// Flush pending spans
#[cfg(feature = "telemetry")]
pub fn shutdown_otel() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(not(feature = "telemetry"))]
pub fn shutdown_otel() {}

/// Console logging, plus OTLP export when requested and compiled in
pub fn init(config: &TracingConfig) -> Result<()> {
    #[cfg(feature = "telemetry")]
    if config.otel {
        return init_with_otel(config);
    }

    #[cfg(not(feature = "telemetry"))]
    if config.otel {
        init_console(config)?;
        tracing::warn!("--otel ignored: built without the `telemetry` feature");
        return Ok(());
    }

    init_console(config)
}
