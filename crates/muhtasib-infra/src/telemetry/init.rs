use muhtasib_core::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "muhtasib=info,warn".into())
}

/// Initialize tracing. Fails if a global subscriber is already installed.
pub fn init_telemetry(format: LogFormat) -> Result<(), anyhow::Error> {
    let registry = tracing_subscriber::registry().with(default_filter());

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!(format = ?format, "Tracing initialized");
    Ok(())
}

pub fn shutdown_telemetry() {
    tracing::debug!("Telemetry shutdown");
}
