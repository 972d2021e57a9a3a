//! Logging initialization and output formatting

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is harmless; later calls keep the first subscriber.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_ok() {
        tracing::debug!(
            "Logging initialized (level: {}, json: {})",
            settings.level,
            settings.json
        );
    }
}

/// Log build and platform information at startup
pub fn log_system_info() {
    tracing::info!("vidingest {}", env!("CARGO_PKG_VERSION"));

    #[cfg(target_os = "macos")]
    tracing::info!("Platform: macOS");
    #[cfg(target_os = "linux")]
    tracing::info!("Platform: Linux");

    tracing::debug!("Available parallelism: {}", num_cpus::get());
}
