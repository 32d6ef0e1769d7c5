use std::any::Any;

use indicatif::ProgressStyle;
use indicatif::style::TemplateError;

/// Spinner for a single running task.
pub(crate) fn get_style_task() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::with_template("{span_child_prefix}{spinner:.blue} {msg}")
}

/// Turns a caught panic payload into an error.
pub(crate) fn panic_error(panic: &(dyn Any + Send)) -> anyhow::Error {
    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    };

    anyhow::anyhow!(msg)
}

/// Installs a global subscriber: `RUST_LOG`-style filtering (`info` by
/// default) with log lines printed above the progress bars.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), crate::error::SweepError> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()
        .map_err(|e| crate::error::SweepError::Logging(e.into()))
}
