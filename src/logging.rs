use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "chi_forms=info";

/// File logging for the engine and services. The terminal owns stdout/stderr,
/// so nothing is installed unless CHI_FORMS_LOG names a file.
pub fn init_logging() -> Result<Option<String>> {
    let Ok(path) = std::env::var("CHI_FORMS_LOG") else {
        return Ok(None);
    };
    if path.trim().is_empty() {
        return Ok(None);
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file: {path}"))?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init();
    tracing::info!(path = %path, "logging started");
    Ok(Some(path))
}
