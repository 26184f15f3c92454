use std::{fs, fs::OpenOptions, path::PathBuf, sync::Once};

use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Registry, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{config::CARDHSM_HOME, error::result::Pkcs11Result, pkcs11_error};

static TRACING_INIT: Once = Once::new();

/// Install the provider subscriber once per process: a file layer under
/// `log_home` (default `~/.cardhsm`) and, on Linux, the journal when it is
/// reachable.
pub(crate) fn initialize_logging(
    log_name: &str,
    log_home: Option<String>,
    level_filter: Option<LevelFilter>,
) {
    TRACING_INIT.call_once(|| {
        init(log_name, log_home, level_filter).unwrap_or_else(|e| {
            eprintln!("Failed to initialize logging: {e}");
        });
    });
}

fn init(
    log_name: &str,
    log_home: Option<String>,
    level_filter: Option<LevelFilter>,
) -> Pkcs11Result<()> {
    let log_home = match log_home {
        None => etcetera::home_dir()
            .map_err(|e| pkcs11_error!("no home directory: {:?}", e))?
            .join(CARDHSM_HOME),
        Some(log_home) => PathBuf::from(log_home),
    };
    fs::create_dir_all(&log_home)?;
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_home.join(log_name))?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.unwrap_or(LevelFilter::INFO).into())
        .from_env_lossy();
    _ = Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_span_events(FmtSpan::ENTER),
        )
        .with(journald_layer())
        .with(env_filter)
        .with(ErrorLayer::default())
        .try_init();
    Ok(())
}

#[cfg(target_os = "linux")]
fn journald_layer() -> Option<tracing_journald::Layer> {
    tracing_journald::layer()
        .map(|layer| layer.with_syslog_identifier("cardhsm-pkcs11".to_owned()))
        .ok()
}

#[cfg(not(target_os = "linux"))]
fn journald_layer() -> Option<tracing_subscriber::layer::Identity> {
    None
}
