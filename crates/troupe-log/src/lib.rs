// ABOUTME: Shared logging setup for the troupe binary
// ABOUTME: init() writes to stderr, init_file() writes to a log file while the dashboard owns the terminal

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
/// Used by headless commands (run --headless, send, inbox, watch).
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// File-based logging for the dashboard. Default: WARN level, RUST_LOG override.
/// Logs to ~/.config/troupe/{app_name}.log
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

/// Location of the dashboard log file, if a config directory exists.
pub fn log_path(app_name: &str) -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join("troupe").join(format!("{app_name}.log")))
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = log_path(app_name).ok_or("could not determine config directory")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .init();

    Ok(())
}
