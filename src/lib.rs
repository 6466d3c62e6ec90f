pub mod classes;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod ipc;
pub mod monitor;
pub mod parser;
pub mod state;
pub mod sync;
pub mod tailer;

use std::path::Path;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVE: &str = "wakfu_tracker_lib=info";

/// Route `tracing` output to a daily rolling file in `log_dir`.
///
/// stdout carries the JSON event stream, so nothing is logged there.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(log_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Cannot create log directory {}: {}", log_dir.display(), e);
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "tracker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Flushes on drop; it must live as long as the process
    std::mem::forget(guard);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    tracing::info!(
        "Wakfu combat tracker {} starting — logs → {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
}

/// Log panics through tracing before the process dies; otherwise they only
/// reach stderr.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!("PANIC at {}: {}", location, message);
    }));
}
