use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::{broadcast, watch};
use wakfu_tracker_lib::{config, engine, ipc};

/// Follow Wakfu's chat and combat logs and print combat events as JSON lines.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file (default: <APPDATA>/wakfu-combat-tracker/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding wakfu.log and wakfu_chat.log; overrides the config
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Replay what the logs already contain instead of starting at the end
    #[arg(long)]
    from_start: bool,

    /// Where the tracker writes its own rolling log
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_dir = args.log_dir.clone().unwrap_or_else(config::default_log_dir);
    wakfu_tracker_lib::init_logging(&log_dir);
    wakfu_tracker_lib::install_panic_hook();

    let mut cfg = match &args.config {
        Some(path) => config::load_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => config::load_or_default(&config::default_config_dir())
            .context("loading default config")?,
    };
    if let Some(dir) = args.logs_dir {
        cfg.logs_dir = dir;
    }
    if !cfg.logs_dir.exists() {
        tracing::warn!("Logs directory {:?} does not exist yet — waiting for the game", cfg.logs_dir);
    }

    let (events_tx, events_rx) = broadcast::channel(ipc::EVENT_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sink = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        ipc::run(events_rx, &mut stdout).await
    });
    let mut engine = tokio::spawn(engine::run(cfg, args.from_start, events_tx, shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            tracing::info!("Ctrl-C received — shutting down");
            let _ = shutdown_tx.send(true);
            engine.await??;
        }
        finished = &mut engine => {
            finished??;
        }
    }
    // The engine owned the only sender, so the sink drains and exits
    sink.await??;
    Ok(())
}
