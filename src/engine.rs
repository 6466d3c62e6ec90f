/// Scheduler: drives both log monitors and publishes what they produce.
///
/// One task owns the chat and combat monitors. Each has its own interval;
/// in notify mode filesystem events trigger an extra tick. Everything is
/// multiplexed through a single `tokio::select!`, so two ticks never run at
/// the same time and each tick completes before the next branch is polled.
///
/// After every combat tick the chat tracker receives a fresh copy of the
/// combat tracker's fighter mapping (only when it changed).
use crate::{
    classes::SpellTable,
    config::{AppConfig, WatchMode},
    dedup::Deduplicator,
    ipc::StreamEvent,
    monitor::{LogMonitor, LogSource},
    state::{CombatTracker, TrackerEvent},
    sync::MappingSynchronizer,
    tailer::TailReader,
};
use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast::Sender, mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    chat:   LogMonitor,
    combat: LogMonitor,
    syncer: MappingSynchronizer,
}

impl Engine {
    /// Build both monitors from config. `from_start` replays existing file
    /// content instead of starting at the current end.
    pub fn from_config(config: &AppConfig, from_start: bool) -> Self {
        let monitor = |source: LogSource, path: PathBuf| {
            let reader = if from_start {
                TailReader::from_start(path)
            } else {
                TailReader::at_end(path)
            };
            let tracker = CombatTracker::new(Box::new(SpellTable::embedded()))
                .with_trailing_grace(config.turns.trailing_grace_ms);
            let built = LogMonitor::new(source, reader, tracker)
                .with_line_forwarding(config.forward_log_lines);
            if config.dedup.enabled {
                built.with_dedup(Deduplicator::new(config.dedup.window_ms, config.dedup.capacity))
            } else {
                built
            }
        };

        Self {
            chat:   monitor(LogSource::Chat, config.chat_log_path()),
            combat: monitor(LogSource::Combat, config.combat_log_path()),
            syncer: MappingSynchronizer::new(),
        }
    }

    pub fn monitor(&self, source: LogSource) -> &LogMonitor {
        match source {
            LogSource::Chat => &self.chat,
            LogSource::Combat => &self.combat,
        }
    }

    /// Run one tick of the given stream and return its events, tagged.
    pub fn tick(&mut self, source: LogSource) -> Vec<StreamEvent> {
        let events = match source {
            LogSource::Chat => self.chat.tick(),
            LogSource::Combat => {
                let events = self.combat.tick();
                self.syncer.sync_if_changed(self.combat.tracker(), self.chat.tracker_mut());
                events
            }
        };
        tag(source, events)
    }

    fn log_stats(&mut self) {
        for monitor in [&mut self.chat, &mut self.combat] {
            if let Some(stats) = monitor.dedup_stats() {
                tracing::info!(
                    "[{}] dedup: seen={} dropped={} rate={:.1}% history={}",
                    monitor.source(),
                    stats.total_seen,
                    stats.duplicates_dropped,
                    stats.duplicate_rate,
                    stats.history_len
                );
            }
            monitor.reset_dedup_stats();
        }
    }
}

fn tag(source: LogSource, events: Vec<TrackerEvent>) -> Vec<StreamEvent> {
    events.into_iter().map(|event| StreamEvent { source, event }).collect()
}

fn publish(tx: &Sender<StreamEvent>, events: Vec<StreamEvent>) {
    for event in events {
        if tx.send(event).is_err() {
            tracing::trace!("No subscribers — event dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

/// Watch the logs directory and forward writes to either log as a wake-up.
/// Returns `None` (polling only) when the watcher cannot be set up.
fn spawn_watcher(
    config: &AppConfig,
    wake_tx: mpsc::UnboundedSender<LogSource>,
) -> Option<RecommendedWatcher> {
    let chat_path = config.chat_log_path();
    let combat_path = config.combat_log_path();

    let handler = move |res: notify::Result<Event>| match res {
        Ok(Event { kind: EventKind::Modify(_) | EventKind::Create(_), paths, .. }) => {
            for path in &paths {
                let source = if same_file(path, &chat_path) {
                    LogSource::Chat
                } else if same_file(path, &combat_path) {
                    LogSource::Combat
                } else {
                    continue;
                };
                let _ = wake_tx.send(source);
            }
        }
        Ok(_) => {} // Access / remove events
        Err(e) => tracing::error!("Watcher error: {}", e),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("Could not create file watcher ({}) — polling only", e);
            return None;
        }
    };
    if let Err(e) = watcher.watch(&config.logs_dir, RecursiveMode::NonRecursive) {
        tracing::warn!("Could not watch {:?} ({}) — polling only", config.logs_dir, e);
        return None;
    }
    tracing::info!("Watching {:?} for changes", config.logs_dir);
    Some(watcher)
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || (a.file_name().is_some() && a.file_name() == b.file_name())
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn stream_interval(ms: u64) -> Interval {
    let mut iv = interval(Duration::from_millis(ms.max(1)));
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    iv
}

async fn maybe_tick(iv: &mut Option<Interval>) {
    match iv {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Run until `shutdown` flips to `true` (or its sender is dropped).
pub async fn run(
    config:       AppConfig,
    from_start:   bool,
    events_tx:    Sender<StreamEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut engine = Engine::from_config(&config, from_start);
    tracing::info!(
        "Engine starting: chat={:?} combat={:?} poll={}ms mode={:?}",
        engine.chat.path(),
        engine.combat.path(),
        config.poll_interval_ms,
        config.watch_mode
    );

    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<LogSource>();
    // Dropped at the end of `run`, which stops the OS watcher
    let _watcher = match config.watch_mode {
        WatchMode::Notify => spawn_watcher(&config, wake_tx.clone()),
        WatchMode::Poll => None,
    };

    let mut chat_iv = stream_interval(config.poll_interval_ms);
    let mut combat_iv = stream_interval(config.poll_interval_ms);
    let mut stats_iv = (config.stats_interval_secs > 0).then(|| {
        let mut iv = interval(Duration::from_secs(config.stats_interval_secs));
        iv.reset(); // skip the immediate first tick
        iv
    });

    if *shutdown.borrow() {
        return Ok(());
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = combat_iv.tick() => {
                publish(&events_tx, engine.tick(LogSource::Combat));
            }

            _ = chat_iv.tick() => {
                publish(&events_tx, engine.tick(LogSource::Chat));
            }

            Some(source) = wake_rx.recv() => {
                publish(&events_tx, engine.tick(source));
            }

            _ = maybe_tick(&mut stats_iv) => {
                engine.log_stats();
            }
        }
    }

    tracing::info!("Engine stopped");
    Ok(())
}
