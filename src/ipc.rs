/// Output boundary: everything the tracker publishes leaves through here.
///
/// The engine wraps each `TrackerEvent` in a `StreamEvent` tagged with the log
/// it came from and sends it on a broadcast channel. Any number of listeners
/// can subscribe; the binary's listener is `run`, which writes one JSON object
/// per line to the given writer (stdout in production).
use crate::{monitor::LogSource, state::TrackerEvent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{error::RecvError, Receiver};

// ---------------------------------------------------------------------------
// Event name constants, identical to the serialised `type` tag
// ---------------------------------------------------------------------------
pub const EVENT_CLASS_DETECTED: &str = "classDetected";
pub const EVENT_COMBAT_STARTED: &str = "combatStarted";
pub const EVENT_FIGHTER_JOINED: &str = "fighterJoined";
pub const EVENT_TURN_STARTED:   &str = "turnStarted";
pub const EVENT_TURN_ENDED:     &str = "turnEnded";
pub const EVENT_COMBAT_ENDED:   &str = "combatEnded";
pub const EVENT_LOG_LINE:       &str = "logLine";

/// Capacity of the broadcast channel; slower listeners see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub fn event_name(event: &TrackerEvent) -> &'static str {
    match event {
        TrackerEvent::ClassDetected { .. } => EVENT_CLASS_DETECTED,
        TrackerEvent::CombatStarted { .. } => EVENT_COMBAT_STARTED,
        TrackerEvent::FighterJoined { .. } => EVENT_FIGHTER_JOINED,
        TrackerEvent::TurnStarted { .. }   => EVENT_TURN_STARTED,
        TrackerEvent::TurnEnded            => EVENT_TURN_ENDED,
        TrackerEvent::CombatEnded { .. }   => EVENT_COMBAT_ENDED,
        TrackerEvent::LogLine { .. }       => EVENT_LOG_LINE,
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One published event, e.g.
/// `{"source":"chat","event":{"type":"turnStarted","fighterId":101,...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub source: LogSource,
    pub event:  TrackerEvent,
}

/// Write every received event to `out` as a JSON line until all senders are
/// gone. A lagging receiver skips what it missed and carries on.
pub async fn run<W: AsyncWrite + Unpin>(mut rx: Receiver<StreamEvent>, out: &mut W) -> Result<()> {
    loop {
        match rx.recv().await {
            Ok(stream_event) => {
                tracing::debug!(
                    "[{}] {}",
                    stream_event.source,
                    event_name(&stream_event.event)
                );
                let mut line = serde_json::to_vec(&stream_event)?;
                line.push(b'\n');
                out.write_all(&line).await?;
                out.flush().await?;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event sink lagged — {} event(s) dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::info!("Event channel closed — sink exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[test]
    fn names_match_serialised_tags() {
        let events = [
            TrackerEvent::ClassDetected { class_name: "Iop".into(), player_name: "Kano".into() },
            TrackerEvent::CombatStarted { fight: None },
            TrackerEvent::TurnEnded,
            TrackerEvent::CombatEnded { fight_id: Some(3) },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event_name(&event));
        }
    }

    #[tokio::test]
    async fn writes_json_lines_until_closed() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(StreamEvent { source: LogSource::Combat, event: TrackerEvent::CombatEnded { fight_id: Some(77) } })
            .unwrap();
        tx.send(StreamEvent { source: LogSource::Chat, event: TrackerEvent::TurnEnded }).unwrap();
        drop(tx);

        let mut out = Vec::new();
        run(rx, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source"], "combat");
        assert_eq!(lines[0]["event"]["type"], EVENT_COMBAT_ENDED);
        assert_eq!(lines[0]["event"]["fightId"], 77);
        assert_eq!(lines[1]["source"], "chat");
        assert_eq!(lines[1]["event"]["type"], EVENT_TURN_ENDED);
    }

    #[tokio::test]
    async fn lagging_sink_keeps_going() {
        let (tx, rx) = broadcast::channel(2);
        for id in 0..5 {
            tx.send(StreamEvent { source: LogSource::Combat, event: TrackerEvent::CombatEnded { fight_id: Some(id) } })
                .unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        run(rx, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        // Only the newest two survive the overflow
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"fightId\":4"));
    }

    #[tokio::test]
    async fn streams_into_async_pipe() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let (tx, rx) = broadcast::channel(16);
        let (mut writer, reader) = tokio::io::duplex(64);
        let sink = tokio::spawn(async move { run(rx, &mut writer).await });

        tx.send(StreamEvent { source: LogSource::Chat, event: TrackerEvent::TurnEnded }).unwrap();
        let mut lines = BufReader::new(reader).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(json["event"]["type"], EVENT_TURN_ENDED);

        drop(tx);
        sink.await.unwrap().unwrap();
    }
}
