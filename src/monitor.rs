/// One tracking instance: a tailed file, its dedup filter, and its tracker.
///
/// `tick` is the whole per-interval pipeline, run synchronously:
///   tailer -> dedup -> parser -> tracker
/// Lines are handled strictly in file order and a tick always runs to
/// completion, so nothing inside an instance needs locking.
use crate::{
    dedup::{DedupStats, Deduplicator},
    parser::parse_line,
    state::{CombatTracker, TrackerEvent},
    tailer::{LogPosition, TailReader},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which of the two game logs an instance follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// `wakfu_chat.log`: spell casts, turn deferrals, legacy combat end.
    Chat,
    /// `wakfu.log`: `[_FL_]` fight starts and `[FIGHT]` fight ends.
    Combat,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => f.write_str("chat"),
            Self::Combat => f.write_str("combat"),
        }
    }
}

pub struct LogMonitor {
    source:        LogSource,
    reader:        TailReader,
    dedup:         Option<Deduplicator>,
    tracker:       CombatTracker,
    forward_lines: bool,
}

impl LogMonitor {
    pub fn new(source: LogSource, reader: TailReader, tracker: CombatTracker) -> Self {
        Self { source, reader, dedup: None, tracker, forward_lines: false }
    }

    pub fn with_dedup(mut self, dedup: Deduplicator) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn with_line_forwarding(mut self, enabled: bool) -> Self {
        self.forward_lines = enabled;
        self
    }

    pub fn source(&self) -> LogSource {
        self.source
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    pub fn position(&self) -> LogPosition {
        self.reader.position()
    }

    pub fn tracker(&self) -> &CombatTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut CombatTracker {
        &mut self.tracker
    }

    pub fn dedup_stats(&self) -> Option<DedupStats> {
        self.dedup.as_ref().map(Deduplicator::stats)
    }

    pub fn reset_dedup_stats(&mut self) {
        if let Some(dedup) = self.dedup.as_mut() {
            dedup.reset_stats();
        }
    }

    /// Read whatever was appended since the last tick and run it through the
    /// pipeline. Returns the produced events in order.
    pub fn tick(&mut self) -> Vec<TrackerEvent> {
        let lines = self.reader.poll();
        if !lines.is_empty() {
            tracing::trace!("[{}] {} new line(s)", self.source, lines.len());
        }
        lines.iter().flat_map(|line| self.process_line(line)).collect()
    }

    /// Run one raw line through dedup, parser and tracker.
    pub fn process_line(&mut self, raw: &str) -> Vec<TrackerEvent> {
        let line = raw.trim();
        if line.is_empty() {
            return Vec::new();
        }
        if let Some(dedup) = self.dedup.as_mut() {
            if !dedup.admit(line) {
                return Vec::new();
            }
        }

        let parsed = parse_line(line);
        if parsed.spell_cast.is_none() && line.contains(crate::parser::SPELL_CAST_PHRASE) {
            tracing::debug!("[{}] Spell phrase present but no cast parsed: {}", self.source, line);
        }

        let mut events = Vec::new();
        if self.forward_lines {
            events.push(TrackerEvent::LogLine { line: line.to_owned(), parsed: parsed.clone() });
        }
        if parsed.is_actionable() {
            events.extend(self.tracker.handle(&parsed));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::SpellTable;
    use crate::parser::parse_line;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn chat_monitor(path: &Path) -> LogMonitor {
        LogMonitor::new(
            LogSource::Chat,
            TailReader::at_end(path.to_path_buf()),
            CombatTracker::new(Box::new(SpellTable::embedded())),
        )
        .with_dedup(Deduplicator::default())
    }

    #[test]
    fn duplicate_casts_from_parallel_clients_yield_one_turn_each() {
        let f = NamedTempFile::new().unwrap();
        let mut monitor = chat_monitor(f.path()).with_line_forwarding(true);

        // Roster as the combat stream would have announced it
        let mut combat = CombatTracker::new(Box::new(SpellTable::embedded()));
        combat.handle(&parse_line(
            "INFO [_FL_] fightId=5 Belluzu breed : 8 [101] isControlledByAI=false Sac à patates breed : 9 [102] isControlledByAI=false",
        ));
        crate::sync::sync(&combat, monitor.tracker_mut());

        append(
            f.path(),
            "20:34:53,813 - [Information (combat)] Belluzu: lance le sort Jugement\n\
             20:34:53,850 - [Information (combat)] Belluzu: lance le sort Jugement\n\
             20:34:54,100 - [Information (combat)] Sac à patates: lance le sort Griffe\n",
        );
        let events = monitor.tick();

        let casts: Vec<(String, String)> = events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::LogLine { parsed, .. } => parsed
                    .spell_cast
                    .as_ref()
                    .map(|c| (c.caster_name.clone(), c.spell_name.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            casts,
            vec![
                ("Belluzu".to_owned(), "Jugement".to_owned()),
                ("Sac à patates".to_owned(), "Griffe".to_owned()),
            ]
        );

        let turns: Vec<(i64, String)> = events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::TurnStarted { fighter_id, fighter } => {
                    Some((*fighter_id, fighter.player_name.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(turns, vec![(101, "Belluzu".to_owned()), (102, "Sac à patates".to_owned())]);

        let stats = monitor.dedup_stats().unwrap();
        assert_eq!(stats.total_seen, 3);
        assert_eq!(stats.duplicates_dropped, 1);
    }

    #[test]
    fn skips_blank_lines_and_noise() {
        let f = NamedTempFile::new().unwrap();
        let mut monitor = chat_monitor(f.path());
        append(f.path(), "\n   \n10:00:00,000 - [Guilde] Kano: bonsoir\n");
        assert!(monitor.tick().is_empty());
        assert_eq!(monitor.dedup_stats().unwrap().total_seen, 1);
    }

    #[test]
    fn combat_stream_lifecycle() {
        let f = NamedTempFile::new().unwrap();
        let mut monitor = LogMonitor::new(
            LogSource::Combat,
            TailReader::at_end(f.path().to_path_buf()),
            CombatTracker::new(Box::new(SpellTable::embedded())),
        );

        append(
            f.path(),
            "INFO 20:34:50,100 [AWT-EventQueue-0] (FightLog) - [_FL_] fightId=77 Kano breed : 8 [1] isControlledByAI=false\n\
             INFO 20:34:50,120 [AWT-EventQueue-0] (FightLog) - [_FL_] fightId=77 Astra breed : 9 [2] isControlledByAI=false\n",
        );
        let events = monitor.tick();
        assert!(matches!(events[0], TrackerEvent::CombatStarted { fight: Some(_) }));
        assert!(matches!(&events[1], TrackerEvent::FighterJoined { fight_id: 77, fighter } if fighter.player_name == "Astra"));
        assert_eq!(monitor.tracker().mapping().len(), 2);

        append(f.path(), "INFO 20:36:00,470 [AWT-EventQueue-0] (Fight) - [FIGHT] End fight with id 77\n");
        assert_eq!(monitor.tick(), vec![TrackerEvent::CombatEnded { fight_id: Some(77) }]);
        assert!(monitor.tracker().mapping().is_empty());
    }

    #[test]
    fn disabled_dedup_admits_everything() {
        let f = NamedTempFile::new().unwrap();
        let mut monitor = LogMonitor::new(
            LogSource::Chat,
            TailReader::at_end(f.path().to_path_buf()),
            CombatTracker::new(Box::new(SpellTable::embedded())),
        );
        append(
            f.path(),
            "20:34:53,813 - [Information (combat)] Belluzu: lance le sort Jugement\n\
             20:34:53,850 - [Information (combat)] Belluzu: lance le sort Jugement\n",
        );
        let detections = monitor
            .tick()
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::ClassDetected { .. }))
            .count();
        assert_eq!(detections, 2);
        assert!(monitor.dedup_stats().is_none());
    }
}
