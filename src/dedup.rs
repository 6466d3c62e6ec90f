/// Drops near-duplicate log lines.
///
/// When several game clients run side by side they all append to the same
/// log, so one in-game event can show up two or three times within a few
/// milliseconds. A line is a duplicate when an earlier admitted line had the
/// same content and a timestamp within `window_ms` of it.
///
/// Lines without a `HH:MM:SS,mmm - ` prefix fail open: they are admitted
/// without being recorded.
use crate::parser::{split_timestamp, LogTimestamp};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_MS: u32 = 100;
pub const DEFAULT_CAPACITY:  usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub timestamp: LogTimestamp,
    pub content:   String,
}

/// Observational counters; nothing in the pipeline branches on them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupStats {
    pub total_seen:         u64,
    pub duplicates_dropped: u64,
    /// Percentage of seen lines that were dropped.
    pub duplicate_rate:     f64,
    pub history_len:        usize,
    pub window_ms:          u32,
}

#[derive(Debug)]
pub struct Deduplicator {
    window_ms:          u32,
    capacity:           usize,
    history:            VecDeque<DedupEntry>,
    total_seen:         u64,
    duplicates_dropped: u64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS, DEFAULT_CAPACITY)
    }
}

impl Deduplicator {
    pub fn new(window_ms: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window_ms,
            capacity,
            history: VecDeque::with_capacity(capacity),
            total_seen: 0,
            duplicates_dropped: 0,
        }
    }

    /// `true` if the line should be processed, `false` if it is a duplicate.
    pub fn admit(&mut self, line: &str) -> bool {
        self.total_seen += 1;

        let Some((timestamp, content)) = split_timestamp(line) else {
            return true;
        };

        let duplicate = self.history.iter().any(|e| {
            e.content == content && e.timestamp.abs_diff(timestamp) <= self.window_ms
        });
        if duplicate {
            self.duplicates_dropped += 1;
            tracing::debug!("Duplicate dropped ({}): {}", timestamp, content);
            return false;
        }

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(DedupEntry { timestamp, content: content.to_owned() });
        true
    }

    pub fn stats(&self) -> DedupStats {
        let duplicate_rate = if self.total_seen > 0 {
            self.duplicates_dropped as f64 / self.total_seen as f64 * 100.0
        } else {
            0.0
        };
        DedupStats {
            total_seen: self.total_seen,
            duplicates_dropped: self.duplicates_dropped,
            duplicate_rate,
            history_len: self.history.len(),
            window_ms: self.window_ms,
        }
    }

    /// Zero the counters; the history keeps filtering.
    pub fn reset_stats(&mut self) {
        self.total_seen = 0;
        self.duplicates_dropped = 0;
    }

    /// Clear counters and history.
    pub fn reset(&mut self) {
        self.history.clear();
        self.reset_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_duplicate_inside_window() {
        let mut d = Deduplicator::default();
        assert!(d.admit("20:34:53,813 - [Information (combat)] Belluzu: lance le sort Jugement"));
        assert!(!d.admit("20:34:53,850 - [Information (combat)] Belluzu: lance le sort Jugement"));
        // Exactly on the window edge is still a duplicate
        assert!(!d.admit("20:34:53,913 - [Information (combat)] Belluzu: lance le sort Jugement"));
    }

    #[test]
    fn admits_same_content_outside_window() {
        let mut d = Deduplicator::default();
        assert!(d.admit("20:34:53,813 - Kano: lance le sort Bond"));
        assert!(d.admit("20:34:53,914 - Kano: lance le sort Bond"));
    }

    #[test]
    fn admits_different_content_inside_window() {
        let mut d = Deduplicator::default();
        assert!(d.admit("20:34:53,813 - [Information (combat)] Belluzu: lance le sort Jugement"));
        assert!(d.admit("20:34:53,820 - [Information (combat)] Sac à patates: lance le sort Griffe"));
    }

    #[test]
    fn fails_open_without_timestamp() {
        let mut d = Deduplicator::default();
        assert!(d.admit("INFO [_FL_] fightId=1 Kano breed : 9 [1] isControlledByAI=false"));
        assert!(d.admit("INFO [_FL_] fightId=1 Kano breed : 9 [1] isControlledByAI=false"));
        assert_eq!(d.stats().history_len, 0);
        assert_eq!(d.stats().total_seen, 2);
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut d = Deduplicator::new(100, 2);
        assert!(d.admit("10:00:00,000 - a"));
        assert!(d.admit("10:00:00,001 - b"));
        assert!(d.admit("10:00:00,002 - c"));
        assert_eq!(d.stats().history_len, 2);
        // "a" was evicted, so it is admitted again despite being inside the window
        assert!(d.admit("10:00:00,003 - a"));
    }

    #[test]
    fn reports_stats() {
        let mut d = Deduplicator::default();
        d.admit("10:00:00,000 - x");
        d.admit("10:00:00,010 - x");
        d.admit("10:00:00,020 - y");
        d.admit("10:00:00,030 - y");
        let s = d.stats();
        assert_eq!(s.total_seen, 4);
        assert_eq!(s.duplicates_dropped, 2);
        assert_eq!(s.duplicate_rate, 50.0);
        assert_eq!(s.history_len, 2);
        assert_eq!(s.window_ms, 100);

        d.reset();
        assert_eq!(d.stats().total_seen, 0);
        assert_eq!(d.stats().history_len, 0);
    }

    #[test]
    fn reset_stats_keeps_filtering() {
        let mut d = Deduplicator::default();
        d.admit("10:00:00,000 - x");
        d.reset_stats();
        assert_eq!(d.stats().total_seen, 0);
        assert!(!d.admit("10:00:00,050 - x"));
        assert_eq!(d.stats().duplicates_dropped, 1);
    }
}
