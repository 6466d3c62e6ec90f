/// Classifies raw Wakfu log lines and extracts the structured parts the
/// combat tracker cares about.
///
/// Two log files use this dialect:
///
///   wakfu_chat.log
///     20:34:53,813 - [Information (combat)] Belluzu: lance le sort Jugement
///     20:35:10,002 - [Information (combat)] 2 secondes reportées pour le tour suivant
///     20:36:00,450 - [Information (combat)] Combat terminé, cliquez ici pour rouvrir l'écran de fin de combat.
///
///   wakfu.log
///     INFO 20:34:50,100 [AWT-EventQueue-0] (FightLog) - [_FL_] fightId=1552072008 Astra Gladia breed : 8 [7595487] isControlledByAI=false ...
///     INFO 20:36:00,470 [AWT-EventQueue-0] (Fight) - [FIGHT] End fight with id 1552072008
///
/// The markers are locale-specific (French client) and matched byte-for-byte.
/// Everything here is pure: one line in, one `ParsedLine` out.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const COMBAT_INFO_MARKER: &str = "[Information (combat)]";
pub const INFO_MARKER:        &str = "[Information]";
pub const SPELL_CAST_PHRASE:  &str = "lance le sort";
pub const FIGHT_START_MARKER: &str = "[_FL_]";
pub const LEGACY_COMBAT_END:  &str =
    "Combat terminé, cliquez ici pour rouvrir l'écran de fin de combat.";
pub const TURN_DEFERRED_PHRASES: [&str; 2] = [
    "reportée pour le tour suivant",
    "reportées pour le tour suivant",
];

static TIMESTAMP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2}),(\d{3})\s*-\s*(.+)$").expect("timestamp regex")
});

static STRICT_CAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[Information \(combat\)\]\s*([^:]+?)[:\s]+\s*lance le sort\s+(.+?)(?:\s*\(|$)")
        .expect("strict cast regex")
});

static LOOSE_CAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[Information \(combat\)\]\s*([^:]+?)[:\s]+lance le sort\s+(.+)")
        .expect("loose cast regex")
});

static COMBAT_INFO_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[Information \(combat\)\]\s*").expect("combat info regex")
});

static FIGHT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[_FL_\]\s+fightId=(\d+)\s+").expect("fight header regex")
});

static FIGHTER_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*(.+?)\s+breed\s*:\s*(\d+)\s+\[(-?\d+)\]\s+.*?isControlledByAI=(true|false)")
        .expect("fighter block regex")
});

static FIGHT_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[FIGHT\]\s+End fight with id\s+(\d+)").expect("fight end regex")
});

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Wall-clock time of a log line, in milliseconds since midnight.
/// The logs carry no date, so values only support relative comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogTimestamp(pub u32);

pub const MS_PER_DAY: u32 = 86_400_000;

impl LogTimestamp {
    pub fn from_parts(h: u32, m: u32, s: u32, ms: u32) -> Self {
        Self((h * 3_600 + m * 60 + s) * 1_000 + ms)
    }

    pub fn as_millis(self) -> u32 {
        self.0
    }

    /// Absolute distance in ms, without wrapping around midnight.
    pub fn abs_diff(self, other: Self) -> u32 {
        self.0.abs_diff(other.0)
    }

    /// Forward distance from `earlier` to `self`, wrapping past midnight.
    pub fn elapsed_since(self, earlier: Self) -> u32 {
        let delta = i64::from(self.0) - i64::from(earlier.0);
        delta.rem_euclid(i64::from(MS_PER_DAY)) as u32
    }
}

impl fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0 % 1_000;
        let secs = self.0 / 1_000;
        write!(f, "{:02}:{:02}:{:02},{:03}", secs / 3_600, (secs / 60) % 60, secs % 60, ms)
    }
}

/// Split a `HH:MM:SS,mmm - <content>` line into its timestamp and content.
/// Returns `None` when the prefix is missing, out of range, or the content
/// is empty.
pub fn split_timestamp(line: &str) -> Option<(LogTimestamp, &str)> {
    let caps = TIMESTAMP_PREFIX.captures(line.trim())?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (h, m, sec) = (num(1)?, num(2)?, num(3)?);
    if h > 23 || m > 59 || sec > 59 {
        return None;
    }
    let ts = LogTimestamp::from_parts(h, m, sec, num(4)?);
    Some((ts, caps.get(5)?.as_str()))
}

// ---------------------------------------------------------------------------
// Parsed types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineCategory {
    Combat,
    Information,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellCast {
    pub caster_name: String,
    pub spell_name:  String,
    pub timestamp:   Option<LogTimestamp>,
}

/// One fighter block of a `[_FL_]` fight-start line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FighterEntry {
    pub player_name:      String,
    pub breed:            u32,
    pub fighter_id:       i64,
    pub is_ai_controlled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatStartInfo {
    pub fight_id: u64,
    pub fighters: Vec<FighterEntry>,
}

/// What a line says about a fight starting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CombatStartSignal {
    /// A fully parsed `[_FL_]` block.
    Fight(CombatStartInfo),
    /// Only the older, unparameterised marker was recognised.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatEnd {
    pub fight_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLine {
    pub timestamp:    Option<LogTimestamp>,
    pub content:      String,
    pub category:     LineCategory,
    pub spell_cast:   Option<SpellCast>,
    pub combat_start: Option<CombatStartSignal>,
    pub combat_end:   Option<CombatEnd>,
    pub turn_ended:   bool,
}

impl ParsedLine {
    /// True when the line carries anything the tracker acts on.
    pub fn is_actionable(&self) -> bool {
        self.spell_cast.is_some()
            || self.combat_start.is_some()
            || self.combat_end.is_some()
            || self.turn_ended
    }
}

// ---------------------------------------------------------------------------
// Spell-cast matchers, tried in order until one succeeds
// ---------------------------------------------------------------------------

/// A candidate matcher returns raw `(caster, spell)` slices.
pub type CastMatcher = fn(&str) -> Option<(String, String)>;

pub const CAST_MATCHERS: [(&str, CastMatcher); 3] = [
    ("strict", strict_cast),
    ("loose",  loose_cast),
    ("split",  split_cast),
];

/// `<name>: lance le sort <spell>` ending at an opening parenthesis or line end.
pub fn strict_cast(content: &str) -> Option<(String, String)> {
    let caps = STRICT_CAST.captures(content)?;
    Some((caps.get(1)?.as_str().to_owned(), caps.get(2)?.as_str().to_owned()))
}

/// Same shape with looser punctuation; the spell runs to end of line.
pub fn loose_cast(content: &str) -> Option<(String, String)> {
    let caps = LOOSE_CAST.captures(content)?;
    Some((caps.get(1)?.as_str().to_owned(), caps.get(2)?.as_str().to_owned()))
}

/// Last resort: split on the literal phrase.
pub fn split_cast(content: &str) -> Option<(String, String)> {
    let (before, after) = content.split_once(SPELL_CAST_PHRASE)?;
    let caster = COMBAT_INFO_PREFIX.replace(before, "").trim().to_owned();
    let spell = after.split('(').next().unwrap_or("").trim().to_owned();
    Some((caster, spell))
}

fn clean_caster(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix(':').unwrap_or(trimmed).trim().to_owned()
}

pub fn parse_spell_cast(content: &str, timestamp: Option<LogTimestamp>) -> Option<SpellCast> {
    for (name, matcher) in CAST_MATCHERS {
        let Some((caster, spell)) = matcher(content) else { continue };
        let caster_name = clean_caster(&caster);
        let spell_name = spell.trim().to_owned();
        if caster_name.is_empty() || spell_name.is_empty() {
            continue;
        }
        tracing::trace!("Spell cast matched by '{}' matcher", name);
        return Some(SpellCast { caster_name, spell_name, timestamp });
    }
    None
}

// ---------------------------------------------------------------------------
// Fight lifecycle markers
// ---------------------------------------------------------------------------

pub fn has_fight_start_marker(content: &str) -> bool {
    content.contains(FIGHT_START_MARKER)
}

/// The pre-`[_FL_]` way a fight announced itself: any combat spell line.
pub fn has_legacy_start_marker(content: &str) -> bool {
    content.contains(COMBAT_INFO_MARKER) && content.contains(SPELL_CAST_PHRASE)
}

/// Parse a `[_FL_] fightId=N <fighter blocks>` line. `None` when the marker
/// is absent or the structure does not parse (e.g. monster-only entries
/// lacking a breed block).
pub fn parse_combat_start(content: &str) -> Option<CombatStartInfo> {
    if !has_fight_start_marker(content) {
        return None;
    }
    let header = FIGHT_HEADER.captures(content)?;
    let fight_id: u64 = header.get(1)?.as_str().parse().ok()?;
    let rest = &content[header.get(0)?.end()..];

    let fighters: Vec<FighterEntry> = FIGHTER_BLOCK
        .captures_iter(rest)
        .filter_map(|caps| {
            Some(FighterEntry {
                player_name:      caps.get(1)?.as_str().trim().to_owned(),
                breed:            caps.get(2)?.as_str().parse().ok()?,
                fighter_id:       caps.get(3)?.as_str().parse().ok()?,
                is_ai_controlled: caps.get(4)?.as_str() == "true",
            })
        })
        .filter(|f| !f.player_name.is_empty())
        .collect();

    if fighters.is_empty() {
        return None;
    }
    Some(CombatStartInfo { fight_id, fighters })
}

/// `[_FL_]` line that claims to list fighters, whether or not it parses.
fn announces_fighters(content: &str) -> bool {
    has_fight_start_marker(content) && content.contains("fightId=") && content.contains("breed :")
}

/// Parsed fight start if possible. A fighter block that fails to parse, or
/// the older marker, degrades to the payload-less legacy signal.
pub fn classify_combat_start(content: &str) -> Option<CombatStartSignal> {
    if let Some(info) = parse_combat_start(content) {
        return Some(CombatStartSignal::Fight(info));
    }
    if announces_fighters(content) {
        tracing::debug!("Unparsed fight-start block: {}", content);
        return Some(CombatStartSignal::Legacy);
    }
    has_legacy_start_marker(content).then_some(CombatStartSignal::Legacy)
}

pub fn parse_combat_end(content: &str) -> Option<CombatEnd> {
    if let Some(caps) = FIGHT_END.captures(content) {
        return Some(CombatEnd { fight_id: caps.get(1).and_then(|m| m.as_str().parse().ok()) });
    }
    if content.contains("[FIGHT]") && content.contains("End fight with id") {
        return Some(CombatEnd { fight_id: None });
    }
    content.contains(LEGACY_COMBAT_END).then_some(CombatEnd { fight_id: None })
}

pub fn is_turn_end(content: &str) -> bool {
    TURN_DEFERRED_PHRASES.iter().any(|p| content.contains(p))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn parse_line(raw: &str) -> ParsedLine {
    let trimmed = raw.trim();
    let (timestamp, content) = match split_timestamp(trimmed) {
        Some((ts, content)) => (Some(ts), content),
        None => (None, trimmed),
    };

    let category = if content.contains(COMBAT_INFO_MARKER) {
        LineCategory::Combat
    } else if content.contains(INFO_MARKER) {
        LineCategory::Information
    } else {
        LineCategory::Other
    };

    ParsedLine {
        timestamp,
        content:      content.to_owned(),
        category,
        spell_cast:   parse_spell_cast(content, timestamp),
        combat_start: classify_combat_start(content),
        combat_end:   parse_combat_end(content),
        turn_ended:   is_turn_end(content),
    }
}
