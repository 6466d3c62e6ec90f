/// Combat state machine, one instance per tailed log file.
///
/// The tracker is either idle or holds an active fight id with its roster.
/// It turns parsed lines into domain events (`TrackerEvent`) and infers turn
/// boundaries from who is casting. All state is owned by the tracker; the
/// only way another tracker's knowledge gets in is `replace_mapping`, called
/// by the mapping synchronizer with a full snapshot.
use crate::{
    classes::ClassDetector,
    parser::{CombatEnd, CombatStartInfo, CombatStartSignal, FighterEntry, LogTimestamp, ParsedLine, SpellCast, MS_PER_DAY},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Fighters and the identity mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fighter {
    pub fighter_id:       Option<i64>,
    pub player_name:      String,
    pub breed:            Option<u32>,
    pub class_name:       Option<String>,
    pub is_ai_controlled: bool,
}

/// `playerName → Fighter` plus `fighterId → Fighter`. Ordered maps so two
/// equal mappings serialise identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FighterMapping {
    by_name: BTreeMap<String, Fighter>,
    by_id:   BTreeMap<i64, Fighter>,
}

impl FighterMapping {
    /// Add a fighter unless its name or id is already known. Returns whether
    /// it was added.
    pub fn insert(&mut self, fighter: Fighter) -> bool {
        if self.by_name.contains_key(&fighter.player_name) {
            return false;
        }
        if fighter.fighter_id.is_some_and(|id| self.by_id.contains_key(&id)) {
            tracing::debug!(
                "Fighter id {:?} already taken; '{}' not added",
                fighter.fighter_id,
                fighter.player_name
            );
            return false;
        }
        if let Some(id) = fighter.fighter_id {
            self.by_id.insert(id, fighter.clone());
        }
        self.by_name.insert(fighter.player_name.clone(), fighter);
        true
    }

    pub fn by_name(&self, player_name: &str) -> Option<&Fighter> {
        self.by_name.get(player_name)
    }

    pub fn by_id(&self, fighter_id: i64) -> Option<&Fighter> {
        self.by_id.get(&fighter_id)
    }

    pub fn fighters(&self) -> impl Iterator<Item = &Fighter> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
    }
}

// ---------------------------------------------------------------------------
// Output events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FightRoster {
    pub fight_id: u64,
    pub fighters: Vec<Fighter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TrackerEvent {
    ClassDetected {
        class_name:  String,
        player_name: String,
    },
    /// `fight` is `None` for the legacy, unparameterised signal.
    CombatStarted {
        fight: Option<FightRoster>,
    },
    FighterJoined {
        fight_id: u64,
        fighter:  Fighter,
    },
    TurnStarted {
        fighter_id: i64,
        fighter:    Fighter,
    },
    TurnEnded,
    CombatEnded {
        fight_id: Option<u64>,
    },
    /// Every admitted line, published only when `forward_log_lines` is set.
    LogLine {
        line:   String,
        parsed: ParsedLine,
    },
}

// ---------------------------------------------------------------------------
// Turn pointer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct TurnPointer {
    current:    Option<i64>,
    /// Fighter whose turn just ended; their casts are not a new turn until a
    /// third fighter acts or a turn-end line arrives.
    previous:   Option<i64>,
    changed_at: Option<LogTimestamp>,
}

impl TurnPointer {
    fn is_trailing(&self, fighter_id: i64, at: Option<LogTimestamp>, grace_ms: Option<u32>) -> bool {
        if self.previous != Some(fighter_id) {
            return false;
        }
        let Some(grace_ms) = grace_ms else { return true };
        match (self.changed_at, at) {
            (Some(changed), Some(now)) => {
                let dt = now.elapsed_since(changed);
                // dt past half a day means `now` is before the change
                dt <= grace_ms || dt > MS_PER_DAY / 2
            }
            _ => true,
        }
    }

    fn advance(&mut self, fighter_id: i64, at: Option<LogTimestamp>) {
        self.previous = self.current;
        self.current = Some(fighter_id);
        self.changed_at = at;
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Active { fight_id: u64 },
}

pub struct CombatTracker {
    fight_id:          Option<u64>,
    mapping:           FighterMapping,
    turn:              TurnPointer,
    legacy_started:    bool,
    revision:          u64,
    trailing_grace_ms: Option<u32>,
    detector:          Box<dyn ClassDetector>,
}

impl CombatTracker {
    pub fn new(detector: Box<dyn ClassDetector>) -> Self {
        Self {
            fight_id:          None,
            mapping:           FighterMapping::default(),
            turn:              TurnPointer::default(),
            legacy_started:    false,
            revision:          0,
            trailing_grace_ms: None,
            detector,
        }
    }

    /// Let the previous fighter start a new turn once `grace_ms` has passed
    /// since the turn change. `None` (the default) never releases on time.
    pub fn with_trailing_grace(mut self, grace_ms: Option<u32>) -> Self {
        self.trailing_grace_ms = grace_ms;
        self
    }

    pub fn state(&self) -> TrackerState {
        match self.fight_id {
            Some(fight_id) => TrackerState::Active { fight_id },
            None => TrackerState::Idle,
        }
    }

    pub fn mapping(&self) -> &FighterMapping {
        &self.mapping
    }

    pub fn last_turn_fighter_id(&self) -> Option<i64> {
        self.turn.current
    }

    /// Bumped on every mapping change; the synchronizer compares it.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Independent copy of the current identity mapping.
    pub fn mapping_snapshot(&self) -> FighterMapping {
        self.mapping.clone()
    }

    /// Overwrite the identity mapping with `snapshot`. The turn pointer is
    /// kept only if its fighter is still known.
    pub fn replace_mapping(&mut self, snapshot: FighterMapping) {
        self.mapping = snapshot;
        if let Some(current) = self.turn.current {
            if self.mapping.by_id(current).is_none() {
                self.turn = TurnPointer::default();
            }
        }
        self.revision += 1;
    }

    /// Feed one parsed line; returns the events it produced, in order.
    pub fn handle(&mut self, line: &ParsedLine) -> Vec<TrackerEvent> {
        let mut out = Vec::new();
        if let Some(signal) = &line.combat_start {
            self.on_combat_start(signal, &mut out);
        }
        if let Some(cast) = &line.spell_cast {
            self.on_spell_cast(cast, &mut out);
        }
        if line.turn_ended {
            self.turn.previous = None;
            out.push(TrackerEvent::TurnEnded);
        }
        if let Some(end) = &line.combat_end {
            self.on_combat_end(end, &mut out);
        }
        out
    }

    fn fighter_from(&self, entry: &FighterEntry) -> Fighter {
        Fighter {
            fighter_id:       Some(entry.fighter_id),
            player_name:      entry.player_name.clone(),
            breed:            Some(entry.breed),
            class_name:       self.detector.class_for_breed(entry.breed),
            is_ai_controlled: entry.is_ai_controlled,
        }
    }

    fn on_combat_start(&mut self, signal: &CombatStartSignal, out: &mut Vec<TrackerEvent>) {
        let info = match signal {
            CombatStartSignal::Fight(info) => info,
            CombatStartSignal::Legacy => {
                if self.fight_id.is_none() && !self.legacy_started {
                    self.legacy_started = true;
                    tracing::info!("Combat started (legacy marker)");
                    out.push(TrackerEvent::CombatStarted { fight: None });
                }
                return;
            }
        };

        match self.fight_id {
            Some(current) if current == info.fight_id => self.merge(info, out),
            Some(current) => {
                tracing::info!("Fight {} replaced by fight {} — resetting roster", current, info.fight_id);
                self.clear();
                self.seed(info, out);
            }
            None => self.seed(info, out),
        }
    }

    fn seed(&mut self, info: &CombatStartInfo, out: &mut Vec<TrackerEvent>) {
        self.fight_id = Some(info.fight_id);
        let mut fighters = Vec::with_capacity(info.fighters.len());
        for entry in &info.fighters {
            let fighter = self.fighter_from(entry);
            if self.mapping.insert(fighter.clone()) {
                fighters.push(fighter);
            }
        }
        self.revision += 1;
        tracing::info!("Fight {} started with {} fighter(s)", info.fight_id, fighters.len());
        out.push(TrackerEvent::CombatStarted {
            fight: Some(FightRoster { fight_id: info.fight_id, fighters }),
        });
    }

    fn merge(&mut self, info: &CombatStartInfo, out: &mut Vec<TrackerEvent>) {
        for entry in &info.fighters {
            let fighter = self.fighter_from(entry);
            if self.mapping.insert(fighter.clone()) {
                self.revision += 1;
                tracing::debug!("Fighter '{}' joined fight {}", fighter.player_name, info.fight_id);
                out.push(TrackerEvent::FighterJoined { fight_id: info.fight_id, fighter });
            }
        }
    }

    fn on_spell_cast(&mut self, cast: &SpellCast, out: &mut Vec<TrackerEvent>) {
        if let Some(class_name) = self.detector.detect_class(&cast.spell_name) {
            out.push(TrackerEvent::ClassDetected {
                class_name,
                player_name: cast.caster_name.clone(),
            });
        }

        let Some(fighter) = self.mapping.by_name(&cast.caster_name) else { return };
        let Some(fighter_id) = fighter.fighter_id else { return };

        if self.turn.current == Some(fighter_id) {
            return; // Same ongoing turn
        }
        if self.turn.is_trailing(fighter_id, cast.timestamp, self.trailing_grace_ms) {
            tracing::debug!("Late cast from '{}' ignored for turn inference", cast.caster_name);
            return;
        }

        let fighter = fighter.clone();
        self.turn.advance(fighter_id, cast.timestamp);
        out.push(TrackerEvent::TurnStarted { fighter_id, fighter });
    }

    fn on_combat_end(&mut self, end: &CombatEnd, out: &mut Vec<TrackerEvent>) {
        if let (Some(current), Some(ended)) = (self.fight_id, end.fight_id) {
            if current != ended {
                tracing::debug!("End marker for fight {} while tracking {}", ended, current);
            }
        }
        self.clear();
        self.legacy_started = false;
        tracing::info!("Combat ended (fight id {:?})", end.fight_id);
        out.push(TrackerEvent::CombatEnded { fight_id: end.fight_id });
    }

    fn clear(&mut self) {
        if !self.mapping.is_empty() || self.fight_id.is_some() {
            self.revision += 1;
        }
        self.fight_id = None;
        self.mapping.clear();
        self.turn = TurnPointer::default();
    }
}
