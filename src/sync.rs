/// Copies the fighter-identity mapping from one tracker into another.
///
/// `wakfu.log` announces fighters with their ids but never says who is
/// casting; `wakfu_chat.log` shows every cast but never prints a fighter id.
/// The chat tracker can only attribute turns after the combat tracker's
/// mapping has been copied across. The copy is a full replace with an owned
/// snapshot: the two trackers never share the map.
use crate::state::CombatTracker;

/// Overwrite `dest`'s mapping with a snapshot of `source`'s.
pub fn sync(source: &CombatTracker, dest: &mut CombatTracker) {
    dest.replace_mapping(source.mapping_snapshot());
}

/// Remembers which source revision was last copied so unchanged rosters are
/// not copied again on every tick.
#[derive(Debug, Default)]
pub struct MappingSynchronizer {
    last_revision: Option<u64>,
}

impl MappingSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy only if the source mapping changed since the previous copy.
    /// Returns whether a copy happened.
    pub fn sync_if_changed(&mut self, source: &CombatTracker, dest: &mut CombatTracker) -> bool {
        let revision = source.revision();
        if self.last_revision == Some(revision) {
            return false;
        }
        sync(source, dest);
        self.last_revision = Some(revision);
        tracing::debug!(
            "Fighter mapping synced (revision {}, {} fighter(s))",
            revision,
            dest.mapping().len()
        );
        true
    }
}
