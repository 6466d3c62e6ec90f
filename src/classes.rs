/// Character-class lookup consumed by the combat tracker.
///
/// The tracker only needs two answers, "which class casts this spell?" and
/// "which class is this breed id?", so it takes any `ClassDetector`. Plain
/// closures work for tests and embedders; `SpellTable` is the default,
/// backed by `data/classes.toml` embedded at compile time.
use serde::Deserialize;

pub trait ClassDetector: Send {
    /// Class owning `spell_name`, if recognised.
    fn detect_class(&self, spell_name: &str) -> Option<String>;

    /// Class for a numeric breed id from a fight-start block.
    fn class_for_breed(&self, _breed: u32) -> Option<String> {
        None
    }
}

impl<F> ClassDetector for F
where
    F: Fn(&str) -> Option<String> + Send,
{
    fn detect_class(&self, spell_name: &str) -> Option<String> {
        self(spell_name)
    }
}

// ---------------------------------------------------------------------------
// Embedded TOML table
// ---------------------------------------------------------------------------

const EMBEDDED_CLASSES: &str = include_str!("../data/classes.toml");

#[derive(Deserialize)]
struct TomlFile {
    #[serde(rename = "class", default)]
    classes: Vec<TomlClass>,
}

#[derive(Deserialize)]
struct TomlClass {
    name:   String,
    #[serde(default)]
    breeds: Vec<u32>,
    #[serde(default)]
    spells: Vec<String>,
}

#[derive(Debug, Clone)]
struct ClassEntry {
    name:   String,
    breeds: Vec<u32>,
    /// Spell names already folded by `normalize`.
    spells: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SpellTable {
    classes: Vec<ClassEntry>,
}

impl SpellTable {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        let file: TomlFile = toml::from_str(raw)?;
        let classes = file
            .classes
            .into_iter()
            .map(|c| ClassEntry {
                name:   c.name,
                breeds: c.breeds,
                spells: c.spells.iter().map(|s| normalize(s)).collect(),
            })
            .collect();
        Ok(Self { classes })
    }

    /// The table shipped with the binary. An unreadable table is logged and
    /// yields an empty detector rather than stopping the tracker.
    pub fn embedded() -> Self {
        Self::from_toml(EMBEDDED_CLASSES)
            .map_err(|e| tracing::warn!("Failed to parse embedded class table: {}", e))
            .unwrap_or_default()
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }
}

impl ClassDetector for SpellTable {
    fn detect_class(&self, spell_name: &str) -> Option<String> {
        let spell = normalize(spell_name);
        self.classes
            .iter()
            .find(|c| c.spells.iter().any(|known| spell.contains(known.as_str())))
            .map(|c| c.name.clone())
    }

    fn class_for_breed(&self, breed: u32) -> Option<String> {
        self.classes
            .iter()
            .find(|c| c.breeds.contains(&breed))
            .map(|c| c.name.clone())
    }
}

/// Lowercase and strip the French diacritics the game uses in spell names.
fn normalize(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'â' | 'ä' | 'á' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' => 'i',
            'ô' | 'ö' | 'ó' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            'ÿ' => 'y',
            other => other,
        })
        .collect()
}
