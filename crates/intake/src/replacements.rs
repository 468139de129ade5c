//! Device-name normalization table.
//!
//! The table is an ordered list of `source -> target` substitutions applied
//! case-insensitively, in order, over the whole name. It is persisted as a flat
//! JSON object and always replaced as a whole.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use {
    regex::{NoExpand, Regex, RegexBuilder},
    serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de::{MapAccess, Visitor},
        ser::SerializeMap,
    },
    thiserror::Error,
    tracing::{info, warn},
};

use crate::error::{Error, Result};

/// Why a replacement payload was rejected.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("the value is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("replacements must be a JSON object")]
    NotAnObject,
    #[error("replacements must map at least one word to a string")]
    NoStringValues,
    #[error("invalid pattern {pattern:?}: {error}")]
    Pattern {
        pattern: String,
        #[source]
        error: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    source: String,
    target: String,
    pattern: Regex,
}

#[derive(Debug, Clone, Default)]
pub struct ReplacementTable {
    entries: Vec<Entry>,
}

impl ReplacementTable {
    pub fn new<I, S, T>(pairs: I) -> std::result::Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut entries = Vec::new();
        for (source, target) in pairs {
            let source = source.into();
            // An empty pattern matches between every character.
            if source.is_empty() {
                continue;
            }
            let pattern = RegexBuilder::new(&regex::escape(&source))
                .case_insensitive(true)
                .build()
                .map_err(|error| TableError::Pattern {
                    pattern: source.clone(),
                    error,
                })?;
            entries.push(Entry {
                source,
                target: target.into(),
                pattern,
            });
        }
        Ok(Self { entries })
    }

    /// Parse an admin payload. Non-string values are skipped; at least one
    /// string value is required.
    pub fn from_json(json: &str) -> std::result::Result<Self, TableError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(TableError::NotJson)?;
        if !value.is_object() {
            return Err(TableError::NotAnObject);
        }
        let ordered: OrderedObject = serde_json::from_str(json).map_err(TableError::NotJson)?;

        let mut pairs = Vec::with_capacity(ordered.0.len());
        for (key, value) in ordered.0 {
            match value {
                serde_json::Value::String(target) => pairs.push((key, target)),
                other => warn!(source = %key, value = %other, "skipping non-string replacement"),
            }
        }
        if pairs.is_empty() {
            return Err(TableError::NoStringValues);
        }
        Self::new(pairs)
    }

    /// Apply every entry in order. Later entries see the output of earlier ones.
    pub fn apply(&self, text: &str) -> String {
        self.entries.iter().fold(text.to_string(), |acc, e| {
            e.pattern
                .replace_all(&acc, NoExpand(&e.target))
                .into_owned()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
    }
}

impl Serialize for ReplacementTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (source, target) in self.pairs() {
            map.serialize_entry(source, target)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ReplacementTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let ordered = OrderedObject::deserialize(deserializer)?;
        let pairs = ordered.0.into_iter().filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            _ => None,
        });
        Self::new(pairs).map_err(serde::de::Error::custom)
    }
}

/// A JSON object with its keys in document order.
struct OrderedObject(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for OrderedObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedObject;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((k, v)) = map.next_entry::<String, serde_json::Value>()? {
                    entries.push((k, v));
                }
                Ok(OrderedObject(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

// ── Persistence ─────────────────────────────────────────────────────────────

/// JSON file holding the table.
#[derive(Debug, Clone)]
pub struct ReplacementStore {
    path: PathBuf,
}

impl ReplacementStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table. A missing file is an empty table.
    pub fn load(&self) -> Result<ReplacementTable> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no replacements file, starting empty");
                return Ok(ReplacementTable::default());
            },
            Err(e) => return Err(e.into()),
        };
        let table: ReplacementTable = serde_json::from_str(&raw)?;
        info!(path = %self.path.display(), entries = table.len(), "loaded replacements");
        Ok(table)
    }

    /// Overwrite the file with `table`.
    pub async fn save(&self, table: &ReplacementTable) -> Result<()> {
        let json = serde_json::to_string_pretty(table)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

// ── Shared handle ───────────────────────────────────────────────────────────

/// Process-wide table. Readers take a complete snapshot; the admin path
/// persists first and then swaps the whole table.
pub struct Replacements {
    store: Option<ReplacementStore>,
    current: RwLock<Arc<ReplacementTable>>,
}

impl Replacements {
    /// Load from `store`, failing on an unreadable or malformed file.
    pub fn load(store: ReplacementStore) -> Result<Self> {
        let table = store.load().map_err(|e| {
            Error::external(
                format!("failed to load replacements from {}", store.path().display()),
                e,
            )
        })?;
        Ok(Self {
            store: Some(store),
            current: RwLock::new(Arc::new(table)),
        })
    }

    /// A table that is never written to disk.
    pub fn in_memory(table: ReplacementTable) -> Self {
        Self {
            store: None,
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<ReplacementTable> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn normalize(&self, text: &str) -> String {
        self.snapshot().apply(text)
    }

    /// Persist `table`, then make it current. On a write failure the current
    /// table is left untouched.
    pub async fn replace(&self, table: ReplacementTable) -> Result<()> {
        if let Some(ref store) = self.store {
            store.save(&table).await?;
        }
        let entries = table.len();
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(table);
        info!(entries, "replacements updated");
        Ok(())
    }
}
