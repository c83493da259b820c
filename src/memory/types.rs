//! Core memory type definitions.
//!
//! Defines [`MemoryType`] (the closed five-value taxonomy), [`Memory`]
//! (a full record as stored and as serialized in API responses), and
//! [`content_hash`] (the normalized content digest used for exact-duplicate
//! lookup).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The structured memory taxonomy. Closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A piece of knowledge about the world or the workspace.
    Fact,
    /// A choice that was made and should not be re-litigated.
    Decision,
    /// Something learned the hard way.
    Lesson,
    /// A recurring structure worth recognizing again.
    Pattern,
    /// An approach that did not work.
    Failure,
}

impl MemoryType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Decision => "decision",
            Self::Lesson => "lesson",
            Self::Pattern => "pattern",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "decision" => Ok(Self::Decision),
            "lesson" => Ok(Self::Lesson),
            "pattern" => Ok(Self::Pattern),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
///
/// The embedding lives in the `memories_vec` table and is never carried on
/// this struct; API payloads don't include it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Full text content. Immutable after creation; merges never rewrite it.
    pub content: String,
    /// Hex SHA-256 of the normalized content, unique across the store.
    pub content_hash: String,
    pub memory_type: MemoryType,
    /// Scoping tag. No referential integrity enforced.
    pub agent_id: Option<String>,
    /// Arbitrary JSON object. Merges take the shallow union, incoming keys win.
    pub metadata: serde_json::Value,
    /// Weak reference to another memory; may dangle after deletes.
    pub parent_id: Option<String>,
    /// In `[0, 1]`, never decreases across merges.
    pub confidence: f64,
    /// Bumped by every read and every search hit. Never decreases.
    pub access_count: u32,
    /// RFC 3339. Immutable.
    pub created_at: String,
    /// RFC 3339. Bumped on every merge.
    pub updated_at: String,
}

/// Column list matching [`Memory::from_row`]. Keep the two in sync.
pub const MEMORY_COLUMNS: &str =
    "id, content, content_hash, memory_type, agent_id, metadata, parent_id, \
     confidence, access_count, created_at, updated_at";

impl Memory {
    /// Build a `Memory` from a row selected with [`MEMORY_COLUMNS`].
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let memory_type: String = row.get(3)?;
        let metadata: String = row.get(5)?;
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            content_hash: row.get(2)?,
            memory_type: memory_type.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
            agent_id: row.get(4)?,
            metadata: serde_json::from_str(&metadata)
                .unwrap_or(serde_json::Value::Object(Default::default())),
            parent_id: row.get(6)?,
            confidence: row.get(7)?,
            access_count: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

/// Hex SHA-256 digest of the trimmed, lower-cased content.
///
/// Case and surrounding whitespace never distinguish two memories, so
/// `"Sky is Blue"` and `" sky is blue "` hash identically.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.trim().to_lowercase().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
    }

    #[test]
    fn hash_ignores_case_and_whitespace() {
        assert_eq!(content_hash("Sky is Blue"), content_hash(" sky is blue "));
        assert_eq!(content_hash("ABC"), content_hash("abc"));
    }

    #[test]
    fn hash_distinguishes_content() {
        assert_ne!(content_hash("sky is blue"), content_hash("sky is red"));
    }

    #[test]
    fn hash_is_64_hex_chars() {
        let h = content_hash("anything");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn memory_type_round_trips() {
        for t in ["fact", "decision", "lesson", "pattern", "failure"] {
            let parsed: MemoryType = t.parse().unwrap();
            assert_eq!(parsed.as_str(), t);
        }
        assert!("episodic".parse::<MemoryType>().is_err());
    }

    #[test]
    fn memory_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&MemoryType::Decision).unwrap();
        assert_eq!(json, "\"decision\"");
        let back: MemoryType = serde_json::from_str("\"lesson\"").unwrap();
        assert_eq!(back, MemoryType::Lesson);
    }
}
