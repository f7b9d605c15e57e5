//! Replay data model
//!
//! Search pages produce [`ReplaySummary`] values, full fetches produce
//! [`ReplayRecord`] values, and the storage layer persists the latter.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Replay identifier assigned by the remote service, e.g. `gen9vgc2024regh-2231234567`.
pub type ReplayId = String;

/// Closed ingestion interval in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Split into `parts` contiguous sub-ranges ordered oldest first.
    ///
    /// Neighbouring sub-ranges share their boundary second. The last
    /// sub-range absorbs the remainder so the union is exactly `self`.
    pub fn split(&self, parts: usize) -> Vec<TimeRange> {
        let parts = parts.max(1);
        let span = self.end.saturating_sub(self.start).max(0);
        let width = span / parts as i64;
        if width == 0 {
            return vec![*self];
        }

        (0..parts)
            .map(|i| {
                let start = self.start + width * i as i64;
                let end = if i + 1 == parts {
                    self.end
                } else {
                    self.start + width * (i as i64 + 1)
                };
                TimeRange { start, end }
            })
            .collect()
    }
}

/// One bounded search request: everything strictly older than `before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchWindow {
    /// Index of the cursor chain that issued this window.
    pub chain: usize,
    /// Exclusive upper bound, epoch seconds.
    pub before: i64,
    pub format: Option<String>,
    pub user: Option<String>,
}

/// Search page entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub id: ReplayId,
    pub uploadtime: i64,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub format: String,
    #[serde(default, deserialize_with = "loose_flag")]
    pub private: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub password: bool,
}

impl ReplaySummary {
    /// Private and password-protected replays cannot be fetched from the
    /// public endpoint.
    pub fn is_eligible(&self) -> bool {
        !self.private && !self.password
    }
}

/// A fully fetched replay, the unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub id: ReplayId,
    pub format: String,
    pub players: Vec<String>,
    pub log: String,
    pub uploadtime: i64,
    pub rating: Option<i64>,
}

impl ReplayRecord {
    /// Players as stored in the `players` column.
    pub fn players_column(&self) -> String {
        self.players.join(",")
    }
}

/// Ids already present in storage when the run started. Read-only.
#[derive(Debug, Clone, Default)]
pub struct KnownIdSet(HashSet<ReplayId>);

impl KnownIdSet {
    pub fn new(ids: HashSet<ReplayId>) -> Self {
        Self(ids)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ReplayId> for KnownIdSet {
    fn from_iter<I: IntoIterator<Item = ReplayId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// The search endpoint encodes flags as 0/1, null, or a password string.
fn loose_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_decodes_numeric_and_null_flags() {
        let json = r#"[
            {"uploadtime": 1730458800, "id": "gen9vgc2024regh-1", "format": "[Gen 9] VGC 2024 Reg H",
             "players": ["a", "b"], "rating": 1350, "private": 0, "password": null},
            {"uploadtime": 1730458790, "id": "gen9vgc2024regh-2", "format": "[Gen 9] VGC 2024 Reg H",
             "players": ["c", "d"], "rating": null, "private": 1, "password": "hunter2"}
        ]"#;
        let page: Vec<ReplaySummary> = serde_json::from_str(json).unwrap();

        assert_eq!(page[0].rating, Some(1350));
        assert!(!page[0].private);
        assert!(!page[0].password);
        assert!(page[0].is_eligible());

        assert_eq!(page[1].rating, None);
        assert!(page[1].private);
        assert!(page[1].password);
        assert!(!page[1].is_eligible());
    }

    #[test]
    fn summary_flags_default_when_missing() {
        let summary: ReplaySummary =
            serde_json::from_str(r#"{"id": "x", "uploadtime": 5}"#).unwrap();
        assert!(summary.is_eligible());
        assert_eq!(summary.format, "");
    }

    #[test]
    fn split_covers_whole_range() {
        let range = TimeRange::new(0, 3_600);
        let parts = range.split(4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[3].end, 3_600);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn split_too_narrow_returns_single_range() {
        let range = TimeRange::new(10, 12);
        assert_eq!(range.split(5), vec![range]);
        assert_eq!(range.split(0), vec![range]);
    }

    #[test]
    fn players_column_is_comma_joined() {
        let record = ReplayRecord {
            id: "r".into(),
            format: "gen9vgc2024regh".into(),
            players: vec!["alice".into(), "bob".into()],
            log: "|win|alice".into(),
            uploadtime: 1,
            rating: None,
        };
        assert_eq!(record.players_column(), "alice,bob");
    }
}
