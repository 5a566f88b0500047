//! Dismissed-event statistics
//!
//! Counts how many events were dropped as chatter, overall and per key
//! code, and persists the counts as JSON next to the config file. Saving is
//! debounced so a chattering key does not turn into disk traffic.

use crate::config::{app_dir, ConfigError};
use crate::keyboard::KeyCode;
use crate::utils::MinMaxExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Quiet period after the last change before counts are written
pub const SAVE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Path of the statistics file
pub fn stats_path() -> Result<PathBuf, StatsError> {
    Ok(app_dir()?.join("stats.json"))
}

/// Dismissals for one key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCounter {
    pub key: KeyCode,
    pub count: u64,
    /// Shortest chatter gap observed, in microseconds
    pub min_gap_us: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyTally {
    count: u64,
    min_gap_us: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsFile {
    total: u64,
    keys: Vec<KeyCounter>,
}

/// Chatter dismissal counters
#[derive(Debug, Default)]
pub struct ChatterStats {
    total: u64,
    per_key: HashMap<KeyCode, KeyTally>,
    sorted: Option<Vec<KeyCounter>>,
    dirty_since: Option<Instant>,
}

impl ChatterStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one dropped event. `gap` is omitted when bookkeeping is shed.
    pub fn record_dismiss(&mut self, key: KeyCode, gap: Option<Duration>, now: Instant) {
        self.total += 1;
        let tally = self.per_key.entry(key).or_default();
        tally.count += 1;
        if let Some(gap) = gap {
            tally.min_gap_us.update_min(gap.as_micros() as u64);
        }
        self.sorted = None;
        self.dirty_since = Some(now);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count_for(&self, key: KeyCode) -> u64 {
        self.per_key.get(&key).map_or(0, |t| t.count)
    }

    /// Keys with at least one dismissal, most dismissed first
    pub fn key_counters(&mut self) -> &[KeyCounter] {
        let per_key = &self.per_key;
        self.sorted.get_or_insert_with(|| {
            let mut counters: Vec<KeyCounter> = per_key
                .iter()
                .filter(|(_, t)| t.count > 0)
                .map(|(key, t)| KeyCounter {
                    key: *key,
                    count: t.count,
                    min_gap_us: t.min_gap_us,
                })
                .collect();
            counters.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));
            counters
        })
    }

    /// One-line summary for logs and status output
    pub fn summary(&self) -> String {
        format!(
            "{} chatter event(s) dismissed on {} key(s)",
            self.total,
            self.per_key.len()
        )
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.per_key.clear();
        self.sorted = None;
        self.dirty_since = None;
    }

    /// True when there are unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Save when the counts have been quiet for [`SAVE_DELAY`].
    ///
    /// Returns whether a save happened.
    pub fn save_if_due(&mut self, now: Instant, path: &Path) -> Result<bool, StatsError> {
        match self.dirty_since {
            Some(changed) if now.saturating_duration_since(changed) >= SAVE_DELAY => {
                self.save_to(path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn save_to(&mut self, path: &Path) -> Result<(), StatsError> {
        let file = StatsFile {
            total: self.total,
            keys: self.key_counters().to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)?;
        self.dirty_since = None;
        Ok(())
    }

    /// Load counts saved by [`save_to`](Self::save_to)
    pub fn load_from(path: &Path) -> Result<Self, StatsError> {
        let contents = fs::read_to_string(path)?;
        let file: StatsFile = serde_json::from_str(&contents)?;
        let per_key = file
            .keys
            .into_iter()
            .map(|c| {
                (
                    c.key,
                    KeyTally {
                        count: c.count,
                        min_gap_us: c.min_gap_us,
                    },
                )
            })
            .collect();
        Ok(Self {
            total: file.total,
            per_key,
            sorted: None,
            dirty_since: None,
        })
    }

    /// Load saved counts, starting empty when there are none
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(stats) => stats,
            Err(e) => {
                log::warn!("ignoring unreadable stats file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn us(n: u64) -> Option<Duration> {
        Some(Duration::from_micros(n))
    }

    #[test]
    fn counts_and_sorting() {
        let now = Instant::now();
        let mut stats = ChatterStats::new();
        stats.record_dismiss(KeyCode(30), us(9000), now);
        stats.record_dismiss(KeyCode(57), us(4000), now);
        stats.record_dismiss(KeyCode(57), us(6000), now);
        stats.record_dismiss(KeyCode(57), None, now);

        assert_eq!(stats.total(), 4);
        assert_eq!(stats.count_for(KeyCode(57)), 3);
        let counters = stats.key_counters();
        assert_eq!(counters[0].key, KeyCode(57));
        assert_eq!(counters[0].min_gap_us, Some(4000));
        assert_eq!(counters[1].key, KeyCode(30));
    }

    #[test]
    fn cache_invalidated_on_record() {
        let now = Instant::now();
        let mut stats = ChatterStats::new();
        stats.record_dismiss(KeyCode(30), None, now);
        assert_eq!(stats.key_counters().len(), 1);
        stats.record_dismiss(KeyCode(31), None, now);
        assert_eq!(stats.key_counters().len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = ChatterStats::new();
        stats.record_dismiss(KeyCode(30), None, Instant::now());
        stats.reset();
        assert_eq!(stats.total(), 0);
        assert!(stats.key_counters().is_empty());
        assert!(!stats.is_dirty());
    }

    #[test]
    fn save_is_debounced() {
        let path = env::temp_dir().join(format!("dechatter-stats-{}.json", std::process::id()));
        let now = Instant::now();
        let mut stats = ChatterStats::new();
        stats.record_dismiss(KeyCode(30), us(2500), now);

        assert!(!stats.save_if_due(now + Duration::from_secs(1), &path).unwrap());
        assert!(stats.save_if_due(now + SAVE_DELAY, &path).unwrap());
        assert!(!stats.is_dirty());

        let mut loaded = ChatterStats::load_from(&path).unwrap();
        assert_eq!(loaded.total(), 1);
        assert_eq!(loaded.key_counters()[0].min_gap_us, Some(2500));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_loads_empty() {
        let stats = ChatterStats::load_or_default(Path::new("/nonexistent/stats.json"));
        assert_eq!(stats.total(), 0);
    }
}
