//! Session report and export functionality

use crate::engine::{DechatterEngine, EngineCounters};
use crate::pool::PoolStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Number of keys listed in the report
pub const TOP_KEYS: usize = 10;

/// Complete session report
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Report metadata
    pub metadata: ReportMetadata,
    /// Summary statistics
    pub summary: SessionSummary,
    /// Keys with the most dismissed events
    pub top_keys: Vec<KeyEntry>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: String,
    /// Application version
    pub version: String,
    /// Session duration in seconds
    pub duration_secs: f64,
}

/// Session summary statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub events: EngineCounters,
    pub pool: PoolStats,
    /// Keys with live filter state
    pub tracked_keys: usize,
    /// Dismissals since the counters were last reset (may span sessions)
    pub total_dismissed: u64,
    /// Share of this session's events that were dropped, in percent
    pub drop_rate_percent: f64,
    /// Last sampled CPU usage
    pub cpu_percent: Option<f32>,
}

/// One chattering key
#[derive(Debug, Clone, Serialize)]
pub struct KeyEntry {
    pub code: u16,
    pub name: String,
    pub dismissed: u64,
    pub shortest_gap_ms: Option<f64>,
}

impl SessionReport {
    /// Create a report of the engine's state
    pub fn new(start_time: Instant, engine: &mut DechatterEngine) -> Self {
        let duration_secs = start_time.elapsed().as_secs_f64();
        let now: DateTime<Utc> = Utc::now();
        let counters = engine.counters();
        let pool = engine.pool_stats();
        let tracked_keys = engine.tracked_keys();
        let cpu_percent = engine.load_monitor().current_cpu_usage();

        let drop_rate_percent = if counters.events == 0 {
            0.0
        } else {
            counters.dropped as f64 * 100.0 / counters.events as f64
        };

        let stats = engine.stats_mut();
        let total_dismissed = stats.total();
        let top_keys = stats
            .key_counters()
            .iter()
            .take(TOP_KEYS)
            .map(|c| KeyEntry {
                code: c.key.0,
                name: c.key.name().to_string(),
                dismissed: c.count,
                shortest_gap_ms: c.min_gap_us.map(|us| us as f64 / 1000.0),
            })
            .collect();

        Self {
            metadata: ReportMetadata {
                generated_at: now.to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                duration_secs,
            },
            summary: SessionSummary {
                events: counters,
                pool,
                tracked_keys,
                total_dismissed,
                drop_rate_percent,
                cpu_percent,
            },
            top_keys,
        }
    }

    /// Export report to JSON file
    pub fn export_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Export report to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text rendering for the terminal
    pub fn to_text(&self) -> String {
        let s = &self.summary;
        let mut out = format!(
            "Session {:.1}s: {} events, {} accepted, {} dropped ({:.2}%), {} repeats, {} fast-path\n",
            self.metadata.duration_secs,
            s.events.events,
            s.events.accepted,
            s.events.dropped,
            s.drop_rate_percent,
            s.events.repeats,
            s.events.fast_path,
        );
        if self.top_keys.is_empty() {
            out.push_str("No chatter detected\n");
        } else {
            out.push_str("Chattering keys:\n");
            for key in &self.top_keys {
                let gap = key
                    .shortest_gap_ms
                    .map(|g| format!(", shortest gap {:.1} ms", g))
                    .unwrap_or_default();
                out.push_str(&format!("  {:<12} {:>6}{}\n", key.name, key.dismissed, gap));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::KeyboardClassifier;
    use crate::keyboard::KeyEventType;
    use std::time::Duration;

    #[test]
    fn report_lists_chattering_keys() {
        let mut engine = DechatterEngine::with_classifier(None, KeyboardClassifier::default());
        let base = Instant::now();
        for (t, key) in [(0, 57u16), (5, 57), (9, 57), (0, 30), (12, 30)] {
            engine.on_hardware_event_at(
                1,
                key,
                KeyEventType::Press,
                false,
                base + Duration::from_millis(t),
            );
        }

        let report = SessionReport::new(base, &mut engine);
        assert_eq!(report.summary.events.dropped, 3);
        assert_eq!(report.top_keys[0].name, "Space");
        assert_eq!(report.top_keys[0].dismissed, 2);
        assert_eq!(report.top_keys[0].shortest_gap_ms, Some(5.0));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"top_keys\""));
        assert!(report.to_text().contains("Chattering keys"));
    }

    #[test]
    fn empty_session_report() {
        let mut engine = DechatterEngine::with_classifier(None, KeyboardClassifier::default());
        let report = SessionReport::new(Instant::now(), &mut engine);
        assert_eq!(report.summary.drop_rate_percent, 0.0);
        assert!(report.to_text().contains("No chatter detected"));
    }
}
