//! Sender cadence analysis.
//!
//! Newsletters arrive on a schedule; people do not. This module keeps a
//! short rolling history per sender and measures how regular the arrival
//! intervals are. A highly regular cadence combined with a promotional
//! track record marks the sender as newsletter-like, which downstream
//! consumers can use as an extra promotional signal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::JsonStore;
use crate::config::TriageConfig;
use crate::error::{CacheError, Result};

/// Rolling history bound per sender.
const MAX_OBSERVATIONS: usize = 20;

/// One received message from a sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub is_promotional: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TemporalState {
    senders: HashMap<String, Vec<Observation>>,
}

/// Cadence verdict for one sender within the analysis window.
#[derive(Debug, Clone, Serialize)]
pub struct CadenceVerdict {
    /// 1 / (1 + coefficient of variation) of arrival intervals, in (0, 1].
    pub regularity: f64,
    /// Share of observations classified promotional.
    pub promo_ratio: f64,
    /// Observations inside the window the verdict is based on.
    pub observations: usize,
    pub is_promotional_cadence: bool,
}

/// Long-run profile of a sender, independent of the analysis window.
#[derive(Debug, Clone, Serialize)]
pub struct SenderProfile {
    pub total: usize,
    pub promotional: usize,
    pub promo_ratio: f64,
    /// "promotional", "mixed" or "normal".
    pub pattern_type: &'static str,
    pub is_regular: bool,
    /// Mean interval between messages, in days.
    pub frequency_days: f64,
}

/// Tracks per-sender arrival history and derives cadence verdicts.
pub struct TemporalAnalyzer {
    config: Arc<TriageConfig>,
    store: JsonStore,
    state: Mutex<TemporalState>,
}

impl TemporalAnalyzer {
    /// Open the analyzer, restoring any persisted history.
    pub fn open(config: Arc<TriageConfig>, store: JsonStore) -> Self {
        let state = store.load_or_default();
        Self {
            config,
            store,
            state: Mutex::new(state),
        }
    }

    /// Record one classified message for a sender.
    pub fn record_observation(
        &self,
        sender: &str,
        timestamp: DateTime<Utc>,
        is_promotional: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        let history = state.senders.entry(sender.to_string()).or_default();
        history.push(Observation {
            timestamp,
            is_promotional,
        });
        if history.len() > MAX_OBSERVATIONS {
            let excess = history.len() - MAX_OBSERVATIONS;
            history.drain(..excess);
        }
        Ok(())
    }

    /// Cadence verdict for a sender. `None` until enough observations fall
    /// inside the analysis window.
    pub fn analyze(&self, sender: &str, now: DateTime<Utc>) -> Result<Option<CadenceVerdict>> {
        let state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        let Some(history) = state.senders.get(sender) else {
            return Ok(None);
        };

        let window_start = now - Duration::days(self.config.temporal_window_days as i64);
        let mut windowed: Vec<&Observation> = history
            .iter()
            .filter(|o| o.timestamp >= window_start)
            .collect();
        if windowed.len() < self.config.temporal_min_observations {
            return Ok(None);
        }
        windowed.sort_by_key(|o| o.timestamp);

        let regularity = interval_regularity(&windowed);
        let promos = windowed.iter().filter(|o| o.is_promotional).count();
        let promo_ratio = promos as f64 / windowed.len() as f64;

        let is_promotional_cadence = (regularity
            >= self.config.temporal_regularity_threshold
            && promo_ratio >= 0.5)
            || promo_ratio >= 0.7;

        debug!(
            sender,
            regularity,
            promo_ratio,
            observations = windowed.len(),
            is_promotional_cadence,
            "Cadence analysis complete"
        );

        Ok(Some(CadenceVerdict {
            regularity,
            promo_ratio,
            observations: windowed.len(),
            is_promotional_cadence,
        }))
    }

    /// Long-run sender profile. `None` with fewer than three observations.
    pub fn sender_profile(&self, sender: &str) -> Result<Option<SenderProfile>> {
        let state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        let Some(history) = state.senders.get(sender) else {
            return Ok(None);
        };
        if history.len() < 3 {
            return Ok(None);
        }

        let mut sorted: Vec<&Observation> = history.iter().collect();
        sorted.sort_by_key(|o| o.timestamp);

        let total = sorted.len();
        let promotional = sorted.iter().filter(|o| o.is_promotional).count();
        let promo_ratio = promotional as f64 / total as f64;
        let pattern_type = if promo_ratio >= 0.8 {
            "promotional"
        } else if promo_ratio >= 0.5 {
            "mixed"
        } else {
            "normal"
        };

        let regularity = interval_regularity(&sorted);
        let intervals = intervals_hours(&sorted);
        let frequency_days = if intervals.is_empty() {
            0.0
        } else {
            intervals.iter().sum::<f64>() / intervals.len() as f64 / 24.0
        };

        Ok(Some(SenderProfile {
            total,
            promotional,
            promo_ratio,
            pattern_type,
            is_regular: regularity > 0.5,
            frequency_days,
        }))
    }

    /// Write the current history to the backing store.
    pub fn persist(&self) -> Result<()> {
        let state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        self.store.store(&*state)
    }
}

fn intervals_hours(sorted: &[&Observation]) -> Vec<f64> {
    sorted
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds() as f64 / 3600.0)
        .collect()
}

/// Regularity of arrival intervals: 1 / (1 + CV). Perfectly even spacing
/// scores 1.0; erratic spacing trends toward 0.
fn interval_regularity(sorted: &[&Observation]) -> f64 {
    let intervals = intervals_hours(sorted);
    if intervals.is_empty() {
        return 0.0;
    }
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = intervals
        .iter()
        .map(|i| (i - mean).powi(2))
        .sum::<f64>()
        / intervals.len() as f64;
    let cv = variance.sqrt() / mean;
    1.0 / (1.0 + cv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(dir: &std::path::Path) -> TemporalAnalyzer {
        TemporalAnalyzer::open(
            Arc::new(TriageConfig::default()),
            JsonStore::new(dir.join("temporal.json")),
        )
    }

    fn feed(
        analyzer: &TemporalAnalyzer,
        sender: &str,
        now: DateTime<Utc>,
        count: usize,
        spacing_hours: i64,
        is_promotional: bool,
    ) {
        for i in 0..count {
            let ts = now - Duration::hours(spacing_hours * (count - i) as i64);
            analyzer
                .record_observation(sender, ts, is_promotional)
                .unwrap();
        }
    }

    #[test]
    fn too_few_observations_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path());
        let now = Utc::now();
        feed(&analyzer, "few@example.com", now, 5, 24, true);
        assert!(analyzer.analyze("few@example.com", now).unwrap().is_none());
        assert!(analyzer.analyze("unknown@example.com", now).unwrap().is_none());
    }

    #[test]
    fn regular_promotional_cadence_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path());
        let now = Utc::now();
        feed(&analyzer, "newsletter@shop.example", now, 12, 48, true);

        let verdict = analyzer
            .analyze("newsletter@shop.example", now)
            .unwrap()
            .unwrap();
        assert!(verdict.regularity > 0.9);
        assert_eq!(verdict.promo_ratio, 1.0);
        assert!(verdict.is_promotional_cadence);
    }

    #[test]
    fn irregular_personal_sender_is_not_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path());
        let now = Utc::now();
        // Erratic spacing, nothing promotional.
        for (i, hours) in [3i64, 50, 61, 130, 135, 200, 290, 300, 410, 500, 650]
            .iter()
            .enumerate()
        {
            analyzer
                .record_observation(
                    "friend@example.com",
                    now - Duration::hours(*hours),
                    i % 5 == 0,
                )
                .unwrap();
        }

        let verdict = analyzer.analyze("friend@example.com", now).unwrap().unwrap();
        assert!(!verdict.is_promotional_cadence);
    }

    #[test]
    fn high_promo_ratio_alone_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path());
        let now = Utc::now();
        // Irregular spacing but almost everything promotional.
        for (i, hours) in [2i64, 5, 40, 41, 90, 200, 201, 330, 331, 500].iter().enumerate() {
            analyzer
                .record_observation(
                    "blast@shop.example",
                    now - Duration::hours(*hours),
                    i != 0,
                )
                .unwrap();
        }

        let verdict = analyzer.analyze("blast@shop.example", now).unwrap().unwrap();
        assert!(verdict.promo_ratio >= 0.7);
        assert!(verdict.is_promotional_cadence);
    }

    #[test]
    fn history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path());
        let now = Utc::now();
        feed(&analyzer, "busy@example.com", now, 40, 1, false);

        let profile = analyzer.sender_profile("busy@example.com").unwrap().unwrap();
        assert_eq!(profile.total, MAX_OBSERVATIONS);
    }

    #[test]
    fn sender_profile_pattern_types() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path());
        let now = Utc::now();

        feed(&analyzer, "promo@example.com", now, 10, 24, true);
        feed(&analyzer, "normal@example.com", now, 10, 24, false);

        let promo = analyzer.sender_profile("promo@example.com").unwrap().unwrap();
        assert_eq!(promo.pattern_type, "promotional");
        assert!(promo.is_regular);
        assert!((promo.frequency_days - 1.0).abs() < 0.01);

        let normal = analyzer.sender_profile("normal@example.com").unwrap().unwrap();
        assert_eq!(normal.pattern_type, "normal");
    }

    #[test]
    fn state_round_trips_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let analyzer = analyzer(dir.path());
            feed(&analyzer, "newsletter@shop.example", now, 12, 48, true);
            analyzer.persist().unwrap();
        }
        let reopened = analyzer(dir.path());
        let verdict = reopened
            .analyze("newsletter@shop.example", now)
            .unwrap()
            .unwrap();
        assert!(verdict.is_promotional_cadence);
    }
}
