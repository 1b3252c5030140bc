//! Evaluation outcome histograms.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Outcome value usable as a map key (total order over `f32`).
#[derive(Debug, Clone, Copy)]
pub struct Outcome(pub f32);

impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Outcome {}

impl PartialOrd for Outcome {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Outcome {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Per-era histogram of evaluation outcomes.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    eras: BTreeMap<u64, BTreeMap<Outcome, usize>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, era: u64, outcome: f32) {
        *self
            .eras
            .entry(era)
            .or_default()
            .entry(Outcome(outcome))
            .or_insert(0) += 1;
    }

    /// Number of results recorded for `era`.
    pub fn count(&self, era: u64) -> usize {
        self.eras.get(&era).map_or(0, |h| h.values().sum())
    }

    pub fn histogram(&self, era: u64) -> Option<&BTreeMap<Outcome, usize>> {
        self.eras.get(&era)
    }

    /// Mean of `(outcome + 1) / 2`, weighted by count. `None` without
    /// results.
    pub fn win_rate(&self, era: u64) -> Option<f64> {
        let histogram = self.eras.get(&era)?;
        let n: usize = histogram.values().sum();
        if n == 0 {
            return None;
        }
        let wins: f64 = histogram
            .iter()
            .map(|(outcome, &cnt)| (outcome.0 as f64 + 1.0) / 2.0 * cnt as f64)
            .sum();
        Some(wins / n as f64)
    }

    pub fn win_rate_report(&self, era: u64) -> WinRateReport {
        WinRateReport {
            era,
            win_rate: self.win_rate(era),
            count: self.count(era),
        }
    }
}

/// Display form of an era's win rate: `0.750 (3.0 / 4)`, or `NaN (0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinRateReport {
    pub era: u64,
    pub win_rate: Option<f64>,
    pub count: usize,
}

impl fmt::Display for WinRateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.win_rate {
            Some(rate) => write!(
                f,
                "{:.3} ({:.1} / {})",
                rate,
                rate * self.count as f64,
                self.count
            ),
            None => write!(f, "NaN (0)"),
        }
    }
}
