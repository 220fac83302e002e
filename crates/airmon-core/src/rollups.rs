//! Accumulators for rollup calculations

use crate::types::FieldStats;
use std::collections::BTreeMap;

/// Accumulator for mean/min/max over raw values or already-folded stats
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    sum: f64,
    count: i64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.track(value, value);
    }

    pub fn add_opt(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.add(v);
        }
    }

    /// Fold a finer-resolution result, weighting its mean by its count
    pub fn add_stats(&mut self, stats: &FieldStats) {
        if stats.count <= 0 {
            return;
        }
        self.sum += stats.avg * stats.count as f64;
        self.count += stats.count;
        self.track(stats.min, stats.max);
    }

    pub fn add_stats_opt(&mut self, stats: Option<&FieldStats>) {
        if let Some(s) = stats {
            self.add_stats(s);
        }
    }

    fn track(&mut self, lo: f64, hi: f64) {
        self.min = Some(self.min.map_or(lo, |m| m.min(lo)));
        self.max = Some(self.max.map_or(hi, |m| m.max(hi)));
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn sum(&self) -> Option<f64> {
        (self.count > 0).then_some(self.sum)
    }

    pub fn result(&self) -> Option<FieldStats> {
        if self.count == 0 {
            return None;
        }
        Some(FieldStats {
            avg: self.sum / self.count as f64,
            min: self.min?,
            max: self.max?,
            count: self.count,
        })
    }
}

/// Frequency counter for categorical fields
#[derive(Debug, Clone)]
pub struct ModeCounter<K: Ord + Clone> {
    counts: BTreeMap<K, i64>,
}

impl<K: Ord + Clone> Default for ModeCounter<K> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> ModeCounter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K) {
        self.add_n(key, 1);
    }

    pub fn add_n(&mut self, key: K, n: i64) {
        if n > 0 {
            *self.counts.entry(key).or_insert(0) += n;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Most frequent key; ties go to the smallest key
    pub fn mode(&self) -> Option<K> {
        let mut best: Option<(&K, i64)> = None;
        for (key, &count) in &self.counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((key, count));
            }
        }
        best.map(|(k, _)| k.clone())
    }

    pub fn distribution(&self) -> &BTreeMap<K, i64> {
        &self.counts
    }
}

/// Sub-bucket with the lowest and highest value; ties keep the earliest
pub fn best_and_worst(periods: &[(i64, f64)]) -> (Option<i64>, Option<i64>) {
    let mut best: Option<(i64, f64)> = None;
    let mut worst: Option<(i64, f64)> = None;
    for &(start, value) in periods {
        if best.map_or(true, |(bs, bv)| value < bv || (value == bv && start < bs)) {
            best = Some((start, value));
        }
        if worst.map_or(true, |(ws, wv)| value > wv || (value == wv && start < ws)) {
            worst = Some((start, value));
        }
    }
    (best.map(|b| b.0), worst.map(|w| w.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_stats() {
        let mut acc = Accumulator::new();
        acc.add(10.0);
        acc.add(5.0);
        acc.add(15.0);
        let stats = acc.result().unwrap();
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 15.0);
        assert_eq!(stats.avg, 10.0);
        assert_eq!(stats.count, 3);
        assert_eq!(acc.sum(), Some(30.0));
    }

    #[test]
    fn test_accumulator_empty() {
        let acc = Accumulator::new();
        assert_eq!(acc.result(), None);
        assert_eq!(acc.sum(), None);
    }

    #[test]
    fn test_weighted_fold_matches_raw_mean() {
        // 3 values in the first hour, 1 in the second
        let first = FieldStats {
            avg: 2.0,
            min: 1.0,
            max: 3.0,
            count: 3,
        };
        let second = FieldStats {
            avg: 10.0,
            min: 10.0,
            max: 10.0,
            count: 1,
        };
        let mut acc = Accumulator::new();
        acc.add_stats(&first);
        acc.add_stats(&second);
        let stats = acc.result().unwrap();
        assert_eq!(stats.avg, 4.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn test_mode_tie_break() {
        let mut counter = ModeCounter::new();
        counter.add("rain".to_string());
        counter.add("clear".to_string());
        assert_eq!(counter.mode().as_deref(), Some("clear"));

        counter.add("rain".to_string());
        assert_eq!(counter.mode().as_deref(), Some("rain"));
        assert_eq!(counter.distribution().get("rain"), Some(&2));
    }

    #[test]
    fn test_mode_empty() {
        let counter: ModeCounter<String> = ModeCounter::new();
        assert!(counter.is_empty());
        assert_eq!(counter.mode(), None);
    }

    #[test]
    fn test_best_and_worst() {
        let periods = [(0, 20.0), (3600, 10.0), (7200, 30.0), (10800, 10.0)];
        assert_eq!(best_and_worst(&periods), (Some(3600), Some(7200)));
        assert_eq!(best_and_worst(&[]), (None, None));
    }
}
