use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

/// Scores are held at four decimal places so range queries behave the same
/// way against both backing stores.
const SCORE_SCALE: f64 = 10_000.0;

fn scaled(value: f64) -> i64 {
    (value * SCORE_SCALE).round() as i64
}

/// In-process sorted-set index used by the embedded command layer.
///
/// Members are ordered by scaled score, ties broken by a fresh UUID per
/// insert so equal scores remain distinct members. The index lives outside
/// the transactional substrate and is not durable; metric data is
/// session-scoped so nothing is lost that a restart would need.
#[derive(Default)]
pub(crate) struct SortedSetIndex {
    sets: HashMap<String, BTreeMap<(i64, Uuid), f64>>,
}

impl SortedSetIndex {
    pub(crate) fn add(&mut self, key: &str, score: f64) {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert((scaled(score), Uuid::new_v4()), score);
    }

    /// `None` when the set itself is absent, `Some(0.0)` when it exists but
    /// is empty.
    pub(crate) fn min(&self, key: &str) -> Option<f64> {
        let set = self.sets.get(key)?;
        Some(set.values().next().copied().unwrap_or(0.0))
    }

    pub(crate) fn max(&self, key: &str) -> f64 {
        self.sets
            .get(key)
            .and_then(|set| set.values().next_back().copied())
            .unwrap_or(0.0)
    }

    pub(crate) fn median(&self, key: &str) -> f64 {
        match self.sets.get(key) {
            Some(set) if !set.is_empty() => {
                set.values().nth(set.len() / 2).copied().unwrap_or(0.0)
            }
            _ => 0.0,
        }
    }

    pub(crate) fn cardinality(&self, key: &str) -> i64 {
        self.sets.get(key).map_or(0, |set| set.len() as i64)
    }

    /// Members with `min <= score <= max` at the stored precision. Negative
    /// bounds widen to infinity on their side.
    pub(crate) fn range_count(&self, key: &str, min: f64, max: f64) -> i64 {
        let Some(set) = self.sets.get(key) else {
            return 0;
        };

        let low = if min < 0.0 { i64::MIN } else { scaled(min) };
        let high = if max < 0.0 { i64::MAX } else { scaled(max) };

        if low > high {
            return 0;
        }

        set.range((low, Uuid::nil())..=(high, Uuid::max())).count() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(values: &[f64]) -> SortedSetIndex {
        let mut index = SortedSetIndex::default();
        for value in values {
            index.add("lat", *value);
        }
        index
    }

    #[test]
    fn min_is_none_for_absent_set() {
        let index = SortedSetIndex::default();
        assert!(index.min("lat").is_none());
        assert_eq!(index.max("lat"), 0.0);
        assert_eq!(index.cardinality("lat"), 0);
    }

    #[test]
    fn orders_by_score() {
        let index = index_with(&[4.56, 1.23, 7.89]);
        assert_eq!(index.min("lat"), Some(1.23));
        assert_eq!(index.max("lat"), 7.89);
        assert_eq!(index.cardinality("lat"), 3);
    }

    #[test]
    fn median_is_the_upper_median() {
        assert_eq!(index_with(&[1.23, 4.56, 7.89]).median("lat"), 4.56);
        assert_eq!(index_with(&[1.23, 4.56, 7.89, 10.12]).median("lat"), 7.89);
    }

    #[test]
    fn equal_scores_are_distinct_members() {
        let index = index_with(&[2.0, 2.0, 2.0]);
        assert_eq!(index.cardinality("lat"), 3);
    }

    #[test]
    fn negative_bounds_widen_to_infinity() {
        let index = index_with(&[1.23, 4.56, 7.89]);
        assert_eq!(index.range_count("lat", 2.0, -1.0), 2);
        assert_eq!(index.range_count("lat", -1.0, 2.0), 1);
        assert_eq!(index.range_count("lat", -1.0, -1.0), 3);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let index = index_with(&[1.0, 2.0, 3.0]);
        assert_eq!(index.range_count("lat", 1.0, 3.0), 3);
        assert_eq!(index.range_count("lat", 2.0, 2.0), 1);
    }
}
