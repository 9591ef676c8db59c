//! Score Scaler - Proportional Normalization of Point Weights
//!
//! **Core Responsibility:**
//! Rescale raw, author-declared point weights so they add up to the
//! session's declared maximum score.
//!
//! **Scaling Rules:**
//! - ratio = target_max / sum(points)
//! - ratio = 0 when sum(points) == 0 (every scaled value becomes 0)
//! - points and score of every record are multiplied by the same ratio
//! - order and count of records are unchanged
//! - weights whose sum overflows are first divided by the largest weight
//!
//! **Properties:**
//! - sum(scaled points) == target_max whenever the raw sum is nonzero
//! - score/points of every record is unchanged
//! - scaling an already-scaled set to the same target is a no-op

use tally_common::types::ResultRecord;
use tracing::{debug, warn};

pub fn total_points(records: &[ResultRecord]) -> f64 {
    records.iter().map(|r| r.points).sum()
}

pub fn total_score(records: &[ResultRecord]) -> f64 {
    records.iter().map(|r| r.score).sum()
}

/// Ratio that maps `raw_total` onto `target_max`
pub fn scale_ratio(raw_total: f64, target_max: f64) -> f64 {
    if raw_total == 0.0 {
        0.0
    } else {
        target_max / raw_total
    }
}

/// Weight every record is divided by before summing. Finite weights whose
/// sum overflows are expressed in units of the largest one.
fn weight_unit(records: &[ResultRecord], raw_total: f64) -> f64 {
    if raw_total.is_finite() {
        1.0
    } else {
        records.iter().map(|r| r.points).fold(0.0, f64::max)
    }
}

/// Return a copy of `records` rescaled so their points sum to `target_max`
pub fn scale(records: &[ResultRecord], target_max: f64) -> Vec<ResultRecord> {
    let mut raw_total = total_points(records);
    let unit = weight_unit(records, raw_total);
    if unit != 1.0 {
        warn!(unit, "Point weights overflow when summed, rescaling by largest weight");
        raw_total = records.iter().map(|r| r.points / unit).sum();
    }
    let ratio = scale_ratio(raw_total, target_max);

    debug!(
        records = records.len(),
        raw_total,
        target_max,
        ratio,
        "Scaling test records"
    );

    records
        .iter()
        .map(|record| ResultRecord {
            points: record.points / unit * ratio,
            score: record.score / unit * ratio,
            ..record.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tally_common::types::TestCaseMetadata;

    const TOLERANCE: f64 = 1e-9;

    /// Helper to create a record with raw weight and earned score
    fn make_record(key: &str, points: f64, score: f64) -> ResultRecord {
        let mut record = ResultRecord::from_metadata(key, &TestCaseMetadata::new(key, points));
        record.score = score;
        record
    }

    #[test]
    fn test_scale_even_weights() {
        let records: Vec<_> = (0..4)
            .map(|i| make_record(&i.to_string(), 5.0, 5.0))
            .collect();

        let scaled = scale(&records, 100.0);

        assert!(scaled.iter().all(|r| r.points == 25.0 && r.score == 25.0));
        assert_eq!(total_points(&scaled), 100.0);
    }

    #[test]
    fn test_scale_repeating_remainder() {
        let records: Vec<_> = (0..3)
            .map(|i| make_record(&i.to_string(), 1.0, 1.0))
            .collect();

        let scaled = scale(&records, 100.0);

        assert!((total_points(&scaled) - 100.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_scale_mixed_outcomes() {
        let records = vec![
            make_record("t1", 2.0, 2.0),
            make_record("t2", 2.0, 0.0),
            make_record("t3", 1.0, 1.0),
        ];

        let scaled = scale(&records, 100.0);

        assert_eq!(scaled[0].points, 40.0);
        assert_eq!(scaled[0].score, 40.0);
        assert_eq!(scaled[1].points, 40.0);
        assert_eq!(scaled[1].score, 0.0);
        assert_eq!(scaled[2].points, 20.0);
        assert_eq!(scaled[2].score, 20.0);
        assert_eq!(total_points(&scaled), 100.0);
        assert_eq!(total_score(&scaled), 60.0);
    }

    #[test]
    fn test_scale_zero_total() {
        let records = vec![make_record("a", 0.0, 0.0), make_record("b", 0.0, 0.0)];

        let scaled = scale(&records, 100.0);

        assert!(scaled.iter().all(|r| r.points == 0.0 && r.score == 0.0));
    }

    #[test]
    fn test_scale_empty() {
        assert!(scale(&[], 100.0).is_empty());
    }

    #[test]
    fn test_scale_preserves_order_and_keys() {
        let records = vec![
            make_record("z", 3.0, 3.0),
            make_record("a", 1.0, 0.0),
            make_record("m", 2.0, 2.0),
        ];

        let scaled = scale(&records, 60.0);
        let keys: Vec<_> = scaled.iter().map(|r| r.key.as_str()).collect();

        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(scaled[1].output, records[1].output);
    }

    #[test]
    fn test_scale_to_zero_target() {
        let records = vec![make_record("a", 3.0, 3.0)];
        let scaled = scale(&records, 0.0);
        assert_eq!(scaled[0].points, 0.0);
        assert_eq!(scaled[0].score, 0.0);
    }

    #[test]
    fn test_scale_overflowing_weights() {
        let records = vec![make_record("a", 1e308, 1e308), make_record("b", 1e308, 0.0)];
        assert!(total_points(&records).is_infinite());

        let scaled = scale(&records, 100.0);

        assert_eq!(scaled[0].points, 50.0);
        assert_eq!(scaled[0].score, 50.0);
        assert_eq!(scaled[1].points, 50.0);
        assert_eq!(scaled[1].score, 0.0);
        assert_eq!(total_points(&scaled), 100.0);
    }

    fn weights() -> impl Strategy<Value = Vec<(f64, bool)>> {
        prop::collection::vec((0.0f64..1000.0, any::<bool>()), 1..32)
    }

    proptest! {
        #[test]
        fn scaled_points_sum_to_target(raw in weights(), target in 0.0f64..1000.0) {
            let records: Vec<_> = raw
                .iter()
                .enumerate()
                .map(|(i, &(points, passed))| {
                    make_record(&i.to_string(), points, if passed { points } else { 0.0 })
                })
                .collect();
            prop_assume!(total_points(&records) > 1e-6);

            let scaled = scale(&records, target);

            prop_assert_eq!(scaled.len(), records.len());
            prop_assert!((total_points(&scaled) - target).abs() < TOLERANCE * target.max(1.0));
            for (before, after) in records.iter().zip(&scaled) {
                prop_assert!(after.score <= after.points + TOLERANCE);
                if before.points > 0.0 && after.points > 0.0 {
                    let ratio_before = before.score / before.points;
                    let ratio_after = after.score / after.points;
                    prop_assert!((ratio_before - ratio_after).abs() < TOLERANCE);
                }
            }
        }

        #[test]
        fn rescaling_to_same_target_is_noop(raw in weights(), target in 1.0f64..1000.0) {
            let records: Vec<_> = raw
                .iter()
                .enumerate()
                .map(|(i, &(points, _))| make_record(&i.to_string(), points, points))
                .collect();
            prop_assume!(total_points(&records) > 1e-6);

            let once = scale(&records, target);
            let twice = scale(&once, target);

            for (a, b) in once.iter().zip(&twice) {
                prop_assert!((a.points - b.points).abs() < TOLERANCE * target);
            }
        }
    }
}
