//! Execution Listener - Bridge from Test Events to Result Records
//!
//! **Core Responsibility:**
//! Subscribe to the three events a test engine emits (started, finished,
//! failed), keep one [`ResultRecord`] per graded test, and isolate each
//! test's output while it runs.
//!
//! **Per-key lifecycle:**
//! NotStarted -> Started -> Finished, with a Failed flag that can be raised
//! any time after Started.
//!
//! **Grading Rules:**
//! - Tests with metadata start with full credit and lose it on failure
//! - Tests without metadata are untagged: output is captured and discarded,
//!   failures are dropped from the report
//! - Suite-level (setup/teardown) failures become zero-point, always-visible
//!   informational records and never skew scoring
//!
//! **Concurrency:**
//! Events for different keys may arrive from different threads. The record
//! store is a mutex-guarded, insertion-ordered map; every hook holds the lock
//! only for a short, non-blocking critical section. The shared output sink is
//! the one resource this listener cannot partition (see [`crate::capture`]).

use crate::capture::OutputCapture;
use crate::error::CaptureError;
use crate::scaler;
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tally_common::text::normalize_line_endings;
use tally_common::types::{ResultRecord, TestCaseMetadata};
use tracing::{debug, info, warn};

/// Whether a failure belongs to one test or to the suite around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    Test,
    /// Setup or teardown failure affecting every test in the named suite
    Suite { name: String },
}

/// Failure event delivered by the test engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub key: String,
    pub message: Option<String>,
    pub scope: FailureScope,
}

impl TestFailure {
    pub fn test(key: impl Into<String>, message: Option<String>) -> Self {
        Self {
            key: key.into(),
            message,
            scope: FailureScope::Test,
        }
    }

    pub fn suite(key: impl Into<String>, suite: impl Into<String>, message: Option<String>) -> Self {
        Self {
            key: key.into(),
            message,
            scope: FailureScope::Suite { name: suite.into() },
        }
    }

    pub fn is_suite_level(&self) -> bool {
        matches!(self.scope, FailureScope::Suite { .. })
    }
}

/// The three hooks a test engine drives
pub trait RunListener: Send + Sync {
    fn test_started(&self, key: &str, metadata: Option<&TestCaseMetadata>);

    /// Fails when `key` was never started; engines treat that as fatal
    fn test_finished(&self, key: &str) -> Result<(), CaptureError>;

    fn test_failed(&self, failure: &TestFailure);
}

/// Thread-safe collector of graded results for one run
#[derive(Debug)]
pub struct ExecutionListener {
    records: Mutex<IndexMap<String, ResultRecord>>,
    capture: OutputCapture,
}

impl ExecutionListener {
    pub fn new(capture: OutputCapture) -> Self {
        Self {
            records: Mutex::new(IndexMap::new()),
            capture,
        }
    }

    fn records(&self) -> MutexGuard<'_, IndexMap<String, ResultRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capture(&self) -> &OutputCapture {
        &self.capture
    }

    pub fn record_count(&self) -> usize {
        self.records().len()
    }

    /// Snapshot of one record, unscaled until results are collected
    pub fn record(&self, key: &str) -> Option<ResultRecord> {
        self.records().get(key).cloned()
    }

    /// Number the records in insertion order, scale them to `target_max`
    /// and return the scaled copies.
    ///
    /// Meant to be called once after every event has been delivered. The
    /// scaled values are kept, so a second call rescales already-scaled data.
    pub fn collect_results(&self, target_max: f64) -> Vec<ResultRecord> {
        let mut records = self.records();
        for (idx, record) in records.values_mut().enumerate() {
            record.ordinal = Some(idx as u32 + 1);
        }

        let snapshot: Vec<ResultRecord> = records.values().cloned().collect();
        let scaled = scaler::scale(&snapshot, target_max);

        for record in &scaled {
            if let Some(stored) = records.get_mut(&record.key) {
                stored.points = record.points;
                stored.score = record.score;
            }
        }

        info!(
            records = scaled.len(),
            failed = scaled.iter().filter(|r| !r.passed).count(),
            score = scaler::total_score(&scaled),
            max_score = target_max,
            "Collected test results"
        );

        scaled
    }

    /// Restore normal output routing after the engine failed mid-run.
    /// Returns the number of captures that were still open.
    pub fn abort(&self) -> usize {
        let open = self.capture.release_all();
        if open > 0 {
            warn!(open_captures = open, "Run aborted with captures still open");
        }
        open
    }
}

impl RunListener for ExecutionListener {
    fn test_started(&self, key: &str, metadata: Option<&TestCaseMetadata>) {
        if let Some(metadata) = metadata {
            let record = ResultRecord::from_metadata(key, metadata);
            debug!(key = %key, name = %record.name, points = record.points, "Graded test started");
            self.records().insert(key.to_string(), record);
        } else {
            debug!(key = %key, "Untagged test started");
        }

        // Untagged tests still get their output isolated
        self.capture.begin(key);
    }

    fn test_finished(&self, key: &str) -> Result<(), CaptureError> {
        let output = self.capture.end(key)?;

        match self.records().get_mut(key) {
            Some(record) => {
                record.append_output(&normalize_line_endings(&output));
                debug!(key = %key, passed = record.passed, output_bytes = output.len(), "Graded test finished");
            }
            None => {
                debug!(key = %key, discarded_bytes = output.len(), "Untagged test finished");
            }
        }

        Ok(())
    }

    fn test_failed(&self, failure: &TestFailure) {
        let key = failure.key.as_str();
        match &failure.scope {
            FailureScope::Suite { name } => {
                info!(key = %key, suite = %name, "Suite-level failure recorded");
                let record = ResultRecord::suite_failure(key, name, failure.message.as_deref());
                self.records().insert(key.to_string(), record);
            }
            FailureScope::Test => match self.records().get_mut(key) {
                Some(record) => {
                    record.mark_failed(failure.message.as_deref());
                    info!(key = %key, name = %record.name, "Test failed");
                }
                None => {
                    debug!(key = %key, "Failure of untagged test dropped");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SharedBuffer;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;
    use tally_common::types::Visibility;

    fn make_listener() -> (ExecutionListener, SharedBuffer) {
        let passthrough = SharedBuffer::default();
        let capture = OutputCapture::with_passthrough(Box::new(passthrough.clone()));
        (ExecutionListener::new(capture), passthrough)
    }

    fn meta(name: &str, points: f64) -> TestCaseMetadata {
        TestCaseMetadata::new(name, points)
    }

    #[test]
    fn test_captured_line_endings_normalized() {
        let (listener, _) = make_listener();
        let mut out = listener.capture().sink();

        listener.test_started("crlf", Some(&meta("CRLF", 1.0)));
        write!(out, "a\r\nb\r\n").unwrap();
        listener.test_finished("crlf").unwrap();

        assert_eq!(listener.record("crlf").unwrap().output, "a\nb\n");
    }

    #[test]
    fn test_passing_test_keeps_full_credit() {
        let (listener, _) = make_listener();
        let mut out = listener.capture().sink();

        listener.test_started("adds", Some(&meta("Adds", 3.0)));
        write!(out, "computing\n").unwrap();
        listener.test_finished("adds").unwrap();

        let record = listener.record("adds").unwrap();
        assert_eq!(record.score, record.points);
        assert!(record.passed);
        assert_eq!(record.output, "computing\n");
    }

    #[test]
    fn test_failed_test_loses_credit() {
        let (listener, _) = make_listener();

        listener.test_started("adds", Some(&meta("Adds", 3.0)));
        listener.test_failed(&TestFailure::test("adds", Some("expected 5 got 3".to_string())));
        listener.test_finished("adds").unwrap();

        let record = listener.record("adds").unwrap();
        assert_eq!(record.score, 0.0);
        assert!(!record.passed);
        assert!(record.output.contains("TEST FAILED:"));
        assert!(record.output.contains("expected 5 got 3"));
    }

    #[test]
    fn test_failure_without_message_uses_fallback() {
        let (listener, _) = make_listener();

        listener.test_started("a", Some(&meta("A", 1.0)));
        listener.test_failed(&TestFailure::test("a", None));
        listener.test_finished("a").unwrap();

        let record = listener.record("a").unwrap();
        assert!(record.output.contains("No description provided."));
    }

    #[test]
    fn test_captured_output_precedes_failure_marker() {
        let (listener, _) = make_listener();
        let mut out = listener.capture().sink();

        listener.test_started("a", Some(&meta("A", 1.0)));
        write!(out, "partial\n").unwrap();
        listener.test_failed(&TestFailure::test("a", Some("boom".to_string())));
        listener.test_finished("a").unwrap();

        // The failure arrives before the finish, so its marker is appended first
        assert_eq!(listener.record("a").unwrap().output, "TEST FAILED:\nboom\npartial\n");
    }

    #[test]
    fn test_suite_failure_synthesizes_record() {
        let (listener, _) = make_listener();

        listener.test_failed(&TestFailure::suite(
            "ArithmeticTests",
            "ArithmeticTests",
            Some("setup() threw".to_string()),
        ));

        let record = listener.record("ArithmeticTests").unwrap();
        assert!(record.name.contains("ArithmeticTests"));
        assert_eq!(record.points, 0.0);
        assert_eq!(record.visibility, Visibility::Visible);
        assert!(record.output.contains("setup() threw"));
    }

    #[test]
    fn test_untagged_test_is_not_graded() {
        let (listener, passthrough) = make_listener();
        let mut out = listener.capture().sink();

        listener.test_started("helper", None);
        write!(out, "noise").unwrap();
        listener.test_failed(&TestFailure::test("helper", Some("ignored".to_string())));
        listener.test_finished("helper").unwrap();

        assert_eq!(listener.record_count(), 0);
        assert!(passthrough.contents().is_empty());
    }

    #[test]
    fn test_finish_without_start_fails_fast() {
        let (listener, _) = make_listener();
        assert!(matches!(
            listener.test_finished("ghost"),
            Err(CaptureError::NotStarted { .. })
        ));
    }

    #[test]
    fn test_collect_scales_mixed_run() {
        let (listener, _) = make_listener();

        for (key, points) in [("t1", 2.0), ("t2", 2.0), ("t3", 1.0)] {
            listener.test_started(key, Some(&meta(key, points)));
            if key == "t2" {
                listener.test_failed(&TestFailure::test(key, Some("wrong".to_string())));
            }
            listener.test_finished(key).unwrap();
        }

        let results = listener.collect_results(100.0);

        let summary: Vec<_> = results
            .iter()
            .map(|r| (r.key.as_str(), r.points, r.score, r.ordinal))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("t1", 40.0, 40.0, Some(1)),
                ("t2", 40.0, 0.0, Some(2)),
                ("t3", 20.0, 20.0, Some(3)),
            ]
        );
        assert_eq!(scaler::total_points(&results), 100.0);
    }

    #[test]
    fn test_collect_twice_with_same_target_is_stable() {
        let (listener, _) = make_listener();
        listener.test_started("a", Some(&meta("A", 1.0)));
        listener.test_finished("a").unwrap();
        listener.test_started("b", Some(&meta("B", 3.0)));
        listener.test_finished("b").unwrap();

        let first = listener.collect_results(100.0);
        let second = listener.collect_results(100.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_suite_record_does_not_skew_scaling() {
        let (listener, _) = make_listener();
        listener.test_started("a", Some(&meta("A", 1.0)));
        listener.test_finished("a").unwrap();
        listener.test_failed(&TestFailure::suite("S", "S", Some("teardown".to_string())));

        let results = listener.collect_results(50.0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].points, 50.0);
        assert_eq!(results[1].points, 0.0);
    }

    #[test]
    fn test_abort_releases_open_captures() {
        let (listener, passthrough) = make_listener();
        let mut out = listener.capture().sink();

        listener.test_started("a", Some(&meta("A", 1.0)));
        listener.test_started("b", None);
        assert_eq!(listener.abort(), 2);

        write!(out, "restored").unwrap();
        assert_eq!(passthrough.contents(), "restored");
    }

    #[test]
    fn test_concurrent_events_for_distinct_keys() {
        let (listener, _) = make_listener();
        let listener = Arc::new(listener);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let listener = Arc::clone(&listener);
                thread::spawn(move || {
                    let key = format!("t{}", i);
                    let _gate = listener.capture().exclusive();
                    listener.test_started(&key, Some(&meta(&key, 1.0)));
                    write!(listener.capture().sink(), "out-{}", i).unwrap();
                    if i % 2 == 1 {
                        listener.test_failed(&TestFailure::test(&key, None));
                    }
                    listener.test_finished(&key).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(listener.record_count(), 16);
        let results = listener.collect_results(160.0);
        for record in &results {
            let i: usize = record.key[1..].parse().unwrap();
            assert!(record.output.contains(&format!("out-{}", i)));
            assert_eq!(record.passed, i % 2 == 0);
            assert_eq!(record.points, 10.0);
        }
        assert_eq!(scaler::total_score(&results), 80.0);
    }
}
