use serde::{Deserialize, Serialize};
use std::fmt;

/// Name reserved for the record produced by the style audit.
/// A record carrying this name at the tail of a result list is the audit record.
pub const STYLE_AUDIT_NAME: &str = "Code Style";

/// Default display name for tests registered without one
pub const DEFAULT_TEST_NAME: &str = "Unnamed test";

/// Output appended when a failure carries no message
pub const NO_DESCRIPTION: &str = "No description provided.";

/// Marker written ahead of the failure message of a failed test
pub const TEST_FAILED_MARKER: &str = "TEST FAILED:\n";

/// Prefix for records synthesized from suite-level (setup/teardown) failures
pub const SUITE_INFO_PREFIX: &str = "INFO: ";

/// When a result becomes visible to students on the grading platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Always shown
    #[default]
    #[serde(rename = "visible")]
    Visible,
    /// Shown once grades are published
    #[serde(rename = "after_published")]
    AfterPublish,
    /// Shown once the due date has passed
    #[serde(rename = "after_due_date")]
    AfterDue,
    /// Never shown
    #[serde(rename = "hidden")]
    Hidden,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Visible => write!(f, "visible"),
            Visibility::AfterPublish => write!(f, "after_published"),
            Visibility::AfterDue => write!(f, "after_due_date"),
            Visibility::Hidden => write!(f, "hidden"),
        }
    }
}

/// Metadata an author declares for one test unit.
///
/// Supplied per test identifier through a [`crate::manifest::TestManifest`]
/// or inline by the test runner. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCaseMetadata {
    pub name: String,
    pub group: String,
    pub points: f64,
    pub visibility: Visibility,
}

impl Default for TestCaseMetadata {
    fn default() -> Self {
        Self {
            name: DEFAULT_TEST_NAME.to_string(),
            group: String::new(),
            points: 1.0,
            visibility: Visibility::Visible,
        }
    }
}

impl TestCaseMetadata {
    pub fn new(name: impl Into<String>, points: f64) -> Self {
        Self {
            name: name.into(),
            points,
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Point weights must be finite and non-negative
    pub fn has_valid_points(&self) -> bool {
        self.points.is_finite() && self.points >= 0.0
    }
}

/// One row of the grading report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Identifier of the test invocation, stable for the run
    pub key: String,
    pub name: String,
    pub group: String,
    /// Current weight; rescaled at collection time
    pub points: f64,
    /// Current earned value
    pub score: f64,
    pub visibility: Visibility,
    /// Text captured while the test executed, plus failure diagnostics
    pub output: String,
    pub passed: bool,
    /// Display position, assigned when results are collected
    pub ordinal: Option<u32>,
    /// Synthesized from a setup/teardown failure rather than a test
    #[serde(default)]
    pub suite_level: bool,
}

impl ResultRecord {
    /// Seed a record from declared metadata. The test is assumed to pass
    /// until a failure is observed, so it starts with full credit.
    pub fn from_metadata(key: impl Into<String>, metadata: &TestCaseMetadata) -> Self {
        let points = metadata.points.max(0.0);
        Self {
            key: key.into(),
            name: metadata.name.clone(),
            group: metadata.group.clone(),
            points,
            score: points,
            visibility: metadata.visibility,
            output: String::new(),
            passed: true,
            ordinal: None,
            suite_level: false,
        }
    }

    /// Zero-point informational record for a setup/teardown failure
    /// affecting a whole suite.
    pub fn suite_failure(key: impl Into<String>, suite: &str, message: Option<&str>) -> Self {
        let mut output = message.unwrap_or(NO_DESCRIPTION).to_string();
        output.push('\n');
        Self {
            key: key.into(),
            name: format!("{}{}", SUITE_INFO_PREFIX, suite),
            group: String::new(),
            points: 0.0,
            score: 0.0,
            visibility: Visibility::Visible,
            output,
            passed: false,
            ordinal: None,
            suite_level: true,
        }
    }

    /// Record produced by the style audit. Score is clamped into `[0, max_score]`.
    pub fn style_audit(max_score: f64, score: f64, output: impl Into<String>) -> Self {
        let points = max_score.max(0.0);
        Self {
            key: STYLE_AUDIT_NAME.to_string(),
            name: STYLE_AUDIT_NAME.to_string(),
            group: String::new(),
            points,
            score: score.clamp(0.0, points),
            visibility: Visibility::Visible,
            output: output.into(),
            passed: score >= points,
            ordinal: None,
            suite_level: false,
        }
    }

    pub fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Zero the score and attach the failure marker and message
    pub fn mark_failed(&mut self, message: Option<&str>) {
        self.score = 0.0;
        self.passed = false;
        self.output.push_str(TEST_FAILED_MARKER);
        self.output.push_str(message.unwrap_or(NO_DESCRIPTION));
        self.output.push('\n');
    }

    pub fn is_style_audit(&self) -> bool {
        self.name == STYLE_AUDIT_NAME
    }
}

/// Ordered test records plus at most one style-audit record, which always
/// renders last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    records: Vec<ResultRecord>,
    style_audit: Option<ResultRecord>,
}

impl ResultSet {
    /// Build a result set. An audit record that does not carry the reserved
    /// name is kept as an ordinary test result.
    pub fn new(mut records: Vec<ResultRecord>, style_audit: Option<ResultRecord>) -> Self {
        let style_audit = match style_audit {
            Some(record) if record.is_style_audit() => Some(record),
            Some(record) => {
                records.push(record);
                None
            }
            None => None,
        };
        Self { records, style_audit }
    }

    /// Split a flat list: the tail record is the audit record only when it
    /// carries the reserved name.
    pub fn from_records(mut records: Vec<ResultRecord>) -> Self {
        let style_audit = match records.last() {
            Some(last) if last.is_style_audit() => records.pop(),
            _ => None,
        };
        Self { records, style_audit }
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn style_audit(&self) -> Option<&ResultRecord> {
        self.style_audit.as_ref()
    }

    /// Test records in insertion order, then the audit record
    pub fn iter(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().chain(self.style_audit.iter())
    }

    pub fn len(&self) -> usize {
        self.records.len() + usize::from(self.style_audit.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn test_score(&self) -> f64 {
        self.records.iter().map(|r| r.score).sum()
    }

    pub fn test_points(&self) -> f64 {
        self.records.iter().map(|r| r.points).sum()
    }

    pub fn audit_score(&self) -> f64 {
        self.style_audit.as_ref().map_or(0.0, |r| r.score)
    }

    pub fn audit_points(&self) -> f64 {
        self.style_audit.as_ref().map_or(0.0, |r| r.points)
    }

    pub fn total_score(&self) -> f64 {
        self.test_score() + self.audit_score()
    }

    /// Whether every test record passed. The audit record does not count.
    pub fn all_passed(&self) -> bool {
        self.records.iter().all(|r| r.passed)
    }

    /// Every record that did not pass, suite-level records included
    pub fn failures(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().filter(|r| !r.passed)
    }

    /// Test records, excluding suite-level records
    pub fn tests(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().filter(|r| !r.suite_level)
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &ResultRecord> {
        self.tests().filter(|r| !r.passed)
    }

    pub fn suite_failures(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().filter(|r| r.suite_level)
    }
}
