//! Test Engine Boundary
//!
//! **Core Responsibility:**
//! Define how an external test runner drives the listener, and provide the
//! production adapter that replays a runner's event stream.
//!
//! **Critical Architectural Boundary:**
//! - Engines know HOW tests were discovered and executed
//! - Engines do NOT know scoring rules
//! - Engines report events; the listener turns them into records
//! - Timeouts belong to the engine and surface as ordinary failures
//!
//! **Event stream format (JSON lines, `event` tag):**
//! ```text
//! {"event":"started","id":"math::adds"}
//! {"event":"output","id":"math::adds","text":"2 + 3 = 5\n"}
//! {"event":"failed","id":"math::adds","message":"expected 5 got 3"}
//! {"event":"failed","id":"math::Arithmetic","suite":"Arithmetic","message":"setup() threw"}
//! {"event":"finished","id":"math::adds"}
//! ```

use crate::capture::CaptureSink;
use crate::listener::{RunListener, TestFailure};
use anyhow::{bail, Context, Result};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tally_common::manifest::TestManifest;
use tally_common::text::unexpected_failure_message;
use tally_common::types::TestCaseMetadata;
use tracing::{debug, info, warn};

/// Counts of events an engine delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineSummary {
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
    pub suite_failures: usize,
}

/// An external test runner the grading session can drive
pub trait TestEngine: Send + Sync {
    /// Run (or replay) the suite, delivering every event to `listener`.
    /// Test code writes its standard output through `stdout`.
    fn run(&self, listener: &dyn RunListener, stdout: CaptureSink) -> Result<EngineSummary>;
}

/// One line of a runner's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    Started {
        id: String,
        #[serde(default)]
        metadata: Option<TestCaseMetadata>,
    },
    Output {
        id: String,
        text: String,
    },
    Failed {
        id: String,
        #[serde(default)]
        message: Option<String>,
        /// Present when the failure is in suite setup/teardown
        #[serde(default)]
        suite: Option<String>,
    },
    Finished {
        id: String,
    },
}

/// Where the event stream is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Stdin,
    File(PathBuf),
}

/// Replays a recorded event stream into the listener.
///
/// Metadata comes from the `started` event when the runner supplies it,
/// otherwise from the manifest; identifiers in neither are untagged.
/// Output is routed by the test id on each `output` event, so interleaved
/// tests keep their own text. Tests still open when the log ends are
/// failed and finished.
pub struct EventLogEngine {
    source: EventSource,
    manifest: TestManifest,
}

impl EventLogEngine {
    pub fn new(source: EventSource, manifest: TestManifest) -> Self {
        Self { source, manifest }
    }

    pub fn from_path(path: &Path, manifest: TestManifest) -> Self {
        Self::new(EventSource::File(path.to_path_buf()), manifest)
    }

    fn open(&self) -> Result<Box<dyn BufRead>> {
        match &self.source {
            EventSource::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            EventSource::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open event log {}", path.display()))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    /// Replay events from any reader
    pub fn replay(
        &self,
        reader: impl BufRead,
        listener: &dyn RunListener,
        stdout: CaptureSink,
    ) -> Result<EngineSummary> {
        let mut summary = EngineSummary::default();
        let mut open = IndexSet::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.with_context(|| format!("Failed to read event log line {}", line_no))?;
            if line.trim().is_empty() {
                continue;
            }

            let event: TestEvent = serde_json::from_str(&line)
                .with_context(|| format!("Malformed event on line {}", line_no))?;

            match event {
                TestEvent::Started { id, metadata } => {
                    if let Some(meta) = metadata.as_ref().filter(|m| !m.has_valid_points()) {
                        bail!(
                            "Invalid metadata for '{}' on line {}: points {}",
                            id,
                            line_no,
                            meta.points
                        );
                    }
                    let metadata = metadata.as_ref().or_else(|| self.manifest.get(&id));
                    listener.test_started(&id, metadata);
                    open.insert(id);
                    summary.started += 1;
                }
                TestEvent::Output { id, text } => {
                    if let Err(e) = stdout.write_for(&id, text.as_bytes()) {
                        warn!(key = %id, error = %e, "Failed to write test output");
                    }
                }
                TestEvent::Failed { id, message, suite } => {
                    let failure = match suite {
                        Some(suite) => {
                            summary.suite_failures += 1;
                            TestFailure::suite(id, suite, message)
                        }
                        None => {
                            summary.failed += 1;
                            TestFailure::test(id, message)
                        }
                    };
                    listener.test_failed(&failure);
                }
                TestEvent::Finished { id } => {
                    listener
                        .test_finished(&id)
                        .with_context(|| format!("Event log line {} finishes '{}'", line_no, id))?;
                    open.shift_remove(&id);
                    summary.finished += 1;
                }
            }
        }

        if !open.is_empty() {
            warn!(
                unfinished = open.len(),
                started = summary.started,
                finished = summary.finished,
                "Event log ended with unfinished tests"
            );
        }
        // Innermost first, so each capture closes on top of the stack
        for id in open.into_iter().rev() {
            listener.test_failed(&TestFailure::test(
                id.clone(),
                Some(unexpected_failure_message(&id)),
            ));
            listener
                .test_finished(&id)
                .with_context(|| format!("Failed to close unfinished test '{}'", id))?;
            summary.failed += 1;
            summary.finished += 1;
        }

        Ok(summary)
    }
}

impl TestEngine for EventLogEngine {
    fn run(&self, listener: &dyn RunListener, stdout: CaptureSink) -> Result<EngineSummary> {
        info!(source = ?self.source, manifest_entries = self.manifest.len(), "Replaying test events");
        let reader = self.open()?;
        let summary = self.replay(reader, listener, stdout)?;
        debug!(?summary, "Event replay complete");
        Ok(summary)
    }
}
