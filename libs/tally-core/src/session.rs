//! Grading Session - One End-to-End Grading Run
//!
//! **Core Responsibility:**
//! Drive the test engine against a fresh [`ExecutionListener`], collect and
//! scale the results, attach the optional style audit and hand the final
//! report to the platform formatter.
//!
//! **Flow:**
//! 1. Engine runs on a blocking task; every event lands in the listener
//! 2. Engine failure releases any open capture and ends the run
//! 3. Test records are scaled to the configured maximum
//! 4. The style audit is graded independently and attached last
//! 5. Totals are computed once and shared by every renderer

use crate::capture::OutputCapture;
use crate::engine::{EngineSummary, TestEngine};
use crate::error::{CaptureError, GradingError};
use crate::formatter::{PlatformFormatter, ReportTotals, ResultFormatter};
use crate::listener::ExecutionListener;
use crate::style::{grade_style, StyleChecker};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_common::config::{AuditSettings, GradingConfig};
use tally_common::types::ResultSet;
use tracing::{error, info};
use uuid::Uuid;

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub execution_time: Duration,
    pub engine: EngineSummary,
    pub results: ResultSet,
    pub totals: ReportTotals,
}

struct StyleAudit {
    checker: Arc<dyn StyleChecker>,
    settings: AuditSettings,
}

pub struct GradingSession {
    config: GradingConfig,
    engine: Arc<dyn TestEngine>,
    capture: OutputCapture,
    style: Option<StyleAudit>,
}

impl GradingSession {
    pub fn new(config: GradingConfig, engine: Arc<dyn TestEngine>) -> Self {
        Self {
            config,
            engine,
            capture: OutputCapture::new(),
            style: None,
        }
    }

    /// Route uncaptured output somewhere other than process stdout
    pub fn with_capture(mut self, capture: OutputCapture) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_style_audit(mut self, checker: Arc<dyn StyleChecker>, settings: AuditSettings) -> Self {
        self.style = Some(StyleAudit { checker, settings });
        self
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<SessionReport, GradingError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            run_id = %run_id,
            platform = %self.config.platform(),
            max_score = self.config.max_score(),
            style_audit = self.style.is_some(),
            "Starting grading session"
        );

        let listener = Arc::new(ExecutionListener::new(self.capture.clone()));
        let engine = Arc::clone(&self.engine);
        let task_listener = Arc::clone(&listener);

        let outcome = tokio::task::spawn_blocking(move || {
            let sink = task_listener.capture().sink();
            engine.run(task_listener.as_ref(), sink)
        })
        .await;

        let engine_summary = match outcome {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                listener.abort();
                error!(run_id = %run_id, error = %format!("{:#}", e), "Test engine failed");
                return Err(match e.downcast_ref::<CaptureError>() {
                    Some(capture_err) => GradingError::Capture(capture_err.clone()),
                    None => GradingError::Engine(e),
                });
            }
            Err(join_err) => {
                listener.abort();
                error!(run_id = %run_id, error = %join_err, "Test engine task did not complete");
                return Err(GradingError::EngineTask(join_err.to_string()));
            }
        };

        let records = listener.collect_results(self.config.max_score());

        let audit = match &self.style {
            Some(style) => Some(grade_style(style.checker.as_ref(), &style.settings).await),
            None => None,
        };

        let results = ResultSet::new(records, audit);
        let execution_time = start.elapsed();
        let totals = ReportTotals::from_results(&results, self.config.max_score(), execution_time);

        info!(
            run_id = %run_id,
            tests = results.tests().count(),
            failed = results.failed_tests().count(),
            suite_failures = results.suite_failures().count(),
            score = totals.score,
            max_score = totals.max_score,
            execution_ms = execution_time.as_millis() as u64,
            "Grading session complete"
        );

        Ok(SessionReport {
            run_id,
            started_at,
            execution_time,
            engine: engine_summary,
            results,
            totals,
        })
    }

    /// Render the report for the configured platform: persisted artifacts
    /// when `persist` is set, the console view on `out` otherwise.
    pub fn publish(&self, report: &SessionReport, out: &mut dyn Write) -> Result<()> {
        let formatter = PlatformFormatter::for_config(&self.config);
        if self.config.persist() {
            formatter.render_for_persistence(&report.results, &report.totals)
        } else {
            formatter.render_for_display(&report.results, &report.totals, out)
        }
    }
}
