//! Result Formatters - Rendering the Final Report per Platform
//!
//! **Core Responsibility:**
//! Take the finalized [`ResultSet`] and the session totals and render them
//! either for a human reading the console or for a grading platform to
//! ingest.
//!
//! **Variants:**
//! - Gradescope: one JSON document
//! - Vocareum: a machine-readable grade file plus a failure report
//!
//! Selection is an explicit enum, dispatched through [`ResultFormatter`].

mod display;
mod gradescope;
mod vocareum;

pub use display::{render_display, summary_lines, DisplayOptions, ALL_PASSED_MESSAGE};
pub use gradescope::{render_document, GradescopeFormatter};
pub use vocareum::{
    failure_report, grade_summary, VocareumFormatter, ALL_PASS_MESSAGE, STYLE_OUTPUT_HEADER,
    TEST_OUTPUT_END, TEST_OUTPUT_HEADER,
};

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::time::Duration;
use tally_common::config::{Destination, GradingConfig, Platform};
use tally_common::types::ResultSet;

/// Session totals computed once and shared by every renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportTotals {
    pub score: f64,
    pub max_score: f64,
    pub execution_time: Duration,
}

impl ReportTotals {
    /// Totals of `results` against the declared test maximum plus the audit maximum
    pub fn from_results(results: &ResultSet, test_max: f64, execution_time: Duration) -> Self {
        Self {
            score: results.total_score(),
            max_score: test_max + results.audit_points(),
            execution_time,
        }
    }
}

pub trait ResultFormatter {
    /// Human-facing rendering: per-record pass/fail, failure output and a summary
    fn render_for_display(
        &self,
        results: &ResultSet,
        totals: &ReportTotals,
        out: &mut dyn Write,
    ) -> Result<()>;

    /// Platform-facing rendering written to the configured destinations
    fn render_for_persistence(&self, results: &ResultSet, totals: &ReportTotals) -> Result<()>;
}

/// Formatter selected by platform
#[derive(Debug, Clone)]
pub enum PlatformFormatter {
    Gradescope(GradescopeFormatter),
    Vocareum(VocareumFormatter),
}

impl PlatformFormatter {
    pub fn for_config(config: &GradingConfig) -> Self {
        let display = DisplayOptions {
            show_passing_output: config.show_passing_output(),
        };
        match config.platform() {
            Platform::Gradescope => PlatformFormatter::Gradescope(GradescopeFormatter::new(
                config.results_file().clone(),
                display,
            )),
            Platform::Vocareum => PlatformFormatter::Vocareum(VocareumFormatter::new(
                config.grade_file().cloned(),
                config.report_file().cloned(),
                display,
            )),
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformFormatter::Gradescope(_) => Platform::Gradescope,
            PlatformFormatter::Vocareum(_) => Platform::Vocareum,
        }
    }
}

impl ResultFormatter for PlatformFormatter {
    fn render_for_display(
        &self,
        results: &ResultSet,
        totals: &ReportTotals,
        out: &mut dyn Write,
    ) -> Result<()> {
        match self {
            PlatformFormatter::Gradescope(f) => f.render_for_display(results, totals, out),
            PlatformFormatter::Vocareum(f) => f.render_for_display(results, totals, out),
        }
    }

    fn render_for_persistence(&self, results: &ResultSet, totals: &ReportTotals) -> Result<()> {
        match self {
            PlatformFormatter::Gradescope(f) => f.render_for_persistence(results, totals),
            PlatformFormatter::Vocareum(f) => f.render_for_persistence(results, totals),
        }
    }
}

/// Write a fully rendered artifact in one go
pub(crate) fn write_destination(destination: &Destination, content: &str) -> Result<()> {
    match destination {
        Destination::Stdout => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .and_then(|_| stdout.flush())
                .context("Failed to write report to stdout")?;
        }
        Destination::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }
    Ok(())
}
