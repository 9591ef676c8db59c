//! Vocareum grade file and failure report
//!
//! The grade file is what the platform parses for the score, so a failure to
//! write it fails the run. The report is advisory: write errors are logged
//! and the run continues.

use super::display::{render_display, DisplayOptions};
use super::{write_destination, ReportTotals, ResultFormatter};
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use std::io::Write;
use tally_common::config::Destination;
use tally_common::types::ResultSet;
use tracing::{error, info};

pub const ALL_PASS_MESSAGE: &str = "ALL TESTS PASS!!!\n";
pub const TEST_OUTPUT_HEADER: &str =
    "TESTS FAILED! SEE BELOW FOR REPORT\n==================================\n";
pub const TEST_OUTPUT_END: &str = "END OF TEST FAILURES\n";
pub const STYLE_OUTPUT_HEADER: &str = "\nCODE STYLE AUDIT\n================\n";

/// Machine-readable score lines
pub fn grade_summary(results: &ResultSet) -> String {
    format!(
        "Test Cases, {:.6}\nCode Style, {:.6}\n",
        results.test_score(),
        results.audit_score()
    )
}

/// Human-readable failure report. Exactly one of the all-pass banner and
/// the failure header appears.
pub fn failure_report(results: &ResultSet) -> String {
    let mut report = String::new();

    if results.all_passed() {
        report.push_str(ALL_PASS_MESSAGE);
    } else {
        report.push_str(TEST_OUTPUT_HEADER);
        for record in results.failures() {
            // Writing into a String cannot fail
            let _ = write!(
                report,
                "{}: {:.6}/{:.6}\n{}\n",
                record.name, record.score, record.points, record.output
            );
        }
        report.push_str(TEST_OUTPUT_END);
    }

    if let Some(audit) = results.style_audit() {
        report.push_str(STYLE_OUTPUT_HEADER);
        report.push_str(&audit.output);
    }

    report
}

#[derive(Debug, Clone)]
pub struct VocareumFormatter {
    grade_file: Option<Destination>,
    report_file: Option<Destination>,
    display: DisplayOptions,
}

impl VocareumFormatter {
    pub fn new(
        grade_file: Option<Destination>,
        report_file: Option<Destination>,
        display: DisplayOptions,
    ) -> Self {
        Self {
            grade_file,
            report_file,
            display,
        }
    }
}

impl ResultFormatter for VocareumFormatter {
    fn render_for_display(
        &self,
        results: &ResultSet,
        totals: &ReportTotals,
        out: &mut dyn Write,
    ) -> Result<()> {
        render_display(results, totals, self.display, out).context("Failed to write report")?;
        writeln!(out).context("Failed to write report")?;
        out.write_all(grade_summary(results).as_bytes())
            .context("Failed to write report")?;
        Ok(())
    }

    fn render_for_persistence(&self, results: &ResultSet, _totals: &ReportTotals) -> Result<()> {
        let grade_file = self
            .grade_file
            .as_ref()
            .ok_or_else(|| anyhow!("No grade file destination configured"))?;
        let report_file = self
            .report_file
            .as_ref()
            .ok_or_else(|| anyhow!("No report file destination configured"))?;

        // Both artifacts are rendered before anything is written
        let summary = grade_summary(results);
        let report = failure_report(results);

        write_destination(grade_file, &summary).context("Failed to write Vocareum grade file")?;
        info!(destination = %grade_file, "Vocareum grade file written");

        match write_destination(report_file, &report) {
            Ok(()) => info!(destination = %report_file, "Vocareum report written"),
            Err(e) => error!(
                destination = %report_file,
                error = %format!("{:#}", e),
                "Failed to write Vocareum report, continuing"
            ),
        }

        Ok(())
    }
}
