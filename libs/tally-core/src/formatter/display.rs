//! Human-readable console report shared by every platform

use super::ReportTotals;
use std::io::{self, Write};
use tally_common::types::{ResultRecord, ResultSet};

pub const ALL_PASSED_MESSAGE: &str = "All tests passed!";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Also print captured output of passing tests
    pub show_passing_output: bool,
}

/// Closing verdict lines. Suite-level records are reported on their own
/// line and never counted as failed tests.
pub fn summary_lines(results: &ResultSet) -> Vec<String> {
    let failed = results.failed_tests().count();
    let mut lines = vec![if failed == 0 {
        ALL_PASSED_MESSAGE.to_string()
    } else {
        format!("{} of {} tests failed.", failed, results.tests().count())
    }];

    let suites = results.suite_failures().count();
    if suites > 0 {
        lines.push(format!("{} suite-level failure(s) reported.", suites));
    }
    lines
}

fn write_record(out: &mut dyn Write, record: &ResultRecord, show_output: bool) -> io::Result<()> {
    let status = if record.passed { "PASS" } else { "FAIL" };
    writeln!(
        out,
        "[{}] {} ({:.2}/{:.2})",
        status, record.name, record.score, record.points
    )?;
    if show_output {
        for line in record.output.lines() {
            writeln!(out, "    {}", line)?;
        }
    }
    Ok(())
}

pub fn render_display(
    results: &ResultSet,
    totals: &ReportTotals,
    options: DisplayOptions,
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "Test Results")?;
    writeln!(out, "============")?;

    for record in results.records() {
        let show_output = !record.passed || options.show_passing_output;
        write_record(out, record, show_output)?;
    }

    if let Some(audit) = results.style_audit() {
        writeln!(out)?;
        writeln!(out, "{}: {:.2}/{:.2}", audit.name, audit.score, audit.points)?;
        for line in audit.output.lines() {
            writeln!(out, "    {}", line)?;
        }
    }

    writeln!(out)?;
    for line in summary_lines(results) {
        writeln!(out, "{}", line)?;
    }
    writeln!(
        out,
        "Total: {:.2}/{:.2} (executed in {:.2}s)",
        totals.score,
        totals.max_score,
        totals.execution_time.as_secs_f64()
    )?;

    Ok(())
}
