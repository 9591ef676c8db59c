//! Gradescope results document
//!
//! Gradescope reads a single JSON object with an overall score and one entry
//! per test. The audit record is rendered as the last test entry.

use super::display::{render_display, summary_lines, DisplayOptions};
use super::{write_destination, ReportTotals, ResultFormatter};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use tally_common::config::Destination;
use tally_common::types::{ResultRecord, ResultSet, Visibility};
use tracing::info;

#[derive(Debug, Serialize)]
struct GradescopeTest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<String>,
    score: f64,
    max_score: f64,
    visibility: Visibility,
    output: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<&'a str>,
}

impl<'a> From<&'a ResultRecord> for GradescopeTest<'a> {
    fn from(record: &'a ResultRecord) -> Self {
        let tags = if record.group.is_empty() {
            Vec::new()
        } else {
            vec![record.group.as_str()]
        };
        Self {
            name: &record.name,
            number: record.ordinal.map(|n| n.to_string()),
            score: record.score,
            max_score: record.points,
            visibility: record.visibility,
            output: &record.output,
            tags,
        }
    }
}

#[derive(Debug, Serialize)]
struct GradescopeDocument<'a> {
    score: f64,
    execution_time: u64,
    output: String,
    visibility: Visibility,
    tests: Vec<GradescopeTest<'a>>,
}

/// Render the full results document, pretty-printed with two-space indent
pub fn render_document(results: &ResultSet, totals: &ReportTotals) -> Result<String> {
    let output = summary_lines(results).join("\n");

    let document = GradescopeDocument {
        score: totals.score,
        execution_time: totals.execution_time.as_secs(),
        output,
        visibility: Visibility::Visible,
        tests: results.iter().map(GradescopeTest::from).collect(),
    };

    let mut json =
        serde_json::to_string_pretty(&document).context("Failed to serialize Gradescope results")?;
    json.push('\n');
    Ok(json)
}

#[derive(Debug, Clone)]
pub struct GradescopeFormatter {
    destination: Destination,
    display: DisplayOptions,
}

impl GradescopeFormatter {
    pub fn new(destination: Destination, display: DisplayOptions) -> Self {
        Self {
            destination,
            display,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }
}

impl ResultFormatter for GradescopeFormatter {
    fn render_for_display(
        &self,
        results: &ResultSet,
        totals: &ReportTotals,
        out: &mut dyn Write,
    ) -> Result<()> {
        render_display(results, totals, self.display, out).context("Failed to write report")
    }

    fn render_for_persistence(&self, results: &ResultSet, totals: &ReportTotals) -> Result<()> {
        let json = render_document(results, totals)?;
        write_destination(&self.destination, &json)?;
        info!(
            destination = %self.destination,
            tests = results.len(),
            score = totals.score,
            "Gradescope results written"
        );
        Ok(())
    }
}
