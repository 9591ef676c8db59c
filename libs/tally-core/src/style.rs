//! Style Audit - Weighted Result from an External Linter
//!
//! **Core Responsibility:**
//! Run an external style checker over the submission and turn its violation
//! count into the single audit record of the report.
//!
//! **Scoring Rules:**
//! - score = max(max_score - deduction * violations, 0)
//! - the record carries the reserved audit name and the checker's diagnostics
//! - a checker that cannot run yields a zero-score record with a fixed
//!   message instead of an error
//!
//! **Setup Rules (fail fast, before any test runs):**
//! - the audited directory must exist and be a directory
//! - the policy file must be readable

use anyhow::{anyhow, bail, Context, Result};
use futures_util::future::{BoxFuture, FutureExt};
use handlebars::Handlebars;
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_common::config::AuditSettings;
use tally_common::types::ResultRecord;
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Audit output when the checker itself fails
pub const CHECK_FAIL_MESSAGE: &str =
    "Code style check failed unexpectedly. Please contact an instructor.";

pub const DEFAULT_CHECKER_PROGRAM: &str = "checkstyle";
pub const DEFAULT_EXTENSION: &str = "java";
pub const DEFAULT_MARKER: &str = "[WARN]";
pub const DEFAULT_CHECKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Raw result of one checker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub violations: usize,
    pub diagnostics: String,
}

/// An external style checker
pub trait StyleChecker: Send + Sync {
    fn check(&self) -> BoxFuture<'_, Result<CheckOutcome>>;
}

/// Run `checker` and score its outcome
pub async fn grade_style(checker: &dyn StyleChecker, settings: &AuditSettings) -> ResultRecord {
    match checker.check().await {
        Ok(outcome) => {
            let score = settings.score_for(outcome.violations);
            info!(
                violations = outcome.violations,
                score,
                max_score = settings.max_score(),
                "Style audit complete"
            );
            ResultRecord::style_audit(settings.max_score(), score, outcome.diagnostics)
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Style checker failed");
            let mut record = ResultRecord::style_audit(0.0, 0.0, CHECK_FAIL_MESSAGE);
            record.passed = false;
            record
        }
    }
}

/// Lines of checker output that report a violation
pub fn count_violations(diagnostics: &str, marker: &str) -> usize {
    diagnostics.lines().filter(|line| line.contains(marker)).count()
}

/// How to invoke the external checker
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    pub program: String,
    /// Argument templates; `{{policy}}` and `{{directory}}` are substituted
    pub args: Vec<String>,
    /// Extension (without the dot) of files handed to the checker
    pub extension: String,
    /// Substring identifying a violation line in the checker's output
    pub marker: String,
    pub timeout: Duration,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            program: DEFAULT_CHECKER_PROGRAM.to_string(),
            args: vec!["-c".to_string(), "{{policy}}".to_string()],
            extension: DEFAULT_EXTENSION.to_string(),
            marker: DEFAULT_MARKER.to_string(),
            timeout: DEFAULT_CHECKER_TIMEOUT,
        }
    }
}

/// Style checker backed by an external process
#[derive(Debug, Clone)]
pub struct CommandChecker {
    program: String,
    args: Vec<String>,
    directory: PathBuf,
    files: Vec<PathBuf>,
    marker: String,
    timeout: Duration,
}

impl CommandChecker {
    /// Validate the directory and policy, collect the files to audit and
    /// render the argument templates.
    pub fn new(directory: &Path, policy: &Path, options: CheckerOptions) -> Result<Self> {
        if !directory.is_dir() {
            bail!(
                "Audit directory must be a readable directory: {}",
                directory.display()
            );
        }
        let directory = directory
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", directory.display()))?;

        fs::read_to_string(policy)
            .with_context(|| format!("Failed to load audit policy {}", policy.display()))?;

        let files = collect_files(&directory, &options.extension)?;
        let args = render_args(&options.args, policy, &directory)?;

        info!(
            directory = %directory.display(),
            files = files.len(),
            program = %options.program,
            "Style checker configured"
        );

        Ok(Self {
            program: options.program,
            args,
            directory,
            files,
            marker: options.marker,
            timeout: options.timeout,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl StyleChecker for CommandChecker {
    fn check(&self) -> BoxFuture<'_, Result<CheckOutcome>> {
        async move {
            let mut command = tokio::process::Command::new(&self.program);
            command
                .args(&self.args)
                .args(&self.files)
                .current_dir(&self.directory)
                .kill_on_drop(true);

            debug!(program = %self.program, args = ?self.args, files = self.files.len(), "Launching style checker");

            let output = tokio::time::timeout(self.timeout, command.output())
                .await
                .map_err(|_| anyhow!("Style checker timed out after {:?}", self.timeout))?
                .with_context(|| format!("Failed to launch style checker '{}'", self.program))?;

            if output.status.code().is_none() {
                bail!("Style checker terminated by a signal");
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                debug!(stderr = %stderr.trim(), "Style checker stderr");
            }

            let diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
            let violations = count_violations(&diagnostics, &self.marker);
            Ok(CheckOutcome {
                violations,
                diagnostics,
            })
        }
        .boxed()
    }
}

fn render_args(templates: &[String], policy: &Path, directory: &Path) -> Result<Vec<String>> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);

    let data = json!({
        "policy": policy.display().to_string(),
        "directory": directory.display().to_string(),
    });

    templates
        .iter()
        .map(|template| {
            handlebars
                .render_template(template, &data)
                .with_context(|| format!("Failed to render checker argument '{}'", template))
        })
        .collect()
}

/// Every regular file under `root` with the given extension, in walk order
/// with entries sorted by name. Subtrees that cannot be read for lack of
/// permission are skipped.
fn collect_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::PermissionDenied) => {
                debug!(path = ?e.path(), "Skipping unreadable directory");
                continue;
            }
            Err(e) => {
                let path = e.path().unwrap_or(root).display().to_string();
                return Err(e).with_context(|| format!("Failed to walk {}", path));
            }
        };

        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(extension)
        {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}
