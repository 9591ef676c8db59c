use crate::GradeArgs;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_common::config::{AuditSettings, GradingConfig, GradingSettings, StyleSettings};
use tally_common::manifest::TestManifest;
use tally_common::types::{TestCaseMetadata, Visibility};
use tally_core::engine::{EventLogEngine, EventSource};
use tally_core::style::{CheckerOptions, CommandChecker, StyleChecker};
use tally_core::GradingSession;
use tracing::info;

/// Settings file merged with command-line overrides
pub fn resolve_settings(args: &GradeArgs) -> Result<GradingSettings> {
    let mut settings = match &args.config {
        Some(path) => GradingSettings::load(path)?,
        None => GradingSettings::default(),
    };

    if let Some(max_score) = args.max_score {
        settings.max_score = Some(max_score);
    }
    if let Some(platform) = args.platform {
        settings.platform = Some(platform);
    }
    settings.persist |= args.persist;
    settings.show_passing_output |= args.show_passing_output;
    if let Some(path) = &args.results_file {
        settings.results_file = Some(path.clone());
    }
    if let Some(path) = &args.grade_file {
        settings.grade_file = Some(path.clone());
    }
    if let Some(path) = &args.report_file {
        settings.report_file = Some(path.clone());
    }

    let style_requested = args.style_dir.is_some()
        || args.style_policy.is_some()
        || args.style_max.is_some()
        || args.style_deduction.is_some()
        || args.style_command.is_some()
        || !args.style_args.is_empty();

    if style_requested {
        let style = settings.style.get_or_insert_with(StyleSettings::default);
        if let Some(dir) = &args.style_dir {
            style.directory = Some(dir.clone());
        }
        if let Some(policy) = &args.style_policy {
            style.policy = Some(policy.clone());
        }
        if let Some(max) = args.style_max {
            style.max_score = max;
        }
        if let Some(deduction) = args.style_deduction {
            style.deduction = deduction;
        }
        if let Some(command) = &args.style_command {
            style.command = Some(command.clone());
        }
        if !args.style_args.is_empty() {
            style.args = args.style_args.clone();
        }
    }

    Ok(settings)
}

fn checker_options(
    command: Option<&str>,
    args: &[String],
    extension: Option<&str>,
    marker: Option<&str>,
) -> CheckerOptions {
    let mut options = CheckerOptions::default();
    if let Some(command) = command {
        options.program = command.to_string();
    }
    if !args.is_empty() {
        options.args = args.to_vec();
    }
    if let Some(extension) = extension {
        options.extension = extension.trim_start_matches('.').to_string();
    }
    if let Some(marker) = marker {
        options.marker = marker.to_string();
    }
    options
}

/// Build the style audit up front so a bad directory or policy fails the
/// run before any result is collected.
pub fn build_style_audit(
    style: Option<&StyleSettings>,
) -> Result<Option<(Arc<dyn StyleChecker>, AuditSettings)>> {
    let Some(style) = style else {
        return Ok(None);
    };

    let (directory, policy) = match (&style.directory, &style.policy) {
        (Some(directory), Some(policy)) => (directory, policy),
        _ => bail!("Style audit needs both a directory and a policy file"),
    };

    let audit = AuditSettings::new(style.max_score, style.deduction)?;
    let options = checker_options(
        style.command.as_deref(),
        &style.args,
        style.extension.as_deref(),
        style.marker.as_deref(),
    );
    let checker: Arc<dyn StyleChecker> = Arc::new(CommandChecker::new(directory, policy, options)?);

    Ok(Some((checker, audit)))
}

pub async fn grade(args: GradeArgs) -> Result<()> {
    let settings = resolve_settings(&args)?;
    let style = build_style_audit(settings.style.as_ref())?;
    let config = GradingConfig::try_from(settings)?;

    let manifest = match &args.manifest {
        Some(path) => TestManifest::load(path)?,
        None => TestManifest::default(),
    };
    info!(tests = manifest.len(), "Loaded test manifest");

    let source = if args.events == "-" {
        EventSource::Stdin
    } else {
        EventSource::File(PathBuf::from(&args.events))
    };

    let mut session = GradingSession::new(config, Arc::new(EventLogEngine::new(source, manifest)));
    if let Some((checker, audit)) = style {
        session = session.with_style_audit(checker, audit);
    }

    let report = session.run().await?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    session.publish(&report, &mut out)?;
    out.flush().context("Failed to flush stdout")?;

    info!(
        run_id = %report.run_id,
        score = report.totals.score,
        max_score = report.totals.max_score,
        "Grading finished"
    );

    Ok(())
}

/// Run the style checker on its own
pub async fn audit(
    dir: &Path,
    policy: &Path,
    command: Option<&str>,
    args: Vec<String>,
) -> Result<()> {
    println!("🔍 Auditing code style in: {}", dir.display());

    let checker = CommandChecker::new(dir, policy, checker_options(command, &args, None, None))?;
    println!("  📄 Files: {}", checker.files().len());

    let outcome = checker.check().await?;
    print!("{}", outcome.diagnostics);

    if outcome.violations == 0 {
        println!("✅ No style violations found");
    } else {
        println!("⚠️  {} style violation(s) found", outcome.violations);
    }

    Ok(())
}

fn sample_settings() -> GradingSettings {
    GradingSettings {
        max_score: Some(100.0),
        results_file: Some("results/results.json".to_string()),
        style: Some(StyleSettings {
            directory: Some(PathBuf::from("src")),
            policy: Some(PathBuf::from("style.xml")),
            max_score: 10.0,
            deduction: 1.0,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn sample_manifest() -> TestManifest {
    TestManifest::from_entries([
        (
            "math::adds",
            TestCaseMetadata::new("Adds two numbers", 2.0).with_group("arithmetic"),
        ),
        (
            "math::subtracts",
            TestCaseMetadata::new("Subtracts two numbers", 2.0).with_group("arithmetic"),
        ),
        (
            "math::hidden_edge_cases",
            TestCaseMetadata::new("Edge cases", 1.0).with_visibility(Visibility::AfterDue),
        ),
    ])
}

/// Write sample configuration files, leaving existing ones alone
pub fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing grading project at: {}", path);

    let project_path = Path::new(path);
    fs::create_dir_all(project_path)
        .with_context(|| format!("Failed to create directory: {}", path))?;

    let settings_path = project_path.join("tally.json");
    if settings_path.exists() {
        println!("  ⏭️  Skipped (exists): tally.json");
    } else {
        let json = serde_json::to_string_pretty(&sample_settings())?;
        fs::write(&settings_path, json)
            .with_context(|| format!("Failed to write {}", settings_path.display()))?;
        println!("  ✅ Created: tally.json");
    }

    let manifest_path = project_path.join("manifest.json");
    if manifest_path.exists() {
        println!("  ⏭️  Skipped (exists): manifest.json");
    } else {
        fs::write(&manifest_path, sample_manifest().to_json_pretty()?)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
        println!("  ✅ Created: manifest.json");
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Register your tests in manifest.json");
    println!("  2. Have your test runner emit a JSON-lines event log");
    println!("  3. Grade: tally-grader grade --events events.jsonl --manifest manifest.json --config tally.json");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_common::config::Platform;

    fn make_args() -> GradeArgs {
        GradeArgs {
            events: "-".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.json");
        fs::write(&path, r#"{"max_score": 50, "platform": "vocareum"}"#).unwrap();

        let args = GradeArgs {
            config: Some(path),
            max_score: Some(80.0),
            show_passing_output: true,
            ..make_args()
        };
        let settings = resolve_settings(&args).unwrap();
        assert_eq!(settings.max_score, Some(80.0));
        assert_eq!(settings.platform, Some(Platform::Vocareum));
        assert!(settings.show_passing_output);
        assert!(settings.style.is_none());
    }

    #[test]
    fn test_style_flags_create_style_settings() {
        let args = GradeArgs {
            style_dir: Some(PathBuf::from("src")),
            style_max: Some(10.0),
            style_args: vec!["--config".to_string(), "{{policy}}".to_string()],
            ..make_args()
        };
        let settings = resolve_settings(&args).unwrap();
        let style = settings.style.unwrap();
        assert_eq!(style.directory, Some(PathBuf::from("src")));
        assert_eq!(style.max_score, 10.0);
        assert_eq!(style.args.len(), 2);
    }

    #[test]
    fn test_style_audit_requires_policy() {
        let style = StyleSettings {
            directory: Some(PathBuf::from("src")),
            ..Default::default()
        };
        assert!(build_style_audit(Some(&style)).is_err());
        assert!(build_style_audit(None).unwrap().is_none());
    }

    #[test]
    fn test_style_audit_missing_directory_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("style.xml");
        fs::write(&policy, "<module/>").unwrap();

        let style = StyleSettings {
            directory: Some(dir.path().join("missing")),
            policy: Some(policy),
            max_score: 10.0,
            ..Default::default()
        };
        assert!(build_style_audit(Some(&style)).is_err());
    }

    #[test]
    fn test_checker_options_overrides() {
        let options = checker_options(Some("lint"), &[], Some(".py"), None);
        assert_eq!(options.program, "lint");
        assert_eq!(options.extension, "py");
        assert_eq!(options.args, CheckerOptions::default().args);
    }

    #[test]
    fn test_init_writes_samples_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        let root_str = root.display().to_string();

        init_project(&root_str).unwrap();
        let settings = GradingSettings::load(&root.join("tally.json")).unwrap();
        assert_eq!(settings.max_score, Some(100.0));
        let manifest = TestManifest::load(&root.join("manifest.json")).unwrap();
        assert_eq!(manifest.len(), 3);

        fs::write(root.join("tally.json"), "{}").unwrap();
        init_project(&root_str).unwrap();
        assert_eq!(fs::read_to_string(root.join("tally.json")).unwrap(), "{}");
    }
}
