mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tally_common::config::{Platform, VOCAREUM_GRADE_FILE_ENV, VOCAREUM_REPORT_FILE_ENV};

#[derive(Parser)]
#[command(name = "tally-grader")]
#[command(about = "Tally - Collect, scale and report autograder results", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a recorded test run and report it for a platform
    Grade(GradeArgs),

    /// Run the style checker alone and print its diagnostics
    Audit {
        /// Directory to audit
        #[arg(short, long)]
        dir: PathBuf,

        /// Checker policy file
        #[arg(short, long)]
        policy: PathBuf,

        /// Checker program (defaults to checkstyle)
        #[arg(short, long)]
        command: Option<String>,

        /// Checker argument template; repeat for each argument
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Write a sample settings file and test manifest
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct GradeArgs {
    /// JSON-lines event log from the test runner, or `-` for stdin
    #[arg(short, long)]
    pub events: String,

    /// Test manifest mapping test identifiers to metadata
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Settings file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum score the tests are scaled to
    #[arg(long)]
    pub max_score: Option<f64>,

    /// Target grading platform
    #[arg(short, long)]
    pub platform: Option<Platform>,

    /// Write platform artifacts instead of printing the console report
    #[arg(long)]
    pub persist: bool,

    /// Gradescope results file, or `-` for stdout
    #[arg(long)]
    pub results_file: Option<String>,

    /// Vocareum grade file
    #[arg(long, env = VOCAREUM_GRADE_FILE_ENV)]
    pub grade_file: Option<String>,

    /// Vocareum report file
    #[arg(long, env = VOCAREUM_REPORT_FILE_ENV)]
    pub report_file: Option<String>,

    /// Also show output of passing tests
    #[arg(long)]
    pub show_passing_output: bool,

    /// Directory to run the style audit over
    #[arg(long)]
    pub style_dir: Option<PathBuf>,

    /// Style checker policy file
    #[arg(long)]
    pub style_policy: Option<PathBuf>,

    /// Points available for code style
    #[arg(long)]
    pub style_max: Option<f64>,

    /// Points deducted per style violation
    #[arg(long)]
    pub style_deduction: Option<f64>,

    /// Style checker program
    #[arg(long)]
    pub style_command: Option<String>,

    /// Style checker argument template; repeat for each argument
    #[arg(long = "style-arg", allow_hyphen_values = true)]
    pub style_args: Vec<String>,
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    // stdout is reserved for reports
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Grade(args) => {
            commands::grade(args).await?;
        }
        Commands::Audit {
            dir,
            policy,
            command,
            args,
        } => {
            commands::audit(&dir, &policy, command.as_deref(), args).await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_grade_flags() {
        let cli = Cli::try_parse_from([
            "tally-grader",
            "grade",
            "--events",
            "-",
            "--platform",
            "Vocareum",
            "--persist",
            "--grade-file",
            "grade.txt",
            "--report-file",
            "report.txt",
            "--style-arg",
            "-c",
            "--style-arg",
            "{{policy}}",
        ])
        .unwrap();

        match cli.command {
            Commands::Grade(args) => {
                assert_eq!(args.events, "-");
                assert_eq!(args.platform, Some(Platform::Vocareum));
                assert!(args.persist);
                assert_eq!(args.grade_file.as_deref(), Some("grade.txt"));
                assert_eq!(args.style_args, vec!["-c", "{{policy}}"]);
            }
            _ => panic!("expected grade subcommand"),
        }
    }
}
