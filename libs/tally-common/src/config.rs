//! Grading configuration: loaded once, validated, then immutable

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MAX_SCORE: f64 = 100.0;
pub const DEFAULT_RESULTS_FILE: &str = "/autograder/results/results.json";

/// Environment variables Vocareum sets for its two artifacts
pub const VOCAREUM_GRADE_FILE_ENV: &str = "vocareumGradeFile";
pub const VOCAREUM_REPORT_FILE_ENV: &str = "vocareumReportFile";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max score must be a non-negative number, got {0}")]
    InvalidMaxScore(f64),
    #[error("style deduction must be a non-negative number, got {0}")]
    InvalidDeduction(f64),
    #[error("unknown platform '{0}' (valid options: gradescope, vocareum)")]
    UnknownPlatform(String),
    #[error("{platform} persistence requires a {what} destination")]
    MissingDestination { platform: Platform, what: &'static str },
    #[error("failed to read settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Grading platform the report is rendered for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Gradescope,
    Vocareum,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Gradescope => write!(f, "gradescope"),
            Platform::Vocareum => write!(f, "vocareum"),
        }
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gradescope" => Ok(Platform::Gradescope),
            "vocareum" => Ok(Platform::Vocareum),
            _ => Err(ConfigError::UnknownPlatform(s.to_string())),
        }
    }
}

/// Where persisted artifacts go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    /// `-` names stdout, anything else is a path
    pub fn parse(raw: &str) -> Self {
        if raw == "-" {
            Destination::Stdout
        } else {
            Destination::File(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Stdout => write!(f, "<stdout>"),
            Destination::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Raw style audit settings as they appear in a settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    pub directory: Option<PathBuf>,
    pub policy: Option<PathBuf>,
    pub max_score: f64,
    pub deduction: f64,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub extension: Option<String>,
    pub marker: Option<String>,
}

/// Raw settings, every field optional. Turned into a [`GradingConfig`]
/// through validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
    pub max_score: Option<f64>,
    pub platform: Option<Platform>,
    pub persist: bool,
    pub show_passing_output: bool,
    pub results_file: Option<String>,
    pub grade_file: Option<String>,
    pub report_file: Option<String>,
    pub style: Option<StyleSettings>,
}

impl GradingSettings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated point settings for the style audit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditSettings {
    max_score: f64,
    deduction: f64,
}

impl AuditSettings {
    pub fn new(max_score: f64, deduction: f64) -> Result<Self, ConfigError> {
        if !max_score.is_finite() || max_score < 0.0 {
            return Err(ConfigError::InvalidMaxScore(max_score));
        }
        if !deduction.is_finite() || deduction < 0.0 {
            return Err(ConfigError::InvalidDeduction(deduction));
        }
        Ok(Self { max_score, deduction })
    }

    pub fn max_score(&self) -> f64 {
        self.max_score
    }

    pub fn deduction(&self) -> f64 {
        self.deduction
    }

    /// `max - deduction * violations`, never below zero
    pub fn score_for(&self, violations: usize) -> f64 {
        (self.max_score - self.deduction * violations as f64).max(0.0)
    }
}

/// Validated grading configuration for one session
#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    max_score: f64,
    platform: Platform,
    persist: bool,
    show_passing_output: bool,
    results_file: Destination,
    grade_file: Option<Destination>,
    report_file: Option<Destination>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_score: DEFAULT_MAX_SCORE,
            platform: Platform::Gradescope,
            persist: false,
            show_passing_output: false,
            results_file: Destination::File(PathBuf::from(DEFAULT_RESULTS_FILE)),
            grade_file: None,
            report_file: None,
        }
    }
}

impl GradingConfig {
    pub fn max_score(&self) -> f64 {
        self.max_score
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    pub fn show_passing_output(&self) -> bool {
        self.show_passing_output
    }

    pub fn results_file(&self) -> &Destination {
        &self.results_file
    }

    pub fn grade_file(&self) -> Option<&Destination> {
        self.grade_file.as_ref()
    }

    pub fn report_file(&self) -> Option<&Destination> {
        self.report_file.as_ref()
    }
}

impl TryFrom<GradingSettings> for GradingConfig {
    type Error = ConfigError;

    fn try_from(settings: GradingSettings) -> Result<Self, Self::Error> {
        let max_score = settings.max_score.unwrap_or(DEFAULT_MAX_SCORE);
        if !max_score.is_finite() || max_score < 0.0 {
            return Err(ConfigError::InvalidMaxScore(max_score));
        }

        let platform = settings.platform.unwrap_or_default();
        let grade_file = settings.grade_file.as_deref().map(Destination::parse);
        let report_file = settings.report_file.as_deref().map(Destination::parse);

        if settings.persist && platform == Platform::Vocareum {
            if grade_file.is_none() {
                return Err(ConfigError::MissingDestination { platform, what: "grade file" });
            }
            if report_file.is_none() {
                return Err(ConfigError::MissingDestination { platform, what: "report file" });
            }
        }

        Ok(Self {
            max_score,
            platform,
            persist: settings.persist,
            show_passing_output: settings.show_passing_output,
            results_file: Destination::parse(
                settings.results_file.as_deref().unwrap_or(DEFAULT_RESULTS_FILE),
            ),
            grade_file,
            report_file,
        })
    }
}
