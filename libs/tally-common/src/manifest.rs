//! Test manifest: explicit registration of per-test grading metadata

use crate::types::TestCaseMetadata;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestJson {
    #[serde(default)]
    tests: HashMap<String, TestCaseMetadata>,
}

/// Maps test identifiers to the metadata their authors declared.
///
/// Tests absent from the manifest are untagged: their output is still
/// isolated while they run, but they are not graded.
#[derive(Debug, Clone, Default)]
pub struct TestManifest {
    tests: HashMap<String, TestCaseMetadata>,
}

impl TestManifest {
    /// Load a manifest from a JSON file of the form `{"tests": {"<id>": {...}}}`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Test manifest not found: {}", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let manifest: ManifestJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        for (id, meta) in &manifest.tests {
            if !meta.has_valid_points() {
                bail!("Test '{}' declares invalid points: {}", id, meta.points);
            }
        }

        Ok(Self { tests: manifest.tests })
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, TestCaseMetadata)>,
        K: Into<String>,
    {
        Self {
            tests: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&TestCaseMetadata> {
        self.tests.get(id)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tests.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Serialize back to the on-disk form
    pub fn to_json_pretty(&self) -> Result<String> {
        let json = ManifestJson {
            tests: self.tests.clone(),
        };
        serde_json::to_string_pretty(&json).context("Failed to serialize manifest")
    }
}
