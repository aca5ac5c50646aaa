//! Machine-readable harness report.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::HarnessError;
use crate::scenarios::ScenarioOutcome;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// A file produced by the run, pinned by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    pub size_bytes: u64,
}

impl ArtifactRef {
    pub fn from_file(path: &Path, kind: &str) -> Result<Self, HarnessError> {
        let data = std::fs::read(path)?;
        Ok(Self {
            path: path.display().to_string(),
            kind: kind.to_string(),
            sha256: hex_lower(&Sha256::digest(&data)),
            size_bytes: data.len() as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub scenarios: usize,
    pub passed: usize,
    pub failed: usize,
    pub checks: usize,
    pub log_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub schema_version: u32,
    pub run_id: String,
    pub passed: bool,
    pub summary: Summary,
    pub scenarios: Vec<ScenarioOutcome>,
    pub artifacts: Vec<ArtifactRef>,
}

impl HarnessReport {
    #[must_use]
    pub fn new(run_id: impl Into<String>, scenarios: Vec<ScenarioOutcome>) -> Self {
        let passed = scenarios.iter().filter(|s| s.passed).count();
        let summary = Summary {
            scenarios: scenarios.len(),
            passed,
            failed: scenarios.len() - passed,
            checks: scenarios.iter().map(|s| s.checks.len()).sum(),
            log_entries: 0,
        };
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            run_id: run_id.into(),
            passed: summary.failed == 0,
            summary,
            scenarios,
            artifacts: Vec::new(),
        }
    }

    /// Validate the JSONL log at `path` and pin it as an artifact.
    ///
    /// An invalid log fails the report.
    pub fn attach_log(&mut self, path: &Path) -> Result<(), HarnessError> {
        let text = std::fs::read_to_string(path)?;
        match mpibridge_core::structured_log::validate_log_text(&text) {
            Ok(entries) => self.summary.log_entries = entries.len(),
            Err(errors) => {
                self.passed = false;
                return Err(HarnessError::LogValidation(
                    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
                ));
            }
        }
        self.artifacts.push(ArtifactRef::from_file(path, "jsonl_log")?);
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{ShutdownPath, run_all};

    #[test]
    fn hex_encoding() {
        assert_eq!(hex_lower(&[0x00, 0xab, 0x7f]), "00ab7f");
    }

    #[test]
    fn summary_counts_scenarios_and_checks() {
        let outcomes = run_all(&ShutdownPath::ALL, None).unwrap();
        let checks: usize = outcomes.iter().map(|o| o.checks.len()).sum();
        let report = HarnessReport::new("unit", outcomes);
        assert!(report.passed);
        assert_eq!(report.summary.scenarios, 4);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.summary.checks, checks);

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["scenarios"][1]["path"], "finalize");
    }
}
