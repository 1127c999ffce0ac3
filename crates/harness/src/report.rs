//! Unified run report - persistence, summary, exit codes

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::HarnessResult;
use crate::tier::TierResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Succeeded,
    /// Tests ran and at least one tier has failures
    Failed,
    /// The environment never became usable; no tier verdicts exist
    Aborted,
}

impl OverallStatus {
    /// Distinct codes so calling automation can tell "tests failed" from
    /// "environment never became usable"
    pub fn exit_code(self) -> i32 {
        match self {
            OverallStatus::Succeeded => 0,
            OverallStatus::Failed => 1,
            OverallStatus::Aborted => 2,
        }
    }
}

/// Machine-readable outcome of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Name of the run plan that produced this report
    pub plan: String,

    pub overall: OverallStatus,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Tier results in declaration order
    pub tiers: Vec<TierResult>,

    /// Terminal cause, present only when the run aborted
    #[serde(default)]
    pub abort_reason: Option<String>,
}

impl Report {
    /// Succeeded unless some tier has failures. Aborted runs never get here.
    pub fn status_from_tiers(tiers: &[TierResult]) -> OverallStatus {
        if tiers.iter().any(|t| t.failed > 0) {
            OverallStatus::Failed
        } else {
            OverallStatus::Succeeded
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.overall.exit_code()
    }

    /// Write the report as pretty JSON under `output_dir`
    pub fn write(&self, output_dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("report.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }

    /// Log a human-readable summary, one line per tier plus an aggregate
    pub fn print_summary(&self) {
        for tier in &self.tiers {
            if let Some(reason) = &tier.skip_reason {
                info!("- {}: skipped ({})", tier.tier_name, reason);
            } else if tier.failed > 0 {
                error!(
                    "✗ {}: {} passed, {} failed, {} skipped ({} ms)",
                    tier.tier_name, tier.passed, tier.failed, tier.skipped, tier.duration_ms
                );
                for failure in &tier.failures {
                    error!("    {} - {}", failure.case, failure.message);
                }
            } else {
                info!(
                    "✓ {}: {} passed, {} skipped ({} ms)",
                    tier.tier_name, tier.passed, tier.skipped, tier.duration_ms
                );
            }
        }

        match self.overall {
            OverallStatus::Aborted => {
                error!(
                    "Run aborted: {}",
                    self.abort_reason.as_deref().unwrap_or("unknown cause")
                );
            }
            status => {
                let passed: u32 = self.tiers.iter().map(|t| t.passed).sum();
                let failed: u32 = self.tiers.iter().map(|t| t.failed).sum();
                let skipped: u32 = self.tiers.iter().map(|t| t.skipped).sum();
                info!(
                    "Run {:?}: {} passed, {} failed, {} skipped across {} tier(s)",
                    status,
                    passed,
                    failed,
                    skipped,
                    self.tiers.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierResult;

    fn tier(name: &str, passed: u32, failed: u32) -> TierResult {
        TierResult {
            tier_name: name.to_string(),
            passed,
            failed,
            skipped: 0,
            duration_ms: 5,
            failures: vec![],
            skip_reason: None,
        }
    }

    #[test]
    fn test_status_from_tiers() {
        let all_green = vec![tier("unit", 3, 0), tier("kernel", 2, 0)];
        assert_eq!(
            Report::status_from_tiers(&all_green),
            OverallStatus::Succeeded
        );

        let one_red = vec![tier("unit", 3, 0), tier("kernel", 1, 1)];
        assert_eq!(Report::status_from_tiers(&one_red), OverallStatus::Failed);

        // A skipped tier never fails the run
        let with_skip = vec![
            tier("unit", 3, 0),
            TierResult::skipped_tier("functional-browser", "grid down"),
        ];
        assert_eq!(
            Report::status_from_tiers(&with_skip),
            OverallStatus::Succeeded
        );
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(OverallStatus::Succeeded.exit_code(), 0);
        assert_eq!(OverallStatus::Failed.exit_code(), 1);
        assert_eq!(OverallStatus::Aborted.exit_code(), 2);
    }

    #[test]
    fn test_write_creates_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = Report {
            plan: "smoke".to_string(),
            overall: OverallStatus::Succeeded,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            tiers: vec![tier("unit", 3, 0)],
            abort_reason: None,
        };

        let path = report.write(dir.path()).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: Report = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.plan, "smoke");
        assert_eq!(parsed.tiers.len(), 1);
    }
}
