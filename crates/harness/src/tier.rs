//! Test tiers - result model and the executor boundary

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{HarnessError, HarnessResult};
use crate::install::InstalledSystem;
use crate::plan::{RunnerSpec, TierSpec};

/// One test case that did not pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFailure {
    /// Case identifier, as reported by the executor
    pub case: String,

    pub message: String,

    /// Captured artifact, e.g. a screenshot path. File names are
    /// case-unique by executor contract, so parallel cases cannot collide.
    #[serde(default)]
    pub artifact: Option<PathBuf>,
}

/// Outcome of one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResult {
    pub tier_name: String,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,

    /// Failures in the order the executor reported them
    #[serde(default)]
    pub failures: Vec<CaseFailure>,

    /// Set when the whole tier was skipped for infrastructure
    /// unavailability rather than executed
    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl TierResult {
    /// A tier that never ran because its infrastructure was unavailable
    pub fn skipped_tier(name: &str, reason: &str) -> Self {
        Self {
            tier_name: name.to_string(),
            passed: 0,
            failed: 0,
            skipped: 0,
            duration_ms: 0,
            failures: vec![],
            skip_reason: Some(reason.to_string()),
        }
    }

    /// A tier whose executor crashed; recovered at the tier boundary so
    /// later tiers still run
    pub fn crashed(name: &str, message: &str) -> Self {
        Self {
            tier_name: name.to_string(),
            passed: 0,
            failed: 1,
            skipped: 0,
            duration_ms: 0,
            failures: vec![CaseFailure {
                case: format!("{}::executor", name),
                message: message.to_string(),
                artifact: None,
            }],
            skip_reason: None,
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}

/// Per-tier execution context: where artifacts go and which services are up
#[derive(Debug, Clone)]
pub struct TierContext {
    /// Directory reserved for this tier's artifacts
    pub artifact_dir: PathBuf,

    /// Bound address of every healthy dependency, by name
    pub service_addrs: BTreeMap<String, SocketAddr>,
}

/// The external test-tier executor. The orchestrator never inspects
/// individual test-case internals; it only consumes the summary.
#[async_trait]
pub trait TierExecutor: Send + Sync {
    async fn run(
        &self,
        tier: &TierSpec,
        system: &InstalledSystem,
        ctx: &TierContext,
    ) -> HarnessResult<TierResult>;
}

/// Counts and failures as emitted by an external executor command
#[derive(Debug, Clone, Deserialize)]
struct ExecutorSummary {
    passed: u32,
    failed: u32,
    #[serde(default)]
    skipped: u32,
    #[serde(default)]
    failures: Vec<CaseFailure>,
}

/// Production executor: runs the configured tier command.
///
/// Contract with the external command: the tier name, selector, installed
/// system handle and artifact directory arrive as env vars; the command
/// prints a JSON summary (`passed`, `failed`, `skipped`, `failures`) as
/// the last line of stdout. Exit status is informational — the counts
/// decide pass/fail.
pub struct CommandTierExecutor {
    spec: RunnerSpec,
}

impl CommandTierExecutor {
    pub fn new(spec: RunnerSpec) -> Self {
        Self { spec }
    }

    fn parse_summary(stdout: &str) -> Option<ExecutorSummary> {
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    }
}

#[async_trait]
impl TierExecutor for CommandTierExecutor {
    async fn run(
        &self,
        tier: &TierSpec,
        system: &InstalledSystem,
        ctx: &TierContext,
    ) -> HarnessResult<TierResult> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .envs(self.spec.env.clone())
            .env("TIER_NAME", &tier.name)
            .env("TIER_SELECTOR", &tier.selector)
            .env("SUT_HANDLE", &system.handle)
            .env("ARTIFACT_DIR", &ctx.artifact_dir);
        for (name, addr) in &ctx.service_addrs {
            let key: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            cmd.env(format!("{}_ADDR", key), addr.to_string());
        }

        let output = cmd.output().await.map_err(|e| HarnessError::Tier {
            tier: tier.name.clone(),
            reason: format!("failed to spawn {}: {}", self.spec.command, e),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = Self::parse_summary(&stdout).ok_or_else(|| HarnessError::Tier {
            tier: tier.name.clone(),
            reason: format!(
                "no JSON summary on stdout (exit {:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })?;

        Ok(TierResult {
            tier_name: tier.name.clone(),
            passed: summary.passed,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_ms: start.elapsed().as_millis() as u64,
            failures: summary.failures,
            skip_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary_takes_last_json_line() {
        let stdout = "building fixtures\nrunning 4 cases\n{\"passed\":3,\"failed\":1,\"failures\":[{\"case\":\"kernel::auth\",\"message\":\"expected 200\",\"artifact\":\"shots/kernel-auth.png\"}]}\n";
        let summary = CommandTierExecutor::parse_summary(stdout).unwrap();
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].case, "kernel::auth");
        assert_eq!(
            summary.failures[0].artifact.as_deref(),
            Some(std::path::Path::new("shots/kernel-auth.png"))
        );
    }

    #[test]
    fn test_parse_summary_missing() {
        assert!(CommandTierExecutor::parse_summary("no json here\n").is_none());
    }

    #[test]
    fn test_crashed_result_counts_as_failure() {
        let result = TierResult::crashed("kernel", "runner segfaulted");
        assert_eq!(result.failed, 1);
        assert!(!result.was_skipped());
        assert_eq!(result.failures[0].case, "kernel::executor");
    }

    #[test]
    fn test_skipped_tier_is_not_failure() {
        let result = TierResult::skipped_tier("functional-browser", "grid unavailable");
        assert_eq!(result.failed, 0);
        assert!(result.was_skipped());
    }
}
