//! Declarative YAML run plan

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// A complete run plan parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    /// Unique name for this run plan
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Overall deadline for all dependencies to become healthy
    #[serde(default = "default_readiness_deadline_secs")]
    pub readiness_deadline_secs: u64,

    /// Ephemeral services to provision before installing
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    /// How to install the system under test
    pub install: InstallSpec,

    /// How to execute a tier's test cases
    pub runner: RunnerSpec,

    /// Test tiers, executed in declaration order
    pub tiers: Vec<TierSpec>,
}

fn default_readiness_deadline_secs() -> u64 {
    60
}

/// One ephemeral service dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Unique name, used in logs, env var prefixes and the report
    pub name: String,

    /// What the service provides to the run
    #[serde(default)]
    pub role: ServiceRole,

    /// Command to launch the service
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Fixed port to bind; omit to pick a free port
    #[serde(default)]
    pub port: Option<u16>,

    /// Env var the chosen port is exported through
    #[serde(default = "default_port_env")]
    pub port_env: String,

    /// Optional dependencies are polled but cannot fail the readiness gate
    #[serde(default)]
    pub optional: bool,

    /// Readiness probe for this service
    pub probe: ProbeSpec,
}

fn default_port_env() -> String {
    "PORT".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Database,
    BrowserGrid,
    #[default]
    Generic,
}

/// Readiness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSpec {
    #[serde(flatten)]
    pub kind: ProbeKind,

    /// Fixed delay between attempts; no backoff multiplier is applied
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,

    /// Attempts before the dependency is marked failed
    #[serde(default = "default_probe_max_attempts")]
    pub max_attempts: u32,
}

fn default_probe_interval_ms() -> u64 {
    100
}

fn default_probe_max_attempts() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    /// Healthy when a TCP connection to the bound address succeeds
    Tcp,

    /// Healthy when GET on the bound address returns 2xx
    Http {
        #[serde(default = "default_health_path")]
        path: String,
    },

    /// Healthy when the command exits 0
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl ProbeSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// How to install the system under test once dependencies are ready
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Features to enable, in order, after a successful install
    #[serde(default)]
    pub features: Vec<String>,

    /// Pause before the single automatic retry of a transient failure
    #[serde(default = "default_install_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_install_retry_delay_ms() -> u64 {
    1000
}

impl InstallSpec {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// External command that executes one tier's test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One test tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSpec {
    /// Unique tier name (e.g. unit, kernel, functional, functional-browser)
    pub name: String,

    /// How the executor locates this tier's cases (a path or tag)
    pub selector: String,

    /// Tier depends on the browser-grid service being healthy
    #[serde(default)]
    pub requires_browser: bool,
}

impl RunPlan {
    /// Parse a run plan from YAML
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let plan: Self = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a run plan from a YAML file
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check cross-field invariants the type system cannot express
    pub fn validate(&self) -> HarnessResult<()> {
        let mut names = HashSet::new();
        for dep in &self.dependencies {
            if !names.insert(dep.name.as_str()) {
                return Err(HarnessError::InvalidPlan(format!(
                    "duplicate dependency name: {}",
                    dep.name
                )));
            }
        }

        let mut tiers = HashSet::new();
        for tier in &self.tiers {
            if !tiers.insert(tier.name.as_str()) {
                return Err(HarnessError::InvalidPlan(format!(
                    "duplicate tier name: {}",
                    tier.name
                )));
            }
        }

        if self.tiers.is_empty() {
            return Err(HarnessError::InvalidPlan("no tiers declared".to_string()));
        }

        let has_grid = self
            .dependencies
            .iter()
            .any(|d| d.role == ServiceRole::BrowserGrid);
        if !has_grid {
            if let Some(tier) = self.tiers.iter().find(|t| t.requires_browser) {
                return Err(HarnessError::InvalidPlan(format!(
                    "tier '{}' requires a browser but no browser_grid dependency is declared",
                    tier.name
                )));
            }
        }

        Ok(())
    }

    /// Restrict the run to the named tiers, preserving declaration order
    pub fn select_tiers(&self, names: &[String]) -> HarnessResult<Vec<TierSpec>> {
        for name in names {
            if !self.tiers.iter().any(|t| &t.name == name) {
                return Err(HarnessError::InvalidPlan(format!(
                    "unknown tier: {}",
                    name
                )));
            }
        }
        Ok(self
            .tiers
            .iter()
            .filter(|t| names.contains(&t.name))
            .cloned()
            .collect())
    }

    pub fn readiness_deadline(&self) -> Duration {
        Duration::from_secs(self.readiness_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: full-stack
description: Provision db and grid, install, run all four tiers
readiness_deadline_secs: 30
dependencies:
  - name: db
    role: database
    command: pg_tmp
    args: ["-w", "0"]
    port_env: PGPORT
    probe:
      kind: tcp
      interval_ms: 200
      max_attempts: 25
  - name: grid
    role: browser_grid
    command: selenium-standalone
    optional: true
    probe:
      kind: http
      path: /wd/hub/status
install:
  command: ./scripts/install-sut.sh
  features:
    - forum
    - search
runner:
  command: ./scripts/run-tier.sh
tiers:
  - name: unit
    selector: tests/unit
  - name: kernel
    selector: tests/kernel
  - name: functional
    selector: tests/functional
  - name: functional-browser
    selector: tests/functional-browser
    requires_browser: true
"#;

    #[test]
    fn test_parse_full_plan() {
        let plan = RunPlan::from_yaml(SAMPLE).unwrap();
        assert_eq!(plan.name, "full-stack");
        assert_eq!(plan.dependencies.len(), 2);
        assert_eq!(plan.tiers.len(), 4);
        assert_eq!(plan.dependencies[0].role, ServiceRole::Database);
        assert_eq!(plan.dependencies[0].port_env, "PGPORT");
        assert!(plan.dependencies[1].optional);
        assert!(plan.tiers[3].requires_browser);
    }

    #[test]
    fn test_defaults_applied() {
        let plan = RunPlan::from_yaml(SAMPLE).unwrap();
        // grid probe keeps the default cadence
        let probe = &plan.dependencies[1].probe;
        assert_eq!(probe.interval_ms, 100);
        assert_eq!(probe.max_attempts, 50);
        match &probe.kind {
            ProbeKind::Http { path } => assert_eq!(path, "/wd/hub/status"),
            other => panic!("unexpected probe kind: {:?}", other),
        }
        assert_eq!(plan.install.retry_delay_ms, 1000);
        assert_eq!(plan.dependencies[1].port_env, "PORT");
    }

    #[test]
    fn test_duplicate_dependency_rejected() {
        let yaml = SAMPLE.replace("name: grid", "name: db");
        let err = RunPlan::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate dependency"));
    }

    #[test]
    fn test_browser_tier_without_grid_rejected() {
        let yaml = r#"
name: browserless
install:
  command: ./install.sh
runner:
  command: ./run.sh
tiers:
  - name: functional-browser
    selector: tests/browser
    requires_browser: true
"#;
        let err = RunPlan::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("browser_grid"));
    }

    #[test]
    fn test_select_tiers_preserves_order() {
        let plan = RunPlan::from_yaml(SAMPLE).unwrap();
        let picked = plan
            .select_tiers(&["functional".to_string(), "unit".to_string()])
            .unwrap();
        let names: Vec<&str> = picked.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["unit", "functional"]);

        assert!(plan.select_tiers(&["nope".to_string()]).is_err());
    }
}
