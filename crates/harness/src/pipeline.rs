//! Pipeline - top-level coordinator for one orchestrated run

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{HarnessError, HarnessResult};
use crate::gate::ReadinessGate;
use crate::install::{run_install, InstallContext, Installer};
use crate::plan::{RunPlan, ServiceRole, TierSpec};
use crate::report::{OverallStatus, Report};
use crate::service::ServiceDependency;
use crate::tier::{TierContext, TierExecutor, TierResult};

/// Run phases. TearingDown is the single unconditional exit path; every
/// run ends in exactly one of the three terminal phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Provisioning,
    AwaitingReadiness,
    Installing,
    RunningTiers,
    TearingDown,
    Succeeded,
    Failed,
    Aborted,
}

/// One pipeline run: an ordered dependency set, one installer, an ordered
/// tier sequence, and the report they produce. Consumed by `run` so a
/// second installation through the same run is unrepresentable.
pub struct Pipeline {
    plan: RunPlan,
    tiers: Vec<TierSpec>,
    installer: Box<dyn Installer>,
    executor: Box<dyn TierExecutor>,
    output_dir: PathBuf,
    phase: Phase,
}

impl Pipeline {
    pub fn new(
        plan: RunPlan,
        installer: Box<dyn Installer>,
        executor: Box<dyn TierExecutor>,
        output_dir: PathBuf,
    ) -> Self {
        let tiers = plan.tiers.clone();
        Self {
            plan,
            tiers,
            installer,
            executor,
            output_dir,
            phase: Phase::Idle,
        }
    }

    /// Restrict the run to the named tiers (declaration order preserved)
    pub fn with_tiers(mut self, names: &[String]) -> HarnessResult<Self> {
        self.tiers = self.plan.select_tiers(names)?;
        Ok(self)
    }

    fn transition(&mut self, next: Phase) {
        debug!("phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Execute the whole run. Teardown of every started dependency is
    /// attempted exactly once, success or failure, before this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Report {
        let started_at = Utc::now();
        info!("Starting run '{}'", self.plan.name);

        let mut deps: Vec<ServiceDependency> = Vec::new();
        let mut results: Vec<TierResult> = Vec::new();
        let outcome = self.execute(&mut deps, &mut results, &cancel).await;

        self.transition(Phase::TearingDown);
        for dep in deps.iter_mut() {
            dep.stop();
        }

        let (overall, abort_reason) = match outcome {
            Ok(()) => (Report::status_from_tiers(&results), None),
            Err(e) => {
                error!("Run aborted: {}", e);
                (OverallStatus::Aborted, Some(e.to_string()))
            }
        };

        self.transition(match overall {
            OverallStatus::Succeeded => Phase::Succeeded,
            OverallStatus::Failed => Phase::Failed,
            OverallStatus::Aborted => Phase::Aborted,
        });

        Report {
            plan: self.plan.name.clone(),
            overall,
            started_at,
            finished_at: Utc::now(),
            tiers: results,
            abort_reason,
        }
    }

    async fn execute(
        &mut self,
        deps: &mut Vec<ServiceDependency>,
        results: &mut Vec<TierResult>,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        self.transition(Phase::Provisioning);

        for spec in &self.plan.dependencies {
            deps.push(ServiceDependency::new(spec.clone())?);
        }
        let log_dir = self.output_dir.join("logs");
        for dep in deps.iter_mut() {
            dep.start(&log_dir)?;
        }

        // All start() calls issued; completion is observed by the gate.
        self.transition(Phase::AwaitingReadiness);
        let gated = gated_names(deps, &self.tiers);
        let gate = ReadinessGate::new(self.plan.readiness_deadline());
        gate.await_ready(deps, &gated, cancel).await?;

        self.transition(Phase::Installing);
        let ctx = install_context(deps, &self.output_dir);
        let system = run_install(
            self.installer.as_ref(),
            &ctx,
            &self.plan.install.features,
            self.plan.install.retry_delay(),
            cancel,
        )
        .await?;

        self.transition(Phase::RunningTiers);
        let browser_skip = browser_skip_reason(deps);
        let service_addrs = healthy_addrs(deps);

        for tier in &self.tiers {
            if cancel.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }

            if tier.requires_browser {
                if let Some(reason) = &browser_skip {
                    info!("- {} skipped: {}", tier.name, reason);
                    results.push(TierResult::skipped_tier(&tier.name, reason));
                    continue;
                }
            }

            let tier_ctx = TierContext {
                artifact_dir: self.output_dir.join("artifacts").join(&tier.name),
                service_addrs: service_addrs.clone(),
            };
            std::fs::create_dir_all(&tier_ctx.artifact_dir)?;

            match self.executor.run(tier, &system, &tier_ctx).await {
                Ok(result) => {
                    if result.failed > 0 {
                        error!(
                            "✗ {} ({} failed, {} ms)",
                            result.tier_name, result.failed, result.duration_ms
                        );
                    } else {
                        info!(
                            "✓ {} ({} passed, {} ms)",
                            result.tier_name, result.passed, result.duration_ms
                        );
                    }
                    results.push(result);
                }
                Err(e) => {
                    // One tier's executor crash never blocks later tiers
                    error!("✗ {} executor error: {}", tier.name, e);
                    results.push(TierResult::crashed(&tier.name, &e.to_string()));
                }
            }
        }

        Ok(())
    }
}

/// Names that must be healthy for the gate to open: every non-optional
/// dependency, except a browser grid no scheduled tier asks for.
fn gated_names(deps: &[ServiceDependency], tiers: &[TierSpec]) -> Vec<String> {
    let browser_needed = tiers.iter().any(|t| t.requires_browser);
    deps.iter()
        .filter(|d| !d.optional())
        .filter(|d| d.role() != ServiceRole::BrowserGrid || browser_needed)
        .map(|d| d.name().to_string())
        .collect()
}

fn browser_skip_reason(deps: &[ServiceDependency]) -> Option<String> {
    let grid = deps.iter().find(|d| d.role() == ServiceRole::BrowserGrid)?;
    if grid.healthy() {
        None
    } else {
        Some(format!("browser grid '{}' unavailable", grid.name()))
    }
}

fn healthy_addrs(deps: &[ServiceDependency]) -> BTreeMap<String, SocketAddr> {
    deps.iter()
        .filter(|d| d.healthy())
        .filter_map(|d| d.addr().map(|addr| (d.name().to_string(), addr)))
        .collect()
}

fn install_context(deps: &[ServiceDependency], output_dir: &std::path::Path) -> InstallContext {
    let database_addr = deps
        .iter()
        .find(|d| d.role() == ServiceRole::Database && d.healthy())
        .and_then(|d| d.addr());
    InstallContext {
        database_addr,
        service_addrs: healthy_addrs(deps),
        output_dir: output_dir.to_path_buf(),
    }
}
