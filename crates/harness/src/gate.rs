//! Readiness gate - holds the run until dependencies are verifiably usable

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::service::ServiceDependency;

/// Polls every dependency's probe concurrently and admits the run only
/// when all gated dependencies are healthy.
pub struct ReadinessGate {
    deadline: Duration,
}

impl ReadinessGate {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Poll each dependency at its own cadence, one logical task per
    /// dependency, until all resolve or the deadline fires. Names in
    /// `gated` must be healthy for the gate to open; other dependencies
    /// are polled too, but their failure is tolerated.
    pub async fn await_ready(
        &self,
        deps: &mut [ServiceDependency],
        gated: &[String],
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        if deps.is_empty() {
            return Ok(());
        }

        info!(
            "Waiting up to {:?} for {} dependency(ies)",
            self.deadline,
            deps.len()
        );

        let polls = futures::future::join_all(
            deps.iter_mut().map(|dep| dep.poll_until_healthy()),
        );

        tokio::select! {
            _ = polls => {}
            _ = tokio::time::sleep(self.deadline) => {
                warn!("Readiness deadline elapsed after {:?}", self.deadline);
            }
            _ = cancel.cancelled() => {
                return Err(HarnessError::Cancelled);
            }
        }

        // Anything still starting when the deadline cut polling short is
        // as unusable as an exhausted probe.
        for dep in deps.iter_mut() {
            if !dep.healthy() {
                dep.mark_failed();
            }
        }

        let pending: Vec<String> = deps
            .iter()
            .filter(|d| !d.healthy() && gated.iter().any(|g| g.as_str() == d.name()))
            .map(|d| d.name().to_string())
            .collect();

        if pending.is_empty() {
            info!("All gated dependencies healthy");
            Ok(())
        } else {
            Err(HarnessError::ReadinessTimeout { pending })
        }
    }
}
