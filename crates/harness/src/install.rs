//! System-under-test installation - opaque external procedure behind a trait

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::plan::InstallSpec;

/// BSD sysexits code the command installer treats as retryable
const EX_TEMPFAIL: i32 = 75;

/// Opaque handle to the installed system, passed through to tier executors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledSystem {
    pub handle: String,
}

/// Explicit configuration handed to the installer. Bound addresses are
/// read-only once provisioning has finished; nothing here is ambient
/// process state.
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Address of the database dependency, when one is declared
    pub database_addr: Option<SocketAddr>,

    /// Bound address of every healthy dependency, by name
    pub service_addrs: BTreeMap<String, SocketAddr>,

    /// Run output directory (report, logs, artifacts)
    pub output_dir: PathBuf,
}

impl InstallContext {
    /// Environment-variable form of this context, for command collaborators
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(addr) = self.database_addr {
            vars.push(("DATABASE_ADDR".to_string(), addr.to_string()));
        }
        for (name, addr) in &self.service_addrs {
            let key: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            vars.push((format!("{}_ADDR", key), addr.to_string()));
        }
        vars.push((
            "OUTPUT_DIR".to_string(),
            self.output_dir.to_string_lossy().to_string(),
        ));
        vars
    }
}

/// The external installation procedure. Implementations classify their
/// own failures: `InstallTransient` is retried once by the pipeline,
/// anything else aborts the run.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, ctx: &InstallContext) -> HarnessResult<InstalledSystem>;

    async fn enable_feature(
        &self,
        system: &InstalledSystem,
        feature: &str,
    ) -> HarnessResult<()>;
}

/// Drive one installation: at most one automatic retry on a transient
/// failure, then enable each feature in order. Any feature failure is
/// fatal.
pub(crate) async fn run_install(
    installer: &dyn Installer,
    ctx: &InstallContext,
    features: &[String],
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> HarnessResult<InstalledSystem> {
    let system = match installer.install(ctx).await {
        Ok(system) => system,
        Err(HarnessError::InstallTransient(reason)) => {
            warn!("Transient install failure, retrying once: {}", reason);
            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                _ = cancel.cancelled() => return Err(HarnessError::Cancelled),
            }
            installer.install(ctx).await?
        }
        Err(e) => return Err(e),
    };

    for feature in features {
        info!("Enabling feature '{}'", feature);
        installer
            .enable_feature(&system, feature)
            .await
            .map_err(|e| match e {
                fatal @ HarnessError::InstallFatal(_) => fatal,
                other => HarnessError::InstallFatal(format!(
                    "enabling '{}': {}",
                    feature, other
                )),
            })?;
    }

    Ok(system)
}

/// Production installer: shells out to the configured bootstrap command.
///
/// Contract with the external script: invoked bare it installs the system
/// and prints an opaque handle as the last line of stdout; invoked as
/// `<command> enable <feature> <handle>` it enables one feature. Exit 0
/// is success, exit 75 (EX_TEMPFAIL) is a transient failure, anything
/// else is fatal.
pub struct CommandInstaller {
    spec: InstallSpec,
}

impl CommandInstaller {
    pub fn new(spec: InstallSpec) -> Self {
        Self { spec }
    }

    async fn invoke(
        &self,
        extra_args: &[String],
        ctx: Option<&InstallContext>,
    ) -> HarnessResult<String> {
        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .args(extra_args)
            .envs(self.spec.env.clone());
        if let Some(ctx) = ctx {
            cmd.envs(ctx.env_vars());
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| {
                HarnessError::InstallFatal(format!(
                    "failed to spawn {}: {}",
                    self.spec.command, e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(stdout)
        } else if output.status.code() == Some(EX_TEMPFAIL) {
            Err(HarnessError::InstallTransient(stderr.trim().to_string()))
        } else {
            Err(HarnessError::InstallFatal(format!(
                "{} exited with {:?}\nstdout: {}\nstderr: {}",
                self.spec.command,
                output.status.code(),
                stdout.trim(),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, ctx: &InstallContext) -> HarnessResult<InstalledSystem> {
        let stdout = self.invoke(&[], Some(ctx)).await?;
        let handle = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(InstalledSystem { handle })
    }

    async fn enable_feature(
        &self,
        system: &InstalledSystem,
        feature: &str,
    ) -> HarnessResult<()> {
        self.invoke(
            &[
                "enable".to_string(),
                feature.to_string(),
                system.handle.clone(),
            ],
            None,
        )
        .await?;
        Ok(())
    }
}
