//! Service dependency lifecycle - spawning, address binding, teardown

use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::plan::{DependencySpec, ServiceRole};
use crate::probe::HealthProbe;

/// Grace period between SIGTERM and force kill
const TERM_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Healthy,
    Failed,
    /// Stopped after use
    Retired,
}

/// One ephemeral service, owned by the pipeline for the run's lifetime
pub struct ServiceDependency {
    spec: DependencySpec,
    probe: HealthProbe,
    state: ServiceState,
    child: Option<Child>,
    addr: Option<SocketAddr>,
}

impl ServiceDependency {
    pub fn new(spec: DependencySpec) -> HarnessResult<Self> {
        let probe = HealthProbe::new(spec.probe.clone())?;
        Ok(Self {
            spec,
            probe,
            state: ServiceState::Stopped,
            child: None,
            addr: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn role(&self) -> ServiceRole {
        self.spec.role
    }

    pub fn optional(&self) -> bool {
        self.spec.optional
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn healthy(&self) -> bool {
        self.state == ServiceState::Healthy
    }

    /// Bound address; read-only for consumers once `start` has returned
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn started(&self) -> bool {
        self.child.is_some() || self.state == ServiceState::Retired
    }

    /// Launch the underlying process. Stdout and stderr land in
    /// per-service files under `log_dir`.
    pub fn start(&mut self, log_dir: &Path) -> HarnessResult<()> {
        let port = match self.spec.port {
            Some(p) => p,
            None => find_free_port()?,
        };
        let addr: SocketAddr = format!("127.0.0.1:{}", port)
            .parse()
            .map_err(|e| HarnessError::Provision {
                service: self.spec.name.clone(),
                reason: format!("bad address: {}", e),
            })?;

        std::fs::create_dir_all(log_dir)?;
        let stdout = File::create(log_dir.join(format!("{}.stdout.log", self.spec.name)))?;
        let stderr = File::create(log_dir.join(format!("{}.stderr.log", self.spec.name)))?;

        info!("Starting '{}' on port {}", self.spec.name, port);

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .env(&self.spec.port_env, port.to_string())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let child = cmd.spawn().map_err(|e| {
            self.state = ServiceState::Failed;
            HarnessError::Provision {
                service: self.spec.name.clone(),
                reason: format!("failed to spawn {}: {}", self.spec.command, e),
            }
        })?;

        self.child = Some(child);
        self.addr = Some(addr);
        self.state = ServiceState::Starting;
        Ok(())
    }

    /// Poll this service's probe at its fixed interval until it reports
    /// healthy or the attempt budget is spent.
    pub(crate) async fn poll_until_healthy(&mut self) {
        let Some(addr) = self.addr else {
            self.state = ServiceState::Failed;
            return;
        };

        let interval = self.probe.interval();
        let max_attempts = self.probe.max_attempts();

        for attempt in 1..=max_attempts {
            if self.probe.is_healthy(addr).await {
                debug!(
                    "'{}' healthy after {} attempt(s)",
                    self.spec.name, attempt
                );
                self.state = ServiceState::Healthy;
                return;
            }
            if attempt < max_attempts {
                sleep(interval).await;
            }
        }

        warn!(
            "'{}' not healthy after {} attempts",
            self.spec.name, max_attempts
        );
        self.state = ServiceState::Failed;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = ServiceState::Failed;
    }

    /// Stop the underlying process. Idempotent: a second call, or a call
    /// on a dependency that never started, is a no-op.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("Stopping '{}' (pid: {})", self.spec.name, child.id());

        // Graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(TERM_GRACE);
            }
        }

        if let Err(e) = child.kill() {
            warn!("'{}' kill failed: {}", self.spec.name, e);
        }
        if let Err(e) = child.wait() {
            warn!("'{}' wait failed: {}", self.spec.name, e);
        }

        self.state = ServiceState::Retired;
    }
}

impl Drop for ServiceDependency {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Find a free port to use
pub fn find_free_port() -> HarnessResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ProbeKind, ProbeSpec};
    use std::collections::BTreeMap;

    fn sleeper_spec(name: &str) -> DependencySpec {
        DependencySpec {
            name: name.to_string(),
            role: ServiceRole::Generic,
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            env: BTreeMap::new(),
            port: None,
            port_env: "PORT".to_string(),
            optional: false,
            probe: ProbeSpec {
                kind: ProbeKind::Tcp,
                interval_ms: 10,
                max_attempts: 2,
            },
        }
    }

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[test]
    fn test_start_records_address_and_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut dep = ServiceDependency::new(sleeper_spec("sleeper")).unwrap();

        assert_eq!(dep.state(), ServiceState::Stopped);
        dep.start(dir.path()).unwrap();
        assert_eq!(dep.state(), ServiceState::Starting);
        assert!(dep.addr().is_some());
        assert!(dep.started());

        dep.stop();
        assert_eq!(dep.state(), ServiceState::Retired);
        // Second stop is a no-op, never an error
        dep.stop();
        assert_eq!(dep.state(), ServiceState::Retired);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut dep = ServiceDependency::new(sleeper_spec("idle")).unwrap();
        dep.stop();
        assert_eq!(dep.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_spawn_failure_is_provision_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sleeper_spec("ghost");
        spec.command = "/nonexistent/binary".to_string();

        let mut dep = ServiceDependency::new(spec).unwrap();
        let err = dep.start(dir.path()).unwrap_err();
        assert!(matches!(err, HarnessError::Provision { .. }));
        assert_eq!(dep.state(), ServiceState::Failed);
    }
}
