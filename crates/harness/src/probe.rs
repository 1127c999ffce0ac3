//! Readiness probes - single health checks against one service endpoint

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::error::HarnessResult;
use crate::plan::{ProbeKind, ProbeSpec};

/// Upper bound on a single probe attempt, independent of the retry cadence
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Stateless health check, invoked repeatedly by the readiness gate
pub struct HealthProbe {
    spec: ProbeSpec,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(spec: ProbeSpec) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()?;
        Ok(Self { spec, client })
    }

    pub fn interval(&self) -> Duration {
        self.spec.interval()
    }

    pub fn max_attempts(&self) -> u32 {
        self.spec.max_attempts
    }

    /// One attempt: true means the service answered as healthy
    pub async fn is_healthy(&self, addr: SocketAddr) -> bool {
        match &self.spec.kind {
            ProbeKind::Tcp => self.check_tcp(addr).await,
            ProbeKind::Http { path } => self.check_http(addr, path).await,
            ProbeKind::Command { command, args } => {
                self.check_command(addr, command, args).await
            }
        }
    }

    async fn check_tcp(&self, addr: SocketAddr) -> bool {
        matches!(
            tokio::time::timeout(ATTEMPT_TIMEOUT, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    async fn check_http(&self, addr: SocketAddr, path: &str) -> bool {
        let url = format!("http://{}{}", addr, path);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!("probe {} returned {}", url, resp.status());
                false
            }
            Err(e) => {
                // Connection refused is expected while the service is starting
                if !e.is_connect() {
                    debug!("probe {} error: {}", url, e);
                }
                false
            }
        }
    }

    async fn check_command(&self, addr: SocketAddr, command: &str, args: &[String]) -> bool {
        let status = tokio::time::timeout(
            ATTEMPT_TIMEOUT,
            Command::new(command)
                .args(args)
                .env("SERVICE_ADDR", addr.to_string())
                .env("SERVICE_PORT", addr.port().to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;

        matches!(status, Ok(Ok(s)) if s.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ProbeSpec;
    use std::net::TcpListener;

    fn spec(kind: ProbeKind) -> ProbeSpec {
        ProbeSpec {
            kind,
            interval_ms: 10,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = HealthProbe::new(spec(ProbeKind::Tcp)).unwrap();
        assert!(probe.is_healthy(addr).await);

        drop(listener);
        assert!(!probe.is_healthy(addr).await);
    }

    #[tokio::test]
    async fn test_command_probe_exit_status() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let ok = HealthProbe::new(spec(ProbeKind::Command {
            command: "true".to_string(),
            args: vec![],
        }))
        .unwrap();
        assert!(ok.is_healthy(addr).await);

        let bad = HealthProbe::new(spec(ProbeKind::Command {
            command: "false".to_string(),
            args: vec![],
        }))
        .unwrap();
        assert!(!bad.is_healthy(addr).await);
    }
}
