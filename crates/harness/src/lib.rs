//! TestRig Orchestration Harness
//!
//! Provisions ephemeral service dependencies, gates on their health,
//! installs a system-under-test, runs ordered test tiers against it, and
//! produces a unified report - tearing everything down regardless of
//! outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Pipeline (state machine)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Provisioning      ServiceDependency::start() per service    │
//! │  AwaitingReadiness ReadinessGate polls every HealthProbe     │
//! │  Installing        Installer::install() + enable_feature()   │
//! │  RunningTiers      TierExecutor::run() per tier, in order    │
//! │  TearingDown       stop() every started dependency           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The installer, the feature-enable procedure and the tier test bodies
//! are opaque collaborators behind the [`install::Installer`] and
//! [`tier::TierExecutor`] traits; production impls shell out to the
//! commands named in the YAML [`plan::RunPlan`].

pub mod error;
pub mod gate;
pub mod install;
pub mod pipeline;
pub mod plan;
pub mod probe;
pub mod report;
pub mod service;
pub mod tier;

pub use error::{HarnessError, HarnessResult};
pub use install::{CommandInstaller, InstallContext, InstalledSystem, Installer};
pub use pipeline::{Phase, Pipeline};
pub use plan::RunPlan;
pub use report::{OverallStatus, Report};
pub use tier::{CommandTierExecutor, TierExecutor, TierResult};
