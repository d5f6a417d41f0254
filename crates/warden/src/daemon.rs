//! Background renewal daemon.
//!
//! The periodic trigger the orchestrator needs: runs a tick at a fixed
//! interval, never overlapping (the next tick waits for the previous one
//! to finish or hit its deadline), and holds no domain logic of its own.
//! SIGTERM/SIGINT shut the loop down; SIGHUP resets the orchestrator and
//! runs an immediate check after operator intervention.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorState};

/// Default check interval (12 hours)
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Default upper bound on a single tick
const DEFAULT_TICK_DEADLINE: Duration = Duration::from_secs(600);

/// Default delay before the first tick
const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Periodic driver for the [`Orchestrator`].
pub struct RenewalDaemon {
    orchestrator: Orchestrator,
    check_interval: Duration,
    tick_deadline: Duration,
    startup_delay: Duration,
}

impl RenewalDaemon {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            check_interval: DEFAULT_CHECK_INTERVAL,
            tick_deadline: DEFAULT_TICK_DEADLINE,
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }

    /// Set the check interval, clamped to a minimum of 1 hour to avoid
    /// hammering the CA.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    /// Set the per-tick deadline.
    pub fn with_tick_deadline(mut self, deadline: Duration) -> Self {
        self.tick_deadline = deadline;
        self
    }

    /// Set the delay before the first tick.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(mut self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            tick_deadline_secs = self.tick_deadline.as_secs(),
            "Starting renewal daemon"
        );

        // Let sibling services come up before the first attempt
        tokio::time::sleep(self.startup_delay).await;
        self.run_tick().await;

        let mut ticker = interval_at(
            Instant::now() + self.check_interval,
            self.check_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.run_loop(&mut ticker).await;

        info!("Renewal daemon stopped");
    }

    #[cfg(unix)]
    async fn run_loop(&mut self, ticker: &mut tokio::time::Interval) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Running scheduled orchestration check");
                    self.run_tick().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received interrupt, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, resetting orchestrator and checking now");
                    self.orchestrator.reset();
                    self.run_tick().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn run_loop(&mut self, ticker: &mut tokio::time::Interval) {
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Running scheduled orchestration check");
                    self.run_tick().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received interrupt, shutting down");
                    break;
                }
            }
        }
    }

    /// One bounded tick. Failures are logged and left for the next tick;
    /// nothing here panics or exits the process.
    async fn run_tick(&mut self) {
        match tokio::time::timeout(self.tick_deadline, self.orchestrator.tick()).await {
            Ok(outcome) => {
                if outcome.profile_changed {
                    info!(
                        profile = ?self.orchestrator.active_profile(),
                        "Active proxy profile changed, reload confirmed"
                    );
                }
                match &outcome.state {
                    OrchestratorState::Failed(reason) => warn!(
                        reason = %reason,
                        "Orchestration check failed, retrying on next tick"
                    ),
                    OrchestratorState::Blocked => warn!(
                        "Orchestrator blocked pending reconfiguration (fix config, then SIGHUP)"
                    ),
                    state => debug!(state = ?state, "Orchestration check complete"),
                }
            }
            Err(_) => error!(
                deadline_secs = self.tick_deadline.as_secs(),
                "Orchestration tick exceeded its deadline and was cancelled"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ReadinessProbe;
    use crate::orchestrator::{GateSettings, OrchestratorSettings};
    use crate::proxy::{ProfileSwitcher, RenderContext};
    use crate::store::CertificateStore;
    use crate::testutil::{MockProxyHandle, StaticProbe};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;
    use warden_acme::{
        CaError, CertificateAuthority, ChallengePublisher, IssuedCertificate,
    };
    use warden_common::{DomainSet, RetryPolicy};

    /// CA that never answers within a tick deadline.
    struct StallingCa;

    #[async_trait]
    impl CertificateAuthority for StallingCa {
        async fn request_certificate(
            &self,
            _domains: &DomainSet,
            _contact_email: &str,
            _challenges: &ChallengePublisher,
        ) -> Result<IssuedCertificate, CaError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(CaError::Transient("unreachable".into()))
        }
    }

    fn orchestrator_with_ca(
        ca: Arc<dyn CertificateAuthority>,
        dirs: &(TempDir, TempDir, TempDir),
    ) -> Orchestrator {
        let domains = DomainSet::new(["example.test"]).unwrap();
        let store = CertificateStore::new(dirs.0.path()).unwrap();
        let challenges = ChallengePublisher::new(dirs.1.path()).unwrap();
        let (cert_path, key_path) = store.certificate_paths(&domains);

        let context = RenderContext {
            domains: domains.clone(),
            webroot: dirs.1.path().to_path_buf(),
            frontend_addr: "frontend:3000".to_string(),
            backend_addr: "backend:8000".to_string(),
            cert_path,
            key_path,
        };
        let switcher = ProfileSwitcher::new(
            dirs.2.path().join("conf.d"),
            context,
            MockProxyHandle::ok() as Arc<dyn crate::runtime::ProxyHandle>,
        );

        Orchestrator::new(
            OrchestratorSettings {
                domains,
                contact_email: "ops@example.test".to_string(),
                renewal_threshold_days: 30,
                gate: GateSettings {
                    timeout: Duration::from_millis(50),
                    poll_interval: Duration::from_millis(10),
                },
                retry: RetryPolicy::no_retries(),
            },
            store,
            switcher,
            ca,
            challenges,
            StaticProbe::ready() as Arc<dyn ReadinessProbe>,
        )
    }

    #[test]
    fn test_interval_clamped_to_minimum() {
        let dirs = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let orchestrator = orchestrator_with_ca(Arc::new(StallingCa), &dirs);

        let daemon = RenewalDaemon::new(orchestrator).with_interval(Duration::from_secs(60));
        assert_eq!(daemon.check_interval, MIN_CHECK_INTERVAL);
    }

    #[tokio::test]
    async fn test_tick_deadline_bounds_a_stalled_ca() {
        let dirs = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let orchestrator = orchestrator_with_ca(Arc::new(StallingCa), &dirs);
        let mut daemon =
            RenewalDaemon::new(orchestrator).with_tick_deadline(Duration::from_millis(100));

        let start = std::time::Instant::now();
        daemon.run_tick().await;

        // The stalled CA call was cancelled at the deadline, and the
        // daemon survived it
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
