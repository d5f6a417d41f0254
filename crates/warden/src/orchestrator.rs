//! Bootstrap and renewal orchestration.
//!
//! The state machine that decides whether to issue, renew, or skip, and
//! sequences proxy profile switches around CA calls. A tick steps through
//! states until it reaches a resting state (`SteadyState`, `Failed`, or
//! `Blocked`); the renewal daemon guarantees ticks never overlap.
//!
//! Every collaborator error is converted into a `Failed` transition at
//! this boundary - nothing propagates as a process crash, and the proxy
//! keeps serving its last-known-good profile throughout.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use warden_acme::{CaError, CertificateAuthority, ChallengePublisher, IssuedCertificate};
use warden_common::{gate, DomainSet, RetryPolicy};

use crate::health::ReadinessProbe;
use crate::proxy::{ProfileSwitcher, ProxyProfile};
use crate::store::{AccountRef, CertificateRecord, CertificateStore};

/// Why an orchestration attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The proxy never became reachable on the challenge path
    ProxyUnreachable,
    /// Profile switch failed; the previous profile is still active
    SwitchFailed(String),
    /// The certificate authority rejected or could not complete the request
    CertificateAuthority(CaError),
    /// Certificate store persistence failed
    Store(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProxyUnreachable => write!(f, "proxy unreachable on challenge path"),
            Self::SwitchFailed(e) => write!(f, "profile switch failed: {e}"),
            Self::CertificateAuthority(e) => write!(f, "certificate authority: {e}"),
            Self::Store(e) => write!(f, "certificate store: {e}"),
        }
    }
}

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorState {
    /// Entry state: consult the store and decide
    Uninitialized,
    /// Challenge profile activating; waiting for external reachability
    AwaitingChallengeServing,
    /// CA call in flight (with bounded backoff on transient failures)
    RequestingCertificate,
    /// Certificate stored; secure profile not yet active
    Issued,
    /// Valid certificate active; nothing to do until expiry approaches
    SteadyState,
    /// Certificate expires within the threshold; reissue
    RenewalDue,
    /// The CA called the request invalid; no retry until reconfiguration
    Blocked,
    /// The attempt failed; retried on the next tick
    Failed(FailureReason),
}

/// An operator-visible failure report.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub reason: FailureReason,
    pub at: DateTime<Utc>,
    pub domains: DomainSet,
}

/// Readiness gate timing.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub timeout: StdDuration,
    pub poll_interval: StdDuration,
}

/// Orchestrator construction parameters.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub domains: DomainSet,
    pub contact_email: String,
    pub renewal_threshold_days: u32,
    pub gate: GateSettings,
    pub retry: RetryPolicy,
}

/// Outcome of a single tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Resting state the tick ended in
    pub state: OrchestratorState,
    /// Whether the active proxy profile changed during the tick
    pub profile_changed: bool,
}

/// The bootstrap and renewal orchestrator.
///
/// Single-writer: owns its state exclusively. Nothing here is persisted
/// across restarts except through the certificate store.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: CertificateStore,
    switcher: ProfileSwitcher,
    ca: Arc<dyn CertificateAuthority>,
    challenges: ChallengePublisher,
    probe: Arc<dyn ReadinessProbe>,
    state: OrchestratorState,
    /// No CA contact before this instant (rate-limit hold-off)
    holdoff_until: Option<Instant>,
    last_failure: Option<FailureReport>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        store: CertificateStore,
        switcher: ProfileSwitcher,
        ca: Arc<dyn CertificateAuthority>,
        challenges: ChallengePublisher,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            settings,
            store,
            switcher,
            ca,
            challenges,
            probe,
            state: OrchestratorState::Uninitialized,
            holdoff_until: None,
            last_failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Currently active proxy profile.
    pub fn active_profile(&self) -> Option<ProxyProfile> {
        self.switcher.active()
    }

    /// Most recent failure report, if any attempt has failed.
    pub fn last_failure(&self) -> Option<&FailureReport> {
        self.last_failure.as_ref()
    }

    /// Clear `Blocked` and any rate-limit hold-off after operator
    /// intervention (configuration change, SIGHUP).
    pub fn reset(&mut self) {
        info!(domains = %self.settings.domains, "Resetting orchestrator state");
        self.state = OrchestratorState::Uninitialized;
        self.holdoff_until = None;
    }

    /// Run one orchestration attempt to a resting state.
    pub async fn tick(&mut self) -> TickOutcome {
        let profile_before = self.switcher.active();

        if self.state == OrchestratorState::Blocked {
            debug!(
                domains = %self.settings.domains,
                "Orchestrator is blocked pending reconfiguration, skipping tick"
            );
            return self.outcome(profile_before);
        }

        // Failed and SteadyState both re-enter the expiry-check decision.
        self.transition(OrchestratorState::Uninitialized);

        loop {
            match self.state.clone() {
                OrchestratorState::Uninitialized => self.decide().await,
                OrchestratorState::AwaitingChallengeServing => self.await_challenge_serving().await,
                OrchestratorState::RequestingCertificate => self.request_certificate().await,
                OrchestratorState::Issued => self.activate_secure().await,
                OrchestratorState::RenewalDue => self.renew().await,
                OrchestratorState::SteadyState
                | OrchestratorState::Blocked
                | OrchestratorState::Failed(_) => break,
            }
        }

        self.outcome(profile_before)
    }

    fn outcome(&self, profile_before: Option<ProxyProfile>) -> TickOutcome {
        TickOutcome {
            state: self.state.clone(),
            profile_changed: self.switcher.active() != profile_before,
        }
    }

    /// `Uninitialized`: consult the store and pick a path.
    async fn decide(&mut self) {
        match self.store.lookup(&self.settings.domains) {
            Ok(Some(record)) if !record.expires_within(self.settings.renewal_threshold_days) => {
                debug!(
                    domains = %self.settings.domains,
                    expires = %record.expires_at,
                    "Certificate valid beyond threshold"
                );
                self.ensure_secure_active().await;
            }
            Ok(Some(record)) => {
                info!(
                    domains = %self.settings.domains,
                    expires = %record.expires_at,
                    threshold_days = self.settings.renewal_threshold_days,
                    "Certificate expires within threshold, renewal due"
                );
                self.transition(OrchestratorState::RenewalDue);
            }
            Ok(None) => {
                info!(
                    domains = %self.settings.domains,
                    "No certificate stored, starting bootstrap"
                );
                self.transition(OrchestratorState::AwaitingChallengeServing);
            }
            Err(e) => self.fail(FailureReason::Store(e.to_string())),
        }
    }

    /// Valid certificate on disk: make sure the proxy serves it.
    async fn ensure_secure_active(&mut self) {
        if self.switcher.active() == Some(ProxyProfile::Secure) {
            self.transition(OrchestratorState::SteadyState);
            return;
        }
        match self.switcher.activate(ProxyProfile::Secure).await {
            Ok(()) => self.transition(OrchestratorState::SteadyState),
            Err(e) => self.fail(FailureReason::SwitchFailed(e.to_string())),
        }
    }

    /// `AwaitingChallengeServing`: challenge profile up, gate on external
    /// reachability of the ACME path.
    async fn await_challenge_serving(&mut self) {
        if let Err(e) = self.switcher.activate(ProxyProfile::ChallengeOnly).await {
            self.fail(FailureReason::SwitchFailed(e.to_string()));
            return;
        }

        if self.gate_on_challenge_path().await {
            self.transition(OrchestratorState::RequestingCertificate);
        } else {
            self.fail(FailureReason::ProxyUnreachable);
        }
    }

    async fn gate_on_challenge_path(&self) -> bool {
        let probe = Arc::clone(&self.probe);
        gate::wait_until_ready(
            || {
                let probe = Arc::clone(&probe);
                async move { probe.is_ready().await }
            },
            self.settings.gate.timeout,
            self.settings.gate.poll_interval,
        )
        .await
        .is_ok()
    }

    /// `RequestingCertificate`: CA call with backoff, then persist.
    async fn request_certificate(&mut self) {
        if self.holdoff_active() {
            return;
        }

        match self.call_ca_with_backoff().await {
            Ok(issued) => {
                if self.persist(issued) {
                    self.transition(OrchestratorState::Issued);
                }
            }
            Err(e) => self.handle_ca_error(e),
        }
    }

    /// `Issued`: switch the proxy onto the new certificate.
    async fn activate_secure(&mut self) {
        match self.switcher.activate(ProxyProfile::Secure).await {
            Ok(()) => {
                info!(domains = %self.settings.domains, "Secure profile active, bootstrap complete");
                self.transition(OrchestratorState::SteadyState);
            }
            // The switcher has already rolled back to the last-known-good
            // profile; the stored certificate stays for the next attempt.
            Err(e) => self.fail(FailureReason::SwitchFailed(e.to_string())),
        }
    }

    /// `RenewalDue`: renewal is reissuance. The secure profile keeps the
    /// challenge path served on port 80, so no profile switch happens; on
    /// any failure the still-valid certificate stays active.
    async fn renew(&mut self) {
        if !self.gate_on_challenge_path().await {
            self.fail(FailureReason::ProxyUnreachable);
            return;
        }

        if self.holdoff_active() {
            return;
        }

        match self.call_ca_with_backoff().await {
            Ok(issued) => {
                if !self.persist(issued) {
                    return;
                }
                let result = if self.switcher.active() == Some(ProxyProfile::Secure) {
                    // Same profile, new certificate files: reload required
                    self.switcher.refresh().await
                } else {
                    self.switcher.activate(ProxyProfile::Secure).await
                };
                match result {
                    Ok(()) => {
                        info!(domains = %self.settings.domains, "Certificate renewed");
                        self.transition(OrchestratorState::SteadyState);
                    }
                    Err(e) => self.fail(FailureReason::SwitchFailed(e.to_string())),
                }
            }
            Err(e) => self.handle_ca_error(e),
        }
    }

    /// Call the CA, retrying only transient failures, with strictly
    /// increasing backoff, at most `retry.max_attempts` times.
    async fn call_ca_with_backoff(&self) -> Result<IssuedCertificate, CaError> {
        let mut delays = self.settings.retry.delays();
        let mut attempt = 1u32;

        loop {
            let result = self
                .ca
                .request_certificate(
                    &self.settings.domains,
                    &self.settings.contact_email,
                    &self.challenges,
                )
                .await;

            match result {
                Ok(issued) => return Ok(issued),
                Err(e) if e.is_retryable() => match delays.next() {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient CA failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(attempt, error = %e, "Transient CA failure, attempts exhausted");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Store the issued certificate. Returns `false` (after failing the
    /// tick) if persistence failed.
    fn persist(&mut self, issued: IssuedCertificate) -> bool {
        let record = match CertificateRecord::new(
            self.settings.domains.clone(),
            issued.cert_pem,
            issued.key_pem,
            Utc::now(),
            issued.expires_at,
            Some(self.settings.contact_email.clone()),
        ) {
            Ok(record) => record,
            Err(e) => {
                self.fail(FailureReason::Store(e.to_string()));
                return false;
            }
        };

        if let Err(e) = self.store.put(&record) {
            self.fail(FailureReason::Store(e.to_string()));
            return false;
        }

        // The account reference is bookkeeping; failing to write it must
        // not fail an otherwise successful issuance.
        match self.store.load_account() {
            Ok(Some(_)) => {}
            Ok(None) => {
                let account = AccountRef {
                    contact_email: self.settings.contact_email.clone(),
                    created: Utc::now(),
                };
                if let Err(e) = self.store.save_account(&account) {
                    warn!(error = %e, "Failed to save CA account reference");
                }
            }
            Err(e) => warn!(error = %e, "Failed to read CA account reference"),
        }

        true
    }

    /// Whether a rate-limit hold-off is still pending. Fails the tick
    /// (without contacting the CA) if so.
    fn holdoff_active(&mut self) -> bool {
        let Some(until) = self.holdoff_until else {
            return false;
        };

        let now = Instant::now();
        if now < until {
            let remaining = until - now;
            warn!(
                domains = %self.settings.domains,
                remaining_secs = remaining.as_secs(),
                "CA rate-limit hold-off pending, skipping CA call"
            );
            self.report(FailureReason::CertificateAuthority(CaError::RateLimited {
                retry_after: remaining,
            }));
            self.state = OrchestratorState::Failed(FailureReason::CertificateAuthority(
                CaError::RateLimited {
                    retry_after: remaining,
                },
            ));
            true
        } else {
            debug!("Rate-limit hold-off elapsed");
            self.holdoff_until = None;
            false
        }
    }

    fn handle_ca_error(&mut self, error: CaError) {
        match &error {
            CaError::RateLimited { retry_after } => {
                self.holdoff_until = Some(Instant::now() + *retry_after);
                self.fail(FailureReason::CertificateAuthority(error.clone()));
            }
            CaError::InvalidRequest(_) => {
                self.report(FailureReason::CertificateAuthority(error.clone()));
                warn!(
                    domains = %self.settings.domains,
                    error = %error,
                    "CA rejected the request as invalid; blocking retries until reconfiguration"
                );
                self.state = OrchestratorState::Blocked;
            }
            _ => self.fail(FailureReason::CertificateAuthority(error)),
        }
    }

    fn transition(&mut self, next: OrchestratorState) {
        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Record and report a failure, then enter `Failed`.
    fn fail(&mut self, reason: FailureReason) {
        self.report(reason.clone());
        self.state = OrchestratorState::Failed(reason);
    }

    fn report(&mut self, reason: FailureReason) {
        let report = FailureReport {
            reason,
            at: Utc::now(),
            domains: self.settings.domains.clone(),
        };
        error!(
            domains = %report.domains,
            at = %report.at,
            reason = %report.reason,
            "Orchestration attempt failed"
        );
        self.last_failure = Some(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RenderContext;
    use crate::store::StoreError;
    use crate::testutil::{issued, MockCa, MockProxyHandle, StaticProbe};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    struct Harness {
        orchestrator: Orchestrator,
        ca: Arc<MockCa>,
        handle: Arc<MockProxyHandle>,
        probe: Arc<StaticProbe>,
        /// Independent handle onto the same storage directory
        store_view: CertificateStore,
        _dirs: (TempDir, TempDir, TempDir),
    }

    fn domain_set() -> DomainSet {
        DomainSet::new(["example.test", "www.example.test", "api.example.test"]).unwrap()
    }

    fn record(days: i64) -> CertificateRecord {
        CertificateRecord::new(
            domain_set(),
            "old cert",
            "old key",
            Utc::now() - ChronoDuration::days(60),
            Utc::now() + ChronoDuration::days(days),
            None,
        )
        .unwrap()
    }

    fn harness() -> Harness {
        let store_dir = TempDir::new().unwrap();
        let webroot = TempDir::new().unwrap();
        let conf_dir = TempDir::new().unwrap();

        let store = CertificateStore::new(store_dir.path()).unwrap();
        let store_view = CertificateStore::new(store_dir.path()).unwrap();
        let challenges = warden_acme::ChallengePublisher::new(webroot.path()).unwrap();
        let ca = MockCa::new();
        let handle = MockProxyHandle::ok();
        let probe = StaticProbe::ready();

        let (cert_path, key_path) = store.certificate_paths(&domain_set());
        let context = RenderContext {
            domains: domain_set(),
            webroot: webroot.path().to_path_buf(),
            frontend_addr: "frontend:3000".to_string(),
            backend_addr: "backend:8000".to_string(),
            cert_path,
            key_path,
        };
        let switcher = ProfileSwitcher::new(
            conf_dir.path().join("conf.d"),
            context,
            handle.clone() as Arc<dyn crate::runtime::ProxyHandle>,
        );

        let settings = OrchestratorSettings {
            domains: domain_set(),
            contact_email: "ops@example.test".to_string(),
            renewal_threshold_days: 30,
            gate: GateSettings {
                timeout: StdDuration::from_millis(50),
                poll_interval: StdDuration::from_millis(10),
            },
            retry: RetryPolicy::new(3, StdDuration::from_millis(5), 2.0),
        };

        let orchestrator = Orchestrator::new(
            settings,
            store,
            switcher,
            ca.clone() as Arc<dyn CertificateAuthority>,
            challenges,
            probe.clone() as Arc<dyn ReadinessProbe>,
        );

        Harness {
            orchestrator,
            ca,
            handle,
            probe,
            store_view,
            _dirs: (store_dir, webroot, conf_dir),
        }
    }

    #[tokio::test]
    async fn test_fresh_bootstrap_reaches_steady_state() {
        let mut h = harness();

        let outcome = h.orchestrator.tick().await;

        assert_eq!(outcome.state, OrchestratorState::SteadyState);
        assert!(outcome.profile_changed);
        assert_eq!(h.ca.calls(), 1);
        // One challenge-only activation, one secure activation
        assert_eq!(h.handle.reloads(), 2);
        assert_eq!(h.orchestrator.active_profile(), Some(ProxyProfile::Secure));

        // Exactly one record persisted
        let stored = h.store_view.lookup(&domain_set()).unwrap().unwrap();
        assert!(!stored.expires_within(30));
    }

    #[tokio::test]
    async fn test_valid_certificate_makes_no_ca_call() {
        let mut h = harness();
        h.store_view.put(&record(40)).unwrap();

        let outcome = h.orchestrator.tick().await;

        assert_eq!(outcome.state, OrchestratorState::SteadyState);
        assert_eq!(h.ca.calls(), 0);
        assert_eq!(h.orchestrator.active_profile(), Some(ProxyProfile::Secure));
    }

    #[tokio::test]
    async fn test_steady_state_ticks_are_idempotent() {
        let mut h = harness();
        h.store_view.put(&record(40)).unwrap();

        let first = h.orchestrator.tick().await;
        assert!(first.profile_changed);
        let reloads_after_first = h.handle.reloads();

        let second = h.orchestrator.tick().await;

        assert_eq!(second.state, OrchestratorState::SteadyState);
        assert!(!second.profile_changed);
        assert_eq!(h.handle.reloads(), reloads_after_first);
        assert_eq!(h.ca.calls(), 0);
    }

    #[tokio::test]
    async fn test_renewal_due_reissues_once() {
        let mut h = harness();
        h.store_view.put(&record(5)).unwrap();

        let outcome = h.orchestrator.tick().await;

        assert_eq!(outcome.state, OrchestratorState::SteadyState);
        assert_eq!(h.ca.calls(), 1);

        let stored = h.store_view.lookup(&domain_set()).unwrap().unwrap();
        assert!(!stored.expires_within(30), "expiry must be updated");
    }

    #[tokio::test]
    async fn test_renewal_under_secure_profile_reloads_in_place() {
        let mut h = harness();
        h.store_view.put(&record(40)).unwrap();

        // Reach steady state on the old certificate
        h.orchestrator.tick().await;
        assert_eq!(h.handle.reloads(), 1);

        // Age the stored record into the renewal window
        h.store_view.put(&record(5)).unwrap();

        let outcome = h.orchestrator.tick().await;

        assert_eq!(outcome.state, OrchestratorState::SteadyState);
        assert_eq!(h.ca.calls(), 1);
        // Profile unchanged, but the proxy reloaded for the new files
        assert!(!outcome.profile_changed);
        assert_eq!(h.handle.reloads(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_fail() {
        let mut h = harness();
        h.ca.push(Err(CaError::Transient("503".into())));
        h.ca.push(Err(CaError::Transient("503".into())));
        h.ca.push(Err(CaError::Transient("503".into())));

        let outcome = h.orchestrator.tick().await;

        // Retry policy allows 3 attempts, all consumed
        assert_eq!(h.ca.calls(), 3);
        assert!(matches!(
            outcome.state,
            OrchestratorState::Failed(FailureReason::CertificateAuthority(CaError::Transient(_)))
        ));
        assert!(h.orchestrator.last_failure().is_some());
    }

    #[tokio::test]
    async fn test_transient_then_success_within_attempts() {
        let mut h = harness();
        h.ca.push(Err(CaError::Transient("503".into())));
        h.ca.push(Ok(issued(90)));

        let outcome = h.orchestrator.tick().await;

        assert_eq!(outcome.state, OrchestratorState::SteadyState);
        assert_eq!(h.ca.calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_imposes_holdoff() {
        let mut h = harness();
        h.ca.push(Err(CaError::RateLimited {
            retry_after: StdDuration::from_secs(3600),
        }));

        let first = h.orchestrator.tick().await;
        assert!(matches!(
            first.state,
            OrchestratorState::Failed(FailureReason::CertificateAuthority(
                CaError::RateLimited { .. }
            ))
        ));
        assert_eq!(h.ca.calls(), 1);

        // A tick before the hold-off elapses must not contact the CA
        let second = h.orchestrator.tick().await;
        assert_eq!(h.ca.calls(), 1);
        assert!(matches!(
            second.state,
            OrchestratorState::Failed(FailureReason::CertificateAuthority(
                CaError::RateLimited { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_blocks_until_reset() {
        let mut h = harness();
        h.ca.push(Err(CaError::InvalidRequest("bad domain".into())));

        let first = h.orchestrator.tick().await;
        assert_eq!(first.state, OrchestratorState::Blocked);
        assert_eq!(h.ca.calls(), 1);

        // Blocked short-circuits: no store lookups, no CA calls
        let second = h.orchestrator.tick().await;
        assert_eq!(second.state, OrchestratorState::Blocked);
        assert_eq!(h.ca.calls(), 1);

        // Operator intervention clears the block
        h.orchestrator.reset();
        let third = h.orchestrator.tick().await;
        assert_eq!(third.state, OrchestratorState::SteadyState);
        assert_eq!(h.ca.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_fails_without_ca_call() {
        let mut h = harness();
        h.probe.set_ready(false);

        let outcome = h.orchestrator.tick().await;

        assert_eq!(
            outcome.state,
            OrchestratorState::Failed(FailureReason::ProxyUnreachable)
        );
        assert_eq!(h.ca.calls(), 0);
        // Challenge profile stays active for the next attempt
        assert_eq!(
            h.orchestrator.active_profile(),
            Some(ProxyProfile::ChallengeOnly)
        );
    }

    #[tokio::test]
    async fn test_failed_is_not_terminal() {
        let mut h = harness();
        h.probe.set_ready(false);

        let first = h.orchestrator.tick().await;
        assert!(matches!(first.state, OrchestratorState::Failed(_)));

        h.probe.set_ready(true);
        let second = h.orchestrator.tick().await;
        assert_eq!(second.state, OrchestratorState::SteadyState);
    }

    #[tokio::test]
    async fn test_renewal_failure_keeps_secure_profile() {
        let mut h = harness();
        h.store_view.put(&record(40)).unwrap();
        h.orchestrator.tick().await;
        assert_eq!(h.orchestrator.active_profile(), Some(ProxyProfile::Secure));
        let reloads_before = h.handle.reloads();

        h.store_view.put(&record(5)).unwrap();
        h.ca.push(Err(CaError::ValidationFailed("dns broken".into())));

        let outcome = h.orchestrator.tick().await;

        assert!(matches!(
            outcome.state,
            OrchestratorState::Failed(FailureReason::CertificateAuthority(
                CaError::ValidationFailed(_)
            ))
        ));
        // Still serving the old, still-valid certificate
        assert_eq!(h.orchestrator.active_profile(), Some(ProxyProfile::Secure));
        assert_eq!(h.handle.reloads(), reloads_before);
        // The stored record is untouched
        let stored = h.store_view.lookup(&domain_set()).unwrap().unwrap();
        assert!(stored.expires_within(30));
    }

    #[tokio::test]
    async fn test_secure_switch_failure_recovers_next_tick() {
        let mut h = harness();
        // Challenge activation validates fine; secure activation is
        // rejected by the proxy once
        h.handle.script_validate(&[true, false]);

        let first = h.orchestrator.tick().await;

        assert!(matches!(
            first.state,
            OrchestratorState::Failed(FailureReason::SwitchFailed(_))
        ));
        // Rollback guarantee: last-known-good profile still active
        assert_eq!(
            h.orchestrator.active_profile(),
            Some(ProxyProfile::ChallengeOnly)
        );
        // The certificate was persisted before the failed switch
        assert!(h.store_view.lookup(&domain_set()).unwrap().is_some());

        // Next tick finds the valid record and only needs the switch
        let second = h.orchestrator.tick().await;
        assert_eq!(second.state, OrchestratorState::SteadyState);
        assert_eq!(h.ca.calls(), 1, "no reissuance for a switch failure");
        assert_eq!(h.orchestrator.active_profile(), Some(ProxyProfile::Secure));
    }

    #[tokio::test]
    async fn test_failure_report_carries_context() {
        let mut h = harness();
        h.probe.set_ready(false);
        let before = Utc::now();

        h.orchestrator.tick().await;

        let report = h.orchestrator.last_failure().unwrap();
        assert_eq!(report.reason, FailureReason::ProxyUnreachable);
        assert_eq!(report.domains, domain_set());
        assert!(report.at >= before);
    }

    #[tokio::test]
    async fn test_account_reference_written_once() {
        let mut h = harness();
        h.orchestrator.tick().await;

        let account = h.store_view.load_account().unwrap().unwrap();
        assert_eq!(account.contact_email, "ops@example.test");
    }

    #[test]
    fn test_record_validation_error_is_store_failure() {
        // An inverted-validity certificate from the CA maps onto a store
        // failure rather than a panic
        let result = CertificateRecord::new(
            domain_set(),
            "cert",
            "key",
            Utc::now(),
            Utc::now() - ChronoDuration::days(1),
            None,
        );
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
    }
}
