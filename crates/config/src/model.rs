//! Configuration data model.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_common::{DomainSet, DomainSetError, RetryPolicy};

/// Top-level Warden configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Contact email registered with the certificate authority
    pub contact_email: String,

    /// Hostnames covered by the certificate
    pub domains: DomainsConfig,

    /// Certificate issuance and storage
    #[serde(default)]
    pub certificates: CertificatesConfig,

    /// Renewal daemon cadence
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Readiness gate timing
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Backoff for transient CA failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reverse proxy configuration rendering
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Container runtime collaborator
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl WardenConfig {
    /// Assemble the full domain set: primary, optional `www` alias,
    /// optional API subdomain, in that order.
    pub fn domain_set(&self) -> Result<DomainSet, DomainSetError> {
        let mut names = vec![self.domains.primary.clone()];
        if self.domains.include_www {
            names.push(format!("www.{}", self.domains.primary));
        }
        if let Some(ref label) = self.domains.api_subdomain {
            names.push(format!("{}.{}", label, self.domains.primary));
        }
        DomainSet::new(names)
    }
}

/// Hostnames covered by the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainsConfig {
    /// Primary domain; storage key and certificate common name
    pub primary: String,

    /// Also cover `www.<primary>`
    #[serde(default = "default_true")]
    pub include_www: bool,

    /// Cover `<label>.<primary>` for the API tier
    #[serde(default)]
    pub api_subdomain: Option<String>,
}

/// Certificate issuance and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatesConfig {
    /// Reissue when remaining validity drops below this many days
    #[serde(default = "default_renewal_threshold_days")]
    pub renewal_threshold_days: u32,

    /// Durable storage root for certificates and CA account state.
    /// Must survive container restarts.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// ACME directory: "production", "staging", or an explicit URL
    #[serde(default)]
    pub directory: AcmeDirectory,

    /// Hold-off applied when the CA rate-limits without a Retry-After
    #[serde(default = "default_rate_limit_holdoff_secs")]
    pub rate_limit_holdoff_secs: u64,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            renewal_threshold_days: default_renewal_threshold_days(),
            storage_path: default_storage_path(),
            directory: AcmeDirectory::default(),
            rate_limit_holdoff_secs: default_rate_limit_holdoff_secs(),
        }
    }
}

/// ACME directory selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum AcmeDirectory {
    /// Let's Encrypt production
    #[default]
    Production,
    /// Let's Encrypt staging (relaxed rate limits, untrusted chain)
    Staging,
    /// Explicit directory URL
    Custom(String),
}

impl From<String> for AcmeDirectory {
    fn from(value: String) -> Self {
        match value.as_str() {
            "production" | "" => Self::Production,
            "staging" => Self::Staging,
            _ => Self::Custom(value),
        }
    }
}

impl From<AcmeDirectory> for String {
    fn from(value: AcmeDirectory) -> Self {
        match value {
            AcmeDirectory::Production => "production".to_string(),
            AcmeDirectory::Staging => "staging".to_string(),
            AcmeDirectory::Custom(url) => url,
        }
    }
}

/// Renewal daemon cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Interval between orchestrator ticks (clamped to >= 1 hour)
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u64,

    /// Upper bound on a single tick, including CA validation waits
    #[serde(default = "default_tick_deadline_secs")]
    pub tick_deadline_secs: u64,

    /// Delay before the first tick, letting sibling services come up
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_interval_hours: default_check_interval_hours(),
            tick_deadline_secs: default_tick_deadline_secs(),
            startup_delay_secs: default_startup_delay_secs(),
        }
    }
}

impl DaemonConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours * 3600)
    }

    pub fn tick_deadline(&self) -> Duration {
        Duration::from_secs(self.tick_deadline_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

/// Readiness gate timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Give up waiting for a dependent service after this long
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,

    /// Poll cadence while waiting
    #[serde(default = "default_readiness_poll_secs")]
    pub poll_interval_secs: u64,

    /// Base URL through which the proxy serves the challenge path,
    /// as seen from this process (e.g. "http://proxy")
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_readiness_timeout_secs(),
            poll_interval_secs: default_readiness_poll_secs(),
            probe_url: default_probe_url(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Backoff for transient CA failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total CA attempts per tick, including the first
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_retry_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Backoff multiplier (> 1.0 for strictly increasing delays)
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_secs: default_retry_base_delay_secs(),
            multiplier: default_retry_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.base_delay_secs),
            self.multiplier,
        )
    }
}

/// Reverse proxy configuration rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Directory the proxy reads its active configuration from
    #[serde(default = "default_proxy_config_dir")]
    pub config_dir: PathBuf,

    /// Webroot the proxy serves `/.well-known/acme-challenge/` from
    #[serde(default = "default_webroot")]
    pub webroot: PathBuf,

    /// Upstream address of the frontend tier
    #[serde(default = "default_frontend_addr")]
    pub frontend_addr: String,

    /// Upstream address of the backend API tier
    #[serde(default = "default_backend_addr")]
    pub backend_addr: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_dir: default_proxy_config_dir(),
            webroot: default_webroot(),
            frontend_addr: default_frontend_addr(),
            backend_addr: default_backend_addr(),
        }
    }
}

/// Container runtime collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Compose project directory
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Compose file within the project directory
    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    /// Name of the reverse proxy service
    #[serde(default = "default_proxy_service")]
    pub proxy_service: String,

    /// Name of the backend API service
    #[serde(default = "default_backend_service")]
    pub backend_service: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            compose_file: default_compose_file(),
            proxy_service: default_proxy_service(),
            backend_service: default_backend_service(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_renewal_threshold_days() -> u32 {
    30
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/warden")
}

fn default_rate_limit_holdoff_secs() -> u64 {
    3600
}

fn default_check_interval_hours() -> u64 {
    12
}

fn default_tick_deadline_secs() -> u64 {
    600
}

fn default_startup_delay_secs() -> u64 {
    10
}

fn default_readiness_timeout_secs() -> u64 {
    120
}

fn default_readiness_poll_secs() -> u64 {
    5
}

fn default_probe_url() -> String {
    "http://proxy".to_string()
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_secs() -> u64 {
    2
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_proxy_config_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d")
}

fn default_webroot() -> PathBuf {
    PathBuf::from("/var/www/certbot")
}

fn default_frontend_addr() -> String {
    "frontend:3000".to_string()
}

fn default_backend_addr() -> String {
    "backend:8000".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

fn default_proxy_service() -> String {
    "nginx".to_string()
}

fn default_backend_service() -> String {
    "backend".to_string()
}
