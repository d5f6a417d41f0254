//! Production CA client over `acme-lib`.
//!
//! Runs the blocking ACME order flow on the blocking thread pool and maps
//! protocol errors onto the orchestrator's [`CaError`] taxonomy. Account
//! keys are persisted in the account directory, so repeat orders reuse the
//! registered CA account.

use std::path::PathBuf;
use std::time::Duration;

use acme_lib::persist::FilePersist;
use acme_lib::{create_p384_key, Directory, DirectoryUrl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use warden_common::DomainSet;

use crate::{CaError, CertificateAuthority, ChallengePublisher, IssuedCertificate};

/// Delay between validation poll attempts, in milliseconds
const DEFAULT_VALIDATE_DELAY_MS: u64 = 5000;

/// ACME directory endpoint selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEndpoint {
    /// Let's Encrypt production
    LetsEncrypt,
    /// Let's Encrypt staging
    LetsEncryptStaging,
    /// Explicit directory URL
    Custom(String),
}

/// Certificate authority client backed by `acme-lib`.
pub struct AcmeLibCa {
    endpoint: DirectoryEndpoint,
    /// Directory holding the persisted CA account key
    account_dir: PathBuf,
    /// Poll delay passed to challenge validation and order finalization
    validate_delay_ms: u64,
    /// Hold-off reported when the CA rate-limits without a Retry-After
    rate_limit_holdoff: Duration,
}

impl AcmeLibCa {
    /// Create a client persisting account state under `account_dir`.
    pub fn new(endpoint: DirectoryEndpoint, account_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint,
            account_dir: account_dir.into(),
            validate_delay_ms: DEFAULT_VALIDATE_DELAY_MS,
            rate_limit_holdoff: Duration::from_secs(3600),
        }
    }

    /// Override the validation poll delay.
    pub fn with_validate_delay(mut self, delay: Duration) -> Self {
        self.validate_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Override the default rate-limit hold-off.
    pub fn with_rate_limit_holdoff(mut self, holdoff: Duration) -> Self {
        self.rate_limit_holdoff = holdoff;
        self
    }
}

#[async_trait]
impl CertificateAuthority for AcmeLibCa {
    async fn request_certificate(
        &self,
        domains: &DomainSet,
        contact_email: &str,
        challenges: &ChallengePublisher,
    ) -> Result<IssuedCertificate, CaError> {
        let endpoint = self.endpoint.clone();
        let account_dir = self.account_dir.clone();
        let email = contact_email.to_string();
        let domains = domains.clone();
        let publisher = challenges.clone();
        let delay_ms = self.validate_delay_ms;
        let holdoff = self.rate_limit_holdoff;

        info!(domains = %domains, "Requesting certificate from CA");

        tokio::task::spawn_blocking(move || {
            issue_blocking(endpoint, account_dir, &email, &domains, &publisher, delay_ms, holdoff)
        })
        .await
        .map_err(|e| CaError::Transient(format!("CA task panicked or was cancelled: {e}")))?
    }
}

/// Run the full blocking order flow: order, publish challenges, validate,
/// finalize, download. Published tokens are withdrawn on every exit path.
fn issue_blocking(
    endpoint: DirectoryEndpoint,
    account_dir: PathBuf,
    email: &str,
    domains: &DomainSet,
    publisher: &ChallengePublisher,
    delay_ms: u64,
    holdoff: Duration,
) -> Result<IssuedCertificate, CaError> {
    let url = match &endpoint {
        DirectoryEndpoint::LetsEncrypt => DirectoryUrl::LetsEncrypt,
        DirectoryEndpoint::LetsEncryptStaging => DirectoryUrl::LetsEncryptStaging,
        DirectoryEndpoint::Custom(url) => DirectoryUrl::Other(url.as_str()),
    };

    let persist = FilePersist::new(&account_dir);
    let dir = Directory::from_url(persist, url).map_err(|e| classify(&e, holdoff))?;
    let account = dir.account(email).map_err(|e| classify(&e, holdoff))?;

    let alt_names: Vec<&str> = domains.alt_names().iter().map(String::as_str).collect();
    let mut order = account
        .new_order(domains.primary(), &alt_names)
        .map_err(|e| classify(&e, holdoff))?;

    let mut published: Vec<String> = Vec::new();

    let result = (|| -> Result<acme_lib::Certificate, CaError> {
        let csr = loop {
            if let Some(csr) = order.confirm_validations() {
                break csr;
            }

            for auth in order.authorizations().map_err(|e| classify(&e, holdoff))? {
                let challenge = auth.http_challenge();
                let token = challenge.http_token().to_string();
                let proof = challenge.http_proof();

                publisher
                    .publish(&token, &proof)
                    .map_err(|e| CaError::Transient(format!("challenge publication failed: {e}")))?;
                published.push(token.clone());

                debug!(token = %token, "Awaiting CA validation of challenge");
                challenge
                    .validate(delay_ms)
                    .map_err(|e| classify(&e, holdoff))?;
            }

            order.refresh().map_err(|e| classify(&e, holdoff))?;
        };

        let private_key = create_p384_key();
        let cert_order = csr
            .finalize_pkey(private_key, delay_ms)
            .map_err(|e| classify(&e, holdoff))?;
        cert_order
            .download_and_save_cert()
            .map_err(|e| classify(&e, holdoff))
    })();

    for token in &published {
        publisher.withdraw(token);
    }

    let cert = result?;

    let expires_at = leaf_expiry(cert.certificate())?;
    if expires_at <= Utc::now() {
        warn!(expires = %expires_at, "CA returned an already-expired certificate");
        return Err(CaError::Transient(
            "CA returned an already-expired certificate".to_string(),
        ));
    }

    info!(domains = %domains, expires = %expires_at, "Certificate issued");

    Ok(IssuedCertificate {
        cert_pem: cert.certificate().to_string(),
        key_pem: cert.private_key().to_string(),
        expires_at,
    })
}

/// Classify an `acme-lib` error onto the orchestrator taxonomy.
///
/// ACME problem documents carry a `urn:ietf:params:acme:error:<type>`
/// identifier which survives into the error text; classification keys on
/// that. Anything unrecognized is treated as transient and retried with
/// backoff rather than blocking the daemon.
fn classify(error: &acme_lib::Error, holdoff: Duration) -> CaError {
    classify_message(&error.to_string(), holdoff)
}

fn classify_message(message: &str, holdoff: Duration) -> CaError {
    if message.contains("rateLimited") {
        return CaError::RateLimited {
            retry_after: holdoff,
        };
    }

    if message.contains("malformed")
        || message.contains("rejectedIdentifier")
        || message.contains("unsupportedIdentifier")
        || message.contains("invalidContact")
        || message.contains("unsupportedContact")
        || message.contains("accountDoesNotExist")
    {
        return CaError::InvalidRequest(message.to_string());
    }

    if message.contains("unauthorized")
        || message.contains("incorrectResponse")
        || message.contains("connection")
        || message.contains("dns")
        || message.contains("caa")
        || message.contains("tls")
    {
        return CaError::ValidationFailed(message.to_string());
    }

    CaError::Transient(message.to_string())
}

/// Parse the leaf certificate's `notAfter` from a PEM chain.
fn leaf_expiry(chain_pem: &str) -> Result<DateTime<Utc>, CaError> {
    let blocks = pem::parse_many(chain_pem.as_bytes())
        .map_err(|e| CaError::Transient(format!("CA returned unparseable PEM: {e}")))?;
    let leaf = blocks
        .first()
        .ok_or_else(|| CaError::Transient("CA returned an empty certificate chain".to_string()))?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| CaError::Transient(format!("CA returned invalid X509 leaf: {e}")))?;

    let timestamp = cert.validity().not_after.to_datetime().unix_timestamp();
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| CaError::Transient("certificate expiry out of range".to_string()))
}
