//! Certificate authority collaborator contract.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_common::DomainSet;

use crate::{CaError, ChallengePublisher};

/// A certificate issued by the CA, covering a full domain set.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
    /// Leaf certificate expiry, parsed from the chain
    pub expires_at: DateTime<Utc>,
}

// Manual Debug: the private key must never reach a log line.
impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The certificate authority collaborator.
///
/// One operation covers both issuance and renewal; from the orchestrator's
/// perspective renewal is reissuance. The returned certificate covers the
/// full domain set atomically - there is no partial-issuance success path.
///
/// Callers must already have the proxy serving the challenge path (the
/// publisher's webroot) before invoking this; the CA will fetch tokens
/// over plain HTTP during the call.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Request a certificate for every hostname in `domains`.
    ///
    /// Challenge tokens are published through `challenges` for the
    /// duration of the validation and withdrawn before returning.
    async fn request_certificate(
        &self,
        domains: &DomainSet,
        contact_email: &str,
        challenges: &ChallengePublisher,
    ) -> Result<IssuedCertificate, CaError>;
}
