//! Certificate authority client for the Warden orchestrator.
//!
//! Wraps the ACME HTTP-01 issuance flow behind a narrow contract the
//! orchestrator consumes: one operation that either returns a certificate
//! covering the full domain set or a classified error.
//!
//! # Components
//!
//! - [`CertificateAuthority`] - the collaborator contract (issuance and
//!   renewal are the same call)
//! - [`ChallengePublisher`] - materializes HTTP-01 challenge tokens under
//!   the validation webroot served by the external proxy
//! - [`AcmeLibCa`] - production implementation over `acme-lib`
//! - [`CaError`] - error taxonomy the orchestrator branches on
//!
//! # Challenge flow
//!
//! 1. The orchestrator confirms the proxy serves the webroot (readiness
//!    gate), then calls [`CertificateAuthority::request_certificate`]
//! 2. The client opens an order; for each domain the CA hands back a
//!    challenge token
//! 3. [`ChallengePublisher`] writes the key authorization under
//!    `/.well-known/acme-challenge/<token>` in the webroot
//! 4. The CA fetches the token over port 80 through the proxy
//! 5. Once every authorization validates, the order is finalized and the
//!    PEM chain plus private key come back with the parsed expiry

mod challenge;
mod client;
mod contract;
mod error;

pub use challenge::{ChallengePublisher, ProbeToken, ACME_CHALLENGE_PREFIX};
pub use client::{AcmeLibCa, DirectoryEndpoint};
pub use contract::{CertificateAuthority, IssuedCertificate};
pub use error::{CaError, ChallengeError};
