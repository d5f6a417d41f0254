//! HTTP-01 challenge token publication.
//!
//! The proxy this orchestrator drives is a separate process, so pending
//! challenges cannot be served from memory: tokens are materialized as
//! files under the validation webroot the proxy serves at
//! `/.well-known/acme-challenge/`. The in-memory map tracks what is
//! currently published so tokens can be withdrawn and counted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ChallengeError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// A sentinel token planted to prove the proxy serves the webroot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeToken {
    /// Token (file name under the challenge directory)
    pub token: String,
    /// Body the proxy must return for the token's path
    pub body: String,
}

impl ProbeToken {
    /// Request path the proxy must answer for this token.
    pub fn path(&self) -> String {
        format!("{ACME_CHALLENGE_PREFIX}{}", self.token)
    }
}

/// Publishes pending HTTP-01 challenges into the validation webroot.
///
/// Clones share the same pending-token map and webroot, so the CA client
/// and the readiness probe can operate on one publisher.
#[derive(Debug)]
pub struct ChallengePublisher {
    /// Webroot the proxy serves for the challenge path
    webroot: PathBuf,
    /// Tokens currently on disk
    pending: Arc<DashMap<String, String>>,
}

impl ChallengePublisher {
    /// Create a publisher over the given webroot.
    ///
    /// Creates `<webroot>/.well-known/acme-challenge` if missing.
    pub fn new(webroot: impl Into<PathBuf>) -> Result<Self, ChallengeError> {
        let webroot = webroot.into();
        let challenge_dir = challenge_dir(&webroot);
        fs::create_dir_all(&challenge_dir)?;

        debug!(webroot = %webroot.display(), "Initialized challenge publisher");

        Ok(Self {
            webroot,
            pending: Arc::new(DashMap::new()),
        })
    }

    /// Publish a challenge token.
    ///
    /// The key authorization becomes the body of
    /// `<webroot>/.well-known/acme-challenge/<token>`.
    pub fn publish(&self, token: &str, key_authorization: &str) -> Result<(), ChallengeError> {
        let path = self.token_path(token);
        fs::write(&path, key_authorization)?;
        self.pending
            .insert(token.to_string(), key_authorization.to_string());

        debug!(token = %token, "Published HTTP-01 challenge token");
        Ok(())
    }

    /// Withdraw a published token.
    ///
    /// Removal failures are logged, not propagated: a leftover token file
    /// is harmless, and withdrawal runs on cleanup paths that must not
    /// mask the original error.
    pub fn withdraw(&self, token: &str) {
        if self.pending.remove(token).is_some() {
            debug!(token = %token, "Withdrew challenge token");
        }
        let path = self.token_path(token);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(token = %token, error = %e, "Failed to remove challenge token file");
            }
        }
    }

    /// The key authorization for a pending token, if published.
    pub fn response_for(&self, token: &str) -> Option<String> {
        let result = self.pending.get(token).map(|v| v.clone());
        trace!(token = %token, found = result.is_some(), "Challenge token lookup");
        result
    }

    /// Extract the token from a request path, if it is a challenge path.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Number of tokens currently published.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Withdraw every published token.
    pub fn clear(&self) {
        let tokens: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for token in &tokens {
            self.withdraw(token);
        }
        if !tokens.is_empty() {
            debug!(cleared = tokens.len(), "Cleared published challenge tokens");
        }
    }

    /// Plant a sentinel token for the readiness probe.
    ///
    /// The caller fetches the returned token's path through the proxy and
    /// compares the body, then withdraws the token.
    pub fn stage_probe(&self) -> Result<ProbeToken, ChallengeError> {
        let token = format!("warden-probe-{}", Uuid::new_v4());
        let body = Uuid::new_v4().to_string();
        self.publish(&token, &body)?;
        Ok(ProbeToken { token, body })
    }

    fn token_path(&self, token: &str) -> PathBuf {
        challenge_dir(&self.webroot).join(token)
    }
}

impl Clone for ChallengePublisher {
    fn clone(&self) -> Self {
        Self {
            webroot: self.webroot.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

fn challenge_dir(webroot: &Path) -> PathBuf {
    webroot.join(".well-known").join("acme-challenge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ChallengePublisher) {
        let dir = TempDir::new().unwrap();
        let publisher = ChallengePublisher::new(dir.path()).unwrap();
        (dir, publisher)
    }

    #[test]
    fn test_publish_writes_token_file() {
        let (dir, publisher) = setup();
        publisher.publish("tok-1", "auth-1").unwrap();

        let path = dir
            .path()
            .join(".well-known")
            .join("acme-challenge")
            .join("tok-1");
        assert_eq!(fs::read_to_string(path).unwrap(), "auth-1");
        assert_eq!(publisher.response_for("tok-1"), Some("auth-1".to_string()));
    }

    #[test]
    fn test_withdraw_removes_file_and_entry() {
        let (dir, publisher) = setup();
        publisher.publish("tok-1", "auth-1").unwrap();
        publisher.withdraw("tok-1");

        assert_eq!(publisher.pending_count(), 0);
        assert_eq!(publisher.response_for("tok-1"), None);
        assert!(!dir
            .path()
            .join(".well-known")
            .join("acme-challenge")
            .join("tok-1")
            .exists());
    }

    #[test]
    fn test_withdraw_unknown_token_is_quiet() {
        let (_dir, publisher) = setup();
        publisher.withdraw("never-published");
        assert_eq!(publisher.pending_count(), 0);
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            ChallengePublisher::extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengePublisher::extract_token("/other/path"), None);
        assert_eq!(
            ChallengePublisher::extract_token("/.well-known/acme-challenge"),
            None
        );
    }

    #[test]
    fn test_clear_removes_everything() {
        let (dir, publisher) = setup();
        publisher.publish("a", "1").unwrap();
        publisher.publish("b", "2").unwrap();
        publisher.clear();

        assert_eq!(publisher.pending_count(), 0);
        let challenge_dir = dir.path().join(".well-known").join("acme-challenge");
        assert_eq!(fs::read_dir(challenge_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_clone_shares_pending_map() {
        let (_dir, publisher) = setup();
        let clone = publisher.clone();
        publisher.publish("tok", "auth").unwrap();
        assert_eq!(clone.response_for("tok"), Some("auth".to_string()));
    }

    #[test]
    fn test_stage_probe_round_trip() {
        let (dir, publisher) = setup();
        let probe = publisher.stage_probe().unwrap();

        assert!(probe.path().starts_with(ACME_CHALLENGE_PREFIX));
        let on_disk = fs::read_to_string(
            dir.path()
                .join(".well-known")
                .join("acme-challenge")
                .join(&probe.token),
        )
        .unwrap();
        assert_eq!(on_disk, probe.body);

        publisher.withdraw(&probe.token);
        assert_eq!(publisher.pending_count(), 0);
    }
}
