//! Proxy profile switching.
//!
//! The reverse proxy runs one of two configuration profiles:
//!
//! - [`ProxyProfile::ChallengeOnly`] - plain HTTP, serving the ACME
//!   challenge path and unencrypted proxying (used only while no
//!   certificate exists yet)
//! - [`ProxyProfile::Secure`] - HTTPS termination with the stored
//!   certificate, port 80 reduced to the challenge path and a redirect
//!
//! [`ProfileSwitcher::activate`] renders the target profile, places it,
//! has the proxy validate it, and reloads. Any failure restores the
//! previously active file set before the error returns - the proxy is
//! never left without a valid configuration.

mod render;

pub use render::{render, RenderContext};

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::runtime::ProxyHandle;

/// Name of the rendered configuration file inside the proxy config dir
const ACTIVE_CONF: &str = "warden.conf";

/// Backup of the previously active configuration, kept for rollback
const PREVIOUS_CONF: &str = "warden.conf.prev";

/// The two proxy configuration profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProfile {
    /// Plain HTTP: ACME challenge path plus unencrypted proxying
    ChallengeOnly,
    /// HTTPS termination using the stored certificate
    Secure,
}

impl fmt::Display for ProxyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChallengeOnly => write!(f, "challenge-only"),
            Self::Secure => write!(f, "secure"),
        }
    }
}

/// Profile switching errors.
///
/// Both variants leave the last-known-good configuration active.
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("Proxy rejected the generated configuration: {0}")]
    ValidationFailed(String),

    #[error("Proxy reload failed: {0}")]
    ReloadFailed(String),

    #[error("Configuration file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Swaps the proxy between configuration profiles.
///
/// The active profile is held in memory only: orchestrator state is never
/// persisted outside the certificate store, and re-activating after a
/// restart is an idempotent reload.
pub struct ProfileSwitcher {
    /// Directory the proxy reads its configuration from
    config_dir: PathBuf,
    /// Inputs for configuration rendering
    context: RenderContext,
    /// Reverse proxy collaborator (validate + reload)
    proxy: Arc<dyn ProxyHandle>,
    /// Currently active profile, if any was activated this process
    active: Option<ProxyProfile>,
}

impl ProfileSwitcher {
    /// Create a switcher writing into `config_dir`.
    pub fn new(
        config_dir: impl Into<PathBuf>,
        context: RenderContext,
        proxy: Arc<dyn ProxyHandle>,
    ) -> Self {
        Self {
            config_dir: config_dir.into(),
            context,
            proxy,
            active: None,
        }
    }

    /// The currently active profile.
    pub fn active(&self) -> Option<ProxyProfile> {
        self.active
    }

    /// Activate a profile. No-op if it is already active.
    pub async fn activate(&mut self, profile: ProxyProfile) -> Result<(), SwitchError> {
        if self.active == Some(profile) {
            trace!(profile = %profile, "Profile already active, skipping switch");
            return Ok(());
        }
        self.apply(profile).await
    }

    /// Re-render and reload the currently active profile.
    ///
    /// Used after renewal: the profile does not change, but the proxy must
    /// pick up the new certificate files.
    pub async fn refresh(&mut self) -> Result<(), SwitchError> {
        match self.active {
            Some(profile) => self.apply(profile).await,
            None => Err(SwitchError::ValidationFailed(
                "no active profile to refresh".to_string(),
            )),
        }
    }

    async fn apply(&mut self, profile: ProxyProfile) -> Result<(), SwitchError> {
        let active_path = self.config_dir.join(ACTIVE_CONF);
        let backup_path = self.config_dir.join(PREVIOUS_CONF);

        fs::create_dir_all(&self.config_dir)?;

        debug!(profile = %profile, "Rendering proxy configuration");
        let rendered = render(profile, &self.context);

        // Preserve the current file set for rollback before overwriting.
        let had_previous = active_path.exists();
        if had_previous {
            fs::copy(&active_path, &backup_path)?;
        }
        fs::write(&active_path, &rendered)?;

        if let Err(e) = self.proxy.validate_config().await {
            warn!(profile = %profile, error = %e, "Proxy rejected configuration, rolling back");
            self.restore(had_previous, &active_path, &backup_path)?;
            return Err(SwitchError::ValidationFailed(e.to_string()));
        }

        if let Err(e) = self.proxy.reload().await {
            warn!(profile = %profile, error = %e, "Proxy reload failed, rolling back");
            self.restore(had_previous, &active_path, &backup_path)?;
            // Reload the restored set so the running proxy matches disk.
            if had_previous {
                if let Err(restore_err) = self.proxy.reload().await {
                    error!(
                        error = %restore_err,
                        "Reload of restored configuration also failed; proxy keeps its in-memory config"
                    );
                }
            }
            return Err(SwitchError::ReloadFailed(e.to_string()));
        }

        info!(profile = %profile, "Proxy profile active");
        self.active = Some(profile);
        Ok(())
    }

    /// Put the previous file set back after a failed switch.
    fn restore(
        &self,
        had_previous: bool,
        active_path: &std::path::Path,
        backup_path: &std::path::Path,
    ) -> Result<(), SwitchError> {
        if had_previous {
            fs::copy(backup_path, active_path)?;
        } else {
            // First activation: there was nothing before, and the proxy
            // never loaded the rejected file. Remove it so a later attempt
            // starts clean.
            fs::remove_file(active_path)?;
        }
        Ok(())
    }
}
