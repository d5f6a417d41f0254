//! Configuration validation.
//!
//! Collects every problem in one pass instead of failing on the first, so
//! an operator fixes a config file once. Errors abort startup; warnings are
//! logged and tolerated.

use std::fmt;

use validator::ValidateEmail;
use warden_common::domain::is_valid_hostname;

use crate::{AcmeDirectory, WardenConfig};

/// Category of a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Contact email problems
    Email,
    /// Hostname syntax problems
    Domain,
    /// Certificate issuance settings
    Certificate,
    /// Timing parameters (intervals, timeouts, backoff)
    Timing,
    /// Filesystem paths
    Path,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Email => "email",
            Self::Domain => "domain",
            Self::Certificate => "certificate",
            Self::Timing => "timing",
            Self::Path => "path",
        };
        write!(f, "{name}")
    }
}

/// A single validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A non-fatal validation finding
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Collected validation outcome
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl WardenConfig {
    /// Validate the full configuration, collecting every problem.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.merge(validate_contact(self));
        result.merge(validate_domains(self));
        result.merge(validate_certificates(self));
        result.merge(validate_timing(self));
        result.merge(validate_paths(self));
        result
    }
}

fn validate_contact(config: &WardenConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.contact_email.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Email,
            "contact_email must not be empty",
        ));
    } else if !config.contact_email.validate_email() {
        result.add_error(ValidationError::new(
            ErrorCategory::Email,
            format!("contact_email is not a valid address: '{}'", config.contact_email),
        ));
    }

    result
}

fn validate_domains(config: &WardenConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !is_valid_hostname(&config.domains.primary) {
        result.add_error(ValidationError::new(
            ErrorCategory::Domain,
            format!("primary domain is not a valid hostname: '{}'", config.domains.primary),
        ));
    }

    if let Some(ref label) = config.domains.api_subdomain {
        let valid_label = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_label {
            result.add_error(ValidationError::new(
                ErrorCategory::Domain,
                format!("api_subdomain is not a valid DNS label: '{label}'"),
            ));
        }
    }

    // Assembled set must also hold together (length limits with aliases)
    if result.is_valid() {
        if let Err(e) = config.domain_set() {
            result.add_error(ValidationError::new(
                ErrorCategory::Domain,
                format!("domain set rejected: {e}"),
            ));
        }
    }

    result
}

fn validate_certificates(config: &WardenConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    let certs = &config.certificates;

    if certs.renewal_threshold_days == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            "renewal_threshold_days must be at least 1",
        ));
    } else if certs.renewal_threshold_days > 60 {
        // 90-day certificates leave little margin beyond this
        result.add_warning(ValidationWarning::new(format!(
            "renewal_threshold_days = {} will reissue most of the certificate lifetime early",
            certs.renewal_threshold_days
        )));
    }

    if let AcmeDirectory::Custom(ref url) = certs.directory {
        if !url.starts_with("https://") {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                format!("custom ACME directory must be an https URL: '{url}'"),
            ));
        }
    }

    if certs.rate_limit_holdoff_secs == 0 {
        result.add_warning(ValidationWarning::new(
            "rate_limit_holdoff_secs = 0 disables the rate-limit hold-off",
        ));
    }

    result
}

fn validate_timing(config: &WardenConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.daemon.check_interval_hours == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            "check_interval_hours must be at least 1",
        ));
    }

    if config.daemon.tick_deadline_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            "tick_deadline_secs must be non-zero",
        ));
    }

    if config.readiness.poll_interval_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            "readiness poll_interval_secs must be non-zero",
        ));
    } else if config.readiness.poll_interval_secs >= config.readiness.timeout_secs {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            format!(
                "readiness poll interval ({}s) must be shorter than its timeout ({}s)",
                config.readiness.poll_interval_secs, config.readiness.timeout_secs
            ),
        ));
    }

    if !config.readiness.probe_url.starts_with("http://")
        && !config.readiness.probe_url.starts_with("https://")
    {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            format!("probe_url must be an http(s) URL: '{}'", config.readiness.probe_url),
        ));
    }

    if config.retry.max_attempts == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            "retry max_attempts must be at least 1",
        ));
    }

    if config.retry.multiplier < 1.0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            format!("retry multiplier must be >= 1.0, got {}", config.retry.multiplier),
        ));
    } else if config.retry.multiplier == 1.0 && config.retry.max_attempts > 1 {
        result.add_warning(ValidationWarning::new(
            "retry multiplier of 1.0 produces constant (not increasing) backoff",
        ));
    }

    result
}

fn validate_paths(config: &WardenConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    for (name, path) in [
        ("certificates.storage_path", &config.certificates.storage_path),
        ("proxy.config_dir", &config.proxy.config_dir),
        ("proxy.webroot", &config.proxy.webroot),
    ] {
        if path.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Path,
                format!("{name} must not be empty"),
            ));
        }
    }

    for (name, value) in [
        ("proxy.frontend_addr", &config.proxy.frontend_addr),
        ("proxy.backend_addr", &config.proxy.backend_addr),
        ("runtime.proxy_service", &config.runtime.proxy_service),
        ("runtime.backend_service", &config.runtime.backend_service),
    ] {
        if value.trim().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Path,
                format!("{name} must not be empty"),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> WardenConfig {
        WardenConfig::from_toml(
            r#"
contact_email = "ops@example.test"

[domains]
primary = "example.test"
api_subdomain = "api"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        let result = base_config().validate();
        assert!(result.is_valid(), "errors: {:?}", result.errors);
    }

    #[test]
    fn test_empty_email_rejected() {
        let mut config = base_config();
        config.contact_email = "  ".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Email));
    }

    #[test]
    fn test_malformed_email_rejected() {
        let mut config = base_config();
        config.contact_email = "not-an-email".to_string();
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_bad_primary_domain_rejected() {
        let mut config = base_config();
        config.domains.primary = "exa mple.test".to_string();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Domain));
    }

    #[test]
    fn test_bad_api_label_rejected() {
        let mut config = base_config();
        config.domains.api_subdomain = Some("api.v2".to_string());
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Domain));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = base_config();
        config.certificates.renewal_threshold_days = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Certificate));
    }

    #[test]
    fn test_large_threshold_warns() {
        let mut config = base_config();
        config.certificates.renewal_threshold_days = 80;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_plain_http_custom_directory_rejected() {
        let mut config = base_config();
        config.certificates.directory =
            crate::AcmeDirectory::Custom("http://ca.internal/dir".to_string());
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Certificate));
    }

    #[test]
    fn test_poll_longer_than_timeout_rejected() {
        let mut config = base_config();
        config.readiness.poll_interval_secs = 120;
        config.readiness.timeout_secs = 60;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Timing));
    }

    #[test]
    fn test_sub_one_multiplier_rejected() {
        let mut config = base_config();
        config.retry.multiplier = 0.5;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_flat_multiplier_warns() {
        let mut config = base_config();
        config.retry.multiplier = 1.0;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let mut config = base_config();
        config.runtime.proxy_service = String::new();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.category == ErrorCategory::Path));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = base_config();
        config.contact_email = "nope".to_string();
        config.domains.primary = "-bad".to_string();
        config.retry.max_attempts = 0;
        let result = config.validate();
        assert!(result.errors.len() >= 3);
    }
}
