//! Validated hostname groups.
//!
//! A [`DomainSet`] is the ordered, deduplicated list of hostnames that must
//! all appear on a single certificate. The first entry is the primary
//! domain; it doubles as the storage key for the certificate covering the
//! set.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from [`DomainSet`] construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainSetError {
    #[error("Domain set is empty")]
    Empty,

    #[error("Invalid hostname: '{0}'")]
    InvalidHostname(String),
}

/// An ordered, deduplicated list of hostnames covered by one certificate.
///
/// Invariants (enforced at construction):
/// - non-empty
/// - every entry is a syntactically valid hostname
/// - the primary domain is the first entry
///
/// Deduplication preserves first occurrence, so the primary domain can
/// never be displaced by a later alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DomainSet {
    names: Vec<String>,
}

impl DomainSet {
    /// Build a domain set from an ordered list of hostnames.
    ///
    /// Entries are lowercased and deduplicated in order. Returns an error
    /// if the list is empty or any entry is not a valid hostname.
    pub fn new<I, S>(names: I) -> Result<Self, DomainSetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deduped: Vec<String> = Vec::new();

        for name in names {
            let name = name.as_ref().trim().to_ascii_lowercase();
            if !is_valid_hostname(&name) {
                return Err(DomainSetError::InvalidHostname(name));
            }
            if !deduped.iter().any(|existing| existing == &name) {
                deduped.push(name);
            }
        }

        if deduped.is_empty() {
            return Err(DomainSetError::Empty);
        }

        Ok(Self { names: deduped })
    }

    /// The primary domain (first entry, always present).
    pub fn primary(&self) -> &str {
        &self.names[0]
    }

    /// Alternative names: every entry except the primary.
    pub fn alt_names(&self) -> &[String] {
        &self.names[1..]
    }

    /// All hostnames in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of hostnames in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// A domain set is never empty; provided for clippy symmetry.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the set contains the given hostname (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.names.iter().any(|n| n == &name)
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(", "))
    }
}

impl TryFrom<Vec<String>> for DomainSet {
    type Error = DomainSetError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<DomainSet> for Vec<String> {
    fn from(set: DomainSet) -> Self {
        set.names
    }
}

/// Check hostname syntax per RFC 1123.
///
/// Accepts up to 253 characters of dot-separated labels, each 1-63
/// characters of ASCII alphanumerics and hyphens, not hyphen-led or
/// hyphen-terminated. Rejects IP-address-shaped names (all-numeric TLD)
/// since a certificate domain set holds hostnames only.
pub fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Trailing-dot FQDN form is not accepted here; config inputs are bare.
    let labels: Vec<&str> = name.split('.').collect();

    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return false;
        }
    }

    // Reject all-numeric final label (IPv4-shaped)
    if let Some(last) = labels.last() {
        if last.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_hostnames() {
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("www.example.com"));
        assert!(is_valid_hostname("api.example-site.co.uk"));
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("a.b.c.d.e"));
        assert!(is_valid_hostname("xn--nxasmq6b.example"));
    }

    #[test]
    fn test_invalid_hostnames() {
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-example.com"));
        assert!(!is_valid_hostname("example-.com"));
        assert!(!is_valid_hostname("exa mple.com"));
        assert!(!is_valid_hostname("example..com"));
        assert!(!is_valid_hostname(".example.com"));
        assert!(!is_valid_hostname("example.com."));
        assert!(!is_valid_hostname("under_score.com"));
        assert!(!is_valid_hostname("192.0.2.1"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
        assert!(!is_valid_hostname(&format!("{}.com", "a.".repeat(130))));
    }

    #[test]
    fn test_domain_set_primary_first() {
        let set =
            DomainSet::new(["example.test", "www.example.test", "api.example.test"]).unwrap();
        assert_eq!(set.primary(), "example.test");
        assert_eq!(set.alt_names(), &["www.example.test", "api.example.test"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_domain_set_dedup_preserves_order() {
        let set = DomainSet::new(["example.test", "www.example.test", "example.test"]).unwrap();
        assert_eq!(set.names(), &["example.test", "www.example.test"]);
    }

    #[test]
    fn test_domain_set_lowercases() {
        let set = DomainSet::new(["Example.TEST", "WWW.example.test"]).unwrap();
        assert_eq!(set.primary(), "example.test");
        assert!(set.contains("www.EXAMPLE.test"));
    }

    #[test]
    fn test_domain_set_rejects_empty() {
        assert_eq!(
            DomainSet::new(Vec::<String>::new()),
            Err(DomainSetError::Empty)
        );
    }

    #[test]
    fn test_domain_set_rejects_invalid_entry() {
        let err = DomainSet::new(["example.test", "bad host"]).unwrap_err();
        assert_eq!(err, DomainSetError::InvalidHostname("bad host".to_string()));
    }

    #[test]
    fn test_domain_set_display() {
        let set = DomainSet::new(["example.test", "www.example.test"]).unwrap();
        assert_eq!(set.to_string(), "example.test, www.example.test");
    }

    #[test]
    fn test_domain_set_serde_round_trip() {
        let set = DomainSet::new(["example.test", "api.example.test"]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["example.test","api.example.test"]"#);

        let parsed: DomainSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_domain_set_serde_rejects_invalid() {
        let result: Result<DomainSet, _> = serde_json::from_str(r#"["not a host"]"#);
        assert!(result.is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_label_hostnames_accepted(
                labels in proptest::collection::vec("[a-z][a-z0-9]{0,10}", 1..5)
            ) {
                let name = labels.join(".");
                // Single all-alpha labels and dotted names are valid as
                // long as the final label is not all-numeric, which the
                // leading-alpha generator guarantees.
                prop_assert!(is_valid_hostname(&name));
            }

            #[test]
            fn primary_survives_any_alias_order(
                aliases in proptest::collection::vec("[a-z]{1,8}\\.example\\.test", 0..4)
            ) {
                let mut names = vec!["example.test".to_string()];
                names.extend(aliases);
                let set = DomainSet::new(&names).unwrap();
                prop_assert_eq!(set.primary(), "example.test");
            }
        }
    }
}
