//! Tier definitions and their on-disk formats.
//!
//! Tiers are loaded from a YAML document mapping tier names to quotas and
//! access keys to tiers. Access keys may additionally come from a JSON
//! service-account export; entries in the YAML document win on conflict.
//!
//! Parsing is permissive about values so that every problem can be reported
//! together by [`TierConfig::compile`] instead of failing on the first one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use super::counter::WindowKind;
use super::identity::Identifier;
use crate::error::{ConfigError, ValidationIssue};

/// Name of the tier applied to unmapped and unidentified callers.
pub const DEFAULT_TIER: &str = "default";

/// Shared tier name.
pub type TierName = Arc<str>;

/// A quota for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No quota is enforced.
    Unlimited,
    /// At most this many requests or bytes per window. Zero allows nothing.
    Max(u64),
}

impl Limit {
    /// Whether `current` goes over this limit.
    pub fn is_exceeded_by(&self, current: u64) -> bool {
        match self {
            Limit::Unlimited => false,
            Limit::Max(max) => current > *max,
        }
    }

    /// Headroom left after `current`, or `None` when unlimited.
    pub fn remaining(&self, current: u64) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Max(max) => Some(max.saturating_sub(current)),
        }
    }

    /// The numeric limit, or `None` when unlimited.
    pub fn value(&self) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Max(max) => Some(*max),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::Max(max) => write!(f, "{}", max),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Unlimited => serializer.serialize_str("unlimited"),
            Limit::Max(max) => serializer.serialize_u64(*max),
        }
    }
}

/// Keywords accepted in place of a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LimitKeyword {
    #[serde(rename = "unlimited")]
    Unlimited,
}

/// A quota value as written in the tier file.
///
/// Signed so that negative values survive parsing and are reported by
/// validation with the tier and field they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawLimit {
    Count(i64),
    Keyword(LimitKeyword),
}

impl Default for RawLimit {
    fn default() -> Self {
        RawLimit::Keyword(LimitKeyword::Unlimited)
    }
}

impl RawLimit {
    fn compile(
        self,
        tier: &str,
        field: &'static str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Limit {
        match self {
            RawLimit::Keyword(LimitKeyword::Unlimited) => Limit::Unlimited,
            RawLimit::Count(value) if value < 0 => {
                issues.push(ValidationIssue::NegativeLimit {
                    tier: tier.to_string(),
                    field,
                    value,
                });
                Limit::Max(0)
            }
            RawLimit::Count(value) => Limit::Max(value as u64),
        }
    }
}

/// Quotas for one tier as written in the tier file.
///
/// Omitted fields are not enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierLimits {
    #[serde(default)]
    pub requests_per_second: RawLimit,
    #[serde(default)]
    pub requests_per_minute: RawLimit,
    #[serde(default)]
    pub bytes_in_per_minute: RawLimit,
    #[serde(default)]
    pub bytes_out_per_minute: RawLimit,
}

impl TierLimits {
    fn compile(&self, tier: &str, issues: &mut Vec<ValidationIssue>) -> LimitSet {
        LimitSet {
            requests_per_second: self
                .requests_per_second
                .compile(tier, "requests_per_second", issues),
            requests_per_minute: self
                .requests_per_minute
                .compile(tier, "requests_per_minute", issues),
            bytes_in_per_minute: self
                .bytes_in_per_minute
                .compile(tier, "bytes_in_per_minute", issues),
            bytes_out_per_minute: self
                .bytes_out_per_minute
                .compile(tier, "bytes_out_per_minute", issues),
        }
    }
}

/// Validated quotas for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitSet {
    pub requests_per_second: Limit,
    pub requests_per_minute: Limit,
    pub bytes_in_per_minute: Limit,
    pub bytes_out_per_minute: Limit,
}

impl LimitSet {
    /// A set that enforces nothing.
    pub fn unlimited() -> Self {
        Self {
            requests_per_second: Limit::Unlimited,
            requests_per_minute: Limit::Unlimited,
            bytes_in_per_minute: Limit::Unlimited,
            bytes_out_per_minute: Limit::Unlimited,
        }
    }

    /// Get the limit enforced over `window`.
    pub fn get(&self, window: WindowKind) -> Limit {
        match window {
            WindowKind::Second => self.requests_per_second,
            WindowKind::Minute => self.requests_per_minute,
            WindowKind::BytesIn => self.bytes_in_per_minute,
            WindowKind::BytesOut => self.bytes_out_per_minute,
        }
    }
}

/// Validated tier tables, ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTiers {
    pub tiers: HashMap<TierName, LimitSet>,
    pub identities: HashMap<Identifier, TierName>,
}

/// Tier configuration as loaded from its sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Tier name to quotas
    #[serde(default)]
    pub tiers: BTreeMap<String, TierLimits>,
    /// Access key to tier name
    #[serde(default)]
    pub identities: BTreeMap<String, String>,
}

impl TierConfig {
    /// Load a tier configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading tier configuration");

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents, &path.display().to_string())
    }

    /// Parse a tier configuration from YAML. `origin` names the document in errors.
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::parse(origin, e))
    }

    /// Add service-account mappings for keys not already mapped.
    ///
    /// Returns the number of mappings added.
    pub fn merge_service_accounts(&mut self, accounts: &ServiceAccounts) -> usize {
        let mut added = 0;
        for account in &accounts.service_accounts {
            if self.identities.contains_key(&account.access_key) {
                debug!(
                    identifier = %account.access_key,
                    "Service account already mapped in tier file, keeping tier file mapping"
                );
                continue;
            }
            self.identities
                .insert(account.access_key.clone(), account.group.clone());
            added += 1;
        }
        added
    }

    /// Validate and convert into lookup tables.
    ///
    /// Every problem found is reported in a single [`ConfigError::Validation`].
    pub fn compile(&self) -> Result<CompiledTiers, ConfigError> {
        let mut issues = Vec::new();

        if !self.tiers.contains_key(DEFAULT_TIER) {
            issues.push(ValidationIssue::MissingDefaultTier);
        }

        let mut tiers: HashMap<TierName, LimitSet> = HashMap::with_capacity(self.tiers.len());
        for (name, limits) in &self.tiers {
            if name.trim().is_empty() {
                issues.push(ValidationIssue::EmptyTierName);
                continue;
            }
            let set = limits.compile(name, &mut issues);
            tiers.insert(TierName::from(name.as_str()), set);
        }

        let mut identities = HashMap::with_capacity(self.identities.len());
        for (identifier, tier) in &self.identities {
            if identifier.trim().is_empty() {
                issues.push(ValidationIssue::EmptyIdentifier { tier: tier.clone() });
                continue;
            }
            match tiers.get_key_value(tier.as_str()) {
                Some((name, _)) => {
                    identities.insert(Identifier::from(identifier.as_str()), Arc::clone(name));
                }
                None => issues.push(ValidationIssue::UnknownTier {
                    identifier: identifier.clone(),
                    tier: tier.clone(),
                }),
            }
        }

        if !issues.is_empty() {
            return Err(ConfigError::Validation(issues));
        }

        Ok(CompiledTiers { tiers, identities })
    }
}

/// A service-account export. Only the key and group of each account are read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceAccounts {
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccount>,
}

/// One exported account.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceAccount {
    pub access_key: String,
    pub group: String,
}

// Exports carry secrets next to these fields; keep Debug to what is read.
impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("access_key", &self.access_key)
            .field("group", &self.group)
            .finish()
    }
}

impl ServiceAccounts {
    /// Load service accounts from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading service accounts");

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents, &path.display().to_string())
    }

    /// Parse service accounts from JSON. `origin` names the document in errors.
    pub fn from_json(json: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::parse(origin, e))
    }

    pub fn len(&self) -> usize {
        self.service_accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.service_accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIERS: &str = r#"
tiers:
  default:
    requests_per_second: 5
    requests_per_minute: 60
    bytes_in_per_minute: 10485760
    bytes_out_per_minute: 10485760
  premium:
    requests_per_second: 50
    requests_per_minute: 1000
    bytes_in_per_minute: unlimited
    bytes_out_per_minute: unlimited
identities:
  ABCD1234: premium
"#;

    #[test]
    fn test_parse_tier_file() {
        let config = TierConfig::from_yaml(TIERS, "tiers.yaml").unwrap();
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.identities["ABCD1234"], "premium");
        assert_eq!(config.tiers["premium"].bytes_in_per_minute, RawLimit::default());
    }

    #[test]
    fn test_compile_tier_file() {
        let compiled = TierConfig::from_yaml(TIERS, "tiers.yaml")
            .unwrap()
            .compile()
            .unwrap();

        let premium = compiled.tiers["premium"];
        assert_eq!(premium.get(WindowKind::Second), Limit::Max(50));
        assert_eq!(premium.get(WindowKind::Minute), Limit::Max(1000));
        assert_eq!(premium.get(WindowKind::BytesIn), Limit::Unlimited);

        let default = compiled.tiers[DEFAULT_TIER];
        assert_eq!(default.get(WindowKind::BytesOut), Limit::Max(10_485_760));

        assert_eq!(&*compiled.identities["ABCD1234"], "premium");
    }

    #[test]
    fn test_zero_is_distinct_from_unlimited() {
        assert!(Limit::Max(0).is_exceeded_by(1));
        assert!(!Limit::Max(0).is_exceeded_by(0));
        assert!(!Limit::Unlimited.is_exceeded_by(u64::MAX));
        assert_eq!(Limit::Max(0).remaining(5), Some(0));
        assert_eq!(Limit::Unlimited.remaining(5), None);
    }

    #[test]
    fn test_limit_serializes_as_number_or_keyword() {
        assert_eq!(serde_json::to_string(&Limit::Max(100)).unwrap(), "100");
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "\"unlimited\"");
    }

    #[test]
    fn test_missing_default_tier_is_rejected() {
        let yaml = r#"
tiers:
  premium: { requests_per_second: 1, requests_per_minute: 1, bytes_in_per_minute: 1, bytes_out_per_minute: 1 }
"#;
        let err = TierConfig::from_yaml(yaml, "tiers.yaml")
            .unwrap()
            .compile()
            .unwrap_err();
        assert_eq!(err.issues(), &[ValidationIssue::MissingDefaultTier]);
    }

    #[test]
    fn test_all_issues_reported_together() {
        let yaml = r#"
tiers:
  basic: { requests_per_second: -1, requests_per_minute: 100 }
identities:
  AKID1: gold
"#;
        let err = TierConfig::from_yaml(yaml, "tiers.yaml")
            .unwrap()
            .compile()
            .unwrap_err();
        let issues = err.issues();

        assert_eq!(issues.len(), 3);
        assert!(issues.contains(&ValidationIssue::MissingDefaultTier));
        assert!(issues.contains(&ValidationIssue::NegativeLimit {
            tier: "basic".to_string(),
            field: "requests_per_second",
            value: -1,
        }));
        assert!(issues.contains(&ValidationIssue::UnknownTier {
            identifier: "AKID1".to_string(),
            tier: "gold".to_string(),
        }));
    }

    #[test]
    fn test_unknown_tier_field_is_a_parse_error() {
        let yaml = "tiers:\n  default: { requests_per_hour: 5 }\n";
        let err = TierConfig::from_yaml(yaml, "tiers.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_service_accounts_ignore_extra_fields() {
        let json = r#"{
            "service_accounts": [
                { "access_key": "SVC1", "secret_key": "s3cr3t", "group": "premium", "description": "backup" },
                { "access_key": "ABCD1234", "secret_key": "x", "group": "default" }
            ]
        }"#;
        let accounts = ServiceAccounts::from_json(json, "accounts.json").unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(!format!("{:?}", accounts).contains("s3cr3t"));

        let mut config = TierConfig::from_yaml(TIERS, "tiers.yaml").unwrap();
        assert_eq!(config.merge_service_accounts(&accounts), 1);
        assert_eq!(config.identities["SVC1"], "premium");
        // tier file mapping wins
        assert_eq!(config.identities["ABCD1234"], "premium");
    }

    #[test]
    fn test_malformed_service_accounts() {
        let err = ServiceAccounts::from_json("{ not json", "accounts.json").unwrap_err();
        assert!(err.to_string().contains("accounts.json"));
    }
}
