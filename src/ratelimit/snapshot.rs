//! Versioned tier snapshots and the store that publishes them.
//!
//! The active [`ConfigSnapshot`] sits behind an [`ArcSwap`]. Readers load it
//! without locking and keep their `Arc` for as long as they need it, so a
//! request that started under one version finishes under that version even
//! if a reload lands meanwhile. Publishers build a complete new snapshot and
//! swap the pointer; a published snapshot is never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::identity::Identifier;
use super::rules::{CompiledTiers, LimitSet, TierConfig, TierName, DEFAULT_TIER};
use crate::error::{ConfigError, ValidationIssue};

/// Snapshot version. The first published snapshot is version 1.
pub type Version = u64;

/// An immutable, validated view of the tier tables.
#[derive(Debug)]
pub struct ConfigSnapshot {
    version: Version,
    loaded_at: DateTime<Utc>,
    source: String,
    tiers: HashMap<TierName, LimitSet>,
    identities: HashMap<Identifier, TierName>,
    default_tier: TierName,
    default_limits: LimitSet,
}

impl ConfigSnapshot {
    fn from_compiled(
        version: Version,
        source: String,
        compiled: CompiledTiers,
    ) -> Result<Self, ConfigError> {
        let (default_tier, default_limits) = compiled
            .tiers
            .get_key_value(DEFAULT_TIER)
            .map(|(name, limits)| (Arc::clone(name), *limits))
            .ok_or_else(|| ConfigError::Validation(vec![ValidationIssue::MissingDefaultTier]))?;

        Ok(Self {
            version,
            loaded_at: Utc::now(),
            source,
            tiers: compiled.tiers,
            identities: compiled.identities,
            default_tier,
            default_limits,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// When this snapshot was built.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Description of where this snapshot was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolve the tier and limits for a caller.
    ///
    /// Unmapped identifiers, including the unknown identifier, get the
    /// default tier.
    pub fn resolve(&self, identifier: &Identifier) -> (&TierName, &LimitSet) {
        self.identities
            .get(identifier)
            .and_then(|tier| self.tiers.get_key_value(tier))
            .unwrap_or((&self.default_tier, &self.default_limits))
    }

    /// Get the tier an identifier is explicitly mapped to.
    pub fn tier_for(&self, identifier: &str) -> Option<&TierName> {
        self.identities.get(identifier)
    }

    /// Get the limits of a named tier.
    pub fn limits(&self, tier: &str) -> Option<&LimitSet> {
        self.tiers.get(tier)
    }

    /// Tier names in sorted order.
    pub fn tier_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tiers.keys().map(|name| &**name).collect();
        names.sort_unstable();
        names
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }
}

/// Holder of the active snapshot.
#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<ConfigSnapshot>,
    /// Serializes publishers so versions strictly increase. Readers never take it.
    publish_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a store whose first snapshot is built from `initial`.
    pub fn new(initial: &TierConfig, source: impl Into<String>) -> Result<Self, ConfigError> {
        let snapshot = ConfigSnapshot::from_compiled(1, source.into(), initial.compile()?)?;
        info!(
            version = snapshot.version,
            tiers = snapshot.tier_count(),
            identities = snapshot.identity_count(),
            source = %snapshot.source,
            "Loaded initial tier configuration"
        );

        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            publish_lock: Mutex::new(()),
        })
    }

    /// Get the active snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Validate `candidate` and make it the active snapshot.
    ///
    /// On error the active snapshot is left untouched.
    pub fn publish(
        &self,
        candidate: &TierConfig,
        source: impl Into<String>,
    ) -> Result<Version, ConfigError> {
        let compiled = candidate.compile()?;
        let source = source.into();

        let _guard = self.publish_lock.lock();
        let version = self.current.load().version + 1;
        let snapshot = ConfigSnapshot::from_compiled(version, source, compiled)?;

        debug!(
            version = version,
            tiers = snapshot.tier_count(),
            identities = snapshot.identity_count(),
            "Publishing tier configuration"
        );
        self.current.store(Arc::new(snapshot));

        Ok(version)
    }
}
