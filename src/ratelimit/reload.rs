//! Hot reload of tier configuration.
//!
//! A [`ReloadController`] pulls candidates from a [`ConfigSource`] and
//! publishes them into the [`ConfigStore`]. Reloads are driven by triggers
//! arriving on a channel, fed by a periodic poller and, in the binary, by
//! SIGHUP. A failed reload is logged and traffic keeps using the last good
//! snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::rules::{ServiceAccounts, TierConfig};
use super::snapshot::{ConfigStore, Version};
use crate::error::ConfigError;

/// Somewhere a candidate tier configuration can be loaded from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load a fresh candidate.
    async fn load(&self) -> Result<TierConfig, ConfigError>;

    /// Human-readable description, recorded on each snapshot.
    fn describe(&self) -> String;
}

/// Loads tiers from a YAML file and, optionally, service accounts from JSON.
#[derive(Debug, Clone)]
pub struct FileSource {
    tiers_path: PathBuf,
    accounts_path: Option<PathBuf>,
}

impl FileSource {
    pub fn new(tiers_path: impl Into<PathBuf>) -> Self {
        Self {
            tiers_path: tiers_path.into(),
            accounts_path: None,
        }
    }

    /// Also merge service accounts from `path`.
    pub fn with_accounts(mut self, path: impl Into<PathBuf>) -> Self {
        self.accounts_path = Some(path.into());
        self
    }

    async fn read(path: &Path) -> Result<String, ConfigError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn load(&self) -> Result<TierConfig, ConfigError> {
        let contents = Self::read(&self.tiers_path).await?;
        let mut config = TierConfig::from_yaml(&contents, &self.tiers_path.display().to_string())?;

        if let Some(accounts_path) = &self.accounts_path {
            let contents = Self::read(accounts_path).await?;
            let accounts =
                ServiceAccounts::from_json(&contents, &accounts_path.display().to_string())?;
            let added = config.merge_service_accounts(&accounts);
            debug!(
                accounts = accounts.len(),
                added = added,
                "Merged service accounts"
            );
        }

        Ok(config)
    }

    fn describe(&self) -> String {
        match &self.accounts_path {
            Some(accounts) => format!(
                "{} + {}",
                self.tiers_path.display(),
                accounts.display()
            ),
            None => self.tiers_path.display().to_string(),
        }
    }
}

/// What asked for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// Periodic poll
    Poll,
    /// SIGHUP
    Signal,
    /// Explicit request from the host
    Manual,
}

/// Result of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot was published with this version.
    Published(Version),
    /// The candidate matched the active configuration; nothing was published.
    Unchanged(Version),
}

impl ReloadOutcome {
    pub fn version(&self) -> Version {
        match self {
            ReloadOutcome::Published(version) | ReloadOutcome::Unchanged(version) => *version,
        }
    }
}

/// Loads candidates from a source and publishes them.
pub struct ReloadController {
    source: Arc<dyn ConfigSource>,
    store: Arc<ConfigStore>,
    /// Last configuration successfully published, used to skip no-op reloads.
    applied: Mutex<Option<TierConfig>>,
}

impl ReloadController {
    /// Create a controller publishing into an existing store.
    ///
    /// The first reload always publishes.
    pub fn new(source: Arc<dyn ConfigSource>, store: Arc<ConfigStore>) -> Self {
        Self {
            source,
            store,
            applied: Mutex::new(None),
        }
    }

    /// Load the initial configuration from `source` and build a store from it.
    pub async fn bootstrap(source: Arc<dyn ConfigSource>) -> Result<Self, ConfigError> {
        let initial = source.load().await?;
        let store = Arc::new(ConfigStore::new(&initial, source.describe())?);

        Ok(Self {
            source,
            store,
            applied: Mutex::new(Some(initial)),
        })
    }

    /// Get the store this controller publishes into.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Load a candidate and publish it if it differs from the active one.
    pub async fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let candidate = self.source.load().await?;

        let mut applied = self.applied.lock();
        if applied.as_ref() == Some(&candidate) {
            return Ok(ReloadOutcome::Unchanged(self.store.current().version()));
        }

        let version = self.store.publish(&candidate, self.source.describe())?;
        *applied = Some(candidate);
        Ok(ReloadOutcome::Published(version))
    }

    /// Handle one trigger, logging the outcome.
    pub async fn handle(&self, trigger: ReloadTrigger) -> Result<ReloadOutcome, ConfigError> {
        let result = self.reload().await;
        match &result {
            Ok(ReloadOutcome::Published(version)) => info!(
                version = version,
                trigger = ?trigger,
                source = %self.source.describe(),
                "Tier configuration reloaded"
            ),
            Ok(ReloadOutcome::Unchanged(version)) => debug!(
                version = version,
                trigger = ?trigger,
                "Tier configuration unchanged"
            ),
            Err(e) => warn!(
                error = %e,
                trigger = ?trigger,
                version = self.store.current().version(),
                "Tier configuration reload rejected, keeping current snapshot"
            ),
        }
        result
    }

    /// Process triggers until every sender is dropped.
    pub async fn run(&self, mut triggers: mpsc::Receiver<ReloadTrigger>) {
        while let Some(trigger) = triggers.recv().await {
            // Errors are logged by handle; the current snapshot stays active.
            let _ = self.handle(trigger).await;
        }
        debug!("Reload trigger channel closed");
    }
}

/// Spawn a task sending a [`ReloadTrigger::Poll`] every `interval`.
///
/// A poll is dropped when a reload is already queued. The task stops once the
/// receiving side is gone.
pub fn spawn_poller(triggers: mpsc::Sender<ReloadTrigger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match triggers.try_send(ReloadTrigger::Poll) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("Reload already pending, skipping poll"),
                Err(TrySendError::Closed(_)) => break,
            }
        }
    })
}
