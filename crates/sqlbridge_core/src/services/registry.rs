//! Process-wide registry of named pools.
//!
//! A name is bound at most once: the first registration wins and later ones
//! with the same name are ignored. Pools live until [`PoolRegistry::shutdown`].
//!
//! Each name owns a slot. The map lock is only held to find or reserve a
//! slot; a pool is built under its slot's own lock, so building one pool
//! never blocks lookups of another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::error::{BridgeError, Result};
use crate::models::{PoolConfig, PoolStatus};
use crate::services::driver::{open_data_source, DataSource};

static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();

struct PoolEntry {
    source: Arc<dyn DataSource>,
    config: PoolConfig,
    created_at: DateTime<Utc>,
}

/// A reserved name. Empty until its first successful build.
#[derive(Default)]
struct PoolSlot {
    entry: OnceLock<PoolEntry>,
    build: Mutex<()>,
}

/// Name to pool map shared by every query in the process.
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<PoolSlot>>>,
    shut_down: AtomicBool,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static PoolRegistry {
        GLOBAL.get_or_init(PoolRegistry::new)
    }

    // ========== Registration ==========

    /// Open and register a pool unless its name is already taken.
    ///
    /// Returns the pool bound to the name, which is the existing one when the
    /// name was registered before; the new definition is then discarded
    /// without being validated. Racing registrations of one name build a
    /// single pool.
    pub fn create_if_absent(&self, config: PoolConfig) -> Result<Arc<dyn DataSource>> {
        let slot = self.reserve(&config.name)?;
        if let Some(existing) = slot.entry.get() {
            return Ok(keep_first(existing, &config));
        }

        let _building = slot.build.lock();
        if let Some(existing) = slot.entry.get() {
            return Ok(keep_first(existing, &config));
        }

        config.validate()?;
        let source = open_data_source(&config)?;
        let name = config.name.clone();
        let entry = PoolEntry { source: Arc::clone(&source), config, created_at: Utc::now() };
        if slot.entry.set(entry).is_err() {
            return Err(BridgeError::internal(format!("Pool {name} was registered twice")));
        }

        // A shutdown that drained the map before the entry was set never saw it.
        if self.shut_down.load(Ordering::SeqCst) {
            source.close()?;
            return Err(after_shutdown(&name));
        }

        tracing::info!(pool = %name, driver = source.driver().as_str(), "Registered pool");
        Ok(source)
    }

    /// Find the slot for `name`, reserving an empty one if needed.
    fn reserve(&self, name: &str) -> Result<Arc<PoolSlot>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(after_shutdown(name));
        }
        if let Some(slot) = self.pools.read().get(name) {
            return Ok(Arc::clone(slot));
        }

        let mut pools = self.pools.write();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(after_shutdown(name));
        }
        Ok(Arc::clone(pools.entry(name.to_string()).or_default()))
    }

    /// Read the entry under `name` if a pool has been built for it.
    fn with_entry<T>(&self, name: &str, f: impl FnOnce(&PoolEntry) -> T) -> Option<T> {
        let slot = self.pools.read().get(name).map(Arc::clone)?;
        slot.entry.get().map(f)
    }

    /// Built entries; reserved but empty slots are skipped.
    fn entries(&self) -> Vec<(String, Arc<PoolSlot>)> {
        self.pools
            .read()
            .iter()
            .filter(|(_, slot)| slot.entry.get().is_some())
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Look up a pool by name (case-sensitive).
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.with_entry(name, |entry| Arc::clone(&entry.source))
            .ok_or_else(|| BridgeError::pool_not_found(name))
    }

    /// Whether a pool is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.with_entry(name, |_| ()).is_some()
    }

    /// Configuration the pool under `name` was created with.
    pub fn config(&self, name: &str) -> Option<PoolConfig> {
        self.with_entry(name, |entry| entry.config.clone())
    }

    /// When the pool under `name` was registered.
    pub fn created_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.with_entry(name, |entry| entry.created_at)
    }

    /// Registered pool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().into_iter().map(|(name, _)| name).collect();
        names.sort();
        names
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no pool is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Management ==========

    /// Status of every pool registered with management exposure enabled.
    pub fn management_snapshot(&self) -> HashMap<String, PoolStatus> {
        self.entries()
            .into_iter()
            .filter_map(|(name, slot)| {
                let entry = slot.entry.get()?;
                (entry.config.expose_management == Some(true)).then(|| (name, entry.source.status()))
            })
            .collect()
    }

    /// Close every registered pool exactly once.
    ///
    /// A pool that fails to close is logged and the rest are still closed; the
    /// first failure is returned. Later calls are no-ops and later
    /// registrations are refused.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let drained: Vec<(String, Arc<PoolSlot>)> = self.pools.write().drain().collect();
        tracing::info!(pools = drained.len(), "Shutting down pool registry");

        let mut first_error = None;
        for (name, slot) in drained {
            let Some(entry) = slot.entry.get() else {
                continue;
            };
            if let Err(e) = entry.source.close() {
                tracing::error!(pool = %name, error = %e, "Failed to close pool");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether [`PoolRegistry::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Bind an already opened source, for tests that need a custom driver.
    #[cfg(test)]
    pub(crate) fn insert_source(&self, config: PoolConfig, source: Arc<dyn DataSource>) -> Result<()> {
        let slot = self.reserve(&config.name)?;
        slot.entry
            .set(PoolEntry { source, config, created_at: Utc::now() })
            .map_err(|_| BridgeError::internal("Pool already registered"))
    }
}

fn keep_first(existing: &PoolEntry, discarded: &PoolConfig) -> Arc<dyn DataSource> {
    tracing::warn!(pool = %discarded.name, "Pool already registered, keeping the first definition");
    Arc::clone(&existing.source)
}

fn after_shutdown(name: &str) -> BridgeError {
    BridgeError::internal(format!("Cannot register pool {name} after shutdown"))
}
