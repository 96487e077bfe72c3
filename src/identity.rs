//! Raw id → stable id resolution
//!
//! ## Resolution
//!
//! ```text
//! resolve(type, raw) ─► TTL cache ──hit──► stable id
//!                          │ miss (one in-flight lookup per key)
//!                          ▼
//!                   MachineDirectory::lookup_or_register
//!                          │
//!          ┌───────────────┴────────────────┐
//!   StoreDirectory (hub)            HubClient (ingest, remote)
//! ```
//!
//! Concurrent misses for the same key are coalesced by the cache, so only one
//! lookup runs per key inside a process. Across processes the store's unique
//! constraints reject the losing insert and the directory re-reads the winner.
//! The cache is filled only from a lookup that returned successfully, which for
//! [`StoreDirectory`] means the mapping was committed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, instrument, trace, warn};

use crate::MachineType;
use crate::storage::schema::format_stable_id;
use crate::storage::{MonitoredMachine, StorageBackend, StorageError};

pub const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

pub const IDENTITY_CACHE_CAPACITY: u64 = 10_000;

/// Registration attempts before giving up on a contended sequence
const MAX_REGISTER_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("identity store failed: {0}")]
    Storage(String),

    #[error("remote inventory lookup failed: {0}")]
    Remote(String),

    #[error("could not register {machine_type} '{raw_id}' after {attempts} attempts")]
    Contended {
        machine_type: MachineType,
        raw_id: String,
        attempts: usize,
    },
}

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        IdentityError::Storage(err.to_string())
    }
}

/// Durable side of the resolver
#[async_trait]
pub trait MachineDirectory: Send + Sync {
    /// Return the stable id for `raw_id`, registering the machine if unseen.
    async fn lookup_or_register(
        &self,
        machine_type: MachineType,
        raw_id: &str,
        display_name: Option<&str>,
    ) -> Result<String, IdentityError>;
}

/// Directory backed by the local storage backend
pub struct StoreDirectory {
    storage: Arc<dyn StorageBackend>,
}

impl StoreDirectory {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MachineDirectory for StoreDirectory {
    #[instrument(skip(self, display_name))]
    async fn lookup_or_register(
        &self,
        machine_type: MachineType,
        raw_id: &str,
        display_name: Option<&str>,
    ) -> Result<String, IdentityError> {
        for attempt in 1..=MAX_REGISTER_ATTEMPTS {
            if let Some(existing) = self.storage.find_machine(machine_type, raw_id).await? {
                if let Some(name) = display_name
                    && name != existing.display_name
                {
                    debug!("{}: display name changed to '{name}'", existing.stable_id);
                    self.storage
                        .update_display_name(&existing.stable_id, name)
                        .await?;
                }
                return Ok(existing.stable_id);
            }

            let sequence = self.storage.max_sequence(machine_type).await?.unwrap_or(0) + 1;
            let machine = MonitoredMachine {
                stable_id: format_stable_id(machine_type, sequence),
                machine_type,
                raw_id: raw_id.to_string(),
                display_name: display_name.unwrap_or(raw_id).to_string(),
                sequence,
            };

            match self.storage.insert_machine(&machine).await {
                Ok(()) => {
                    debug!("registered new machine {} as {}", raw_id, machine.stable_id);
                    return Ok(machine.stable_id);
                }
                Err(StorageError::Conflict(reason)) => {
                    // either another writer registered this raw id (re-read finds it)
                    // or took the sequence we computed (next attempt picks a new one)
                    trace!("registration attempt {attempt} lost a race: {reason}");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!("giving up registering {machine_type} '{raw_id}'");
        Err(IdentityError::Contended {
            machine_type,
            raw_id: raw_id.to_string(),
            attempts: MAX_REGISTER_ATTEMPTS,
        })
    }
}

/// TTL-cached resolver in front of a [`MachineDirectory`]
pub struct IdentityResolver {
    cache: Cache<(MachineType, String), String>,
    directory: Arc<dyn MachineDirectory>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn MachineDirectory>) -> Self {
        Self::with_cache(directory, IDENTITY_CACHE_TTL, IDENTITY_CACHE_CAPACITY)
    }

    pub fn with_cache(directory: Arc<dyn MachineDirectory>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { cache, directory }
    }

    #[instrument(skip(self, display_name))]
    pub async fn resolve(
        &self,
        machine_type: MachineType,
        raw_id: &str,
        display_name: Option<&str>,
    ) -> Result<String, IdentityError> {
        let key = (machine_type, raw_id.to_string());

        if let Some(stable_id) = self.cache.get(&key).await {
            trace!("cache hit: {stable_id}");
            return Ok(stable_id);
        }

        let directory = self.directory.clone();
        let raw_id = raw_id.to_string();
        let display_name = display_name.map(str::to_string);

        self.cache
            .try_get_with(key, async move {
                directory
                    .lookup_or_register(machine_type, &raw_id, display_name.as_deref())
                    .await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Cached stable id, without consulting the directory
    pub async fn cached(&self, machine_type: MachineType, raw_id: &str) -> Option<String> {
        self.cache.get(&(machine_type, raw_id.to_string())).await
    }
}
