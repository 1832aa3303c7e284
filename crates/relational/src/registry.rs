//! Pool registry: one [`ConnectionPool`] per distinct [`ConnectionKey`].
//!
//! This map is the only structure mutated concurrently by unrelated
//! executions; it lives behind a `DashMap` so no global lock serializes
//! them. The registry is an explicitly constructed instance handed to its
//! callers, not process-global state.

use std::sync::Arc;

use dashmap::DashMap;
use meridian_error::{ErrorCode, MeridianError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::credential::CredentialProvider;
use crate::key::ConnectionKey;
use crate::pool::{ConnectionPool, PoolStats};
use crate::vendor::DatabaseManager;

/// Snapshot of every pool's statistics, sorted by pool name for
/// deterministic output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub pools: Vec<PoolStats>,
}

#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<ConnectionKey, Arc<ConnectionPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pool for `key`, creating it if absent.
    ///
    /// Concurrent creation requests for the same new key collapse to a
    /// single pool: the `DashMap` entry decides the winner, and a losing
    /// candidate has opened no connections so discarding it is free.
    /// `max_size` and the creating user are fixed at creation time.
    pub fn get_or_create(
        &self,
        key: ConnectionKey,
        max_size: usize,
        manager: &Arc<dyn DatabaseManager>,
        credentials: Arc<dyn CredentialProvider>,
        user: &str,
    ) -> Result<Arc<ConnectionPool>> {
        if let Some(pool) = self.pools.get(&key) {
            return Ok(Arc::clone(&pool));
        }

        let url = manager.build_url(key.datasource())?;
        let candidate = ConnectionPool::new(
            key.clone(),
            url,
            manager.driver(),
            user,
            max_size,
            manager.opener(),
            credentials,
        );

        let pool = self.pools.entry(key).or_insert(candidate).clone();
        info!(pool = %pool.name(), max_size, user, "Pool ready");
        Ok(pool)
    }

    /// Look up a pool by its deterministic name (the key's `short_id`).
    pub fn find_by_name(&self, name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Soft-evict idle connections from the named pool.
    pub async fn soft_evict(&self, name: &str) -> Result<(usize, usize)> {
        let pool = self.find_by_name(name).ok_or_else(|| {
            MeridianError::new(
                ErrorCode::PoolNotFound,
                format!("No pool named '{}'", name),
            )
            .with_hint("GET /server/v1/executorInfo lists known pools")
        })?;
        Ok(pool.soft_evict().await)
    }

    /// Forcibly close all connections for `key` and drop the pool entry.
    ///
    /// A subsequent `get_or_create` for the same key builds a fresh pool.
    /// Returns whether a pool existed.
    pub async fn remove_and_close(&self, key: &ConnectionKey) -> bool {
        match self.pools.remove(key) {
            Some((_, pool)) => {
                pool.close_all().await;
                info!(pool = %pool.name(), "Pool removed and closed");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut pools: Vec<PoolStats> = self
            .pools
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        RegistrySnapshot { pools }
    }

    /// Pools created by the given authenticated user.
    pub fn pools_for_user(&self, user: &str) -> Vec<PoolStats> {
        let mut pools: Vec<PoolStats> = self
            .pools
            .iter()
            .filter(|entry| entry.value().user() == user)
            .map(|entry| entry.value().stats())
            .collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools.len())
            .finish()
    }
}
