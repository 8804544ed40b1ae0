//! Bounded connection pools toward remote endpoints
//!
//! One pool per remote endpoint host, used only by proxy repositories.
//! A pool bounds how many upstream requests may be in flight at once;
//! acquisition waits are bounded by a configurable timeout.

use crate::error::{RelayError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Point-in-time statistics for one connection pool, for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub endpoint: String,
    pub max: usize,
    pub in_use: usize,
    pub idle: usize,
}

/// A connection slot held by an upstream fetch; returned to the pool on
/// drop
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bounded pool of connection slots for one remote endpoint
pub struct ConnectionPool {
    endpoint: String,
    max: usize,
    semaphore: Arc<Semaphore>,
    in_use: Arc<AtomicUsize>,
}

impl ConnectionPool {
    fn new(endpoint: impl Into<String>, max: usize) -> Self {
        let max = max.max(1);
        ConnectionPool {
            endpoint: endpoint.into(),
            max,
            semaphore: Arc::new(Semaphore::new(max)),
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Acquire a connection slot, waiting at most `timeout` when the
    /// pool is saturated
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection> {
        let started = Instant::now();
        let acquired = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await;

        match acquired {
            Ok(Ok(permit)) => {
                self.in_use.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.endpoint, "Acquired pooled connection");
                Ok(PooledConnection {
                    _permit: permit,
                    in_use: self.in_use.clone(),
                })
            }
            Ok(Err(_closed)) => Err(RelayError::PoolExhausted {
                endpoint: self.endpoint.clone(),
                waited_ms: started.elapsed().as_millis() as u64,
            }),
            Err(_elapsed) => {
                warn!(
                    endpoint = %self.endpoint,
                    timeout_ms = timeout.as_millis() as u64,
                    "Connection pool exhausted"
                );
                Err(RelayError::PoolExhausted {
                    endpoint: self.endpoint.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = self.in_use.load(Ordering::Relaxed).min(self.max);
        PoolStats {
            endpoint: self.endpoint.clone(),
            max: self.max,
            in_use,
            idle: self.max - in_use,
        }
    }
}

/// Maintains one bounded pool per remote endpoint
pub struct ConnectionPoolManager {
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
}

impl ConnectionPoolManager {
    pub fn new() -> Self {
        ConnectionPoolManager {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Get the pool for an endpoint, creating it on first use
    ///
    /// If the configured size changed since the pool was created, a new
    /// pool replaces the old one; fetches holding slots of the old pool
    /// drain naturally.
    pub fn pool_for(&self, endpoint: &str, max: usize) -> Arc<ConnectionPool> {
        let mut pools = self
            .pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match pools.get(endpoint) {
            Some(pool) if pool.max == max.max(1) => pool.clone(),
            _ => {
                let pool = Arc::new(ConnectionPool::new(endpoint, max));
                pools.insert(endpoint.to_string(), pool.clone());
                pool
            }
        }
    }

    /// Statistics for every known pool
    pub fn stats(&self) -> Vec<PoolStats> {
        let pools = self
            .pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stats: Vec<_> = pools.values().map(|pool| pool.stats()).collect();
        stats.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stats
    }
}

impl Default for ConnectionPoolManager {
    fn default() -> Self {
        Self::new()
    }
}
