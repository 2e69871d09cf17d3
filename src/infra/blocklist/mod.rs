//! Blocklist manager: a cache of accounts known to lack tip funding.
//!
//! Membership is a derived fact (on-chain allowance/balance state as of the
//! last check), never a source of truth. The in-memory DashMap gives O(1)
//! admission checks under bursty webhook traffic; Postgres persistence keeps
//! the cache shared across service instances and warm across restarts.
//! Wiping the whole thing is always safe: the next admission miss re-derives
//! fresh state from the chain.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::domain::{AppError, BlockReason, BlocklistEntry, DatabaseError};

#[derive(Debug, Clone)]
struct CachedEntry {
    reason: BlockReason,
    last_checked_at: DateTime<Utc>,
}

/// Thread-safe blocklist cache with optional database persistence.
#[derive(Debug)]
pub struct BlocklistManager {
    store: DashMap<String, CachedEntry>,
    pool: Option<PgPool>,
}

impl BlocklistManager {
    /// Create a manager backed by Postgres and load existing entries.
    pub async fn new(pool: PgPool) -> Result<Self, AppError> {
        let manager = Self {
            store: DashMap::new(),
            pool: Some(pool),
        };

        manager.load_from_database().await?;

        info!(
            count = manager.store.len(),
            "Blocklist manager initialized from database"
        );

        Ok(manager)
    }

    /// Create a cache-only manager with no persistence. Used by tests and
    /// single-instance deployments where a cold start simply rebuilds the
    /// cache lazily.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            store: DashMap::new(),
            pool: None,
        }
    }

    async fn load_from_database(&self) -> Result<(), AppError> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT address, reason, last_checked_at FROM blocklist ORDER BY created_at",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        for (address, reason, last_checked_at) in rows {
            match reason.parse::<BlockReason>() {
                Ok(reason) => {
                    self.store.insert(
                        address,
                        CachedEntry {
                            reason,
                            last_checked_at,
                        },
                    );
                }
                Err(_) => {
                    warn!(address = %address, reason = %reason, "Skipping blocklist row with unknown reason");
                }
            }
        }

        Ok(())
    }

    /// Check whether an address is blocked.
    /// Returns `Some(reason)` if blocked, `None` otherwise.
    #[must_use]
    pub fn check(&self, address: &str) -> Option<BlockReason> {
        self.store.get(address).map(|entry| entry.value().reason)
    }

    /// Add or refresh an entry. Persisted before the cache is updated so a
    /// crash cannot leave a cache-only entry other instances never see.
    pub async fn insert(&self, address: &str, reason: BlockReason) -> Result<(), AppError> {
        let now = Utc::now();
        let is_update = self.store.contains_key(address);

        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                INSERT INTO blocklist (address, reason, last_checked_at, created_at)
                VALUES ($1, $2, $3, $3)
                ON CONFLICT (address) DO UPDATE SET
                    reason = EXCLUDED.reason,
                    last_checked_at = EXCLUDED.last_checked_at
                "#,
            )
            .bind(address)
            .bind(reason.as_str())
            .bind(now)
            .execute(pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        }

        self.store.insert(
            address.to_string(),
            CachedEntry {
                reason,
                last_checked_at: now,
            },
        );

        if is_update {
            info!(address = %address, reason = %reason, "Blocklist entry refreshed");
        } else {
            warn!(address = %address, reason = %reason, "Address added to blocklist");
        }

        Ok(())
    }

    /// Record that a reconciliation re-check ran without changing the verdict.
    pub async fn touch(&self, address: &str) -> Result<(), AppError> {
        let now = Utc::now();

        if let Some(pool) = &self.pool {
            sqlx::query("UPDATE blocklist SET last_checked_at = $1 WHERE address = $2")
                .bind(now)
                .bind(address)
                .execute(pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        }

        if let Some(mut entry) = self.store.get_mut(address) {
            entry.last_checked_at = now;
        }

        Ok(())
    }

    /// Remove an address. Returns `true` if it was present.
    pub async fn remove(&self, address: &str) -> Result<bool, AppError> {
        let mut rows_affected = 0;
        if let Some(pool) = &self.pool {
            let result = sqlx::query("DELETE FROM blocklist WHERE address = $1")
                .bind(address)
                .execute(pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
            rows_affected = result.rows_affected();
        }

        if self.store.remove(address).is_some() {
            info!(address = %address, "Address removed from blocklist");
            Ok(true)
        } else if rows_affected > 0 {
            // Was in the table but not in this instance's cache
            info!(address = %address, "Address removed from blocklist (was not in cache)");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Empty the blocklist unconditionally. Safe because membership is a
    /// cache: the next admission attempt for any address re-derives fresh
    /// state via the chain. Returns the number of cached entries dropped.
    pub async fn clear_all(&self) -> Result<u64, AppError> {
        if let Some(pool) = &self.pool {
            sqlx::query("DELETE FROM blocklist")
                .execute(pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        }

        let dropped = self.store.len() as u64;
        self.store.clear();

        warn!(dropped = dropped, "Blocklist cleared");
        Ok(dropped)
    }

    /// Current number of blocklisted addresses
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Snapshot of all entries, for reconciliation and the admin API
    #[must_use]
    pub fn snapshot(&self) -> Vec<BlocklistEntry> {
        self.store
            .iter()
            .map(|entry| BlocklistEntry {
                address: entry.key().clone(),
                reason: entry.value().reason,
                last_checked_at: entry.value().last_checked_at,
            })
            .collect()
    }
}
