//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, BatchStatus, DatabaseError, FingerprintAdmission, InteractionFingerprint,
    PaginatedResponse, SettlementBatch, TipHistory, TipStore, TippingConfig,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL-backed pipeline store with connection pooling
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with custom pool configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new store with default pool configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (blocklist manager, testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_config(row: &sqlx::postgres::PgRow) -> TippingConfig {
        TippingConfig {
            recipient_fid: row.get::<i64, _>("recipient_fid") as u64,
            address: row.get("address"),
            payout_token: row.get("payout_token"),
            amount_like: row.get::<i64, _>("amount_like") as u64,
            amount_reply: row.get::<i64, _>("amount_reply") as u64,
            amount_recast: row.get::<i64, _>("amount_recast") as u64,
            amount_quote: row.get::<i64, _>("amount_quote") as u64,
            amount_follow: row.get::<i64, _>("amount_follow") as u64,
            spending_limit: row.get::<i64, _>("spending_limit") as u64,
            total_spent: row.get::<i64, _>("total_spent") as u64,
            active: row.get("active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_batch(row: &sqlx::postgres::PgRow) -> Result<SettlementBatch, AppError> {
        let status_str: String = row.get("status");
        let items_json: serde_json::Value = row.get("items");
        let items = serde_json::from_value(items_json)
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(SettlementBatch {
            id: row.get("id"),
            items,
            status: status_str.parse().unwrap_or(BatchStatus::Pending),
            tx_ref: row.get("tx_ref"),
            last_error: row.get("last_error"),
            submitted_at: row.get("submitted_at"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_history(row: &sqlx::postgres::PgRow) -> TipHistory {
        let kind_str: String = row.get("kind");
        TipHistory {
            from_address: row.get("from_address"),
            to_address: row.get("to_address"),
            token: row.get("token"),
            amount: row.get::<i64, _>("amount") as u64,
            kind: kind_str
                .parse()
                .unwrap_or(crate::domain::InteractionKind::Like),
            tx_ref: row.get("tx_ref"),
            fingerprint: row.get("fingerprint"),
            confirmed_at: row.get("confirmed_at"),
        }
    }
}

#[async_trait]
impl TipStore for PostgresStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint))]
    async fn admit_fingerprint(
        &self,
        fingerprint: &InteractionFingerprint,
    ) -> Result<FingerprintAdmission, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO interaction_fingerprints (fingerprint)
            VALUES ($1)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if result.rows_affected() == 1 {
            Ok(FingerprintAdmission::Accepted)
        } else {
            Ok(FingerprintAdmission::Duplicate)
        }
    }

    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint))]
    async fn forget_fingerprint(
        &self,
        fingerprint: &InteractionFingerprint,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM interaction_fingerprints WHERE fingerprint = $1")
            .bind(fingerprint.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prune_fingerprints(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM interaction_fingerprints WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_tipping_config(
        &self,
        recipient_fid: u64,
    ) -> Result<Option<TippingConfig>, AppError> {
        let row = sqlx::query("SELECT * FROM tipping_configs WHERE recipient_fid = $1")
            .bind(recipient_fid as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.map(|row| Self::row_to_config(&row)))
    }

    #[instrument(skip(self))]
    async fn get_config_by_address(
        &self,
        address: &str,
    ) -> Result<Option<TippingConfig>, AppError> {
        let row = sqlx::query("SELECT * FROM tipping_configs WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.map(|row| Self::row_to_config(&row)))
    }

    #[instrument(skip(self))]
    async fn reserve_spend(&self, recipient_fid: u64, amount: u64) -> Result<bool, AppError> {
        // The WHERE clause is the admission decision: the update commits only
        // when the reservation fits within the limit, atomically, so two
        // concurrent reservations for one recipient can never both pass on a
        // stale total_spent read.
        let result = sqlx::query(
            r#"
            UPDATE tipping_configs
            SET total_spent = total_spent + $2, updated_at = NOW()
            WHERE recipient_fid = $1
              AND active
              AND total_spent + $2 <= spending_limit
            "#,
        )
        .bind(recipient_fid as i64)
        .bind(amount as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_spend(&self, recipient_fid: u64, amount: u64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE tipping_configs
            SET total_spent = GREATEST(total_spent - $2, 0), updated_at = NOW()
            WHERE recipient_fid = $1
            "#,
        )
        .bind(recipient_fid as i64)
        .bind(amount as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, batch), fields(id = %batch.id, items = batch.items.len()))]
    async fn insert_batch(&self, batch: &SettlementBatch) -> Result<(), AppError> {
        let items =
            serde_json::to_value(&batch.items).map_err(|e| AppError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO settlement_batches (id, items, status, tx_ref, last_error, submitted_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(&batch.id)
        .bind(items)
        .bind(batch.status.as_str())
        .bind(&batch.tx_ref)
        .bind(&batch.last_error)
        .bind(batch.submitted_at)
        .bind(batch.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_batch_status(
        &self,
        id: &str,
        status: BatchStatus,
        tx_ref: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE settlement_batches
            SET status = $2,
                tx_ref = COALESCE($3, tx_ref),
                last_error = $4,
                submitted_at = CASE WHEN $2 = 'submitted' THEN NOW() ELSE submitted_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(tx_ref)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_batch(&self, id: &str) -> Result<Option<SettlementBatch>, AppError> {
        let row = sqlx::query("SELECT * FROM settlement_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_batch(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn get_unfinalized_batches(&self) -> Result<Vec<SettlementBatch>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM settlement_batches
            WHERE status IN ('pending', 'submitted')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        rows.iter().map(Self::row_to_batch).collect()
    }

    #[instrument(skip(self, record), fields(tx_ref = %record.tx_ref, to = %record.to_address))]
    async fn record_tip_history(&self, record: &TipHistory) -> Result<(), AppError> {
        // ON CONFLICT DO NOTHING makes receipt replay after a crash safe:
        // re-finalizing a batch re-inserts the same (tx_ref, fingerprint)
        // pairs as no-ops.
        sqlx::query(
            r#"
            INSERT INTO tip_history (from_address, to_address, token, amount, kind, tx_ref, fingerprint, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tx_ref, fingerprint) DO NOTHING
            "#,
        )
        .bind(&record.from_address)
        .bind(&record.to_address)
        .bind(&record.token)
        .bind(record.amount as i64)
        .bind(record.kind.as_str())
        .bind(&record.tx_ref)
        .bind(&record.fingerprint)
        .bind(record.confirmed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tip_history(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TipHistory>, AppError> {
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more items
        let fetch_limit = limit + 1;

        let cursor_id: Option<i64> = match cursor {
            Some(raw) => Some(raw.parse().map_err(|_| {
                AppError::Validation(crate::domain::ValidationError::InvalidField {
                    field: "cursor".to_string(),
                    message: "Invalid cursor".to_string(),
                })
            })?),
            None => None,
        };

        let rows = match cursor_id {
            Some(cursor_id) => {
                sqlx::query("SELECT * FROM tip_history WHERE id < $1 ORDER BY id DESC LIMIT $2")
                    .bind(cursor_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM tip_history ORDER BY id DESC LIMIT $1")
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let has_more = rows.len() as i64 > limit;
        let rows = &rows[..rows.len().min(limit as usize)];

        let next_cursor = if has_more {
            rows.last().map(|row| row.get::<i64, _>("id").to_string())
        } else {
            None
        };

        let items = rows.iter().map(Self::row_to_history).collect();
        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }
}
