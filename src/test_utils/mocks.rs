//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::domain::{
    AppError, BatchReceipt, BatchStatus, ChainClient, ChainError, DatabaseError,
    FingerprintAdmission, InteractionFingerprint, ItemOutcome, PaginatedResponse, ReceiptStatus,
    SettlementBatch, TipHistory, TipIntent, TipStore, TippingConfig,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// In-memory store mock. The mutex-guarded maps give the same all-or-nothing
/// reserve semantics the real store gets from its conditional update.
pub struct MockTipStore {
    fingerprints: Mutex<HashMap<String, DateTime<Utc>>>,
    configs: Mutex<HashMap<u64, TippingConfig>>,
    batches: Mutex<Vec<SettlementBatch>>,
    history: Mutex<Vec<TipHistory>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    fail_config_lookups: AtomicBool,
    fail_reserves: AtomicBool,
}

impl MockTipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            fingerprints: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            batches: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            config,
            is_healthy: AtomicBool::new(true),
            fail_config_lookups: AtomicBool::new(false),
            fail_reserves: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make config lookups fail while everything else keeps working
    pub fn set_fail_config_lookups(&self, fail: bool) {
        self.fail_config_lookups.store(fail, Ordering::Relaxed);
    }

    /// Make spend reservations fail while everything else keeps working
    pub fn set_fail_reserves(&self, fail: bool) {
        self.fail_reserves.store(fail, Ordering::Relaxed);
    }

    /// Insert a full tipping config
    pub fn insert_config(&self, config: TippingConfig) {
        self.configs
            .lock()
            .unwrap()
            .insert(config.recipient_fid, config);
    }

    /// Convenience: active config paying `amount` for every kind
    pub fn seed_config(&self, fid: u64, address: &str, spending_limit: u64, amount: u64) {
        let now = Utc::now();
        self.insert_config(TippingConfig {
            recipient_fid: fid,
            address: address.to_string(),
            payout_token: "0xtoken".to_string(),
            amount_like: amount,
            amount_reply: amount,
            amount_recast: amount,
            amount_quote: amount,
            amount_follow: amount,
            spending_limit,
            total_spent: 0,
            active: true,
            created_at: now,
            updated_at: now,
        });
    }

    pub fn config(&self, fid: u64) -> Option<TippingConfig> {
        self.configs.lock().unwrap().get(&fid).cloned()
    }

    pub fn history(&self) -> Vec<TipHistory> {
        self.history.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<SettlementBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.lock().unwrap().len()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

impl Default for MockTipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TipStore for MockTipStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn admit_fingerprint(
        &self,
        fingerprint: &InteractionFingerprint,
    ) -> Result<FingerprintAdmission, AppError> {
        self.check_should_fail()?;
        let mut fingerprints = self.fingerprints.lock().unwrap();
        if fingerprints.contains_key(fingerprint.as_str()) {
            Ok(FingerprintAdmission::Duplicate)
        } else {
            fingerprints.insert(fingerprint.as_str().to_string(), Utc::now());
            Ok(FingerprintAdmission::Accepted)
        }
    }

    async fn forget_fingerprint(
        &self,
        fingerprint: &InteractionFingerprint,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.fingerprints.lock().unwrap().remove(fingerprint.as_str());
        Ok(())
    }

    async fn prune_fingerprints(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let mut fingerprints = self.fingerprints.lock().unwrap();
        let before = fingerprints.len();
        fingerprints.retain(|_, created_at| *created_at >= older_than);
        Ok((before - fingerprints.len()) as u64)
    }

    async fn get_tipping_config(
        &self,
        recipient_fid: u64,
    ) -> Result<Option<TippingConfig>, AppError> {
        self.check_should_fail()?;
        if self.fail_config_lookups.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "config lookup failed".to_string(),
            )));
        }
        Ok(self.configs.lock().unwrap().get(&recipient_fid).cloned())
    }

    async fn get_config_by_address(
        &self,
        address: &str,
    ) -> Result<Option<TippingConfig>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .find(|c| c.address == address)
            .cloned())
    }

    async fn reserve_spend(&self, recipient_fid: u64, amount: u64) -> Result<bool, AppError> {
        self.check_should_fail()?;
        if self.fail_reserves.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "reservation failed".to_string(),
            )));
        }
        let mut configs = self.configs.lock().unwrap();
        match configs.get_mut(&recipient_fid) {
            Some(config)
                if config.active && config.total_spent + amount <= config.spending_limit =>
            {
                config.total_spent += amount;
                config.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_spend(&self, recipient_fid: u64, amount: u64) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut configs = self.configs.lock().unwrap();
        if let Some(config) = configs.get_mut(&recipient_fid) {
            config.total_spent = config.total_spent.saturating_sub(amount);
            config.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_batch(&self, batch: &SettlementBatch) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn update_batch_status(
        &self,
        id: &str,
        status: BatchStatus,
        tx_ref: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.iter_mut().find(|b| b.id == id) {
            batch.status = status;
            if let Some(tx_ref) = tx_ref {
                batch.tx_ref = Some(tx_ref.to_string());
            }
            batch.last_error = error.map(|e| e.to_string());
            if status == BatchStatus::Submitted && batch.submitted_at.is_none() {
                batch.submitted_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn get_batch(&self, id: &str) -> Result<Option<SettlementBatch>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .batches
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn get_unfinalized_batches(&self) -> Result<Vec<SettlementBatch>, AppError> {
        self.check_should_fail()?;
        let mut batches: Vec<SettlementBatch> = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                b.status == BatchStatus::Pending || b.status == BatchStatus::Submitted
            })
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(batches)
    }

    async fn record_tip_history(&self, record: &TipHistory) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut history = self.history.lock().unwrap();
        let exists = history
            .iter()
            .any(|h| h.tx_ref == record.tx_ref && h.fingerprint == record.fingerprint);
        if !exists {
            history.push(record.clone());
        }
        Ok(())
    }

    async fn list_tip_history(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TipHistory>, AppError> {
        self.check_should_fail()?;
        let history = self.history.lock().unwrap();
        let mut items: Vec<TipHistory> = history.iter().rev().cloned().collect();

        let offset = match cursor {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                AppError::Validation(crate::domain::ValidationError::InvalidField {
                    field: "cursor".to_string(),
                    message: "Invalid cursor".to_string(),
                })
            })?,
            None => 0,
        };

        let limit = limit.clamp(1, 100) as usize;
        items = items.into_iter().skip(offset).collect();
        let has_more = items.len() > limit;
        let items: Vec<TipHistory> = items.into_iter().take(limit).collect();
        let next_cursor = if has_more {
            Some((offset + limit).to_string())
        } else {
            None
        };

        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }
}

/// Mock chain client with scriptable allowances, balances, and receipts.
/// Accounts default to unlimited funding; tests narrow them as needed.
pub struct MockChainClient {
    allowances: Mutex<HashMap<String, u64>>,
    balances: Mutex<HashMap<String, u64>>,
    submitted: Mutex<Vec<Vec<TipIntent>>>,
    scripted_outcomes: Mutex<Option<Vec<ItemOutcome>>>,
    receipt_status: Mutex<ReceiptStatus>,
    allowance_calls: AtomicU32,
    config: MockConfig,
    is_healthy: AtomicBool,
    tx_counter: AtomicU32,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            allowances: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            scripted_outcomes: Mutex::new(None),
            receipt_status: Mutex::new(ReceiptStatus::Confirmed),
            allowance_calls: AtomicU32::new(0),
            config,
            is_healthy: AtomicBool::new(true),
            tx_counter: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_allowance(&self, owner: &str, amount: u64) {
        self.allowances
            .lock()
            .unwrap()
            .insert(owner.to_string(), amount);
    }

    pub fn set_balance(&self, owner: &str, amount: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert(owner.to_string(), amount);
    }

    /// Per-item outcomes the next receipts will carry
    pub fn script_item_outcomes(&self, outcomes: Vec<ItemOutcome>) {
        *self.scripted_outcomes.lock().unwrap() = Some(outcomes);
    }

    /// Receipt status for subsequent receipts (default: confirmed)
    pub fn set_receipt_status(&self, status: ReceiptStatus) {
        *self.receipt_status.lock().unwrap() = status;
    }

    pub fn submitted_batches(&self) -> Vec<Vec<TipIntent>> {
        self.submitted.lock().unwrap().clone()
    }

    /// Number of allowance reads served, for asserting the blocklist fast
    /// path short-circuits without a chain call
    pub fn allowance_calls(&self) -> u32 {
        self.allowance_calls.load(Ordering::Relaxed)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Chain(ChainError::Rpc(msg)));
        }
        Ok(())
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Chain(ChainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn allowance(&self, owner: &str, _spender: &str, _token: &str) -> Result<u64, AppError> {
        self.allowance_calls.fetch_add(1, Ordering::Relaxed);
        self.check_should_fail()?;
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(owner)
            .copied()
            .unwrap_or(u64::MAX))
    }

    async fn balance_of(&self, owner: &str, _token: &str) -> Result<u64, AppError> {
        self.check_should_fail()?;
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(owner)
            .copied()
            .unwrap_or(u64::MAX))
    }

    async fn submit_batch(&self, items: &[TipIntent]) -> Result<String, AppError> {
        self.check_should_fail()?;
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(items.to_vec());
        let n = self.tx_counter.fetch_add(1, Ordering::Relaxed);
        Ok(format!("tx_{}", n))
    }

    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<BatchReceipt>, AppError> {
        self.check_should_fail()?;
        let status = *self.receipt_status.lock().unwrap();
        let item_outcomes = self
            .scripted_outcomes
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| vec![ItemOutcome::Ok; 64]);
        Ok(Some(BatchReceipt {
            tx_ref: tx_ref.to_string(),
            status,
            item_outcomes,
        }))
    }
}
