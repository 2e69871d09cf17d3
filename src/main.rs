//! Application entry point.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tipcast_relayer::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use tipcast_relayer::app::{
    AdmissionConfig, AppState, ExecutorConfig, ReconcilerConfig, ReconciliationWorker,
    SettlementExecutor, spawn_executor, spawn_reconciler,
};
use tipcast_relayer::domain::TipIntent;
use tipcast_relayer::infra::{BlocklistManager, PostgresConfig, PostgresStore, RpcChainClient};

/// Capacity of the admitted-intent channel feeding the executor
const INTENT_CHANNEL_CAPACITY: usize = 1024;

/// Application configuration
struct Config {
    database_url: String,
    chain_rpc_url: String,
    executor_key: SecretString,
    /// Spender address of the payout contract, the party users approve
    spender_address: String,
    /// Shared secret for webhook HMAC verification (optional; webhooks are
    /// rejected while unset)
    webhook_secret: Option<SecretString>,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    enable_executor: bool,
    executor_config: ExecutorConfig,
    enable_reconciler: bool,
    reconciler_config: ReconcilerConfig,
    admission_config: AdmissionConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let chain_rpc_url =
            env::var("CHAIN_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());
        let executor_key = Self::load_executor_key()?;
        let spender_address = env::var("SPENDER_ADDRESS")
            .context("SPENDER_ADDRESS not set")?
            .to_lowercase();

        let webhook_secret = env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let enable_rate_limiting = env::var("ENABLE_RATE_LIMITING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let rate_limit_config = RateLimitConfig::from_env();

        let enable_executor = env::var("ENABLE_SETTLEMENT_EXECUTOR")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let executor_defaults = ExecutorConfig::default();
        let executor_config = ExecutorConfig {
            batch_size: env::var("BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(executor_defaults.batch_size),
            flush_interval: env::var("FLUSH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(executor_defaults.flush_interval),
            receipt_timeout_secs: env::var("RECEIPT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(executor_defaults.receipt_timeout_secs),
            enabled: enable_executor,
        };

        let enable_reconciler = env::var("ENABLE_RECONCILER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let reconciler_defaults = ReconcilerConfig::default();
        let reconciler_config = ReconcilerConfig {
            interval: env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(reconciler_defaults.interval),
            fingerprint_retention_days: env::var("FINGERPRINT_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(reconciler_defaults.fingerprint_retention_days),
            enabled: enable_reconciler,
        };

        let mut admission_config = AdmissionConfig::new(spender_address.clone());
        if let Some(ms) = env::var("CHAIN_READ_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            admission_config.chain_read_timeout = Duration::from_millis(ms);
        }

        Ok(Self {
            database_url,
            chain_rpc_url,
            executor_key,
            spender_address,
            webhook_secret,
            host,
            port,
            enable_rate_limiting,
            rate_limit_config,
            enable_executor,
            executor_config,
            enable_reconciler,
            reconciler_config,
            admission_config,
        })
    }

    fn load_executor_key() -> Result<SecretString> {
        let key_str = env::var("EXECUTOR_PRIVATE_KEY").map_err(|_| {
            anyhow::anyhow!(
                "EXECUTOR_PRIVATE_KEY environment variable is not set.\n\
                 This is a REQUIRED configuration for production.\n\
                 Set EXECUTOR_PRIVATE_KEY to the key authorized as executor on the payout contract."
            )
        })?;

        if key_str.is_empty() {
            anyhow::bail!("EXECUTOR_PRIVATE_KEY environment variable is empty.");
        }

        if key_str == "YOUR_EXECUTOR_PRIVATE_KEY_HERE" {
            anyhow::bail!(
                "EXECUTOR_PRIVATE_KEY is set to the default placeholder value.\n\
                 Replace it with the actual executor key.\n\
                 SECURITY WARNING: Never run in production without a valid key!"
            );
        }

        info!("Loading executor key from environment");
        Ok(SecretString::from(key_str))
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  Tipcast Relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    // Initialize database
    let db_config = PostgresConfig::default();
    let store = PostgresStore::new(&config.database_url, db_config).await?;
    store.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    // Pool reference for the blocklist manager (before moving the store into Arc)
    let db_pool = store.pool().clone();

    // Initialize chain client
    let chain = RpcChainClient::with_defaults(&config.chain_rpc_url, config.executor_key.clone())?;
    info!("   ✓ Chain client created ({})", config.chain_rpc_url);
    info!("   ✓ Payout spender: {}", config.spender_address);

    // Initialize blocklist manager
    let blocklist = Arc::new(BlocklistManager::new(db_pool).await?);
    info!(
        "   ✓ Blocklist manager initialized ({} entries loaded)",
        blocklist.len()
    );

    if config.webhook_secret.is_some() {
        info!("   ✓ Webhook secret configured");
    } else {
        warn!("   ⚠ WEBHOOK_SECRET not set; all webhook deliveries will be rejected");
    }

    let store: Arc<PostgresStore> = Arc::new(store);
    let chain = Arc::new(chain);

    // Channel feeding admitted intents into the executor's submission lane
    let (intent_tx, intent_rx) = mpsc::channel::<TipIntent>(INTENT_CHANNEL_CAPACITY);

    let app_state = Arc::new(AppState::new(
        Arc::clone(&store) as _,
        Arc::clone(&chain) as _,
        Arc::clone(&blocklist),
        config.admission_config.clone(),
        intent_tx,
        config.webhook_secret.clone(),
    ));

    // Start settlement executor
    let executor_shutdown_tx = if config.enable_executor {
        let executor = Arc::new(SettlementExecutor::new(
            Arc::clone(&store) as _,
            Arc::clone(&chain) as _,
            Arc::clone(&blocklist),
            config.executor_config.clone(),
        ));

        // Finalize anything a previous process left in flight
        match executor.recover().await {
            Ok(0) => {}
            Ok(count) => info!("   ✓ Recovered {} unfinalized batches", count),
            Err(e) => warn!("   ⚠ Batch recovery failed: {}", e),
        }

        let (_executor_handle, shutdown_tx) = spawn_executor(executor, intent_rx);
        info!("   ✓ Settlement executor started");
        Some(shutdown_tx)
    } else {
        warn!("   ○ Settlement executor disabled; admitted tips will queue without settling");
        None
    };

    // Start reconciliation worker
    let reconciler_shutdown_tx = if config.enable_reconciler {
        let worker = Arc::new(ReconciliationWorker::new(
            Arc::clone(&store) as _,
            Arc::clone(&chain) as _,
            Arc::clone(&blocklist),
            config.spender_address.clone(),
            config.reconciler_config.clone(),
        ));
        let (_reconciler_handle, shutdown_tx) = spawn_reconciler(worker);
        info!("   ✓ Reconciliation worker started");
        Some(shutdown_tx)
    } else {
        info!("   ○ Reconciliation worker disabled");
        None
    };

    // Create router
    let router = if config.enable_rate_limiting {
        info!("   ✓ Rate limiting enabled");
        create_router_with_rate_limit(Arc::clone(&app_state), config.rate_limit_config.clone())
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(Arc::clone(&app_state))
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Signal workers to shut down; the executor drains its pending batch
    if let Some(tx) = executor_shutdown_tx {
        let _ = tx.send(true);
    }
    if let Some(tx) = reconciler_shutdown_tx {
        let _ = tx.send(true);
    }

    info!("Server shutdown complete");
    Ok(())
}
