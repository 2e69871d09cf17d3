//! End-to-end pipeline tests: dedup, admission, settlement, reconciliation.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use tokio::sync::mpsc;

use tipcast_relayer::app::{
    AdmissionConfig, AppState, ExecutorConfig, ReconcilerConfig, ReconciliationWorker,
    SettlementExecutor,
};
use tipcast_relayer::domain::{
    BlockReason, InteractionEvent, InteractionKind, PipelineOutcome, SkipReason, TipIntent,
    TippingConfig,
};
use tipcast_relayer::infra::BlocklistManager;
use tipcast_relayer::test_utils::{MockChainClient, MockTipStore};

struct Pipeline {
    state: Arc<AppState>,
    store: Arc<MockTipStore>,
    chain: Arc<MockChainClient>,
    blocklist: Arc<BlocklistManager>,
    intent_rx: mpsc::Receiver<TipIntent>,
}

fn create_pipeline() -> Pipeline {
    create_pipeline_with_chain(Arc::new(MockChainClient::new()))
}

fn create_pipeline_with_chain(chain: Arc<MockChainClient>) -> Pipeline {
    let store = Arc::new(MockTipStore::new());
    let blocklist = Arc::new(BlocklistManager::ephemeral());
    let (intent_tx, intent_rx) = mpsc::channel(64);

    let state = Arc::new(AppState::new(
        Arc::clone(&store) as _,
        Arc::clone(&chain) as _,
        Arc::clone(&blocklist),
        AdmissionConfig::new("0xspender"),
        intent_tx,
        Some(SecretString::from("secret")),
    ));

    Pipeline {
        state,
        store,
        chain,
        blocklist,
        intent_rx,
    }
}

impl Pipeline {
    fn executor(&self) -> SettlementExecutor {
        SettlementExecutor::new(
            Arc::clone(&self.store) as _,
            Arc::clone(&self.chain) as _,
            Arc::clone(&self.blocklist),
            ExecutorConfig::default(),
        )
    }

    fn drain_intents(&mut self) -> Vec<TipIntent> {
        let mut intents = Vec::new();
        while let Ok(intent) = self.intent_rx.try_recv() {
            intents.push(intent);
        }
        intents
    }
}

fn like_event(recipient_fid: u64, interactor_fid: u64, cast_ref: &str, at: i64) -> InteractionEvent {
    InteractionEvent {
        kind: InteractionKind::Like,
        recipient_fid,
        interactor_fid,
        cast_ref: cast_ref.to_string(),
        occurred_at: Utc.timestamp_opt(at, 0).unwrap(),
        recipient_address: Some("0xaaaa".to_string()),
        interactor_address: Some("0xbbbb".to_string()),
    }
}

#[tokio::test]
async fn test_repeated_deliveries_settle_exactly_once() {
    let mut pipeline = create_pipeline();
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    let event = like_event(1, 2, "0xabc", 100);

    let mut queued = 0;
    let mut duplicates = 0;
    for _ in 0..5 {
        match pipeline.state.service.process_event(&event).await.unwrap() {
            PipelineOutcome::Queued(_) => queued += 1,
            PipelineOutcome::Duplicate => duplicates += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(queued, 1);
    assert_eq!(duplicates, 4);

    let intents = pipeline.drain_intents();
    assert_eq!(intents.len(), 1);

    pipeline.executor().settle(intents).await.unwrap();

    // Exactly one on-chain transfer happened
    let submitted = pipeline.chain.submitted_batches();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].len(), 1);
    assert_eq!(pipeline.store.history().len(), 1);
}

#[tokio::test]
async fn test_out_of_order_redelivery_is_still_duplicate() {
    let pipeline = create_pipeline();
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    let first = like_event(1, 2, "0xabc", 100);
    let other = like_event(1, 2, "0xdef", 101);

    assert!(matches!(
        pipeline.state.service.process_event(&first).await.unwrap(),
        PipelineOutcome::Queued(_)
    ));
    assert!(matches!(
        pipeline.state.service.process_event(&other).await.unwrap(),
        PipelineOutcome::Queued(_)
    ));
    // Redelivery of the first event, arriving after a different event
    assert_eq!(
        pipeline.state.service.process_event(&first).await.unwrap(),
        PipelineOutcome::Duplicate
    );
}

#[tokio::test]
async fn test_over_limit_rejected_without_spend_change() {
    let pipeline = create_pipeline();

    // spending_limit=10, total_spent=9, like amount=2
    let now = Utc::now();
    pipeline.store.insert_config(TippingConfig {
        recipient_fid: 1,
        address: "0xaaaa".to_string(),
        payout_token: "0xtoken".to_string(),
        amount_like: 2,
        amount_reply: 0,
        amount_recast: 0,
        amount_quote: 0,
        amount_follow: 0,
        spending_limit: 10,
        total_spent: 9,
        active: true,
        created_at: now,
        updated_at: now,
    });

    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();

    assert_eq!(outcome, PipelineOutcome::Skipped(SkipReason::OverLimit));
    assert_eq!(pipeline.store.config(1).unwrap().total_spent, 9);
}

#[tokio::test]
async fn test_zero_allowance_blocks_then_short_circuits() {
    let chain = Arc::new(MockChainClient::new());
    chain.set_allowance("0xaaaa", 0);
    let pipeline = create_pipeline_with_chain(chain);
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    // First event takes the slow path, fails the allowance check, blocklists
    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Skipped(SkipReason::Blocked));
    assert_eq!(
        pipeline.blocklist.check("0xaaaa"),
        Some(BlockReason::InsufficientAllowance)
    );

    // Second event must be rejected from the cache without an allowance query
    let calls_after_first = pipeline.chain.allowance_calls();
    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xdef", 101))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Skipped(SkipReason::Blocked));
    assert_eq!(pipeline.chain.allowance_calls(), calls_after_first);
}

#[tokio::test]
async fn test_clear_blocklist_rederives_block_state() {
    let chain = Arc::new(MockChainClient::new());
    chain.set_allowance("0xaaaa", 0);
    let pipeline = create_pipeline_with_chain(chain);
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();
    assert!(!pipeline.blocklist.is_empty());

    // Administrative clear, allowance still zero
    pipeline.blocklist.clear_all().await.unwrap();

    let calls_before = pipeline.chain.allowance_calls();
    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xdef", 101))
        .await
        .unwrap();

    // Slow path re-ran and re-derived the same verdict
    assert!(pipeline.chain.allowance_calls() > calls_before);
    assert_eq!(outcome, PipelineOutcome::Skipped(SkipReason::Blocked));
    assert_eq!(
        pipeline.blocklist.check("0xaaaa"),
        Some(BlockReason::InsufficientAllowance)
    );
}

#[tokio::test]
async fn test_concurrent_admissions_never_overshoot_limit() {
    let pipeline = create_pipeline();
    // limit 10, amount 2: at most 5 of 10 concurrent events may pass
    pipeline.store.seed_config(1, "0xaaaa", 10, 2);

    let mut handles = Vec::new();
    for i in 0..10u64 {
        let service = Arc::clone(&pipeline.state.service);
        let event = like_event(1, 2 + i, &format!("0xcast{}", i), 100 + i as i64);
        handles.push(tokio::spawn(
            async move { service.process_event(&event).await },
        ));
    }

    let mut queued = 0;
    let mut over_limit = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            PipelineOutcome::Queued(_) => queued += 1,
            PipelineOutcome::Skipped(SkipReason::OverLimit) => over_limit += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(queued, 5);
    assert_eq!(over_limit, 5);

    let config = pipeline.store.config(1).unwrap();
    assert_eq!(config.total_spent, 10);
    assert!(config.total_spent <= config.spending_limit);
}

#[tokio::test]
async fn test_transient_chain_failure_returns_fingerprint() {
    let pipeline = create_pipeline_with_chain(Arc::new(MockChainClient::failing("rpc down")));
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();

    assert_eq!(outcome, PipelineOutcome::Skipped(SkipReason::Transient));
    // The fingerprint was given back, so a provider retry is not a duplicate
    assert_eq!(pipeline.store.fingerprint_count(), 0);
    assert_eq!(pipeline.store.config(1).unwrap().total_spent, 0);
}

#[tokio::test]
async fn test_config_lookup_error_returns_fingerprint() {
    let pipeline = create_pipeline();
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);
    pipeline.store.set_fail_config_lookups(true);

    let result = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await;
    assert!(result.is_err());
    // The claim was rolled back along with the error
    assert_eq!(pipeline.store.fingerprint_count(), 0);

    // The provider's retry settles normally once the store recovers
    pipeline.store.set_fail_config_lookups(false);
    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Queued(_)));
}

#[tokio::test]
async fn test_reservation_error_returns_fingerprint() {
    let pipeline = create_pipeline();
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);
    pipeline.store.set_fail_reserves(true);

    let result = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await;
    assert!(result.is_err());
    assert_eq!(pipeline.store.fingerprint_count(), 0);

    pipeline.store.set_fail_reserves(false);
    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Queued(_)));
}

#[tokio::test]
async fn test_reconciliation_unblocks_topped_up_account() {
    let chain = Arc::new(MockChainClient::new());
    chain.set_allowance("0xaaaa", 0);
    let pipeline = create_pipeline_with_chain(Arc::clone(&chain));
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xabc", 100))
        .await
        .unwrap();
    assert!(!pipeline.blocklist.is_empty());

    // User grants an allowance; reconciliation repairs the cache
    chain.set_allowance("0xaaaa", 50);
    let worker = ReconciliationWorker::new(
        Arc::clone(&pipeline.store) as _,
        Arc::clone(&pipeline.chain) as _,
        Arc::clone(&pipeline.blocklist),
        "0xspender",
        ReconcilerConfig::default(),
    );
    let summary = worker.run_once().await.unwrap();
    assert_eq!(summary.removed, 1);
    assert!(pipeline.blocklist.is_empty());

    // The next event is admitted
    let outcome = pipeline
        .state
        .service
        .process_event(&like_event(1, 2, "0xdef", 101))
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Queued(_)));
}

#[tokio::test]
async fn test_admitted_intents_flow_to_history() {
    let mut pipeline = create_pipeline();
    pipeline.store.seed_config(1, "0xaaaa", 100, 2);

    for i in 0..3u64 {
        let outcome = pipeline
            .state
            .service
            .process_event(&like_event(1, 2 + i, &format!("0xcast{}", i), 100))
            .await
            .unwrap();
        assert!(outcome.is_queued());
    }

    let intents = pipeline.drain_intents();
    assert_eq!(intents.len(), 3);
    pipeline.executor().settle(intents).await.unwrap();

    let history = pipeline.store.history();
    assert_eq!(history.len(), 3);
    for record in &history {
        assert_eq!(record.from_address, "0xaaaa");
        assert_eq!(record.to_address, "0xbbbb");
        assert_eq!(record.amount, 2);
        assert_eq!(record.kind, InteractionKind::Like);
    }
    // Spend stays committed after confirmation
    assert_eq!(pipeline.store.config(1).unwrap().total_spent, 6);
}
