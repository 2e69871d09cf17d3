//! HTTP-level tests for the chain RPC client.

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tipcast_relayer::domain::{
    AppError, ChainClient, ChainError, InteractionFingerprint, InteractionKind, ItemOutcome,
    ReceiptStatus, TipIntent,
};
use tipcast_relayer::infra::RpcChainClient;

fn client(uri: &str) -> RpcChainClient {
    RpcChainClient::with_defaults(uri, SecretString::from("test_executor_key")).unwrap()
}

fn sample_intent() -> TipIntent {
    TipIntent {
        recipient_fid: 1,
        from_address: "0xaaaa".to_string(),
        to_address: "0xbbbb".to_string(),
        token: "0xtoken".to_string(),
        amount: 2,
        kind: InteractionKind::Like,
        fingerprint: InteractionFingerprint("fp_1".to_string()),
    }
}

#[tokio::test]
async fn test_allowance_query() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tip_allowance" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "result": 42
        })))
        .mount(&server)
        .await;

    let allowance = client(&server.uri())
        .allowance("0xowner", "0xspender", "0xtoken")
        .await
        .unwrap();
    assert_eq!(allowance, 42);
}

#[tokio::test]
async fn test_balance_query() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tip_balanceOf" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "result": 1000
        })))
        .mount(&server)
        .await;

    let balance = client(&server.uri())
        .balance_of("0xowner", "0xtoken")
        .await
        .unwrap();
    assert_eq!(balance, 1000);
}

#[tokio::test]
async fn test_rpc_error_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "error": { "code": -32000, "message": "execution reverted" }
        })))
        .mount(&server)
        .await;

    let result = client(&server.uri())
        .allowance("0xowner", "0xspender", "0xtoken")
        .await;

    match result {
        Err(AppError::Chain(ChainError::Rpc(msg))) => {
            assert!(msg.contains("execution reverted"));
        }
        other => panic!("expected rpc error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_submit_batch_authorizes_with_executor_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tip_submitBatch" })))
        .and(header("authorization", "Bearer test_executor_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "result": { "tx_ref": "0xtxref" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tx_ref = client(&server.uri())
        .submit_batch(&[sample_intent()])
        .await
        .unwrap();
    assert_eq!(tx_ref, "0xtxref");
}

#[tokio::test]
async fn test_submit_batch_rpc_error_is_submission_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "error": { "code": -32001, "message": "nonce conflict" }
        })))
        .mount(&server)
        .await;

    let result = client(&server.uri()).submit_batch(&[sample_intent()]).await;
    assert!(matches!(
        result,
        Err(AppError::Chain(ChainError::SubmissionFailed(_)))
    ));
}

#[tokio::test]
async fn test_missing_receipt_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tip_getReceipt" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "result": null
        })))
        .mount(&server)
        .await;

    let receipt = client(&server.uri()).get_receipt("0xtxref").await.unwrap();
    assert!(receipt.is_none());
}

#[tokio::test]
async fn test_receipt_parses_per_item_outcomes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tip_getReceipt" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "tipcast",
            "result": {
                "tx_ref": "0xtxref",
                "status": "confirmed",
                "item_outcomes": ["ok", "insufficient_allowance", "reverted"]
            }
        })))
        .mount(&server)
        .await;

    let receipt = client(&server.uri())
        .get_receipt("0xtxref")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(receipt.status, ReceiptStatus::Confirmed);
    assert_eq!(
        receipt.item_outcomes,
        vec![
            ItemOutcome::Ok,
            ItemOutcome::InsufficientAllowance,
            ItemOutcome::Reverted
        ]
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    // Nothing listens on this port
    let result = client("http://127.0.0.1:1")
        .allowance("0xowner", "0xspender", "0xtoken")
        .await;
    assert!(matches!(
        result,
        Err(AppError::Chain(ChainError::Connection(_)))
    ));
}
