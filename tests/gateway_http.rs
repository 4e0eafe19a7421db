use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use serde_json::Value;
use tower::ServiceExt;

use xa_bank::gateway::{router, state::AppState};
use xa_bank::{InMemoryShard, ShardOp, ShardRegistry, TransferCoordinator};

fn create_test_app() -> (axum::Router, Arc<InMemoryShard>, Arc<InMemoryShard>) {
    let s0 = Arc::new(InMemoryShard::with_accounts(
        "memory-0",
        BTreeMap::from([(1, dec!(100)), (2, dec!(100))]),
    ));
    let s1 = Arc::new(InMemoryShard::with_accounts(
        "memory-1",
        BTreeMap::from([(1, dec!(0))]),
    ));
    let registry = ShardRegistry::new(vec![s0.clone(), s1.clone()]);
    let coordinator = Arc::new(TransferCoordinator::new(Arc::new(registry)));
    (router(Arc::new(AppState::new(coordinator))), s0, s1)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_hello() {
    let (app, _, _) = create_test_app();

    let (status, body) = get(app, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Hello world");
}

#[tokio::test]
async fn test_transfer_success() {
    let (app, s0, s1) = create_test_app();

    let (status, body) = get(app, "/transferencia/0-1/1-1/50").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["msg"], "Sucesso.");
    assert_eq!(body["origin"], "0-1");
    assert_eq!(body["destination"], "1-1");
    assert_eq!(s0.balance(1), Some(dec!(50)));
    assert_eq!(s1.balance(1), Some(dec!(50)));
}

#[tokio::test]
async fn test_transfer_insufficient_funds() {
    let (app, s0, _) = create_test_app();

    let (status, body) = get(app, "/transferencia/0-1/0-2/1000000").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["name"], "InsufficientFunds");
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");
    assert!(body["message"].as_str().unwrap().contains("0-1"));
    assert_eq!(s0.balance(1), Some(dec!(100)));
}

#[tokio::test]
async fn test_transfer_validation_errors() {
    for (uri, name) in [
        ("/transferencia/9-1/0-1/10", "UnknownShard"),
        ("/transferencia/4294967296-1/0-1/10", "UnknownShard"),
        ("/transferencia/9-1/0-1/abc", "UnknownShard"),
        ("/transferencia/abc/0-1/10", "InvalidIdentifier"),
        ("/transferencia/0-1/1-1/abc", "InvalidAmount"),
        ("/transferencia/0-1/0-1/10", "SameAccount"),
        ("/transferencia/0-1/1-7/10", "AccountNotFound"),
    ] {
        let (app, _, _) = create_test_app();
        let (status, body) = get(app, uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{}", uri);
        assert_eq!(body["name"], name, "{}", uri);
    }
}

#[tokio::test]
async fn test_rollback_failure_body() {
    let (app, s0, _) = create_test_app();
    s0.fail_on(ShardOp::Rollback);

    let (status, body) = get(app, "/transferencia/0-1/1-1/500").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["name"], "RollbackFailure");
    assert_eq!(body["cause"]["name"], "InsufficientFunds");
    assert_eq!(body["rollback_failures"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = create_test_app();

    let (status, body) = get(app, "/api/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["shards"], 2);
    assert!(body["active_transaction"].is_null());
}
