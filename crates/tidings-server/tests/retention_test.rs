mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use std::time::Duration;
use tidings_server::{app, AppState};
use tidings_store::StoreSettings;
use tower::ServiceExt;

async fn get_topic(state: &AppState, uri: &str) -> Value {
    let response = app(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_notifications_disappear_from_reads() {
    let store = common::open_store(StoreSettings {
        retention: Duration::from_secs(1),
        gc_interval: Duration::from_millis(100),
    });
    let state = AppState::new(store.manager.clone(), Duration::from_millis(200));

    store.manager.append("t", &json!({"A": "Hi"})).unwrap();
    let body = get_topic(&state, "/topics/t?fromIndex=0").await;
    assert_eq!(body["notifications"].as_array().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let body = get_topic(&state, "/topics/t?fromIndex=0").await;
    assert_eq!(body["notifications"], json!([]));

    // Indices keep counting after everything has been evicted.
    assert_eq!(store.manager.append("t", &json!("again")).unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_notifications_survive_sweeps() {
    let store = common::open_store(StoreSettings {
        retention: Duration::from_secs(60),
        gc_interval: Duration::from_millis(50),
    });
    let state = AppState::new(store.manager.clone(), Duration::from_millis(200));

    store.manager.append("t", &json!(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let body = get_topic(&state, "/topics/t").await;
    assert_eq!(body["notifications"].as_array().unwrap().len(), 1);
}
