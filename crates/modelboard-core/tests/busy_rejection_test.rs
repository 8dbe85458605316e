//! A second submission while a run is active is refused without a stream.

mod common;

use common::start_test_server;
use serde_json::json;

#[tokio::test]
async fn test_second_submission_while_running_is_conflict() {
    let server = start_test_server().await;
    server.seed(&["a", "b"], 20).await;

    // Headers arrive as soon as the run is accepted; the body is never read.
    let first = server
        .client
        .post(server.url("/api/train/stream"))
        .json(&json!({"model": "resnet", "epochs": 1000, "batch_size": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 200);

    let (status, body) = server.post_json("/api/train/stream", &json!({"model": "baseline"})).await;
    assert_eq!(status, 409);
    assert_eq!(body["success"], false);

    let (_, health) = server.get_json("/api/health").await;
    assert_eq!(health["training"], true);
    drop(first);
}

#[tokio::test]
async fn test_busy_wins_over_empty_dataset() {
    let server = start_test_server().await;
    server.seed(&["a", "b"], 20).await;

    let first = server
        .client
        .post(server.url("/api/train/stream"))
        .json(&json!({"model": "resnet", "epochs": 1000, "batch_size": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 200);

    let (status, _) = server.post_json("/api/data/reset", &json!({})).await;
    assert_eq!(status, 200);
    for path in ["/api/train/stream", "/api/train"] {
        let response = server.client.post(server.url(path)).json(&json!({})).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 409, "{path}");
        assert_eq!(
            response.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "A training run is already in progress");
    }
    drop(first);
}
