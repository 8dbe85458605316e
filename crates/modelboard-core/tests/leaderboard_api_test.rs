//! Integration tests for the leaderboard and dataset endpoints.

mod common;

use common::start_test_server;
use serde_json::json;

#[tokio::test]
async fn test_health() {
    let server = start_test_server().await;
    let (status, body) = server.get_json("/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["training"], false);
}

#[tokio::test]
async fn test_data_save_stats_and_reset() {
    let server = start_test_server().await;

    let (status, saved) = server
        .post_json(
            "/api/data/save",
            &json!({"samples": [common::sample("hi", 0, 0), common::sample("hi", 0, 1), common::sample("yo", 1, 0)]}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(saved["added_samples"], 3);
    assert_eq!(saved["total_samples"], 3);

    let (_, stats) = server.get_json("/api/data/stats").await;
    assert_eq!(stats["total_samples"], 3);
    assert_eq!(stats["num_gestures"], 2);
    assert_eq!(stats["gesture_counts"]["hi"], 2);

    let (status, _) = server.post_json("/api/data/reset", &json!({})).await;
    assert_eq!(status, 200);
    let (_, stats) = server.get_json("/api/data/stats").await;
    assert_eq!(stats["total_samples"], 0);
}

#[tokio::test]
async fn test_leaderboard_sort_delete_and_clear() {
    let server = start_test_server().await;
    server.seed(&["a", "b"], 4).await;
    for model in ["baseline", "slive"] {
        let (_, _, events) = server.train(&json!({"model": model, "epochs": 1, "batch_size": 4})).await;
        assert_eq!(events.last().unwrap()["type"], "complete");
    }

    let (_, board) = server.get_json("/api/leaderboard?sort_by=num_parameters&order=asc").await;
    assert_eq!(board["total"], 2);
    let params: Vec<u64> =
        board["results"].as_array().unwrap().iter().map(|r| r["num_parameters"].as_u64().unwrap()).collect();
    assert!(params[0] <= params[1]);

    let (_, unsorted) = server.get_json("/api/leaderboard?sort_by=bogus").await;
    assert_eq!(unsorted["results"][0]["model_key"], "baseline");
    assert_eq!(unsorted["results"][1]["model_key"], "slive");

    let response = server.client.delete(server.url("/api/leaderboard/delete/5")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Index out of range");

    let response = server.client.delete(server.url("/api/leaderboard/delete/0")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let (_, board) = server.get_json("/api/leaderboard").await;
    assert_eq!(board["total"], 1);
    assert_eq!(board["results"][0]["model_key"], "slive");

    for _ in 0..2 {
        let (status, body) = server.post_json("/api/leaderboard/clear", &json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
    }
    let (_, board) = server.get_json("/api/leaderboard").await;
    assert_eq!(board["total"], 0);
    let (_, live) = server.get_json("/api/live/models").await;
    assert_eq!(live["models"], json!([]));
}

#[tokio::test]
async fn test_models_list() {
    let server = start_test_server().await;
    let (status, body) = server.get_json("/api/models/list").await;
    assert_eq!(status, 200);
    let keys: Vec<&str> = body["models"].as_array().unwrap().iter().map(|m| m["key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["baseline", "densenet", "efficientnet", "resnet", "slive"]);
}
