//! Integration tests for the training progress stream.

mod common;

use common::start_test_server;
use serde_json::json;

#[tokio::test]
async fn test_stream_emits_status_epochs_and_single_complete() {
    let server = start_test_server().await;
    server.seed(&["hello", "bye"], 5).await;

    let (status, content_type, events) = server
        .train(&json!({"model": "baseline", "epochs": 3, "batch_size": 4, "learning_rate": 0.01}))
        .await;

    assert_eq!(status, 200);
    assert_eq!(content_type.as_deref(), Some("text/event-stream"));
    assert_eq!(events[0]["type"], "status");
    assert_eq!(events[0]["progress"], 0);

    let epochs: Vec<u64> =
        events.iter().filter(|e| e["type"] == "epoch").map(|e| e["epoch"].as_u64().unwrap()).collect();
    assert_eq!(epochs, vec![1, 2, 3]);

    let terminal: Vec<_> = events.iter().filter(|e| e["type"] == "complete" || e["type"] == "error").collect();
    assert_eq!(terminal.len(), 1);
    let complete = events.last().unwrap();
    assert_eq!(complete["type"], "complete", "run failed: {complete}");
    assert_eq!(complete["progress"], 100);

    let result = &complete["result"];
    let val_accuracy = result["val_accuracy"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&val_accuracy));
    assert_eq!(result["model_key"], "baseline");
    assert_eq!(result["epochs"], 3);
    assert_eq!(result["num_samples"], 10);
    assert_eq!(result["num_classes"], 2);
    assert!(result["num_parameters"].as_u64().unwrap() > 0);

    let (_, leaderboard) = server.get_json("/api/leaderboard").await;
    assert_eq!(leaderboard["total"], 1);
    assert_eq!(leaderboard["results"][0]["model_file"], result["model_file"]);
}

#[tokio::test]
async fn test_status_progress_is_non_decreasing() {
    let server = start_test_server().await;
    server.seed(&["a", "b"], 4).await;

    let (_, _, events) = server.train(&json!({"model": "slive", "epochs": 2, "batch_size": 2})).await;
    let progress: Vec<u64> = events.iter().filter_map(|e| e["progress"].as_u64()).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {progress:?}");
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn test_invalid_model_is_rejected_before_any_status() {
    let server = start_test_server().await;
    server.seed(&["a", "b"], 3).await;

    let (status, _, events) = server.train(&json!({"model": "vgg16"})).await;
    assert_eq!(status, 400);
    assert_eq!(events, vec![json!({"type": "error", "message": "Invalid model"})]);

    let (_, leaderboard) = server.get_json("/api/leaderboard").await;
    assert_eq!(leaderboard["total"], 0);
}

#[tokio::test]
async fn test_empty_dataset_is_no_data_available() {
    let server = start_test_server().await;

    let (status, _, events) = server.train(&json!({"model": "baseline"})).await;
    assert_eq!(status, 400);
    assert_eq!(events, vec![json!({"type": "error", "message": "No data available"})]);
}

#[tokio::test]
async fn test_zero_epochs_is_invalid_request() {
    let server = start_test_server().await;
    server.seed(&["a", "b"], 3).await;

    let (status, _, events) = server.train(&json!({"epochs": 0})).await;
    assert_eq!(status, 400);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
}

#[tokio::test]
async fn test_trained_model_serves_live_predictions() {
    let server = start_test_server().await;
    server.seed(&["a", "b", "c"], 4).await;

    let (_, _, events) = server.train(&json!({"model": "baseline", "epochs": 2, "batch_size": 4})).await;
    let model_file = events.last().unwrap()["result"]["model_file"].as_str().unwrap().to_string();

    let (_, live) = server.get_json("/api/live/models").await;
    assert_eq!(live["models"][0]["model_file"], model_file.as_str());

    let (status, loaded) = server.post_json("/api/live/load", &json!({"model_files": [model_file]})).await;
    assert_eq!(status, 200);
    assert_eq!(loaded["loaded_models"][0]["loaded"], true);

    let frame = common::sample("a", 0, 0);
    let (status, predicted) =
        server.post_json("/api/live/predict", &json!({"landmarks": frame["landmarks"]})).await;
    assert_eq!(status, 200);
    let prediction = &predicted["predictions"][model_file.as_str()];
    assert_eq!(prediction["success"], true);
    assert_eq!(prediction["top_5"].as_array().unwrap().len(), 3);
    assert!(prediction["inference_time_ms"].as_f64().unwrap() >= 0.0);

    let (_, unloaded) = server.post_json("/api/live/unload", &json!({})).await;
    assert_eq!(unloaded["unloaded"], 1);
}

#[tokio::test]
async fn test_blocking_train_returns_final_result() {
    let server = start_test_server().await;
    let (status, body) = server.post_json("/api/train", &json!({"model": "baseline"})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"success": false, "error": "No data available"}));

    server.seed(&["a", "b"], 4).await;
    let (status, body) = server.post_json("/api/train", &json!({"model": "slive", "epochs": 2, "batch_size": 4})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["model_key"], "slive");
    assert_eq!(body["result"]["epochs"], 2);

    let (_, leaderboard) = server.get_json("/api/leaderboard").await;
    assert_eq!(leaderboard["total"], 1);
    assert_eq!(leaderboard["results"][0]["model_file"], body["result"]["model_file"]);
    let (_, health) = server.get_json("/api/health").await;
    assert_eq!(health["training"], false);
}
