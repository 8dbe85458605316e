//! Shared helpers for Modelboard integration tests.

#![allow(dead_code)]

use modelboard_core::config::{Config, StorageConfig};
use modelboard_core::server::Server;
use serde_json::{Value, json};
use tempfile::TempDir;

/// A server bound to an ephemeral port with its own storage directory.
pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    _root: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn get_json(&self, path: &str) -> (u16, Value) {
        let response = self.client.get(self.url(path)).send().await.expect("request failed");
        let status = response.status().as_u16();
        (status, response.json().await.expect("response is not JSON"))
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (u16, Value) {
        let response = self.client.post(self.url(path)).json(body).send().await.expect("request failed");
        let status = response.status().as_u16();
        (status, response.json().await.expect("response is not JSON"))
    }

    /// Submit a training run and read the whole event stream.
    pub async fn train(&self, body: &Value) -> (u16, Option<String>, Vec<Value>) {
        let response =
            self.client.post(self.url("/api/train/stream")).json(body).send().await.expect("request failed");
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let text = response.text().await.expect("stream read failed");
        (status, content_type, parse_sse(&text))
    }

    /// Save `per_label` samples for each label.
    pub async fn seed(&self, labels: &[&str], per_label: usize) {
        let samples: Vec<Value> = labels
            .iter()
            .enumerate()
            .flat_map(|(class, label)| (0..per_label).map(move |i| sample(label, class, i)))
            .collect();
        let (status, body) = self.post_json("/api/data/save", &json!({ "samples": samples })).await;
        assert_eq!(status, 200, "seeding failed: {body}");
    }
}

/// A 21-point hand sample whose shape depends on `class`.
pub fn sample(label: &str, class: usize, i: usize) -> Value {
    let landmarks: Vec<[f32; 3]> = (0..21)
        .map(|p| {
            let p = p as f32;
            let c = class as f32;
            [p * 0.04 * (c + 1.0), (p * 0.03).sin() * c + i as f32 * 0.002, 0.01 * c]
        })
        .collect();
    json!({ "label": label, "landmarks": landmarks })
}

/// Split an SSE body into the JSON payloads of its `data:` frames.
pub fn parse_sse(text: &str) -> Vec<Value> {
    text.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|payload| serde_json::from_str(payload).expect("frame payload is not JSON"))
        .collect()
}

/// Start a server on 127.0.0.1 with an ephemeral port and a fresh storage root.
pub async fn start_test_server() -> TestServer {
    let root = TempDir::new().expect("failed to create temp dir");
    let mut config = Config::default();
    config.server.address = "127.0.0.1:0".parse().unwrap();
    config.storage = StorageConfig::rooted_at(root.path());
    config.training.inference_runs = 5;
    config.training.warmup_runs = 1;
    config.training.idle_timeout_ms = 100;
    config.probe.accelerator = false;

    let server = Server::bind(&config).await.expect("failed to bind test server");
    let addr = server.local_addr().expect("no local address");
    tokio::spawn(async move {
        server.serve().await.expect("server failed");
    });

    TestServer { base: format!("http://{addr}"), client: reqwest::Client::new(), _root: root }
}
