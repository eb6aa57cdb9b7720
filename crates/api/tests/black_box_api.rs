use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use fulfill_api::app::{self, VendorClients};
use fulfill_api::config::Settings;
use fulfill_core::Document;
use fulfill_infra::OrchestratorHandle;
use fulfill_infra::vendors::{AsyncSubmission, AsyncVendor, SyncResponse, SyncVendor, VendorError};

/// Sync vendor echoing a fixed document, or failing when the payload asks it to.
struct EchoSyncVendor;

#[async_trait]
impl SyncVendor for EchoSyncVendor {
    async fn fetch(&self, payload: &Document) -> Result<SyncResponse, VendorError> {
        if payload.get("fail").is_some() {
            return Ok(SyncResponse {
                success: false,
                data: None,
                error: Some("no such user".into()),
            });
        }
        Ok(SyncResponse {
            success: true,
            data: Some(json!({
                "name": " Jane ",
                "password": "hunter2",
                "phone": "(555) 123-4567",
                "email": "Jane@Example.COM"
            })),
            error: None,
        })
    }
}

/// Async vendor minting sequential job ids and remembering them.
#[derive(Default)]
struct RecordingAsyncVendor {
    next: AtomicUsize,
    issued: Mutex<Vec<String>>,
}

#[async_trait]
impl AsyncVendor for RecordingAsyncVendor {
    async fn submit(&self, _payload: &Document) -> Result<AsyncSubmission, VendorError> {
        let id = format!("ext-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.issued.lock().unwrap().push(id.clone());
        Ok(AsyncSubmission {
            success: true,
            job_id: Some(id),
            estimated_completion_time: Some("2026-01-01T00:00:00Z".into()),
        })
    }
}

struct TestServer {
    base_url: String,
    async_vendor: Arc<RecordingAsyncVendor>,
    handle: tokio::task::JoinHandle<()>,
    _orchestrator: OrchestratorHandle,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(&[]).await
    }

    async fn spawn_with(vars: &[(&str, &str)]) -> Self {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let settings = Settings::from_lookup(|key| vars.get(key).cloned()).expect("valid settings");

        let async_vendor = Arc::new(RecordingAsyncVendor::default());
        let vendors = VendorClients {
            sync: Arc::new(EchoSyncVendor),
            async_vendor: async_vendor.clone(),
        };
        let services = Arc::new(app::build_services(&settings, vendors).await.unwrap());
        let orchestrator = services.spawn_orchestrator();

        // Same router as prod, bound to an ephemeral port.
        let app = app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            async_vendor,
            handle,
            _orchestrator: orchestrator,
        }
    }

    async fn submit(&self, client: &reqwest::Client, vendor: &str, body: serde_json::Value) -> String {
        let res = client
            .post(format!("{}/jobs?vendor={}", self.base_url, vendor))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let created: serde_json::Value = res.json().await.unwrap();
        created["request_id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn get_job_eventually(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    status: &str,
) -> serde_json::Value {
    // Dispatch is asynchronous; poll briefly until the job reaches `status`.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/jobs/{}", base_url, id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("job {id} did not reach `{status}` within timeout");
}

/// Post a callback, retrying while the submission is not yet recorded.
async fn post_callback_eventually(
    client: &reqwest::Client,
    base_url: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    for _ in 0..200 {
        let res = client
            .post(format!("{}/vendor-webhook/async", base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let ack: serde_json::Value = res.json().await.unwrap();
        if ack["outcome"] != "unknown_job" {
            return ack;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("callback was never accepted");
}

#[tokio::test]
async fn health_reports_healthy() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
    assert!(body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn sync_job_lifecycle_submit_dispatch_query() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let id = srv.submit(&client, "sync", json!({ "user_id": 42 })).await;
    let job = get_job_eventually(&client, &srv.base_url, &id, "complete").await;

    assert_eq!(job["request_id"], id.as_str());
    assert_eq!(job["vendor"], "sync");
    assert_eq!(
        job["result"],
        json!({ "name": "Jane", "phone": "+15551234567", "email": "jane@example.com" })
    );
    assert!(job.get("error").is_none());
    assert!(job["processed_at"].is_string());
    assert!(job["completed_at"].is_string());
}

#[tokio::test]
async fn sync_vendor_failure_is_reported_on_the_job() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let id = srv.submit(&client, "sync", json!({ "fail": true })).await;
    let job = get_job_eventually(&client, &srv.base_url, &id, "failed").await;

    assert_eq!(job["error"], "no such user");
    assert!(job.get("result").is_none());
}

#[tokio::test]
async fn async_job_completes_through_webhook_once() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let id = srv.submit(&client, "async", json!({ "user_id": 7 })).await;
    get_job_eventually(&client, &srv.base_url, &id, "processing").await;

    let vendor_job_id = loop {
        if let Some(first) = srv.async_vendor.issued.lock().unwrap().first().cloned() {
            break first;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    let ack = post_callback_eventually(
        &client,
        &srv.base_url,
        json!({ "jobId": vendor_job_id, "success": true, "data": { "ssn": "1", "email": "A@B.com" } }),
    )
    .await;
    assert_eq!(ack, json!({ "success": true, "outcome": "completed", "request_id": id }));

    let job = get_job_eventually(&client, &srv.base_url, &id, "complete").await;
    assert_eq!(job["result"], json!({ "email": "a@b.com" }));

    // A late failure callback must not flip the finished job.
    let res = client
        .post(format!("{}/vendor-webhook/async", srv.base_url))
        .json(&json!({ "jobId": vendor_job_id, "success": false, "error": "late" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ack: serde_json::Value = res.json().await.unwrap();
    assert_eq!(ack["outcome"], "already_terminal");

    let job = get_job_eventually(&client, &srv.base_url, &id, "complete").await;
    assert!(job.get("error").is_none());
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, "0190b6a4-7c1e-7000-8000-000000000000"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .get(format!("{}/jobs/not-a-uuid", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_for_unknown_job_is_acknowledged() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/vendor-webhook/async", srv.base_url))
        .json(&json!({ "jobId": "never-issued", "success": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ack: serde_json::Value = res.json().await.unwrap();
    assert_eq!(ack, json!({ "success": true, "outcome": "unknown_job" }));

    let res = client
        .post(format!("{}/vendor-webhook/carrier-pigeon", srv.base_url))
        .json(&json!({ "jobId": "x", "success": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submission_validation() {
    let srv = TestServer::spawn_with(&[("MAX_PAYLOAD_BYTES", "64")]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs?vendor=fax", srv.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_vendor");

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "blob": "x".repeat(256) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_payload");
}

#[tokio::test]
async fn submissions_get_unique_ids_and_show_in_metrics() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(srv.submit(&client, "sync", json!({})).await);
    }
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());

    for id in &ids {
        get_job_eventually(&client, &srv.base_url, id, "complete").await;
    }

    let res = client
        .get(format!("{}/metrics", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let metrics: serde_json::Value = res.json().await.unwrap();
    assert_eq!(metrics["jobs"]["total"], 5);
    assert_eq!(metrics["jobs"]["completed"], 5);
    assert_eq!(metrics["jobs"]["pending"], 0);
    assert!(metrics["queue"]["waiting"].is_u64());
    assert!(metrics["orchestrator"]["processed"].is_u64());
    assert!(metrics["system"]["uptime_secs"].is_u64());
}
