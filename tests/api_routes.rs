//! Integration tests for the REST API.
//!
//! Each test spins up the router on a random port and talks to it over
//! real HTTP, either raw through reqwest or through `ApiClient`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use uuid::Uuid;

use mcp_orchestrator::api;
use mcp_orchestrator::artifacts::model::ArtifactFilter;
use mcp_orchestrator::client::ApiClient;
use mcp_orchestrator::handlers::builtin::backtest::BacktestHandler;
use mcp_orchestrator::handlers::registry::TargetKind;
use mcp_orchestrator::jobs::model::JobStatus;
use mcp_orchestrator::jobs::orchestrator::{JobFilter, JobOrchestrator, JobSubmission};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the API on a random port with a fast backtest handler bound.
async fn start_server() -> (String, Arc<JobOrchestrator>) {
    let orchestrator = Arc::new(JobOrchestrator::in_memory(Duration::from_secs(5), 2));
    orchestrator
        .handlers()
        .register_handler(Arc::new(
            BacktestHandler::default().with_delay(Duration::from_millis(10)),
        ))
        .await
        .unwrap();
    let app = api::router(Arc::clone(&orchestrator));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), orchestrator)
}

#[tokio::test]
async fn health_and_ready() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;

        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        let ready: Value = reqwest::get(format!("{base}/health/ready"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ready["status"], "ready");
        assert_eq!(ready["bindings"], 1);
        assert_eq!(ready["jobs"]["total"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn submit_and_follow_a_job() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let http = reqwest::Client::new();

        let response = http
            .post(format!("{base}/jobs"))
            .json(&json!({
                "type": "backtest",
                "payload": {"strategy": "momentum", "ticker": "AAPL", "seed": 1},
                "metadata": {"owner": "research"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "submitted");
        let job_id = Uuid::parse_str(body["job_id"].as_str().unwrap()).unwrap();

        let client = ApiClient::new(&base);
        let job = client.wait(job_id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.metadata["owner"], "research");
        assert_eq!(job.artifacts.len(), 2);

        let artifacts = client
            .list_artifacts(&ArtifactFilter {
                job_id: Some(job_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 2);

        let report = client.dependencies(job.artifacts[1], true).await.unwrap();
        assert_eq!(report.resolved, vec![job.artifacts[0]]);

        let listed = client
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Completed),
                job_type: Some("backtest".into()),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, job_id);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn job_errors_map_to_status_codes() {
    timeout(TEST_TIMEOUT, async {
        let (base, orchestrator) = start_server().await;
        let http = reqwest::Client::new();

        // Missing required payload fields.
        let response = http
            .post(format!("{base}/jobs"))
            .json(&json!({"type": "backtest", "payload": {"strategy": "momentum"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].as_str().unwrap().contains("ticker"));

        // Not JSON at all.
        let response = http
            .post(format!("{base}/jobs"))
            .header("content-type", "application/json")
            .body("{nope")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = http.get(format!("{base}/jobs/not-a-uuid")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Invalid job ID");

        let response = http
            .get(format!("{base}/jobs/{}", Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = http
            .get(format!("{base}/jobs?status=exploded"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Cancelling a finished job conflicts.
        let job_id = orchestrator
            .submit(JobSubmission::new(
                "backtest",
                json!({"strategy": "momentum", "ticker": "AAPL"}),
            ))
            .await
            .unwrap();
        orchestrator.wait(job_id).await.unwrap();
        let response = http
            .delete(format!("{base}/jobs/{job_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_STATE");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unbound_type_fails_after_acceptance() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = ApiClient::new(&base);

        let job_id = client
            .submit(&JobSubmission::new("etl", json!({})))
            .await
            .unwrap();
        let job = client.wait(job_id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind.to_string(), "DispatchError");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn service_bindings_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = ApiClient::new(&base);

        let reply = client
            .register_service("etl", "http://etl.internal:9000")
            .await
            .unwrap();
        assert_eq!(reply["status"], "registered");
        assert_eq!(reply["replaced"], Value::Null);

        let reply = client
            .register_service("etl", "http://etl-2.internal:9000")
            .await
            .unwrap();
        assert!(reply["replaced"].as_str().unwrap().contains("etl.internal"));

        let bindings = client.list_services().await.unwrap();
        let kinds: Vec<(&str, TargetKind)> = bindings
            .iter()
            .map(|b| (b.job_type.as_str(), b.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![("backtest", TargetKind::Local), ("etl", TargetKind::Remote)]
        );

        let err = client
            .register_service("etl", "ftp://etl.internal")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 400"), "{err}");

        let http = reqwest::Client::new();
        let response = http.delete(format!("{base}/services/etl")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = http.delete(format!("{base}/services/etl")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn artifact_graph_over_http() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let http = reqwest::Client::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // A and B depend on each other; B arrives first.
        for (id, dep, name) in [(b, a, "features.parquet"), (a, b, "model.pt")] {
            let response = http
                .post(format!("{base}/artifacts"))
                .json(&json!({
                    "id": id,
                    "name": name,
                    "type": "data",
                    "storage_location": format!("/store/{name}"),
                    "tags": ["cycle"],
                    "dependencies": [dep]
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let report: Value = http
            .get(format!("{base}/artifacts/{a}/dependencies?transitive=true"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["resolved"], json!([b, a]));
        assert_eq!(report["missing"], json!([]));

        let dependents: Vec<Value> = http
            .get(format!("{base}/artifacts/{a}/dependents"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0]["id"], json!(b));

        let tagged: Vec<Value> = http
            .get(format!("{base}/artifacts?tag=cycle&type=data&limit=1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0]["id"], json!(b));

        let response = http.delete(format!("{base}/artifacts/{b}")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let report: Value = http
            .get(format!("{base}/artifacts/{a}/dependencies"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["missing"], json!([b]));

        let response = http.get(format!("{base}/artifacts/{b}")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = http
            .post(format!("{base}/artifacts"))
            .json(&json!({"name": "", "type": "data", "storage_location": "/x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    })
    .await
    .expect("test timed out");
}
