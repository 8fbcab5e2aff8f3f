//! Router tests against in-memory backends.

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use copydesk_api::{AppState, Backends, routes};
use copydesk_config::SystemConfig;
use copydesk_core::collaborator::{
    ApprovalDispatcher, ApprovalReceipt, ApprovalRequest, Article, ArticleGenerator,
    ArticleRequest, Brief, BriefGenerator, BriefRequest, Collaborators, PublishReceipt,
    PublishRequest, Publisher,
};
use copydesk_core::{BatchId, ClientId, SystemClock};
use copydesk_db::WorkItemRepo;
use copydesk_db::memory::{MemoryActivityRepo, MemoryScheduleRepo, MemoryWorkItemRepo};
use copydesk_scheduler::broker::MemoryBroker;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct Stub;

#[async_trait]
impl BriefGenerator for Stub {
    async fn generate_brief(&self, request: &BriefRequest) -> copydesk_core::Result<Brief> {
        Ok(Brief {
            id: "brief".to_string(),
            title: request.keyword.clone(),
            key_points: vec![],
            word_count: 500,
        })
    }
}

#[async_trait]
impl ArticleGenerator for Stub {
    async fn generate_article(&self, request: &ArticleRequest) -> copydesk_core::Result<Article> {
        Ok(Article {
            id: "article".to_string(),
            title: request.title.clone(),
            content: "body".to_string(),
        })
    }
}

#[async_trait]
impl ApprovalDispatcher for Stub {
    async fn send_for_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> copydesk_core::Result<ApprovalReceipt> {
        Ok(ApprovalReceipt { success: true })
    }
}

#[async_trait]
impl Publisher for Stub {
    async fn publish(&self, _request: &PublishRequest) -> copydesk_core::Result<PublishReceipt> {
        Ok(PublishReceipt { url: None })
    }
}

struct TestApp {
    router: Router,
    work_items: Arc<MemoryWorkItemRepo>,
}

fn app() -> TestApp {
    let work_items = Arc::new(MemoryWorkItemRepo::new());
    let stub = Arc::new(Stub);
    let state = AppState::new(
        Backends {
            work_items: work_items.clone(),
            schedules: Arc::new(MemoryScheduleRepo::new()),
            activity: Arc::new(MemoryActivityRepo::new()),
            broker: Arc::new(MemoryBroker::default()),
            pool: None,
        },
        &SystemConfig::default(),
        Collaborators {
            brief: stub.clone(),
            article: stub.clone(),
            approval: stub.clone(),
            publisher: stub,
        },
        Arc::new(SystemClock),
    );
    TestApp {
        router: routes::router(state),
        work_items,
    }
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queues"], "healthy");
}

#[tokio::test]
async fn test_manual_run_without_schedule_is_conflict() {
    let app = app();
    let client = ClientId::new();
    let uri = format!("/api/v1/clients/{}/automation", client);
    let (status, body) = call(&app.router, Method::POST, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NO_SCHEDULE_SET");
}

#[tokio::test]
async fn test_schedule_lifecycle() {
    let app = app();
    let client = ClientId::new();
    let uri = format!("/api/v1/clients/{}/schedules", client);

    let (status, created) = call(
        &app.router,
        Method::POST,
        &uri,
        Some(json!({
            "name": "mornings",
            "frequency": "weekly",
            "start_time": "09:30",
            "days_of_week": [1, 3, 5],
            "jobs_per_run": 4,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["state"], "active");
    assert_eq!(created["rule"]["interval"], 1);
    assert!(created["next_run_at"].is_string());
    let id = created["id"].as_str().unwrap().to_string();

    let (_, listed) = call(&app.router, Method::GET, &uri, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let pause = format!("/api/v1/schedules/{}/pause", id);
    let (status, paused) = call(&app.router, Method::POST, &pause, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["state"], "paused");
    assert!(paused["next_run_at"].is_null());

    let (status, body) = call(&app.router, Method::POST, &pause, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let schedule_uri = format!("/api/v1/schedules/{}", id);
    let (status, updated) = call(
        &app.router,
        Method::PUT,
        &schedule_uri,
        Some(json!({ "jobs_per_run": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["jobs_per_run"], 2);

    let (status, _) = call(&app.router, Method::DELETE, &schedule_uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app.router, Method::GET, &schedule_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_schedule_is_bad_request() {
    let app = app();
    let uri = format!("/api/v1/clients/{}/schedules", ClientId::new());
    let (status, body) = call(
        &app.router,
        Method::POST,
        &uri,
        Some(json!({
            "name": "bad",
            "frequency": "daily",
            "start_time": "09:00",
            "jobs_per_run": 0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_manual_run_enqueues_up_to_limit() {
    let app = app();
    let client = ClientId::new();
    let schedules = format!("/api/v1/clients/{}/schedules", client);
    call(
        &app.router,
        Method::POST,
        &schedules,
        Some(json!({
            "name": "daily",
            "frequency": "daily",
            "start_time": "06:00",
            "jobs_per_run": 2,
        })),
    )
    .await;
    let rows = ["a", "b", "c"]
        .iter()
        .map(|keyword| {
            let mut row = serde_json::Map::new();
            row.insert("keyword".to_string(), json!(keyword));
            row
        })
        .collect();
    app.work_items
        .insert_batch(client, BatchId::new(), rows)
        .await
        .unwrap();

    let uri = format!("/api/v1/clients/{}/automation", client);
    let (status, run) = call(&app.router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["success"], true);
    assert_eq!(run["job_count"], 2);
    assert_eq!(run["job_limit"], 2);

    let (status, progress) = call(
        &app.router,
        Method::GET,
        &format!("/api/v1/clients/{}/batches", client),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress[0]["total"], 3);
}

#[tokio::test]
async fn test_queue_endpoints() {
    let app = app();
    let (status, queues) = call(&app.router, Method::GET, "/api/v1/queues", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = queues
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["queue"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["ingest", "brief", "article", "approval", "publish"]);

    let (status, body) = call(&app.router, Method::GET, "/api/v1/queues/bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, paused) =
        call(&app.router, Method::POST, "/api/v1/queues/publish/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["paused"], true);
    assert_eq!(paused["health"], "healthy");

    let (status, drained) =
        call(&app.router, Method::POST, "/api/v1/queues/publish/drain", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(drained["removed"], 0);

    let (status, failed) =
        call(&app.router, Method::GET, "/api/v1/queues/ingest/failed?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(failed.as_array().unwrap().is_empty());

    let (status, _) = call(&app.router, Method::DELETE, "/api/v1/jobs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app.router, Method::POST, "/api/v1/jobs/missing/retry", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scheduler_control_and_activity() {
    let app = app();
    let (status, body) = call(&app.router, Method::GET, "/api/v1/scheduler", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["timezone"], "UTC");

    let (_, body) = call(&app.router, Method::POST, "/api/v1/scheduler/start", None).await;
    assert_eq!(body["running"], true);
    let (_, body) = call(&app.router, Method::POST, "/api/v1/scheduler/stop", None).await;
    assert_eq!(body["running"], false);

    let (status, entries) = call(&app.router, Method::GET, "/api/v1/activity?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(entries.is_array());
}
