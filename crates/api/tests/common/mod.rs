#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use bookgen_api::config::ServerConfig;
use bookgen_api::router::build_app;
use bookgen_api::state::AppState;
use bookgen_core::book::Book;
use bookgen_forge::messages::{GenerateRequest, SwapRequest};
use bookgen_forge::{ForgeApiError, ImageService};
use bookgen_pipeline::{BookRunner, LogTag, PipelineError, RunContext, RunEvent, RunSummary};
use bookgen_worker::{BookStore, JobRegistry, StreamSettings, WorkerConfig};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Writes one artifact per page into the output root and succeeds.
pub struct StubRunner;

#[async_trait]
impl BookRunner for StubRunner {
    async fn run(&self, book: &Book, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        let root = book.settings.output_root_or(&ctx.default_output_root);
        std::fs::create_dir_all(&root)?;
        for page in book.ordered_pages() {
            let path = root.join(format!("stub_p{}.png", page.index));
            std::fs::write(&path, b"\x89PNG")?;
            ctx.log.line(LogTag::Ok, format!("saved {}", path.display()));
            let _ = ctx
                .events
                .send(RunEvent::PageSaved {
                    record: "Stub".into(),
                    page: page.index,
                    path,
                })
                .await;
        }
        Ok(RunSummary {
            records: 1,
            pages_saved: book.pages.len(),
            ..Default::default()
        })
    }
}

pub struct IdleService;

#[async_trait]
impl ImageService for IdleService {
    async fn generate(&self, _: &GenerateRequest) -> Result<String, ForgeApiError> {
        Err(ForgeApiError::EmptyResult("synthesis"))
    }

    async fn swap_available(&self) -> bool {
        false
    }

    async fn swap(&self, _: &SwapRequest) -> Result<String, ForgeApiError> {
        Err(ForgeApiError::EmptyResult("swap"))
    }

    async fn progress(&self) -> Result<f64, ForgeApiError> {
        Ok(0.0)
    }
}

pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub state: AppState,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_app(self.state.clone())
    }

    pub fn books_dir(&self) -> PathBuf {
        self.dir.path().join("books")
    }

    /// Store a two-page book under `id`.
    pub fn write_book(&self, id: &str) {
        std::fs::create_dir_all(self.books_dir()).unwrap();
        let book = serde_json::json!({
            "id": id,
            "name": "Spring",
            "settings": {
                "data_source": "folders",
                "faces_dir": self.dir.path().join("faces"),
                "output_root": self.dir.path().join("out"),
            },
            "pages": [{"index": 1, "prompt": "a {name}"}, {"index": 2}],
        });
        std::fs::write(
            self.books_dir().join(format!("{id}.json")),
            serde_json::to_vec(&book).unwrap(),
        )
        .unwrap();
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

pub fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let worker = WorkerConfig::with_data_dir(dir.path());
    let registry = Arc::new(JobRegistry::new(Arc::new(StubRunner), &worker));

    let state = AppState {
        config: Arc::new(test_config()),
        registry,
        books: Arc::new(BookStore::new(&worker.books_dir)),
        service: Arc::new(IdleService),
        stream: StreamSettings {
            poll: Duration::from_millis(10),
            progress_interval: Duration::from_millis(10),
            replay_log: false,
        },
    };
    TestApp { dir, state }
}

pub async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll the job endpoint until the job leaves `running`.
pub async fn wait_for_job(test: &TestApp, job_id: &str) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let json = body_json(get(test.router(), &format!("/api/v1/jobs/{job_id}")).await).await;
            if json["data"]["status"] != "running" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish")
}
