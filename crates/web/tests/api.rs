//! Router-level tests: the full HTTP surface with a scripted code generator
//! and `sh` standing in for the browser runtime.

#![cfg(unix)]

use async_trait::async_trait;
use autoqa_common::Database;
use autoqa_web::config::{AppConfig, AuthMode};
use autoqa_web::pipeline::{
    CodeGenerator, GenerationError, Pipeline, ProcessSandbox, RunLimiter, RunRecorder,
    ScriptMaterializer,
};
use autoqa_web::WebServer;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PASSING: &str = "```javascript\necho 'navigating'\necho 'TEST_RESULT: PASS'\n```";
const THROWING: &str =
    "echo 'clicking login'\necho 'Error: login button not found' >&2\nexit 1\n";

enum Answer {
    Script(&'static str),
    RejectKey,
}

struct ScriptedGenerator(Answer);

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn complete(&self, _prompt: &str, _api_key: &str) -> Result<String, GenerationError> {
        match &self.0 {
            Answer::Script(s) => Ok(s.to_string()),
            Answer::RejectKey => Err(GenerationError::Rejected {
                status: 400,
                message: "API key not valid".to_string(),
            }),
        }
    }
}

struct TestApp {
    router: Router,
    db: Database,
    scratch: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestApp {
    fn new(mode: AuthMode, configured_key: Option<&str>, answer: Answer) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("runs");

        let mut cfg = AppConfig::default();
        cfg.auth.mode = mode;
        cfg.model.api_key = configured_key.map(String::from);

        let db = Database::open_memory().unwrap();
        let pipeline = Pipeline::new(
            Arc::new(ScriptedGenerator(answer)),
            ScriptMaterializer::new(&scratch, "sh"),
            Arc::new(ProcessSandbox::new("sh", Duration::from_secs(10))),
            RunRecorder::new(autoqa_common::HistoryLedger::new(db.clone())),
            RunLimiter::new(2),
        );
        let router = WebServer::from_parts(cfg, db.clone(), pipeline).router();

        Self {
            router,
            db,
            scratch,
            _dir: dir,
        }
    }

    fn session(answer: Answer) -> Self {
        Self::new(AuthMode::Session, Some("server-key"), answer)
    }

    fn artifacts(&self) -> usize {
        std::fs::read_dir(&self.scratch).map(|d| d.count()).unwrap_or(0)
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::get(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let req = Request::delete(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    async fn login_as(&self, username: &str) -> String {
        let creds = json!({"username": username, "password": "correct horse"});
        let (status, _) = self.post("/api/register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.post("/api/login", None, creds).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn run(&self, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.post("/api/run-test", token, body).await
    }
}

fn run_body() -> Value {
    json!({"url": "https://example.com", "instruction": "click the login button"})
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::session(Answer::Script(PASSING));
    let (status, body) = app.get("/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_and_login_errors() {
    let app = TestApp::session(Answer::Script(PASSING));

    let (status, body) = app.post("/api/register", None, json!({"username": "alice"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing fields");

    app.login_as("alice").await;

    let creds = json!({"username": "alice", "password": "other"});
    let (status, body) = app.post("/api/register", None, creds.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Username taken");

    let (status, body) = app.post("/api/login", None, creds).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Wrong password");

    let (status, body) = app
        .post("/api/login", None, json!({"username": "nobody", "password": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "User not found");
}

#[tokio::test]
async fn test_login_cookie_and_logout() {
    let app = TestApp::session(Answer::Script(PASSING));
    let creds = json!({"username": "carol", "password": "pw"});
    app.post("/api/register", None, creds.clone()).await;

    let req = Request::post("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(creds.to_string()))
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("autoqa_session="));

    let with_cookie = |method: &str, uri: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie.clone())
            .body(Body::empty())
            .unwrap()
    };

    let (_, body) = app.send(with_cookie("GET", "/api/user")).await;
    assert_eq!(body, json!({"loggedIn": true, "username": "carol"}));

    let (status, _) = app.send(with_cookie("POST", "/api/logout")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.send(with_cookie("GET", "/api/user")).await;
    assert_eq!(body, json!({"loggedIn": false}));
}

#[tokio::test]
async fn test_run_requires_session() {
    let app = TestApp::session(Answer::Script(PASSING));
    let (status, body) = app.run(None, run_body()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Please Login First!");
    assert_eq!(app.artifacts(), 0);
}

#[tokio::test]
async fn test_passing_run_is_recorded() {
    let app = TestApp::session(Answer::Script(PASSING));
    let token = app.login_as("alice").await;

    let (status, body) = app.run(Some(&token), run_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "PASS");
    assert_eq!(body["output"], "navigating\nTEST_RESULT: PASS\n");
    assert!(body["recordId"].is_i64());
    assert_eq!(app.artifacts(), 0);

    let (status, history) = app.get("/api/history", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let rows = history.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "PASS");
    assert_eq!(rows[0]["url"], "https://example.com");
    assert_eq!(rows[0]["id"], body["recordId"]);
}

#[tokio::test]
async fn test_failing_run_is_recorded_with_stderr() {
    let app = TestApp::session(Answer::Script(THROWING));
    let token = app.login_as("alice").await;

    let (status, body) = app.run(Some(&token), run_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FAIL");
    let output = body["output"].as_str().unwrap();
    assert!(output.starts_with("clicking login\n"));
    assert!(output.contains("ERROR DETAILS:"));
    assert!(output.contains("login button not found"));
    assert_eq!(app.artifacts(), 0);

    let (_, history) = app.get("/api/history", Some(&token)).await;
    assert_eq!(history[0]["status"], "FAIL");
    assert_eq!(history[0]["logs"], body["output"]);
}

#[tokio::test]
async fn test_provider_rejection_leaves_no_trace() {
    let app = TestApp::session(Answer::RejectKey);
    let token = app.login_as("alice").await;

    let (status, body) = app.run(Some(&token), run_body()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("API key not valid"));
    assert_eq!(app.artifacts(), 0);

    let (_, history) = app.get("/api/history", Some(&token)).await;
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn test_missing_instruction_is_rejected() {
    let app = TestApp::session(Answer::Script(PASSING));
    let token = app.login_as("alice").await;

    let (status, body) = app
        .run(Some(&token), json!({"url": "https://example.com", "instruction": ""}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, history) = app.get("/api/history", Some(&token)).await;
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn test_history_is_newest_first_and_private() {
    let app = TestApp::session(Answer::Script(PASSING));
    let alice = app.login_as("alice").await;
    let bob = app.login_as("bob").await;

    let (_, first) = app.run(Some(&alice), run_body()).await;
    let (_, second) = app.run(Some(&alice), run_body()).await;

    let (_, history) = app.get("/api/history", Some(&alice)).await;
    let ids: Vec<_> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![second["recordId"].as_i64().unwrap(), first["recordId"].as_i64().unwrap()]
    );

    let (_, bobs) = app.get("/api/history", Some(&bob)).await;
    assert_eq!(bobs, json!([]));

    let (status, _) = app.get("/api/history", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_delete_is_owner_scoped_and_idempotent_safe() {
    let app = TestApp::session(Answer::Script(PASSING));
    let alice = app.login_as("alice").await;
    let bob = app.login_as("bob").await;

    let (_, run) = app.run(Some(&alice), run_body()).await;
    let uri = format!("/api/history/{}", run["recordId"].as_i64().unwrap());

    let (status, _) = app.delete(&uri, &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, history) = app.get("/api/history", Some(&alice)).await;
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (status, body) = app.delete(&uri, &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = app.delete(&uri, &alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_inline_key_mode_allows_anonymous_runs() {
    let app = TestApp::new(AuthMode::InlineKey, Some("server-key"), Answer::Script(PASSING));

    let mut body = run_body();
    body["apiKey"] = json!("user-key");
    let (status, resp) = app.run(None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "PASS");

    // The server key is not lent to anonymous callers.
    let (status, resp) = app.run(None, run_body()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(resp["error"].as_str().unwrap().contains("API key"));
}

#[tokio::test]
async fn test_run_survives_history_write_failure() {
    let app = TestApp::session(Answer::Script(PASSING));
    let token = app.login_as("alice").await;
    app.db
        .connection()
        .lock()
        .execute_batch("DROP TABLE history;")
        .unwrap();

    let (status, body) = app.run(Some(&token), run_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PASS");
    assert!(body["recordId"].is_null());
    assert_eq!(app.artifacts(), 0);
}

#[tokio::test]
async fn test_malformed_history_id_is_json_error() {
    let app = TestApp::session(Answer::Script(PASSING));
    let token = app.login_as("alice").await;

    let (status, body) = app.delete("/api/history/abc", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid history id");
}

#[tokio::test]
async fn test_concurrent_registrations_complete() {
    let app = TestApp::session(Answer::Script(PASSING));

    let register = |name: &str| {
        app.post("/api/register", None, json!({"username": name, "password": "pw"}))
    };
    let results = tokio::join!(
        register("user0"),
        register("user1"),
        register("user2"),
        register("user3")
    );
    for (status, _) in [results.0, results.1, results.2, results.3] {
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .post("/api/login", None, json!({"username": "user3", "password": "pw"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
}
