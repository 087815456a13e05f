#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;

use docshare_gateway::intake::UploadIntake;
use docshare_gateway::mail::{MailJob, MailOutbox};
use docshare_gateway::store::MemoryStore;
use docshare_gateway::tokens::{Clock, TokenService};
use docshare_gateway::{build_router, AppState};

pub const BASE_URL: &str = "http://localhost:5000";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const BOUNDARY: &str = "----docshare-test-boundary";

/// Wall clock plus a test-controlled offset.
#[derive(Default)]
pub struct ManualClock {
    offset_secs: AtomicI64,
}

impl ManualClock {
    pub fn advance(&self, secs: i64) {
        self.offset_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.offset_secs.load(Ordering::SeqCst))
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub outbox_rx: Mutex<mpsc::Receiver<MailJob>>,
    pub upload_dir: TempDir,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_outbox_capacity(16)
    }

    pub fn with_outbox_capacity(capacity: usize) -> Self {
        let upload_dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let (outbox, outbox_rx) = MailOutbox::channel(capacity);

        let state = Arc::new(AppState {
            store: store.clone(),
            tokens: TokenService::with_clock("integration-test-secret", clock.clone()),
            intake: UploadIntake::new(upload_dir.path()),
            outbox,
            base_url: BASE_URL.to_string(),
        });

        Self {
            router: build_router(state),
            store,
            clock,
            outbox_rx: Mutex::new(outbox_rx),
            upload_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        Reply { status, headers, body }
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Reply {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Reply {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn upload(&self, token: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Reply {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/users/files/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(&[("file", file_name, content_type, bytes)])))
            .unwrap();
        self.send(request).await
    }

    /// Takes the next verification mail the handlers queued.
    pub async fn next_mail(&self) -> MailJob {
        self.outbox_rx
            .lock()
            .await
            .try_recv()
            .expect("a verification mail should have been queued")
    }

    pub async fn signup(&self, email: &str, password: &str, role: &str) -> Reply {
        self.post_json(
            "/users/signup",
            serde_json::json!({ "email": email, "password": password, "role": role }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Reply {
        self.post_json(
            "/users/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Signs up, follows the mailed link and logs in; returns the session token.
    pub async fn verified_session(&self, email: &str, role: &str) -> String {
        let reply = self.signup(email, "pw", role).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.json());

        let mail = self.next_mail().await;
        assert_eq!(mail.to, email);
        let reply = self.get(&path_of(&mail.link), None).await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.json());

        let reply = self.login(email, "pw").await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.json());
        reply.json()["token"].as_str().unwrap().to_string()
    }
}

/// Strips the public origin from a link so it can be replayed on the router.
pub fn path_of(link: &str) -> String {
    link.strip_prefix(BASE_URL).unwrap_or(link).to_string()
}

pub fn multipart_body(fields: &[(&str, &str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content_type, bytes) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
