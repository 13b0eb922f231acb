//! In-process fakes of the GitHub Releases and Telegram Bot APIs, served by axum
//! on an ephemeral port.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const GITHUB_TOKEN: &str = "test-token";
pub const BOT_TOKEN: &str = "TEST";

async fn spawn_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeAsset {
    pub id: u64,
    pub name: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FakeRelease {
    pub id: u64,
    pub tag: String,
    pub assets: Vec<FakeAsset>,
}

#[derive(Default)]
pub struct GitHubState {
    pub base: String,
    pub releases: Vec<FakeRelease>,
    pub next_id: u64,
    pub release_creates: usize,
    pub upload_requests: usize,
    /// `Content-Length` header of every upload request, in arrival order.
    pub upload_content_lengths: Vec<Option<u64>>,
    /// Answer this many upcoming uploads with 502 before accepting.
    pub failing_uploads: usize,
}

impl GitHubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn release_json(&self, release: &FakeRelease) -> Value {
        json!({
            "id": release.id,
            "tag_name": release.tag,
            "upload_url": format!("{}/uploads/{}/assets{{?name,label}}", self.base, release.id),
            "html_url": format!("{}/html/releases/tag/{}", self.base, release.tag),
        })
    }

    fn asset_json(&self, release: &FakeRelease, asset: &FakeAsset) -> Value {
        json!({
            "id": asset.id,
            "name": asset.name,
            "size": asset.body.len(),
            "browser_download_url": format!("{}/download/{}/{}", self.base, release.tag, asset.name),
        })
    }
}

#[derive(Clone)]
pub struct FakeGitHub {
    pub base: String,
    pub state: Arc<Mutex<GitHubState>>,
}

type Shared = Arc<Mutex<GitHubState>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {GITHUB_TOKEN}"))
}

fn bad_credentials() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Bad credentials" })),
    )
        .into_response()
}

fn already_exists(resource: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "message": "Validation Failed",
            "errors": [{ "resource": resource, "code": "already_exists", "field": "name" }],
        })),
    )
        .into_response()
}

async fn get_release_by_tag(
    State(state): State<Shared>,
    Path((_owner, _repo, tag)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return bad_credentials();
    }
    let state = state.lock().unwrap();
    match state.releases.iter().find(|r| r.tag == tag) {
        Some(release) => Json(state.release_json(release)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response(),
    }
}

async fn create_release(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return bad_credentials();
    }
    let mut state = state.lock().unwrap();
    state.release_creates += 1;
    let tag = payload["tag_name"].as_str().unwrap_or_default().to_string();
    if state.releases.iter().any(|r| r.tag == tag) {
        return already_exists("Release");
    }
    let release = FakeRelease {
        id: state.next_id(),
        tag,
        assets: Vec::new(),
    };
    let body = state.release_json(&release);
    state.releases.push(release);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn upload_asset(
    State(state): State<Shared>,
    Path(release_id): Path<u64>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return bad_credentials();
    }
    let mut state = state.lock().unwrap();
    state.upload_requests += 1;
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    state.upload_content_lengths.push(content_length);
    if state.failing_uploads > 0 {
        state.failing_uploads -= 1;
        return (StatusCode::BAD_GATEWAY, "upstream hiccup").into_response();
    }
    let name = query.get("name").cloned().unwrap_or_default();
    let asset_id = state.next_id();
    let Some(index) = state.releases.iter().position(|r| r.id == release_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response();
    };
    if state.releases[index].assets.iter().any(|a| a.name == name) {
        return already_exists("ReleaseAsset");
    }
    let asset = FakeAsset {
        id: asset_id,
        name,
        body: body.to_vec(),
    };
    state.releases[index].assets.push(asset.clone());
    let json = state.asset_json(&state.releases[index], &asset);
    (StatusCode::CREATED, Json(json)).into_response()
}

async fn list_assets(
    State(state): State<Shared>,
    Path((_owner, _repo, release_id)): Path<(String, String, u64)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return bad_credentials();
    }
    let per_page: usize = query.get("per_page").and_then(|v| v.parse().ok()).unwrap_or(30);
    let page: usize = query.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let state = state.lock().unwrap();
    let Some(release) = state.releases.iter().find(|r| r.id == release_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response();
    };
    let listed: Vec<Value> = release
        .assets
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .map(|a| state.asset_json(release, a))
        .collect();
    Json(Value::Array(listed)).into_response()
}

async fn delete_asset(
    State(state): State<Shared>,
    Path((_owner, _repo, asset_id)): Path<(String, String, u64)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return bad_credentials();
    }
    let mut state = state.lock().unwrap();
    for release in state.releases.iter_mut() {
        if let Some(index) = release.assets.iter().position(|a| a.id == asset_id) {
            release.assets.remove(index);
            return StatusCode::NO_CONTENT.into_response();
        }
    }
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response()
}

impl FakeGitHub {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(GitHubState::default()));
        let router = Router::new()
            .route("/repos/{owner}/{repo}/releases/tags/{tag}", get(get_release_by_tag))
            .route("/repos/{owner}/{repo}/releases", post(create_release))
            .route("/repos/{owner}/{repo}/releases/{id}/assets", get(list_assets))
            .route("/repos/{owner}/{repo}/releases/assets/{asset_id}", delete(delete_asset))
            .route("/uploads/{id}/assets", post(upload_asset))
            .with_state(state.clone());
        let base = spawn_router(router).await;
        state.lock().unwrap().base = base.clone();
        FakeGitHub { base, state }
    }

    /// Pre-seed a release, returning its id.
    pub fn add_release(&self, tag: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.releases.push(FakeRelease {
            id,
            tag: tag.to_string(),
            assets: Vec::new(),
        });
        id
    }

    pub fn add_asset(&self, tag: &str, name: &str, body: &[u8]) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let release = state
            .releases
            .iter_mut()
            .find(|r| r.tag == tag)
            .expect("release seeded first");
        release.assets.push(FakeAsset {
            id,
            name: name.to_string(),
            body: body.to_vec(),
        });
        id
    }

    pub fn release(&self, tag: &str) -> Option<FakeRelease> {
        let state = self.state.lock().unwrap();
        state.releases.iter().find(|r| r.tag == tag).cloned()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().unwrap().releases.len()
    }

    pub fn release_creates(&self) -> usize {
        self.state.lock().unwrap().release_creates
    }

    pub fn upload_content_lengths(&self) -> Vec<Option<u64>> {
        self.state.lock().unwrap().upload_content_lengths.clone()
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.state.lock().unwrap().failing_uploads = n;
    }

    pub fn section(&self) -> release_relay::load_config::GitHubSection {
        release_relay::load_config::GitHubSection {
            repo: "octo/app".to_string(),
            api_base: self.base.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TelegramState {
    /// file_id -> (file_path, content)
    pub files: HashMap<String, (String, Vec<u8>)>,
    pub updates: Vec<Value>,
    pub sent: Vec<Value>,
    pub edits: Vec<Value>,
    pub webhook_deleted: bool,
}

#[derive(Clone)]
pub struct FakeTelegram {
    pub base: String,
    pub state: Arc<Mutex<TelegramState>>,
}

type TgShared = Arc<Mutex<TelegramState>>;

fn tg_ok(result: Value) -> Json<Value> {
    Json(json!({ "ok": true, "result": result }))
}

async fn tg_get_file(State(state): State<TgShared>, Json(payload): Json<Value>) -> Response {
    let file_id = payload["file_id"].as_str().unwrap_or_default();
    let state = state.lock().unwrap();
    match state.files.get(file_id) {
        Some((path, body)) => tg_ok(json!({
            "file_id": file_id,
            "file_size": body.len(),
            "file_path": path,
        }))
        .into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error_code": 400, "description": "Bad Request: invalid file_id" })),
        )
            .into_response(),
    }
}

async fn tg_download(State(state): State<TgShared>, Path(path): Path<String>) -> Response {
    let state = state.lock().unwrap();
    match state.files.values().find(|(p, _)| *p == path) {
        Some((_, body)) => body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn tg_get_updates(State(state): State<TgShared>, Json(payload): Json<Value>) -> Json<Value> {
    let offset = payload["offset"].as_i64().unwrap_or(0);
    let pending: Vec<Value> = {
        let state = state.lock().unwrap();
        state
            .updates
            .iter()
            .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
            .cloned()
            .collect()
    };
    if pending.is_empty() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tg_ok(Value::Array(pending))
}

async fn tg_send_message(State(state): State<TgShared>, Json(payload): Json<Value>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.sent.push(payload.clone());
    let message_id = state.sent.len();
    tg_ok(json!({ "message_id": message_id, "chat": { "id": payload["chat_id"] } }))
}

async fn tg_edit_message(State(state): State<TgShared>, Json(payload): Json<Value>) -> Json<Value> {
    state.lock().unwrap().edits.push(payload.clone());
    tg_ok(json!({ "message_id": payload["message_id"], "chat": { "id": payload["chat_id"] } }))
}

async fn tg_delete_webhook(State(state): State<TgShared>) -> Json<Value> {
    state.lock().unwrap().webhook_deleted = true;
    tg_ok(json!(true))
}

impl FakeTelegram {
    pub async fn start() -> Self {
        let state: TgShared = Arc::new(Mutex::new(TelegramState::default()));
        let router = Router::new()
            .route(&format!("/bot{BOT_TOKEN}/getFile"), post(tg_get_file))
            .route(&format!("/bot{BOT_TOKEN}/getUpdates"), post(tg_get_updates))
            .route(&format!("/bot{BOT_TOKEN}/sendMessage"), post(tg_send_message))
            .route(&format!("/bot{BOT_TOKEN}/editMessageText"), post(tg_edit_message))
            .route(&format!("/bot{BOT_TOKEN}/deleteWebhook"), post(tg_delete_webhook))
            .route(&format!("/file/bot{BOT_TOKEN}/{{*path}}"), get(tg_download))
            .with_state(state.clone());
        let base = spawn_router(router).await;
        FakeTelegram { base, state }
    }

    pub fn add_file(&self, file_id: &str, path: &str, body: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(file_id.to_string(), (path.to_string(), body.to_vec()));
    }

    pub fn push_update(&self, update: Value) {
        self.state.lock().unwrap().updates.push(update);
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn edits(&self) -> Vec<Value> {
        self.state.lock().unwrap().edits.clone()
    }
}
