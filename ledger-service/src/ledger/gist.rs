//! Gist-backed backup store.
//!
//! The whole ledger document is mirrored into one file of a GitHub
//! gist, one file per lottery instance. The gist API has no conditional
//! writes, so this backend is last-writer-wins: `expected` versions are
//! ignored and conflicts are resolved by the primary store. When no
//! gist id is configured the store creates a private gist on first
//! write and reuses it for the rest of the process lifetime.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::backend::{Lookup, PutOutcome, StorageBackend};
use super::document::LedgerDocument;

const GIST_ACCEPT: &str = "application/vnd.github+json";

pub struct GistStore {
    client: Client,
    api_base: String,
    token: String,
    configured_id: Option<String>,
    created_id: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct GistDetail {
    files: HashMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedGist {
    id: String,
}

impl GistStore {
    pub fn new(api_base: String, token: String, gist_id: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("lottery-ledger/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .context("building gist HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            configured_id: gist_id,
            created_id: Mutex::new(None),
        })
    }

    fn filename(instance: &str) -> String {
        format!("lottery-ledger-{instance}.json")
    }

    async fn current_gist_id(&self) -> Option<String> {
        if let Some(id) = &self.configured_id {
            return Some(id.clone());
        }
        self.created_id.lock().await.clone()
    }

    async fn patch_gist(&self, gist_id: &str, instance: &str, content: &str) -> PutOutcome {
        let url = format!("{}/gists/{}", self.api_base, gist_id);
        let body = json!({
            "files": { Self::filename(instance): { "content": content } }
        });

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, GIST_ACCEPT)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => PutOutcome::Applied,
            Ok(resp) => {
                warn!("gist store: update of {} returned {}", gist_id, resp.status());
                PutOutcome::Unavailable(format!("update returned {}", resp.status()))
            }
            Err(err) => {
                warn!("gist store: update request failed: {}", err);
                PutOutcome::Unavailable(err.to_string())
            }
        }
    }

    async fn create_gist(&self, instance: &str, content: &str) -> Result<String, String> {
        let url = format!("{}/gists", self.api_base);
        let body = json!({
            "description": format!("Lottery ledger backup ({instance})"),
            "public": false,
            "files": { Self::filename(instance): { "content": content } }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, GIST_ACCEPT)
            .json(&body)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!("create returned {}", response.status()));
        }

        let created: CreatedGist = response.json().await.map_err(|err| err.to_string())?;
        info!("gist store: created backup gist {}", created.id);
        Ok(created.id)
    }
}

#[async_trait]
impl StorageBackend for GistStore {
    fn name(&self) -> &'static str {
        "gist"
    }

    async fn get(&self, instance: &str) -> Lookup {
        // No gist yet means nothing was ever backed up.
        let Some(gist_id) = self.current_gist_id().await else {
            return Lookup::NotFound;
        };

        let url = format!("{}/gists/{}", self.api_base, gist_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, GIST_ACCEPT)
            .send()
            .await;

        let resp = match response {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => return Lookup::NotFound,
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!("gist store: read of {} returned {}", gist_id, resp.status());
                return Lookup::Unavailable(format!("read returned {}", resp.status()));
            }
            Err(err) => {
                warn!("gist store: read request failed: {}", err);
                return Lookup::Unavailable(err.to_string());
            }
        };

        let detail: GistDetail = match resp.json().await {
            Ok(detail) => detail,
            Err(err) => {
                warn!("gist store: undecodable gist response: {}", err);
                return Lookup::Unavailable(err.to_string());
            }
        };

        let Some(file) = detail.files.get(&Self::filename(instance)) else {
            return Lookup::NotFound;
        };
        if file.truncated {
            // The API elides large file bodies; a partial document must
            // not be mistaken for the ledger.
            return Lookup::Unavailable("file content truncated by gist API".to_string());
        }
        let Some(content) = &file.content else {
            return Lookup::Unavailable("file content missing from gist response".to_string());
        };

        match serde_json::from_str::<LedgerDocument>(content) {
            Ok(doc) => Lookup::Found(doc),
            Err(err) => {
                warn!(
                    "gist store: undecodable document for instance {}: {}",
                    instance, err
                );
                Lookup::Unavailable(format!("undecodable document: {err}"))
            }
        }
    }

    async fn put(
        &self,
        instance: &str,
        doc: &LedgerDocument,
        _expected: Option<u64>,
    ) -> PutOutcome {
        let content = match serde_json::to_string_pretty(doc) {
            Ok(content) => content,
            Err(err) => return PutOutcome::Unavailable(format!("encode failed: {err}")),
        };

        if let Some(gist_id) = &self.configured_id {
            return self.patch_gist(gist_id, instance, &content).await;
        }

        // Hold the lock across creation so concurrent first writes do
        // not each create a gist.
        let mut created = self.created_id.lock().await;
        if let Some(gist_id) = created.clone() {
            drop(created);
            return self.patch_gist(&gist_id, instance, &content).await;
        }

        match self.create_gist(instance, &content).await {
            Ok(gist_id) => {
                *created = Some(gist_id);
                PutOutcome::Applied
            }
            Err(reason) => {
                warn!("gist store: create failed: {}", reason);
                PutOutcome::Unavailable(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;

    use super::*;

    #[derive(Clone, Default)]
    struct StubGists {
        files: Arc<Mutex<HashMap<String, String>>>,
        truncated: Arc<AtomicBool>,
    }

    async fn stub_get(
        State(state): State<StubGists>,
        Path(id): Path<String>,
    ) -> Json<Value> {
        let files = state.files.lock().await;
        let truncated = state.truncated.load(Ordering::SeqCst);
        let rendered: serde_json::Map<String, Value> = files
            .iter()
            .map(|(name, content)| {
                (
                    name.clone(),
                    json!({ "content": content, "truncated": truncated }),
                )
            })
            .collect();
        Json(json!({ "id": id, "files": rendered }))
    }

    async fn stub_patch(
        State(state): State<StubGists>,
        Path(_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        apply_files(&state, &body).await;
        Json(json!({ "id": "stub" }))
    }

    async fn stub_create(State(state): State<StubGists>, Json(body): Json<Value>) -> Json<Value> {
        apply_files(&state, &body).await;
        Json(json!({ "id": "stub-gist-1" }))
    }

    async fn apply_files(state: &StubGists, body: &Value) {
        let mut files = state.files.lock().await;
        if let Some(entries) = body.get("files").and_then(|f| f.as_object()) {
            for (name, file) in entries {
                let content = file
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default();
                files.insert(name.clone(), content.to_string());
            }
        }
    }

    async fn spawn_stub() -> (String, StubGists) {
        let state = StubGists::default();
        let app = Router::new()
            .route("/gists", post(stub_create))
            .route("/gists/{id}", get(stub_get).patch(stub_patch))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server");
        });

        (format!("http://{addr}"), state)
    }

    fn sample_doc() -> LedgerDocument {
        let mut doc = LedgerDocument::bootstrap(chrono::Duration::hours(24));
        doc.version = 1;
        doc
    }

    #[tokio::test]
    async fn unconfigured_store_reads_not_found_without_network() {
        let store = GistStore::new(
            "http://127.0.0.1:9".to_string(),
            "token".to_string(),
            None,
        )
        .expect("store");
        assert!(matches!(store.get("main").await, Lookup::NotFound));
    }

    #[tokio::test]
    async fn first_put_creates_gist_and_reads_back() {
        let (base, state) = spawn_stub().await;
        let store = GistStore::new(base, "token".to_string(), None).expect("store");

        let outcome = store.put("main", &sample_doc(), None).await;
        assert_eq!(outcome, PutOutcome::Applied);
        assert!(state
            .files
            .lock()
            .await
            .contains_key("lottery-ledger-main.json"));

        match store.get("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 1),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expected_version_is_ignored() {
        let (base, _state) = spawn_stub().await;
        let store = GistStore::new(base, "token".to_string(), Some("g1".to_string()))
            .expect("store");

        // A wildly wrong expectation still lands: last writer wins here.
        let outcome = store.put("main", &sample_doc(), Some(999)).await;
        assert_eq!(outcome, PutOutcome::Applied);
    }

    #[tokio::test]
    async fn other_instances_file_is_not_found() {
        let (base, _state) = spawn_stub().await;
        let store = GistStore::new(base, "token".to_string(), Some("g1".to_string()))
            .expect("store");

        store.put("main", &sample_doc(), None).await;
        assert!(matches!(store.get("devnet").await, Lookup::NotFound));
    }

    #[tokio::test]
    async fn truncated_content_is_unavailable() {
        let (base, state) = spawn_stub().await;
        let store = GistStore::new(base, "token".to_string(), Some("g1".to_string()))
            .expect("store");

        store.put("main", &sample_doc(), None).await;
        state.truncated.store(true, Ordering::SeqCst);

        match store.get("main").await {
            Lookup::Unavailable(reason) => assert!(reason.contains("truncated")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
