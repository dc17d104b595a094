use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{
    net::TcpListener,
    path::{Path, PathBuf},
    time::Duration,
};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;

/// Get an available ephemeral port on localhost.
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Resolve the ledger-service binary path from env or common target dirs.
pub fn resolve_binary_path() -> String {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_ledger-service") {
        return p;
    }
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_ledger_service") {
        return p;
    }

    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest.parent().unwrap_or(&manifest).to_path_buf();
    let candidates = [
        manifest.join("target/debug/ledger-service"),
        manifest.join("target/release/ledger-service"),
        workspace_root.join("target/debug/ledger-service"),
        workspace_root.join("target/release/ledger-service"),
    ];
    for cand in candidates.iter() {
        if Path::new(&cand).exists() {
            return cand.to_string_lossy().to_string();
        }
    }

    "ledger-service".to_string()
}

/// Poll /healthz until the server responds OK or timeout.
pub async fn wait_ready(base: &str, timeout_ms: u64) -> anyhow::Result<()> {
    let client = Client::new();
    let mut waited = 0u64;
    loop {
        if waited >= timeout_ms {
            anyhow::bail!("server not ready after {}ms", timeout_ms);
        }
        if let Ok(resp) = client.get(format!("{}/healthz", base)).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        sleep(Duration::from_millis(50)).await;
        waited += 50;
    }
}

// Struct that ensures the child process is killed on drop
pub struct ChildGuard(std::process::Child);
impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

/// In-process stand-in for the payout service. Records every request
/// and can be toggled into a failing mode mid-test.
#[derive(Clone, Default)]
pub struct PayoutStub {
    fail: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl PayoutStub {
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

async fn payout_handler(State(stub): State<PayoutStub>, Json(body): Json<Value>) -> Json<Value> {
    let seq = {
        let mut calls = stub.calls.lock().unwrap();
        calls.push(body);
        calls.len()
    };
    if stub.fail.load(Ordering::SeqCst) {
        Json(json!({ "success": false, "error": "stub payout rejected" }))
    } else {
        Json(json!({ "success": true, "signature": format!("stub-sig-{}", seq) }))
    }
}

/// Start the payout stub on an ephemeral port. Returns the full payout
/// endpoint URL and a handle for inspecting and steering it.
pub async fn spawn_payout_stub() -> anyhow::Result<(String, PayoutStub)> {
    let stub = PayoutStub::default();
    let app = Router::new()
        .route("/payout", post(payout_handler))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("payout stub serve");
    });

    Ok((format!("http://{}/payout", addr), stub))
}

pub async fn setup_server(payout_url: &str) -> anyhow::Result<(String, ChildGuard)> {
    // Resolve binary path from Cargo or fallbacks
    let bin = resolve_binary_path();
    let bin_path = Path::new(&bin);
    assert!(bin_path.exists(), "binary not found at {}", bin);

    // Test config
    let port = find_free_port();
    let base_url = format!("http://127.0.0.1:{}", port);

    // Start the binary
    let child = Command::new(&bin)
        .env("DB_PATH", ":memory:")
        .env("PORT", port.to_string())
        .env("ADMIN_AUTH_TOKEN", "test-token")
        .env("PAYOUT_SERVICE_URL", payout_url)
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Ensure we always try to kill the child on exit
    let guard = ChildGuard(child);

    // Wait until server is ready
    wait_ready(&base_url, 10_000).await?;

    Ok((base_url, guard))
}
