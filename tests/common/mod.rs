#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon::capability::{
    BrowserCapability, Capabilities, CapabilityError, CapabilityResult, MessagingCapability,
    NotificationCapability, SpeechCapability,
};
use beacon::config::{ServerSection, TunnelConfig};
use beacon::mcp::dispatch::Dispatcher;
use beacon::mcp::registry::ToolRegistry;
use beacon::mcp::tools::*;
use beacon::server::{Engine, RunningEngine};
use beacon::tunnel::{HostSpec, TunnelLauncher, TunnelNotice};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::broadcast;

// ── Capabilities ───────────────────────────────────────────────────

/// Capability host that records each call and optionally fails.
#[derive(Default)]
pub struct CountingHost {
    pub calls: Mutex<Vec<String>>,
    pub fail_with: Option<String>,
}

impl CountingHost {
    pub fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, tool: &str) -> CapabilityResult {
        self.calls.lock().push(tool.to_string());
        match &self.fail_with {
            Some(msg) => Err(CapabilityError::new(msg.clone())),
            None => Ok(Value::String(format!("{tool} done"))),
        }
    }
}

#[async_trait]
impl NotificationCapability for CountingHost {
    async fn notify(&self, _params: NotifyParams) -> CapabilityResult {
        self.record("notify")
    }
}

#[async_trait]
impl MessagingCapability for CountingHost {
    async fn show_message(&self, _params: ShowMessageParams) -> CapabilityResult {
        self.record("show_message")
    }
}

#[async_trait]
impl SpeechCapability for CountingHost {
    async fn speak(&self, _params: SpeakParams) -> CapabilityResult {
        self.record("speak")
    }
}

#[async_trait]
impl BrowserCapability for CountingHost {
    async fn navigate(&self, _params: BrowserNavigateParams) -> CapabilityResult {
        self.record("browser_navigate")
    }
    async fn click(&self, _params: BrowserClickParams) -> CapabilityResult {
        self.record("browser_click")
    }
    async fn screenshot(&self, _params: BrowserScreenshotParams) -> CapabilityResult {
        self.record("browser_screenshot")
    }
}

// ── Engine ─────────────────────────────────────────────────────────

pub fn dispatcher_for(host: Arc<CountingHost>) -> Dispatcher {
    Dispatcher::new(ToolRegistry::builtin(), Capabilities::uniform(host))
}

/// Start an engine on an OS-assigned loopback port.
pub async fn start_engine(host: Arc<CountingHost>) -> RunningEngine {
    start_engine_on(host, 0).await
}

pub async fn start_engine_on(host: Arc<CountingHost>, port: u16) -> RunningEngine {
    let config = ServerSection {
        port,
        ..ServerSection::default()
    };
    Engine::start(&config, dispatcher_for(host), None)
        .await
        .expect("engine should start")
}

pub async fn post_message(client: &reqwest::Client, port: u16, body: &str) -> (u16, Value) {
    let response = client
        .post(format!("http://127.0.0.1:{port}/message"))
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let json = response.json().await.unwrap();
    (status, json)
}

// ── SSE client ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Minimal SSE reader over a streaming reqwest response.
pub struct SseClient {
    response: reqwest::Response,
    buffer: String,
}

impl SseClient {
    pub async fn connect(client: &reqwest::Client, port: u16) -> Self {
        let response = client
            .get(format!("http://127.0.0.1:{port}/sse"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Next event, skipping keep-alive comments. `None` when the stream ends.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                if let Some(event) = parse_block(&block) {
                    return Some(event);
                }
                continue;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("timed out waiting for SSE data")
                .unwrap()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Read the initial `endpoint` event and return its data.
    pub async fn endpoint(&mut self) -> String {
        let event = self.next_event().await.expect("stream ended before endpoint");
        assert_eq!(event.event, "endpoint");
        event.data
    }

    /// Next `message` event parsed as JSON.
    pub async fn next_message(&mut self) -> Value {
        let event = self.next_event().await.expect("stream ended");
        assert_eq!(event.event, "message");
        serde_json::from_str(&event.data).unwrap()
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(v) = line.strip_prefix("event:") {
            event = v.trim_start().to_string();
        } else if let Some(v) = line.strip_prefix("data:") {
            data.push(v.strip_prefix(' ').unwrap_or(v));
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

// ── Tunnels ────────────────────────────────────────────────────────

/// Launcher that runs a shell script instead of ssh and counts launches.
pub struct ScriptLauncher {
    script: String,
    launches: Arc<AtomicUsize>,
}

impl ScriptLauncher {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.launches.clone()
    }
}

impl TunnelLauncher for ScriptLauncher {
    fn command(&self, _config: &TunnelConfig, _spec: &HostSpec) -> Command {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.script);
        cmd
    }
}

/// Wait for the next notice, failing the test after five seconds.
pub async fn next_notice(rx: &mut broadcast::Receiver<TunnelNotice>) -> TunnelNotice {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for tunnel notice")
        .expect("notice channel closed")
}
