//! Capability contracts consumed by the dispatcher.
//!
//! Concrete tool back-ends (sound playback, taskbar flashing, browser
//! automation, speech synthesis) live outside this crate. Each tool in the
//! registry binds to exactly one of the traits below; the dispatcher only
//! ever talks to these trait objects.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::mcp::tools::{
    BrowserClickParams, BrowserNavigateParams, BrowserScreenshotParams, NotifyParams,
    ShowMessageParams, SpeakParams,
};

/// Failure reported by a capability. The message is passed through to the
/// client verbatim in the JSON-RPC error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type CapabilityResult = Result<Value, CapabilityError>;

/// Audible and visual attention signals.
#[async_trait]
pub trait NotificationCapability: Send + Sync {
    async fn notify(&self, params: NotifyParams) -> CapabilityResult;
}

/// Message display in the host UI.
#[async_trait]
pub trait MessagingCapability: Send + Sync {
    async fn show_message(&self, params: ShowMessageParams) -> CapabilityResult;
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechCapability: Send + Sync {
    async fn speak(&self, params: SpeakParams) -> CapabilityResult;
}

/// Browser automation.
#[async_trait]
pub trait BrowserCapability: Send + Sync {
    async fn navigate(&self, params: BrowserNavigateParams) -> CapabilityResult;
    async fn click(&self, params: BrowserClickParams) -> CapabilityResult;
    async fn screenshot(&self, params: BrowserScreenshotParams) -> CapabilityResult;
}

/// The full set of capabilities a dispatcher can route to.
#[derive(Clone)]
pub struct Capabilities {
    pub notification: Arc<dyn NotificationCapability>,
    pub messaging: Arc<dyn MessagingCapability>,
    pub speech: Arc<dyn SpeechCapability>,
    pub browser: Arc<dyn BrowserCapability>,
}

impl Capabilities {
    /// Bind every contract to the same implementation.
    pub fn uniform<T>(host: Arc<T>) -> Self
    where
        T: NotificationCapability
            + MessagingCapability
            + SpeechCapability
            + BrowserCapability
            + 'static,
    {
        Self {
            notification: host.clone(),
            messaging: host.clone(),
            speech: host.clone(),
            browser: host,
        }
    }
}

/// Capability host that only records requests in the log and acknowledges
/// them. Used by the binary when no concrete back-ends are wired in.
#[derive(Debug, Default)]
pub struct LoggingHost;

fn acknowledged(tool: &str) -> CapabilityResult {
    Ok(serde_json::json!({ "tool": tool, "status": "acknowledged" }))
}

#[async_trait]
impl NotificationCapability for LoggingHost {
    async fn notify(&self, params: NotifyParams) -> CapabilityResult {
        tracing::info!(
            message = params.message.as_deref().unwrap_or(""),
            sound = ?params.sound,
            flash = params.flash,
            "notify"
        );
        acknowledged("notify")
    }
}

#[async_trait]
impl MessagingCapability for LoggingHost {
    async fn show_message(&self, params: ShowMessageParams) -> CapabilityResult {
        tracing::info!(level = ?params.level, message = %params.message, "show_message");
        acknowledged("show_message")
    }
}

#[async_trait]
impl SpeechCapability for LoggingHost {
    async fn speak(&self, params: SpeakParams) -> CapabilityResult {
        tracing::info!(text = %params.text, voice = ?params.voice, rate = ?params.rate, "speak");
        acknowledged("speak")
    }
}

#[async_trait]
impl BrowserCapability for LoggingHost {
    async fn navigate(&self, params: BrowserNavigateParams) -> CapabilityResult {
        tracing::info!(url = %params.url, "browser_navigate");
        acknowledged("browser_navigate")
    }

    async fn click(&self, params: BrowserClickParams) -> CapabilityResult {
        tracing::info!(selector = %params.selector, "browser_click");
        acknowledged("browser_click")
    }

    async fn screenshot(&self, params: BrowserScreenshotParams) -> CapabilityResult {
        tracing::info!(full_page = params.full_page, "browser_screenshot");
        Err(CapabilityError::new(
            "no browser is attached to this host",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::{MessageLevel, SoundKind};

    #[tokio::test]
    async fn logging_host_acknowledges_notify() {
        let host = LoggingHost;
        let result = host
            .notify(NotifyParams {
                message: Some("build finished".into()),
                sound: SoundKind::Success,
                flash: true,
            })
            .await
            .unwrap();
        assert_eq!(result["status"], "acknowledged");
        assert_eq!(result["tool"], "notify");
    }

    #[tokio::test]
    async fn logging_host_has_no_browser_for_screenshots() {
        let host = LoggingHost;
        let err = host
            .screenshot(BrowserScreenshotParams { full_page: false })
            .await
            .unwrap_err();
        assert!(err.message.contains("no browser"));
    }

    #[tokio::test]
    async fn uniform_binds_every_contract() {
        let caps = Capabilities::uniform(Arc::new(LoggingHost));
        let result = caps
            .messaging
            .show_message(ShowMessageParams {
                message: "hi".into(),
                level: MessageLevel::Warning,
            })
            .await
            .unwrap();
        assert_eq!(result["tool"], "show_message");
    }
}
