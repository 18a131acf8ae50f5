use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::registry::{ToolDefinition, ToolKind, ToolRegistry};
use crate::capability::{Capabilities, CapabilityError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {detail}")]
    InvalidParams { tool: String, detail: String },

    #[error("Tool {tool} failed: {source}")]
    ExecutionFailure {
        tool: String,
        #[source]
        source: CapabilityError,
    },
}

/// Resolves tool calls against the registry and forwards them to the bound
/// capability.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    capabilities: Capabilities,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, capabilities: Capabilities) -> Self {
        Self {
            registry: Arc::new(registry),
            capabilities,
        }
    }

    pub fn list_tools(&self) -> &[ToolDefinition] {
        self.registry.list()
    }

    /// Invoke `name` with `args`. `None` arguments are treated as `{}`.
    pub async fn dispatch(&self, name: &str, args: Option<Value>) -> Result<Value, DispatchError> {
        let kind = self
            .registry
            .get(name)
            .map(|t| t.kind)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;
        let args = args.unwrap_or_else(|| Value::Object(Default::default()));

        tracing::debug!(tool = name, contract = ?kind.contract(), "dispatching tool call");

        let caps = &self.capabilities;
        let result = match kind {
            ToolKind::Notify => caps.notification.notify(parse(kind, args)?).await,
            ToolKind::ShowMessage => caps.messaging.show_message(parse(kind, args)?).await,
            ToolKind::Speak => caps.speech.speak(parse(kind, args)?).await,
            ToolKind::BrowserNavigate => caps.browser.navigate(parse(kind, args)?).await,
            ToolKind::BrowserClick => caps.browser.click(parse(kind, args)?).await,
            ToolKind::BrowserScreenshot => caps.browser.screenshot(parse(kind, args)?).await,
        };

        result.map_err(|source| {
            tracing::warn!(tool = name, error = %source, "tool execution failed");
            DispatchError::ExecutionFailure {
                tool: name.to_string(),
                source,
            }
        })
    }
}

fn parse<T: DeserializeOwned>(kind: ToolKind, args: Value) -> Result<T, DispatchError> {
    serde_json::from_value(args).map_err(|e| DispatchError::InvalidParams {
        tool: kind.name().to_string(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capability::{
        BrowserCapability, CapabilityResult, MessagingCapability, NotificationCapability,
        SpeechCapability,
    };
    use crate::mcp::tools::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Capability host that records every call and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingHost {
        pub calls: Mutex<Vec<(String, Value)>>,
        pub fail_with: Option<String>,
    }

    impl RecordingHost {
        fn record(&self, tool: &str, args: impl serde::Serialize) -> CapabilityResult {
            self.calls
                .lock()
                .push((tool.to_string(), serde_json::to_value(args).unwrap()));
            match &self.fail_with {
                Some(msg) => Err(CapabilityError::new(msg.clone())),
                None => Ok(serde_json::json!(format!("{tool} ok"))),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl NotificationCapability for RecordingHost {
        async fn notify(&self, params: NotifyParams) -> CapabilityResult {
            self.record("notify", params)
        }
    }

    #[async_trait]
    impl MessagingCapability for RecordingHost {
        async fn show_message(&self, params: ShowMessageParams) -> CapabilityResult {
            self.record("show_message", params)
        }
    }

    #[async_trait]
    impl SpeechCapability for RecordingHost {
        async fn speak(&self, params: SpeakParams) -> CapabilityResult {
            self.record("speak", params)
        }
    }

    #[async_trait]
    impl BrowserCapability for RecordingHost {
        async fn navigate(&self, params: BrowserNavigateParams) -> CapabilityResult {
            self.record("browser_navigate", params)
        }
        async fn click(&self, params: BrowserClickParams) -> CapabilityResult {
            self.record("browser_click", params)
        }
        async fn screenshot(&self, params: BrowserScreenshotParams) -> CapabilityResult {
            self.record("browser_screenshot", params)
        }
    }

    fn dispatcher_with(host: Arc<RecordingHost>) -> Dispatcher {
        Dispatcher::new(ToolRegistry::builtin(), Capabilities::uniform(host))
    }

    #[tokio::test]
    async fn dispatch_routes_to_bound_capability() {
        let host = Arc::new(RecordingHost::default());
        let dispatcher = dispatcher_with(host.clone());

        let result = dispatcher
            .dispatch("speak", Some(serde_json::json!({"text": "hello"})))
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!("speak ok"));
        let calls = host.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "speak");
        assert_eq!(calls[0].1["text"], "hello");
    }

    #[tokio::test]
    async fn unknown_tool_invokes_nothing() {
        let host = Arc::new(RecordingHost::default());
        let dispatcher = dispatcher_with(host.clone());

        let err = dispatcher.dispatch("format_disk", None).await.unwrap_err();

        assert_eq!(err, DispatchError::UnknownTool("format_disk".into()));
        assert_eq!(host.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_required_field_is_invalid_params() {
        let host = Arc::new(RecordingHost::default());
        let dispatcher = dispatcher_with(host.clone());

        let err = dispatcher
            .dispatch("browser_navigate", Some(serde_json::json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::InvalidParams { ref tool, .. } if tool == "browser_navigate"));
        assert_eq!(host.call_count(), 0);
    }

    #[tokio::test]
    async fn absent_arguments_are_an_empty_object() {
        let host = Arc::new(RecordingHost::default());
        let dispatcher = dispatcher_with(host.clone());

        dispatcher.dispatch("notify", None).await.unwrap();

        let calls = host.calls.lock();
        assert_eq!(calls[0].1["flash"], true);
        assert_eq!(calls[0].1["sound"], "default");
    }

    #[tokio::test]
    async fn capability_failure_is_execution_failure() {
        let host = Arc::new(RecordingHost {
            fail_with: Some("speaker unplugged".into()),
            ..Default::default()
        });
        let dispatcher = dispatcher_with(host.clone());

        let err = dispatcher
            .dispatch("notify", Some(serde_json::json!({"sound": "error"})))
            .await
            .unwrap_err();

        match err {
            DispatchError::ExecutionFailure { tool, source } => {
                assert_eq!(tool, "notify");
                assert_eq!(source.message, "speaker unplugged");
            }
            other => panic!("expected ExecutionFailure, got {other:?}"),
        }
        assert_eq!(host.call_count(), 1);
    }

    #[tokio::test]
    async fn list_tools_is_unaffected_by_calls() {
        let host = Arc::new(RecordingHost::default());
        let dispatcher = dispatcher_with(host);
        let before: Vec<_> = dispatcher.list_tools().iter().map(|t| t.name).collect();

        let _ = dispatcher.dispatch("speak", Some(serde_json::json!({"text": "x"}))).await;
        let _ = dispatcher.dispatch("nope", None).await;

        let after: Vec<_> = dispatcher.list_tools().iter().map(|t| t.name).collect();
        assert_eq!(before, after);
    }
}
