use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::tools::{
    BrowserClickParams, BrowserNavigateParams, BrowserScreenshotParams, NotifyParams,
    ShowMessageParams, SpeakParams,
};

/// Capability contract a tool is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Contract {
    Notification,
    Messaging,
    Speech,
    Browser,
}

/// Every tool the dispatcher knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Notify,
    ShowMessage,
    Speak,
    BrowserNavigate,
    BrowserClick,
    BrowserScreenshot,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::Notify,
        ToolKind::ShowMessage,
        ToolKind::Speak,
        ToolKind::BrowserNavigate,
        ToolKind::BrowserClick,
        ToolKind::BrowserScreenshot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Notify => "notify",
            ToolKind::ShowMessage => "show_message",
            ToolKind::Speak => "speak",
            ToolKind::BrowserNavigate => "browser_navigate",
            ToolKind::BrowserClick => "browser_click",
            ToolKind::BrowserScreenshot => "browser_screenshot",
        }
    }

    pub fn contract(self) -> Contract {
        match self {
            ToolKind::Notify => Contract::Notification,
            ToolKind::ShowMessage => Contract::Messaging,
            ToolKind::Speak => Contract::Speech,
            ToolKind::BrowserNavigate | ToolKind::BrowserClick | ToolKind::BrowserScreenshot => {
                Contract::Browser
            }
        }
    }

    fn description(self) -> &'static str {
        match self {
            ToolKind::Notify => {
                "Get the user's attention: play a sound and flash the host window's taskbar entry."
            }
            ToolKind::ShowMessage => "Display a message to the user in the host application.",
            ToolKind::Speak => "Speak text aloud using the host's speech synthesizer.",
            ToolKind::BrowserNavigate => "Open a URL in the automated browser.",
            ToolKind::BrowserClick => "Click an element in the automated browser.",
            ToolKind::BrowserScreenshot => {
                "Capture a screenshot of the automated browser's current page."
            }
        }
    }

    fn input_schema(self) -> Value {
        let schema = match self {
            ToolKind::Notify => schemars::schema_for!(NotifyParams),
            ToolKind::ShowMessage => schemars::schema_for!(ShowMessageParams),
            ToolKind::Speak => schemars::schema_for!(SpeakParams),
            ToolKind::BrowserNavigate => schemars::schema_for!(BrowserNavigateParams),
            ToolKind::BrowserClick => schemars::schema_for!(BrowserClickParams),
            ToolKind::BrowserScreenshot => schemars::schema_for!(BrowserScreenshotParams),
        };
        let mut value = schema.to_value();
        // Clients want a bare object schema, not a standalone document.
        if let Value::Object(map) = &mut value {
            map.remove("$schema");
            map.remove("title");
        }
        value
    }
}

/// A single catalogue entry as advertised through `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip)]
    pub kind: ToolKind,
}

impl ToolDefinition {
    pub fn for_kind(kind: ToolKind) -> Self {
        Self {
            name: kind.name(),
            description: kind.description(),
            input_schema: kind.input_schema(),
            kind,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateName(String),
}

/// Immutable, order-stable tool catalogue.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// The full built-in catalogue.
    pub fn builtin() -> Self {
        Self {
            tools: ToolKind::ALL.into_iter().map(ToolDefinition::for_kind).collect(),
        }
    }

    /// Build a registry from an explicit list, rejecting duplicate names.
    pub fn from_definitions(tools: Vec<ToolDefinition>) -> Result<Self, RegistryError> {
        for (i, tool) in tools.iter().enumerate() {
            if tools[..i].iter().any(|t| t.name == tool.name) {
                return Err(RegistryError::DuplicateName(tool.name.to_string()));
            }
        }
        Ok(Self { tools })
    }

    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
