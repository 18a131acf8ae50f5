// MCP tool parameter types

use serde::{Deserialize, Serialize};

// ── Notification ────────────────────────────────────────────────

/// Sound played alongside a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    #[default]
    Default,
    Success,
    Warning,
    Error,
    /// Visual signal only.
    None,
}

fn default_flash() -> bool {
    true
}

/// Parameters for the `notify` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct NotifyParams {
    #[schemars(description = "Optional text shown with the notification.")]
    pub message: Option<String>,

    #[serde(default)]
    #[schemars(description = "Sound to play: 'default', 'success', 'warning', 'error', or 'none'.")]
    pub sound: SoundKind,

    #[serde(default = "default_flash")]
    #[schemars(description = "Flash the taskbar entry of the host window. Defaults to true.")]
    pub flash: bool,
}

// ── Messaging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Parameters for the `show_message` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ShowMessageParams {
    #[schemars(description = "The message to display.")]
    pub message: String,

    #[serde(default)]
    #[schemars(description = "Severity of the message: 'info' (default), 'warning', or 'error'.")]
    pub level: MessageLevel,
}

// ── Speech ──────────────────────────────────────────────────────

/// Parameters for the `speak` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SpeakParams {
    #[schemars(description = "The text to speak aloud.")]
    pub text: String,

    #[schemars(description = "Voice name understood by the speech back-end. Uses the system default if omitted.")]
    pub voice: Option<String>,

    #[schemars(description = "Speaking rate multiplier, where 1.0 is normal speed.")]
    pub rate: Option<f64>,
}

// ── Browser ─────────────────────────────────────────────────────

/// Parameters for the `browser_navigate` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BrowserNavigateParams {
    #[schemars(description = "The URL to open.")]
    pub url: String,
}

/// Parameters for the `browser_click` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BrowserClickParams {
    #[schemars(description = "CSS selector of the element to click.")]
    pub selector: String,
}

/// Parameters for the `browser_screenshot` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BrowserScreenshotParams {
    #[serde(default)]
    #[schemars(description = "Capture the full scrollable page instead of the viewport. Defaults to false.")]
    pub full_page: bool,
}
