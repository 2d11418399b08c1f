use serde::{Deserialize, Serialize};

/// Capabilities a {model_id} advertises. The Token Counter (C1) uses
/// `context_window_tokens` to compute `remaining_tokens`; the planner
/// driver uses `supports_tools`/`supports_json_mode` to decide whether a
/// model can back the planner role at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_tools: ToolSupport,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: ToolSupport::None,
            supports_streaming: false,
            supports_json_mode: false,
            context_window_tokens: None,
            max_output_tokens: None,
        }
    }
}

/// Tool support level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    /// No tool calling support.
    None,
    /// Basic tool calling (function calling).
    Basic,
    /// Strict JSON schema-validated tool calling.
    StrictJson,
}

/// The small-model roles named in §1: the planner itself, plus the
/// background collaborators (judge, suggester, reporter) invoked only
/// by their contract (§1 scope notes, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Drives the Agent Loop's tool/action decisions (C6).
    Planner,
    /// Scores a turn early and late (§4.7 terminal handling).
    Judge,
    /// Proposes instruction drafts after a successful turn (§4.10).
    Suggester,
    /// Generates the report's title on its first turn (§4.7 terminal handling).
    Reporter,
}
