//! The invocation contract a model collaborator must satisfy (§6). No
//! concrete provider adapter lives in this crate — callers bring their
//! own `LlmStream` implementation (an HTTP client, a local runtime, a
//! test double) and the Planner Driver only ever talks to the trait.

use aa_domain::capability::ModelCapabilities;
use aa_domain::stream::{BoxStream, StreamEvent};
use aa_domain::tool::{Message, ToolDefinition};
use aa_domain::Result;

/// A provider-agnostic chat completion request. `json_mode` is the one
/// structured-output switch the Planner Driver relies on — it does not
/// negotiate a provider-specific `response_format` shape.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<aa_domain::stream::Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// The streaming collaborator the Planner Driver drives every loop
/// iteration (§6, §9). Implementations own their own retries at the
/// transport layer; the driver only consumes the event stream.
#[async_trait::async_trait]
pub trait LlmStream: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn capabilities(&self) -> &ModelCapabilities;

    fn provider_id(&self) -> &str;
}
