//! The Planner Driver (C6): turns one context string into one validated
//! [`PlanDecision`] by driving the `LlmStream` collaborator and folding
//! its events into reasoning/message/tool-call text (§4.6).

use aa_domain::entities::{PlanDecision, PlanType};
use aa_domain::ids::AgentExecutionId;
use aa_domain::stream::StreamEvent;
use aa_domain::tool::Message;
use aa_domain::Result;
use futures_util::StreamExt;

use crate::decision::parse_decision;
use crate::traits::{ChatRequest, LlmStream};

/// Everything the driver accumulated from one streamed turn before
/// validation. Exposed so the Agent Loop can forward `reasoning`/`content`
/// deltas to the Event Stream (C8) as they are folded in, not just at
/// the end.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedTurn {
    pub reasoning: String,
    pub content: String,
}

/// Drive one planner call to completion and fold its stream into text.
/// Cancellation is cooperative: the caller passes a closure it can wire
/// to the shared cancel signal, polled between stream items.
pub async fn accumulate_stream(
    llm: &dyn LlmStream,
    request: &ChatRequest,
    mut should_cancel: impl FnMut() -> bool,
) -> Result<AccumulatedTurn> {
    let mut stream = llm.chat_stream(request).await?;
    let mut turn = AccumulatedTurn::default();

    while let Some(event) = stream.next().await {
        if should_cancel() {
            return Err(aa_domain::Error::Cancelled);
        }
        match event? {
            StreamEvent::Token { text } => turn.content.push_str(&text),
            StreamEvent::Thinking { text } => turn.reasoning.push_str(&text),
            StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::ToolCallFinished { .. } => {}
            StreamEvent::Done { .. } => break,
            StreamEvent::Error { message } => {
                return Err(aa_domain::Error::Other(message));
            }
        }
    }

    Ok(turn)
}

/// One end-to-end planner call: accumulate the stream, then validate it
/// into a [`PlanDecision`]. Returns `Err` on a validation failure — the
/// Agent Loop decides whether to retry or synthesize a terminal decision
/// (§4.6, §7); this function never does that itself.
pub async fn drive_decision(
    llm: &dyn LlmStream,
    request: &ChatRequest,
    agent_execution_id: AgentExecutionId,
    decision_seq: u64,
    plan_type: PlanType,
    should_cancel: impl FnMut() -> bool,
) -> Result<PlanDecision> {
    let turn = accumulate_stream(llm, request, should_cancel).await?;
    parse_decision(&turn.content, agent_execution_id, decision_seq, plan_type)
}

/// Convenience builder for the system + context + history messages the
/// driver sends every iteration. The caller supplies the assembled
/// context string (from `aa_context::ContextHub::build_context`) and the
/// turn's conversation history.
pub fn build_request(
    system_prompt: impl Into<String>,
    context: impl Into<String>,
    history: Vec<Message>,
    model: Option<String>,
) -> ChatRequest {
    let mut messages = vec![Message::system(system_prompt), Message::user(context)];
    messages.extend(history);
    ChatRequest {
        messages,
        tools: vec![],
        temperature: None,
        max_tokens: None,
        json_mode: true,
        model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_domain::capability::ModelCapabilities;
    use aa_domain::stream::BoxStream;
    use async_trait::async_trait;

    struct FakeLlm {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmStream for FakeLlm {
        async fn chat(&self, _req: &ChatRequest) -> Result<crate::traits::ChatResponse> {
            unimplemented!("driver tests only exercise chat_stream")
        }

        async fn chat_stream(
            &self,
            _req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let events: Vec<Result<StreamEvent>> = self
                .chunks
                .iter()
                .map(|c| Ok(StreamEvent::Token { text: c.to_string() }))
                .chain(std::iter::once(Ok(StreamEvent::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                })))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        fn capabilities(&self) -> &ModelCapabilities {
            static CAPS: std::sync::OnceLock<ModelCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(ModelCapabilities::default)
        }

        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn drive_decision_parses_accumulated_tokens() {
        let llm = FakeLlm {
            chunks: vec![
                r#"{"reasoning":"need"#,
                r#" data","message":"fetching","action":{"name":"query_data","arguments":{}},"analysis_complete":false}"#,
            ],
        };
        let request = build_request("system", "context", vec![], None);
        let decision = drive_decision(&llm, &request, AgentExecutionId::new(), 0, PlanType::Action, || false)
            .await
            .unwrap();
        assert_eq!(decision.action.unwrap().name, "query_data");
    }

    #[tokio::test]
    async fn cancellation_stops_accumulation_early() {
        let llm = FakeLlm {
            chunks: vec!["a", "b", "c"],
        };
        let request = build_request("system", "context", vec![], None);
        let mut calls = 0;
        let err = accumulate_stream(&llm, &request, || {
            calls += 1;
            calls > 1
        })
        .await
        .unwrap_err();
        assert!(matches!(err, aa_domain::Error::Cancelled));
    }
}
