//! In-memory collaborators wired up by the demo binary. None of these are
//! meant to survive a process restart — they exist so `aa-orchestrator-demo`
//! can run a full turn end to end without a real database or model
//! provider, the way a teaching example proves the wiring is sound before
//! someone swaps in Postgres and a real LLM client.

use std::collections::HashMap;
use std::sync::Arc;

use aa_domain::capability::ModelCapabilities;
use aa_domain::collaborators::*;
use aa_domain::entities::*;
use aa_domain::ids::{CompletionId, ReportId};
use aa_domain::stream::{BoxStream, StreamEvent};
use aa_domain::Result;
use aa_planner::{ChatRequest, ChatResponse, LlmStream};
use aa_tools::{Emit, RuntimeCtx, ToolExecutor, ToolOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Default)]
pub struct InMemoryStorage {
    blocks: Mutex<Vec<CompletionBlock>>,
    decisions: Mutex<Vec<PlanDecision>>,
    executions: Mutex<Vec<ToolExecution>>,
    statuses: Mutex<HashMap<CompletionId, CompletionStatus>>,
    snapshots: Mutex<Vec<ContextSnapshot>>,
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn fetch_schema_tables(&self, _report_id: ReportId, _ids: &[String], _user_id: Option<&str>) -> Result<Vec<RawTable>> {
        Ok(vec![RawTable {
            data_source_id: "demo".into(),
            data_source_name: "demo warehouse".into(),
            table_name: "orders".into(),
            columns: vec![
                ("id".into(), "bigint".into()),
                ("customer_id".into(), "bigint".into()),
                ("total_cents".into(), "bigint".into()),
                ("created_at".into(), "timestamptz".into()),
            ],
            primary_keys: vec!["id".into()],
            foreign_keys: vec!["customer_id".into()],
            usage_count: 42,
            recency_days: 1.0,
            success_rate: 0.95,
            feedback_score: 0.8,
            structural_signal: 1.0,
            failure_penalty: 0.0,
        }])
    }

    async fn fetch_instructions(&self, _report_id: ReportId, _user_id: Option<&str>) -> Result<Vec<RawInstruction>> {
        Ok(vec![])
    }

    async fn fetch_prior_completions(&self, _report_id: ReportId, _before: CompletionId, _limit: usize) -> Result<Vec<RawCompletionRecord>> {
        Ok(vec![])
    }

    async fn fetch_resources(&self, _report_id: ReportId) -> Result<Vec<RawResource>> {
        Ok(vec![])
    }

    async fn fetch_mentions(&self, _completion_id: CompletionId) -> Result<Vec<RawMention>> {
        Ok(vec![])
    }

    async fn fetch_entities(&self, _report_id: ReportId) -> Result<Vec<RawEntity>> {
        Ok(vec![])
    }

    async fn fetch_files(&self, _report_id: ReportId) -> Result<Vec<RawFile>> {
        Ok(vec![])
    }

    async fn fetch_widgets(&self, _report_id: ReportId) -> Result<Vec<RawWidget>> {
        Ok(vec![])
    }

    async fn fetch_queries(&self, _report_id: ReportId) -> Result<Vec<RawQuery>> {
        Ok(vec![])
    }

    async fn fetch_code(&self, _report_id: ReportId) -> Result<Vec<RawCode>> {
        Ok(vec![])
    }

    async fn count_prior_turns(&self, _report_id: ReportId) -> Result<u32> {
        Ok(self.decisions.lock().len() as u32)
    }

    async fn upsert_plan_decision(&self, decision: &PlanDecision) -> Result<()> {
        self.decisions.lock().push(decision.clone());
        Ok(())
    }

    async fn upsert_completion_block(&self, block: &CompletionBlock) -> Result<()> {
        let mut blocks = self.blocks.lock();
        blocks.retain(|b| b.id != block.id);
        blocks.push(block.clone());
        Ok(())
    }

    async fn upsert_tool_execution(&self, execution: &ToolExecution) -> Result<()> {
        self.executions.lock().push(execution.clone());
        Ok(())
    }

    async fn rebuild_transcript(&self, completion_id: CompletionId) -> Result<String> {
        let blocks = self.blocks.lock();
        let mut ordered: Vec<&CompletionBlock> = blocks.iter().filter(|b| b.completion_id == completion_id).collect();
        ordered.sort_by_key(|b| b.block_index);
        Ok(ordered.iter().map(|b| b.content.as_str()).collect::<Vec<_>>().join("\n"))
    }

    async fn set_completion_status(&self, completion_id: CompletionId, status: CompletionStatus) -> Result<()> {
        self.statuses.lock().insert(completion_id, status);
        Ok(())
    }

    async fn save_context_snapshot(&self, snapshot: &ContextSnapshot) -> Result<()> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}

/// Never asks the loop to stop — a demo run always ends by reaching
/// `analysis_complete` or the step budget.
pub struct NeverStopWatcher;

#[async_trait]
impl Watcher for NeverStopWatcher {
    async fn stop_requested(&self, _completion_id: CompletionId) -> bool {
        false
    }
}

/// Plays a one-tool-call-then-answer script: the first decision always
/// reaches for `lookup_metric`, the second always finishes. Good enough to
/// exercise the whole loop without talking to a real model. Tracks its own
/// call count rather than inspecting the context string, since the loop
/// rebuilds the request from scratch every iteration.
pub struct ScriptedLlm {
    capabilities: ModelCapabilities,
    calls: std::sync::atomic::AtomicUsize,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self { capabilities: ModelCapabilities::default(), calls: std::sync::atomic::AtomicUsize::new(0) }
    }
}

#[async_trait]
impl LlmStream for ScriptedLlm {
    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
        let content = self.next_decision();
        Ok(ChatResponse { content, usage: None, model: "demo-scripted".into(), finish_reason: Some("stop".into()) })
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let content = self.next_decision();
        let events: Vec<Result<StreamEvent>> = vec![
            Ok(StreamEvent::Token { text: content }),
            Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) }),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "demo-scripted"
    }
}

impl ScriptedLlm {
    fn next_decision(&self) -> String {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call == 0 {
            r#"{"reasoning":"need current numbers before answering","message":"Checking the orders table first.","action":{"name":"lookup_metric","arguments":{"table":"orders","metric":"revenue"}},"analysis_complete":false}"#.into()
        } else {
            r#"{"reasoning":"the orders table answered the question","message":"Found it.","analysis_complete":true,"final_answer":"Revenue is trending up 12% month over month based on the orders table."}"#.into()
        }
    }
}

/// Resolves `lookup_metric` against the same canned figure every time.
pub struct DemoToolExecutor;

#[async_trait]
impl ToolExecutor for DemoToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        _tool_action: Option<&str>,
        arguments: Value,
        _runtime_ctx: &RuntimeCtx,
        _emit: Emit<'_>,
    ) -> Result<ToolOutcome> {
        match tool_name {
            "lookup_metric" => Ok(ToolOutcome {
                result_json: serde_json::json!({ "revenue_cents": 48_200_00, "month_over_month_pct": 12.0 }),
                result_summary: "revenue up 12% month over month".into(),
                created_artifacts: CreatedArtifacts::default(),
            }),
            other => Err(aa_domain::Error::ToolResolve(format!("demo executor has no handler for '{other}'"))),
        }
    }
}

pub fn demo_tool_registry() -> aa_tools::ToolRegistry {
    let mut registry = aa_tools::ToolRegistry::new();
    registry.register(ToolDescriptor {
        name: "lookup_metric".into(),
        plan_types: vec![PlanTypeFilter::Both],
        argument_schema: serde_json::json!({
            "type": "object",
            "properties": { "table": { "type": "string" }, "metric": { "type": "string" } },
            "required": ["table", "metric"],
        }),
        observation_policy: ObservationPolicy::OnTrigger,
        capability_flags: vec![],
    });
    registry
}

pub fn build_demo_collaborators() -> (Arc<dyn Storage>, Arc<dyn Watcher>, Arc<dyn LlmStream>, Arc<dyn ToolExecutor>) {
    (
        Arc::new(InMemoryStorage::default()),
        Arc::new(NeverStopWatcher),
        Arc::new(ScriptedLlm::default()),
        Arc::new(DemoToolExecutor),
    )
}
