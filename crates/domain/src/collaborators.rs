//! Outbound collaborator contracts (§6, §9). These are the seams where
//! ambient globals (a websocket manager, a session factory) are replaced
//! by an explicit runtime context: storage, the stop-request watcher, and
//! (in `aa-planner`/`aa-tools`) the LLM stream and tool contracts.

use async_trait::async_trait;

use crate::entities::{CompletionBlock, CompletionStatus, ContextSnapshot, PlanDecision, ToolExecution};
use crate::error::Result;
use crate::ids::{CompletionId, ReportId};

/// Raw rows the Storage collaborator returns; Section Builders (C3) turn
/// these into typed [`crate`]-independent section values. Kept flat and
/// collaborator-agnostic so any backing store can implement `Storage`.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub data_source_id: String,
    pub data_source_name: String,
    pub table_name: String,
    pub columns: Vec<(String, String)>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<String>,
    pub usage_count: u64,
    pub recency_days: f64,
    pub success_rate: f64,
    pub feedback_score: f64,
    pub structural_signal: f64,
    pub failure_penalty: f64,
}

#[derive(Debug, Clone)]
pub struct RawInstruction {
    pub id: String,
    pub text: String,
    pub category: String,
    pub disabled: bool,
    pub always_load: bool,
}

#[derive(Debug, Clone)]
pub struct RawCompletionRecord {
    pub completion_id: CompletionId,
    pub role_is_user: bool,
    pub text: String,
    pub mentions: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct RawResource {
    pub name: String,
    pub kind: String,
    pub usage_count: u64,
}

#[derive(Debug, Clone)]
pub struct RawMention {
    pub kind: String,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct RawEntity {
    pub entity_type: String,
    pub id: String,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct RawFile {
    pub filename: String,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct RawWidget {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct RawQuery {
    pub id: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct RawCode {
    pub path: String,
    pub language: String,
    pub content: String,
}

/// Batched fetches for Section Builders, plus the upserts and COUNT
/// queries Block Persistence (C9) needs. Every method is independently
/// best-effort from the caller's point of view: a builder that gets an
/// `Err` substitutes an empty section rather than propagating it (§4.3).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn fetch_schema_tables(
        &self,
        report_id: ReportId,
        data_source_ids: &[String],
        user_id: Option<&str>,
    ) -> Result<Vec<RawTable>>;

    async fn fetch_instructions(
        &self,
        report_id: ReportId,
        build_id: Option<&str>,
    ) -> Result<Vec<RawInstruction>>;

    async fn fetch_prior_completions(
        &self,
        report_id: ReportId,
        exclude_completion_id: CompletionId,
        limit: usize,
    ) -> Result<Vec<RawCompletionRecord>>;

    async fn fetch_resources(&self, report_id: ReportId) -> Result<Vec<RawResource>>;
    async fn fetch_mentions(&self, completion_id: CompletionId) -> Result<Vec<RawMention>>;
    async fn fetch_entities(&self, report_id: ReportId) -> Result<Vec<RawEntity>>;
    async fn fetch_files(&self, report_id: ReportId) -> Result<Vec<RawFile>>;
    async fn fetch_widgets(&self, report_id: ReportId) -> Result<Vec<RawWidget>>;
    async fn fetch_queries(&self, report_id: ReportId) -> Result<Vec<RawQuery>>;
    async fn fetch_code(&self, report_id: ReportId) -> Result<Vec<RawCode>>;

    /// Number of prior user turns in this report, used to decide whether
    /// to schedule title generation (§4.7 terminal handling).
    async fn count_prior_turns(&self, report_id: ReportId) -> Result<u32>;

    async fn upsert_plan_decision(&self, decision: &PlanDecision) -> Result<()>;
    async fn upsert_completion_block(&self, block: &CompletionBlock) -> Result<()>;
    async fn upsert_tool_execution(&self, execution: &ToolExecution) -> Result<()>;

    /// Rewrite the completion's textual content from its ordered blocks
    /// (§4.9). Idempotent: calling it twice yields identical content (P7).
    async fn rebuild_transcript(&self, completion_id: CompletionId) -> Result<String>;

    async fn set_completion_status(
        &self,
        completion_id: CompletionId,
        status: CompletionStatus,
    ) -> Result<()>;

    async fn save_context_snapshot(&self, snapshot: &ContextSnapshot) -> Result<()>;
}

/// Pub/sub delivering external messages for a completion id, including
/// stop requests (§6). The loop polls this at every suspension point.
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn stop_requested(&self, completion_id: CompletionId) -> bool;
}
