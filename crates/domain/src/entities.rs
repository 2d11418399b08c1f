//! Persisted entity shapes (§3). These are plain data types; the
//! orchestrator crate owns the rules for creating, mutating, and
//! terminating them. None of these types touch storage directly —
//! that's the `Storage` collaborator's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{
    AgentExecutionId, CompletionBlockId, CompletionId, ContextSnapshotId, PlanDecisionId,
    ReportId, ToolExecutionId,
};

/// The conversational container for a sequence of turns. Owned and
/// created externally; the orchestrator only reads its id and reads/writes
/// its completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub data_source_ids: Vec<String>,
    pub file_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionRole {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    InProgress,
    Success,
    Error,
    Stopped,
}

/// One message in a report. A user turn always creates a pair: a `user`
/// completion (the head) and a `system` completion (its child via
/// `parent_id`), see [`Completion::new_turn_pair`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: CompletionId,
    pub report_id: ReportId,
    pub parent_id: Option<CompletionId>,
    pub role: CompletionRole,
    pub turn_index: u32,
    pub status: CompletionStatus,
    /// Opaque payload for a `user` completion: `{content, model_id?, widget_id?, step_id?, mode?, mentions}`.
    pub prompt: Option<Value>,
    /// Opaque payload for a `system` completion, rebuilt from its blocks.
    pub completion: Option<Value>,
    pub feedback_score: Option<f32>,
    pub judge_scores: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Completion {
    /// Create the `(user, system)` pair that every turn starts with.
    /// The system completion's `parent_id` points back at the user head.
    pub fn new_turn_pair(
        report_id: ReportId,
        turn_index: u32,
        prompt: Value,
    ) -> (Completion, Completion) {
        let now = Utc::now();
        let head_id = CompletionId::new();
        let head = Completion {
            id: head_id,
            report_id,
            parent_id: None,
            role: CompletionRole::User,
            turn_index,
            status: CompletionStatus::Success,
            prompt: Some(prompt),
            completion: None,
            feedback_score: None,
            judge_scores: None,
            created_at: now,
            updated_at: now,
        };
        let system = Completion {
            id: CompletionId::new(),
            report_id,
            parent_id: Some(head_id),
            role: CompletionRole::System,
            turn_index,
            status: CompletionStatus::InProgress,
            prompt: None,
            completion: None,
            feedback_score: None,
            judge_scores: None,
            created_at: now,
            updated_at: now,
        };
        (head, system)
    }

    /// Terminal per I3: `in_progress` is never a resting state once the
    /// turn has actually finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, CompletionStatus::InProgress)
    }
}

/// One run of the Agent Loop, 1:1 with a system completion. Owns the
/// monotonic sequence counter used to order every event emitted for
/// this run (see [`crate::ids::AgentExecutionId`] and I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: AgentExecutionId,
    pub completion_id: CompletionId,
    pub report_id: ReportId,
    pub status: AgentExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentExecutionStatus {
    Running,
    Success,
    Error,
    Sigkill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    InProgress,
    Success,
    Error,
    Stopped,
}

/// What a [`CompletionBlock`] is linked to. A block is either a decision
/// block or a tool block, never both (see I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BlockLink {
    Decision(PlanDecisionId),
    Tool(ToolExecutionId),
}

/// The unit of streamed output. Ordered by `(seq, block_index)`; see I1
/// and I4 for the uniqueness and pinning guarantees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionBlock {
    pub id: CompletionBlockId,
    pub completion_id: CompletionId,
    pub block_index: u32,
    pub seq: u64,
    pub link: BlockLink,
    pub content: String,
    pub reasoning: String,
    pub status: BlockStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Action,
    Research,
}

/// A validated planner action choice: which tool, with which arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub name: String,
    pub arguments: Value,
}

/// A structured error surfaced by a plan decision (§4.6, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanError {
    pub code: String,
    pub message: String,
}

/// Validated planner output for one loop iteration. Upserted on every
/// partial by `(agent_execution_id, seq=decision_seq)` — see I4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDecision {
    pub id: PlanDecisionId,
    pub agent_execution_id: AgentExecutionId,
    pub decision_seq: u64,
    pub plan_type: PlanType,
    pub reasoning_message: String,
    pub assistant_message: String,
    pub action: Option<PlanAction>,
    pub analysis_complete: bool,
    pub final_answer: Option<String>,
    pub error: Option<PlanError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    Success,
    Error,
}

/// Artifact ids a tool execution may have produced (widgets, steps,
/// visualizations) — see §4.11.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatedArtifacts {
    pub widget_id: Option<String>,
    pub step_id: Option<String>,
    pub visualization_ids: Vec<String>,
}

/// One invocation of a tool; child of the [`PlanDecision`] that chose it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: ToolExecutionId,
    pub plan_decision_id: PlanDecisionId,
    pub tool_name: String,
    pub tool_action: Option<String>,
    pub arguments_json: Value,
    pub status: ToolExecutionStatus,
    pub result_json: Option<Value>,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub attempt_number: u32,
    pub created_artifacts: CreatedArtifacts,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One column of a [`DataModel`], as a `create_data`-family tool streams
/// it in via `column_added` (§4.11).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelColumn {
    pub generated_column_name: String,
    pub source_column_name: Option<String>,
    pub data_type: Option<String>,
}

/// The shape a Step's query result is rendered into. Builds up
/// incrementally across a tool's `column_added`/`series_configured`
/// progress events rather than arriving all at once (§4.11).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataModel {
    pub model_type: Option<String>,
    pub columns: Vec<DataModelColumn>,
    pub series: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Success,
    Error,
}

/// The query a `create_data`-family tool issued on behalf of a Step.
/// Created once, at `data_model_type_determined` (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub tool_execution_id: ToolExecutionId,
    pub sql: Option<String>,
}

/// One data-producing step of a tool execution: the thing a
/// Visualization is rendered from. A Step starts `InProgress` as soon as
/// its Query exists and is finalized (`Success`/`Error`) once the tool
/// either validates it or returns (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub query_id: String,
    pub status: StepStatus,
    pub data_model: DataModel,
    pub code: Option<String>,
    pub error_message: Option<String>,
}

/// A draft (then finalized) chart/table view over a Step's data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visualization {
    pub id: String,
    pub step_id: String,
    pub view: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSnapshotKind {
    Initial,
    PreTool,
    PostTool,
    Final,
}

/// An immutable serialization of the Context Hub's view at a checkpoint.
/// Persisted in slim, usage-only form by default (§4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub id: ContextSnapshotId,
    pub agent_execution_id: AgentExecutionId,
    pub kind: ContextSnapshotKind,
    pub loop_index: u32,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTypeFilter {
    Action,
    Research,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPolicy {
    OnTrigger,
    Never,
}

/// Registry entry describing one tool's contract to the planner and the
/// runner. Concrete execution lives behind [`crate::tool::ToolDefinition`]-shaped
/// argument schemas; this type is the orchestrator-facing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub plan_types: Vec<PlanTypeFilter>,
    pub argument_schema: Value,
    pub observation_policy: ObservationPolicy,
    pub capability_flags: Vec<String>,
}

impl ToolDescriptor {
    pub fn applies_to(&self, plan_type: PlanType) -> bool {
        self.plan_types.iter().any(|p| match (p, plan_type) {
            (PlanTypeFilter::Both, _) => true,
            (PlanTypeFilter::Action, PlanType::Action) => true,
            (PlanTypeFilter::Research, PlanType::Research) => true,
            _ => false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    Always,
    Intelligent,
    Disabled,
}
