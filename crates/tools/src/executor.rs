//! The tool invocation contract (§6). Concrete tool implementations
//! (data queries, widget creation, search) live outside this crate —
//! it only defines the seam the Runner calls through and the shape of a
//! successful result.

use aa_domain::entities::CreatedArtifacts;
use aa_domain::ids::{PlanDecisionId, ToolExecutionId};
use aa_domain::Result;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result_json: Value,
    pub result_summary: String,
    pub created_artifacts: CreatedArtifacts,
}

/// The `type` of a `{type, payload}` progress notification a tool hands
/// to `emit` mid-execution (§4.5). `Progress` is the only variant whose
/// `payload.stage` the orchestrator's streaming side-effect handler
/// pattern-matches on (§4.11); the rest are passed through to the event
/// stream unexamined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolProgressType {
    Progress,
    Partial,
    Stdout,
    Error,
}

/// One progress notification reported through `emit` while a tool is
/// running. Distinct from [`crate::events::ToolEvent`], which also
/// carries the Runner's own retry/lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub event_type: ToolProgressType,
    pub payload: Value,
}

/// What the Runner hands a tool alongside its arguments: identity of the
/// call in progress and a way to observe whether the turn has been
/// cancelled out from under it. Concrete deployments that need more
/// (a context view, collaborator handles) are expected to close over
/// them in their own `ToolExecutor` impl rather than grow this struct,
/// since no such tool ships in this repo (§1, §4.11).
pub struct RuntimeCtx {
    pub execution_id: ToolExecutionId,
    pub plan_decision_id: PlanDecisionId,
    pub tool_name: String,
    cancelled: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl RuntimeCtx {
    pub fn new(
        execution_id: ToolExecutionId,
        plan_decision_id: PlanDecisionId,
        tool_name: impl Into<String>,
        cancelled: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        Self {
            execution_id,
            plan_decision_id,
            tool_name: tool_name.into(),
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        (self.cancelled)()
    }
}

/// A tool's handle for reporting progress mid-call. The Runner throttles
/// what actually reaches the event stream; a tool should still call this
/// at every meaningful step rather than try to throttle itself.
pub type Emit<'a> = &'a (dyn Fn(ToolProgress) + Send + Sync);

/// Implemented once per deployment (or once per test) to back whatever
/// tools the registry advertises. A `Err` return is retried by the
/// Runner according to [`aa_domain::Error::ToolExecution::transient`];
/// anything else the executor returns is treated as permanent. A tool
/// must call `emit` at its meaningful progress points and respect
/// `runtime_ctx.is_cancelled()` (§4.5).
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        tool_action: Option<&str>,
        arguments: Value,
        runtime_ctx: &RuntimeCtx,
        emit: Emit<'_>,
    ) -> Result<ToolOutcome>;
}
