//! Typed tool execution events (§9: replaces a callback-style `emit_fn`
//! with an explicit channel so the Runner's output can be consumed by
//! more than one listener — the Event Stream (C8) and test assertions
//! alike — without threading a closure through every call site).

use aa_domain::ids::{PlanDecisionId, ToolExecutionId};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::executor::ToolProgressType;

#[derive(Debug, Clone)]
pub enum ToolEvent {
    Started {
        execution_id: ToolExecutionId,
        plan_decision_id: PlanDecisionId,
        tool_name: String,
    },
    RetryScheduled {
        execution_id: ToolExecutionId,
        attempt_number: u32,
        delay_ms: u64,
    },
    /// A tool-reported `{type, payload}` notification forwarded (after
    /// throttling) from its `emit` call. Carries the tool's own content,
    /// as opposed to the Runner's retry/lifecycle bookkeeping above —
    /// this is what §4.11's stage-dispatch handler reads `payload.stage`
    /// from.
    Progress {
        execution_id: ToolExecutionId,
        event_type: ToolProgressType,
        payload: Value,
    },
    Finished {
        execution_id: ToolExecutionId,
        result_summary: String,
        result_json: Value,
    },
    Failed {
        execution_id: ToolExecutionId,
        transient: bool,
        message: String,
    },
}

pub type ToolEventSender = mpsc::UnboundedSender<ToolEvent>;
pub type ToolEventReceiver = mpsc::UnboundedReceiver<ToolEvent>;

pub fn tool_event_channel() -> (ToolEventSender, ToolEventReceiver) {
    mpsc::unbounded_channel()
}
