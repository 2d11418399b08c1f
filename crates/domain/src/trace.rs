use serde::Serialize;

/// Structured trace events emitted alongside `tracing` spans. These are
/// for offline analysis (grep-able JSON lines in the log stream); they
/// are not part of the SSE contract in §6.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ContextPrimed {
        agent_execution_id: String,
        sections_built: usize,
        sections_failed: usize,
        build_ms: u64,
    },
    ContextWarmRefreshed {
        agent_execution_id: String,
        loop_index: u32,
        sections_built: usize,
        sections_failed: usize,
    },
    PlannerCall {
        agent_execution_id: String,
        loop_index: u32,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolInvoked {
        agent_execution_id: String,
        tool_name: String,
        attempt_number: u32,
        status: String,
        duration_ms: u64,
    },
    CircuitBreakerTripped {
        agent_execution_id: String,
        breaker: String,
        loop_index: u32,
    },
    BackgroundTaskFailed {
        task: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "orchestrator_trace");
    }
}
