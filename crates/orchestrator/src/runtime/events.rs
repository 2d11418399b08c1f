//! Event Stream (C8): the strictly-increasing `seq` allocator shared by
//! every block and SSE event in one agent execution (I2), the bounded
//! queue the loop publishes into, and the throttled delta streamer used
//! while a decision block is still filling in (§4.8).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aa_domain::ids::{AgentExecutionId, CompletionId};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Allocates the `seq` every block and SSE event for one agent execution
/// carries (§4.8, I2: strictly increasing, never reused).
#[derive(Clone)]
pub struct SeqCounter(Arc<AtomicU64>);

impl SeqCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    pub fn next_seq(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for SeqCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// One SSE-shaped frame (§6). `event_name` matches the catalog there —
/// `completion.started`, `block.upsert`, `decision.partial`, and so on.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_name: &'static str,
    pub completion_id: CompletionId,
    pub agent_execution_id: AgentExecutionId,
    pub seq: u64,
    pub data: Value,
}

pub type EventSink = mpsc::Sender<Event>;
pub type EventSource = mpsc::Receiver<Event>;

/// Bounded so a slow transport applies back-pressure to the loop instead
/// of letting an unbounded backlog build up behind it (§5).
pub fn event_channel(capacity: usize) -> (EventSink, EventSource) {
    mpsc::channel(capacity)
}

const DELTA_CHARS_THRESHOLD: usize = 24;
const DELTA_TIME_THRESHOLD: Duration = Duration::from_millis(150);

/// Tracks what has already been sent for one decision block's reasoning
/// and assistant text, so `update()` only emits once growth clears a
/// small threshold rather than on every token (§4.8).
pub struct ThrottledTextStreamer {
    completion_id: CompletionId,
    agent_execution_id: AgentExecutionId,
    seq: SeqCounter,
    last_emitted_reasoning: String,
    last_emitted_content: String,
    last_emit_at: Instant,
}

impl ThrottledTextStreamer {
    pub fn new(completion_id: CompletionId, agent_execution_id: AgentExecutionId, seq: SeqCounter) -> Self {
        Self {
            completion_id,
            agent_execution_id,
            seq,
            last_emitted_reasoning: String::new(),
            last_emitted_content: String::new(),
            last_emit_at: Instant::now(),
        }
    }

    /// Retargets the streamer when the pre-created block had to be
    /// replaced mid-decision (§4.8). The seq counter is unaffected — only
    /// bookkeeping resets, so the next `update()` isn't starved by a
    /// delta computed against the old block's text.
    pub fn set_block(&mut self) {
        self.last_emitted_reasoning.clear();
        self.last_emitted_content.clear();
        self.last_emit_at = Instant::now();
    }

    fn due(&self, reasoning_delta: usize, content_delta: usize) -> bool {
        reasoning_delta >= DELTA_CHARS_THRESHOLD
            || content_delta >= DELTA_CHARS_THRESHOLD
            || self.last_emit_at.elapsed() >= DELTA_TIME_THRESHOLD
    }

    /// Emits `decision.partial` with the full current text if growth
    /// clears the threshold, otherwise does nothing. Silent on an empty
    /// decision (§4.7 step 5: only emit when there's something to show).
    pub async fn update(&mut self, reasoning: &str, content: &str, sink: &EventSink) {
        if reasoning.is_empty() && content.is_empty() {
            return;
        }
        let reasoning_delta = reasoning.len().saturating_sub(self.last_emitted_reasoning.len());
        let content_delta = content.len().saturating_sub(self.last_emitted_content.len());
        if reasoning_delta == 0 && content_delta == 0 {
            return;
        }
        if !self.due(reasoning_delta, content_delta) {
            return;
        }
        self.emit(reasoning, content, sink).await;
    }

    /// Flushes any remaining unsent tail unconditionally — called once the
    /// decision is final, so the last chunk is never dropped by the
    /// throttle.
    pub async fn complete(&mut self, reasoning: &str, content: &str, sink: &EventSink) {
        if reasoning == self.last_emitted_reasoning && content == self.last_emitted_content {
            return;
        }
        self.emit(reasoning, content, sink).await;
    }

    async fn emit(&mut self, reasoning: &str, content: &str, sink: &EventSink) {
        let seq = self.seq.next_seq();
        let _ = sink
            .send(Event {
                event_name: "decision.partial",
                completion_id: self.completion_id,
                agent_execution_id: self.agent_execution_id,
                seq,
                data: serde_json::json!({ "reasoning": reasoning, "assistant": content }),
            })
            .await;
        self.last_emitted_reasoning = reasoning.to_string();
        self.last_emitted_content = content.to_string();
        self.last_emit_at = Instant::now();
    }
}
