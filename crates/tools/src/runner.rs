//! Tool Runner (C5): executes one tool call against a
//! [`ToolExecutor`], applying the configured retry and timeout policy
//! and reporting progress over a typed [`ToolEvent`] channel (§4.5).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aa_domain::config::{RetryPolicy, TimeoutPolicy};
use aa_domain::entities::{CreatedArtifacts, ToolExecution, ToolExecutionStatus};
use aa_domain::ids::{PlanDecisionId, ToolExecutionId};
use aa_domain::Error;
use chrono::Utc;
use rand::Rng;
use serde_json::Value;

use crate::events::{ToolEvent, ToolEventSender};
use crate::executor::{RuntimeCtx, ToolExecutor, ToolProgress, ToolProgressType};

/// How often the watchdog wakes to check elapsed time against the
/// start/idle timeout tiers. Cheap relative to either tier's default
/// (5s / 30s), so it doesn't itself skew the measured timeout.
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

/// Progress notifications within this window of one another collapse
/// into a single forwarded `ToolEvent::Progress`, the same coalescing
/// the Throttled Text Streamer (C8) applies to planner tokens.
const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);

pub struct ToolRunner {
    executor: Arc<dyn ToolExecutor>,
    retry: RetryPolicy,
    timeout: TimeoutPolicy,
}

/// Why an attempt was abandoned before the executor returned on its own.
enum WatchdogTimeout {
    Start,
    Idle,
}

impl ToolRunner {
    pub fn new(executor: Arc<dyn ToolExecutor>, retry: RetryPolicy, timeout: TimeoutPolicy) -> Self {
        Self {
            executor,
            retry,
            timeout,
        }
    }

    fn backoff_for(&self, attempt_number: u32) -> Duration {
        let base = self.retry.backoff_ms as f64
            * self.retry.backoff_multiplier.powi(attempt_number.saturating_sub(1) as i32);
        let jitter = if self.retry.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.retry.jitter_ms)
        };
        Duration::from_millis(base as u64 + jitter)
    }

    /// Races the executor's own future against a tick-based watchdog
    /// that enforces `start_timeout_s` (no progress event yet) and
    /// `idle_timeout_s` (no progress event recently), in addition to the
    /// `tokio::time::timeout`-enforced `hard_timeout_s` wrapping both.
    async fn watch_for_timeout(&self, last_progress: &Mutex<Option<Instant>>) -> WatchdogTimeout {
        let attempt_start = Instant::now();
        let start_timeout = Duration::from_secs(self.timeout.start_timeout_s);
        let idle_timeout = Duration::from_secs(self.timeout.idle_timeout_s);
        loop {
            tokio::time::sleep(WATCHDOG_TICK).await;
            let progress_at = *last_progress.lock().unwrap();
            match progress_at {
                None if attempt_start.elapsed() >= start_timeout => return WatchdogTimeout::Start,
                Some(at) if at.elapsed() >= idle_timeout => return WatchdogTimeout::Idle,
                _ => {}
            }
        }
    }

    /// Runs `tool_name` to completion (success or exhausted retries),
    /// emitting a `Started`/`RetryScheduled`*/`Progress`*/`Finished`|`Failed`
    /// sequence on `events` and returning the persisted-shape
    /// [`ToolExecution`] record either way (§4.5, §4.11).
    pub async fn run(
        &self,
        plan_decision_id: PlanDecisionId,
        tool_name: &str,
        tool_action: Option<&str>,
        arguments: Value,
        events: &ToolEventSender,
        cancelled: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> ToolExecution {
        let execution_id = ToolExecutionId::new();
        let started_at = Utc::now();
        let _ = events.send(ToolEvent::Started {
            execution_id,
            plan_decision_id,
            tool_name: tool_name.to_string(),
        });

        let hard_timeout = Duration::from_secs(self.timeout.hard_timeout_s);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let runtime_ctx = RuntimeCtx::new(execution_id, plan_decision_id, tool_name, cancelled.clone());

            let last_progress: Mutex<Option<Instant>> = Mutex::new(None);
            let last_emitted: Mutex<Option<Instant>> = Mutex::new(None);
            let emit = |progress: ToolProgress| {
                let now = Instant::now();
                *last_progress.lock().unwrap() = Some(now);
                let mut last_emitted = last_emitted.lock().unwrap();
                let should_emit = last_emitted.map_or(true, |at| now.duration_since(at) >= PROGRESS_THROTTLE);
                if should_emit {
                    *last_emitted = Some(now);
                    let _ = events.send(ToolEvent::Progress {
                        execution_id,
                        event_type: progress.event_type,
                        payload: progress.payload,
                    });
                }
            };

            let call = self.executor.execute(tool_name, tool_action, arguments.clone(), &runtime_ctx, &emit);
            let outcome = tokio::select! {
                res = tokio::time::timeout(hard_timeout, call) => Ok(res),
                timeout = self.watch_for_timeout(&last_progress) => Err(timeout),
            };

            let give_up_with = match outcome {
                Ok(Ok(Ok(outcome))) => {
                    let _ = events.send(ToolEvent::Finished {
                        execution_id,
                        result_summary: outcome.result_summary.clone(),
                        result_json: outcome.result_json.clone(),
                    });
                    return ToolExecution {
                        id: execution_id,
                        plan_decision_id,
                        tool_name: tool_name.to_string(),
                        tool_action: tool_action.map(str::to_string),
                        arguments_json: arguments,
                        status: ToolExecutionStatus::Success,
                        result_json: Some(outcome.result_json),
                        result_summary: Some(outcome.result_summary),
                        error_message: None,
                        duration_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
                        attempt_number: attempt,
                        created_artifacts: outcome.created_artifacts,
                        started_at,
                        finished_at: Some(Utc::now()),
                    };
                }
                Ok(Ok(Err(err))) => {
                    let transient = matches!(err, Error::ToolExecution { transient: true, .. });
                    (transient, err.to_string())
                }
                Ok(Err(_elapsed)) => (true, format!("tool '{tool_name}' exceeded its hard timeout")),
                Err(WatchdogTimeout::Start) => (
                    true,
                    format!(
                        "tool '{tool_name}' reported no progress within its start timeout ({}s)",
                        self.timeout.start_timeout_s
                    ),
                ),
                Err(WatchdogTimeout::Idle) => (
                    true,
                    format!(
                        "tool '{tool_name}' went idle for longer than its idle timeout ({}s)",
                        self.timeout.idle_timeout_s
                    ),
                ),
            };

            let (transient, message) = give_up_with;
            if transient && attempt < self.retry.max_attempts {
                let delay = self.backoff_for(attempt);
                let _ = events.send(ToolEvent::RetryScheduled {
                    execution_id,
                    attempt_number: attempt + 1,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::time::sleep(delay).await;
                continue;
            }

            let _ = events.send(ToolEvent::Failed {
                execution_id,
                transient,
                message: message.clone(),
            });
            return ToolExecution {
                id: execution_id,
                plan_decision_id,
                tool_name: tool_name.to_string(),
                tool_action: tool_action.map(str::to_string),
                arguments_json: arguments,
                status: ToolExecutionStatus::Error,
                result_json: None,
                result_summary: None,
                error_message: Some(message),
                duration_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
                attempt_number: attempt,
                created_artifacts: CreatedArtifacts::default(),
                started_at,
                finished_at: Some(Utc::now()),
            };
        }
    }
}
