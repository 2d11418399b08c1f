//! The Agent Loop (C7): drives one turn from its first planner call to a
//! single terminal `completion.finished`, coordinating the Context Hub,
//! Planner Driver, and Tool Runner under a step budget and three circuit
//! breakers (§4.7).

use std::sync::Arc;

use aa_context::builders::SchemaFilter;
use aa_context::hub::{ContextHub, TurnInputs};
use aa_domain::entities::{
    AgentExecutionStatus, BlockStatus, CompletionStatus, ObservationPolicy, PlanType,
};
use aa_domain::ids::{AgentExecutionId, CompletionId, PlanDecisionId, ReportId};
use aa_domain::Result;
use aa_planner::{accumulate_stream, build_request, parse_decision, synthesize_invalid_terminal};
use aa_tools::tool_event_channel;
use serde_json::Value;

use crate::state::Engine;

use super::artifacts::{dispatch_stage, ArtifactState};
use super::blocks::{DecisionBlockHandle, ToolBlockHandle};
use super::cancel::CancelToken;
use super::events::{Event, EventSink, EventSource, SeqCounter, ThrottledTextStreamer};
use super::tasks;

/// Everything one call to [`run_turn`] needs that isn't already wired
/// into the [`Engine`]. There's no `Storage` method to create a
/// `Completion`/`AgentExecution` row, so both ids are supplied by the
/// caller — whatever created the user/system completion pair before
/// dispatching the turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub report_id: ReportId,
    pub completion_id: CompletionId,
    pub prompt: String,
    pub model: Option<String>,
    pub build_id: Option<String>,
    pub schema_filter: SchemaFilter,
    pub plan_type: PlanType,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Starts the Agent Loop for one turn in a detached task and returns
/// immediately with the execution id and its event source (§4.7, §5).
/// The loop runs to completion (or cancellation) on its own; the caller
/// only needs to drain the returned [`EventSource`].
pub fn run_turn(engine: Arc<Engine>, input: TurnInput) -> (AgentExecutionId, EventSource) {
    let execution_id = AgentExecutionId::new();
    let completion_id = input.completion_id;
    let cancel = engine.cancel_map.register(completion_id);
    let (sink, source) = super::events::event_channel(EVENT_CHANNEL_CAPACITY);

    let span = tracing::info_span!("agent_turn", %execution_id, %completion_id);
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            let seq = SeqCounter::new();
            let started_seq = seq.next_seq();
            let _ = sink
                .send(Event {
                    event_name: "completion.started",
                    completion_id,
                    agent_execution_id: execution_id,
                    seq: started_seq,
                    data: serde_json::json!({}),
                })
                .await;

            let outcome = run_loop(&engine, &input, execution_id, &cancel, &seq, &sink).await;

            engine.cancel_map.remove(completion_id);

            if let Err(err) = outcome {
                tracing::error!(error = %err, %completion_id, "agent loop exited with an unhandled error");
                let _ = engine
                    .storage
                    .set_completion_status(completion_id, CompletionStatus::Error)
                    .await;
                let seq = seq.next_seq();
                let _ = sink
                    .send(Event {
                        event_name: "completion.finished",
                        completion_id,
                        agent_execution_id: execution_id,
                        seq,
                        data: serde_json::json!({ "status": "error", "error": err.to_string() }),
                    })
                    .await;
            }
        },
        span,
    ));

    (execution_id, source)
}

async fn run_loop(
    engine: &Arc<Engine>,
    input: &TurnInput,
    execution_id: AgentExecutionId,
    cancel: &CancelToken,
    seq: &SeqCounter,
    sink: &EventSink,
) -> Result<()> {
    let completion_id = input.completion_id;
    let cfg = engine.config.clone();

    let mut hub = ContextHub::new(engine.storage.clone());
    let turn_inputs = TurnInputs {
        report_id: input.report_id,
        completion_id,
        prompt: Some(input.prompt.clone()),
        build_id: input.build_id.clone(),
        schema_filter: input.schema_filter.clone(),
    };
    hub.prime_static(&turn_inputs, &cfg.context).await;
    hub.refresh_warm(cfg.context.observations_max);

    let initial_snapshot = hub.slim_snapshot(
        execution_id,
        aa_domain::entities::ContextSnapshotKind::Initial,
        0,
        input.model.as_deref(),
        &cfg.context,
    );
    tasks::schedule_context_snapshot(&engine.session_factory, initial_snapshot);

    let mut invalid_retry_count: u32 = 0;
    let mut failed_tool_count: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut recent_tool_signatures: Vec<(String, String)> = Vec::new();
    let mut last_content = String::new();
    let mut next_block_index: u32 = 0;

    for loop_index in 0..cfg.agent_loop.step_limit {
        if cancel.is_cancelled() || engine.watcher.stop_requested(completion_id).await {
            return stop_turn(engine, execution_id, completion_id, seq, sink, &hub).await;
        }

        if loop_index > 0 {
            hub.refresh_warm(cfg.context.observations_max);
            let snapshot = hub.slim_snapshot(
                execution_id,
                aa_domain::entities::ContextSnapshotKind::PreTool,
                loop_index,
                input.model.as_deref(),
                &cfg.context,
            );
            tasks::schedule_context_snapshot(&engine.session_factory, snapshot);
        }

        tasks::schedule_early_scoring(&engine.session_factory, engine.judge.clone(), completion_id);

        let context = hub.build_context(&cfg.context);
        let request = build_request(system_prompt(input.plan_type), context, vec![], input.model.clone());

        let decision_seq = seq.next_seq();
        let block_index = next_block_index;
        next_block_index += 1;
        let decision_block = DecisionBlockHandle::new(completion_id, block_index, decision_seq);
        let placeholder_decision_id = PlanDecisionId::new();
        decision_block
            .upsert(
                engine.storage.as_ref(),
                placeholder_decision_id,
                "",
                "",
                BlockStatus::InProgress,
                None,
            )
            .await?;
        let _ = sink
            .send(Event {
                event_name: "block.upsert",
                completion_id,
                agent_execution_id: execution_id,
                seq: decision_seq,
                data: serde_json::json!({ "block_index": block_index, "status": "in_progress" }),
            })
            .await;

        let mut streamer = ThrottledTextStreamer::new(completion_id, execution_id, seq.clone());
        let cancel_for_driver = cancel.clone();
        let turn = accumulate_stream(engine.llm.as_ref(), &request, || cancel_for_driver.is_cancelled()).await;

        let decision = match turn {
            Ok(accumulated) => {
                streamer.update(&accumulated.reasoning, &accumulated.content, sink).await;
                streamer.complete(&accumulated.reasoning, &accumulated.content, sink).await;
                parse_decision(&accumulated.content, execution_id, decision_seq, input.plan_type)
            }
            Err(err) => Err(err),
        };

        let decision = match decision {
            Ok(decision) => decision,
            Err(err) => {
                invalid_retry_count += 1;
                let reason = match &err {
                    aa_domain::Error::PlannerValidation { code, .. } => code.as_str(),
                    _ => "input_validation_error",
                };
                let _ = sink
                    .send(Event {
                        event_name: "planner.retry",
                        completion_id,
                        agent_execution_id: execution_id,
                        seq: seq.next_seq(),
                        data: serde_json::json!({ "reason": reason, "attempt": invalid_retry_count }),
                    })
                    .await;

                if invalid_retry_count > cfg.agent_loop.max_invalid_retries {
                    let terminal = synthesize_invalid_terminal(execution_id, decision_seq, input.plan_type, &err);
                    return finish_with_decision(
                        engine,
                        input,
                        execution_id,
                        completion_id,
                        seq,
                        sink,
                        &hub,
                        &decision_block,
                        &terminal,
                        &mut last_content,
                    )
                    .await;
                }
                continue;
            }
        };

        engine.storage.upsert_plan_decision(&decision).await?;
        decision_block
            .upsert(
                engine.storage.as_ref(),
                decision.id,
                &decision.assistant_message,
                &decision.reasoning_message,
                BlockStatus::Success,
                decision.error.as_ref().map(|e| e.message.clone()),
            )
            .await?;
        super::blocks::rebuild_transcript(engine.storage.as_ref(), completion_id).await?;
        let _ = sink
            .send(Event {
                event_name: "block.upsert",
                completion_id,
                agent_execution_id: execution_id,
                seq: decision_seq,
                data: serde_json::json!({ "block_index": block_index, "status": "success" }),
            })
            .await;
        let _ = sink
            .send(Event {
                event_name: "decision.final",
                completion_id,
                agent_execution_id: execution_id,
                seq: seq.next_seq(),
                data: serde_json::json!({ "decision_seq": decision_seq }),
            })
            .await;

        if decision.analysis_complete {
            last_content = decision.final_answer.clone().unwrap_or_default();
            return finish_turn(
                engine,
                input,
                execution_id,
                completion_id,
                seq,
                sink,
                &hub,
                CompletionStatus::Success,
                &last_content,
            )
            .await;
        }

        let Some(action) = decision.action.clone() else {
            invalid_retry_count += 1;
            let err = aa_domain::Error::PlannerValidation {
                code: aa_domain::error::PlannerValidationCode::MissingAction,
                message: "action plan produced neither an action nor a completed analysis".into(),
            };
            let _ = sink
                .send(Event {
                    event_name: "planner.retry",
                    completion_id,
                    agent_execution_id: execution_id,
                    seq: seq.next_seq(),
                    data: serde_json::json!({ "reason": "missing_action", "attempt": invalid_retry_count }),
                })
                .await;
            if invalid_retry_count > cfg.agent_loop.max_invalid_retries {
                let terminal = synthesize_invalid_terminal(execution_id, decision_seq, input.plan_type, &err);
                return finish_with_decision(
                    engine,
                    input,
                    execution_id,
                    completion_id,
                    seq,
                    sink,
                    &hub,
                    &decision_block,
                    &terminal,
                    &mut last_content,
                )
                .await;
            }
            continue;
        };

        let descriptor = match engine.tool_registry.resolve(&action.name, &cfg.tool_policy) {
            Ok(descriptor) => descriptor.clone(),
            Err(err) => {
                hub.add_tool_observation(action.name.clone(), "error", err.to_string(), ObservationPolicy::OnTrigger);
                continue;
            }
        };

        let signature = (action.name.clone(), action.arguments.to_string());
        let tool_block_index = next_block_index;
        next_block_index += 1;
        let tool_block = ToolBlockHandle::new(completion_id, tool_block_index);

        let (tool_tx, mut tool_rx) = tool_event_channel();
        let forward_completion_id = completion_id;
        let forward_execution_id = execution_id;
        let forward_seq = seq.clone();
        let forward_sink = sink.clone();
        let forward_task = tokio::spawn(async move {
            let mut artifacts = ArtifactState::new();
            while let Some(event) = tool_rx.recv().await {
                for (event_name, data) in tool_event_to_sse(&event, &mut artifacts) {
                    let _ = forward_sink
                        .send(Event {
                            event_name,
                            completion_id: forward_completion_id,
                            agent_execution_id: forward_execution_id,
                            seq: forward_seq.next_seq(),
                            data,
                        })
                        .await;
                }
            }
        });

        let cancel_for_tool = cancel.clone();
        let execution = engine
            .tool_runner
            .run(
                decision.id,
                &descriptor.name,
                None,
                action.arguments.clone(),
                &tool_tx,
                Arc::new(move || cancel_for_tool.is_cancelled()),
            )
            .await;
        drop(tool_tx);
        let _ = forward_task.await;

        match execution.status {
            aa_domain::entities::ToolExecutionStatus::Success => {
                recent_tool_signatures.push(signature);
                invalid_retry_count = 0;
            }
            aa_domain::entities::ToolExecutionStatus::Error => {
                *failed_tool_count.entry(execution.tool_name.clone()).or_insert(0) += 1;
            }
        }

        let breaker_tripped_failure = failed_tool_count
            .get(&execution.tool_name)
            .is_some_and(|&count| count >= cfg.agent_loop.tool_failure_breaker);
        let repeat_tripped = {
            let window = cfg.agent_loop.repeat_success_window;
            window > 0
                && recent_tool_signatures.len() >= window
                && recent_tool_signatures[recent_tool_signatures.len() - window..]
                    .windows(2)
                    .all(|pair| pair[0] == pair[1])
        };

        let observation_summary = execution
            .result_summary
            .clone()
            .or_else(|| execution.error_message.clone())
            .unwrap_or_default();
        hub.add_tool_observation(
            execution.tool_name.clone(),
            if matches!(execution.status, aa_domain::entities::ToolExecutionStatus::Success) {
                "success"
            } else {
                "error"
            },
            observation_summary,
            descriptor.observation_policy,
        );

        engine.storage.upsert_tool_execution(&execution).await?;
        let tool_block_seq = seq.next_seq();
        tool_block
            .upsert(
                engine.storage.as_ref(),
                execution.id,
                tool_block_seq,
                execution.result_summary.as_deref().unwrap_or_default(),
                "",
                if matches!(execution.status, aa_domain::entities::ToolExecutionStatus::Success) {
                    BlockStatus::Success
                } else {
                    BlockStatus::Error
                },
                execution.error_message.clone(),
            )
            .await?;
        super::blocks::rebuild_transcript(engine.storage.as_ref(), completion_id).await?;

        let post_tool_snapshot = hub.slim_snapshot(
            execution_id,
            aa_domain::entities::ContextSnapshotKind::PostTool,
            loop_index,
            input.model.as_deref(),
            &cfg.context,
        );
        tasks::schedule_context_snapshot(&engine.session_factory, post_tool_snapshot);

        let _ = sink
            .send(Event {
                event_name: "tool.finished",
                completion_id,
                agent_execution_id: execution_id,
                seq: tool_block_seq,
                data: serde_json::json!({
                    "tool_name": execution.tool_name,
                    "status": execution.status,
                }),
            })
            .await;

        if breaker_tripped_failure || repeat_tripped {
            let reason = if breaker_tripped_failure {
                "tool_failure_breaker"
            } else {
                "repeat_success_breaker"
            };
            let terminal_seq = seq.next_seq();
            let terminal_block = DecisionBlockHandle::new(completion_id, next_block_index, terminal_seq);
            next_block_index += 1;
            let terminal = synthesize_breaker_terminal(execution_id, terminal_seq, input.plan_type, reason);
            return finish_with_decision(
                engine,
                input,
                execution_id,
                completion_id,
                seq,
                sink,
                &hub,
                &terminal_block,
                &terminal,
                &mut last_content,
            )
            .await;
        }
    }

    finish_turn(
        engine,
        input,
        execution_id,
        completion_id,
        seq,
        sink,
        &hub,
        CompletionStatus::Success,
        &last_content,
    )
    .await
}

fn system_prompt(plan_type: PlanType) -> &'static str {
    match plan_type {
        PlanType::Action => {
            "You are an AI data analyst. Decide the next tool call or finish with a final answer. \
             Respond with a single JSON object matching the documented decision schema."
        }
        PlanType::Research => {
            "You are an AI research analyst. Decide the next research step or finish with a final \
             answer. Respond with a single JSON object matching the documented decision schema."
        }
    }
}

fn synthesize_breaker_terminal(
    agent_execution_id: AgentExecutionId,
    decision_seq: u64,
    plan_type: PlanType,
    reason: &str,
) -> aa_domain::entities::PlanDecision {
    let now = chrono::Utc::now();
    aa_domain::entities::PlanDecision {
        id: PlanDecisionId::new(),
        agent_execution_id,
        decision_seq,
        plan_type,
        reasoning_message: String::new(),
        assistant_message: String::new(),
        action: None,
        analysis_complete: true,
        final_answer: Some(format!(
            "Stopping after repeated tool trouble ({reason}). Here is what was learned so far."
        )),
        error: None,
        created_at: now,
        updated_at: now,
    }
}

/// Maps one Runner-level [`aa_tools::ToolEvent`] to the SSE events it
/// produces. `Started`/`RetryScheduled`/`Finished`/`Failed` describe the
/// Runner's own retry/lifecycle bookkeeping and always map to exactly
/// one event; `Progress` carries a tool's own `{type, payload}` report
/// and is routed through the §4.11 stage-dispatch handler, which can
/// produce zero, one, or several artifact events from a single progress
/// report (e.g. `data_model_type_determined` creates a Query, a
/// Visualization, and an artifact delta all at once).
fn tool_event_to_sse(event: &aa_tools::ToolEvent, artifacts: &mut ArtifactState) -> Vec<(&'static str, Value)> {
    match event {
        aa_tools::ToolEvent::Started { tool_name, .. } => {
            vec![("tool.progress", serde_json::json!({ "stage": "started", "tool_name": tool_name }))]
        }
        aa_tools::ToolEvent::RetryScheduled { attempt_number, delay_ms, .. } => vec![(
            "tool.progress",
            serde_json::json!({ "stage": "retry_scheduled", "attempt_number": attempt_number, "delay_ms": delay_ms }),
        )],
        aa_tools::ToolEvent::Progress { execution_id, event_type, payload } => match event_type {
            aa_tools::ToolProgressType::Progress => {
                let dispatched = dispatch_stage(artifacts, *execution_id, payload);
                if dispatched.is_empty() {
                    vec![("tool.progress", payload.clone())]
                } else {
                    dispatched
                }
            }
            aa_tools::ToolProgressType::Partial => vec![("tool.partial", payload.clone())],
            aa_tools::ToolProgressType::Stdout => vec![("tool.stdout", payload.clone())],
            aa_tools::ToolProgressType::Error => vec![("tool.error", payload.clone())],
        },
        aa_tools::ToolEvent::Finished { result_summary, .. } => {
            vec![("tool.partial", serde_json::json!({ "result_summary": result_summary }))]
        }
        aa_tools::ToolEvent::Failed { transient, message, .. } => {
            vec![("tool.error", serde_json::json!({ "transient": transient, "message": message }))]
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_with_decision(
    engine: &Arc<Engine>,
    input: &TurnInput,
    execution_id: AgentExecutionId,
    completion_id: CompletionId,
    seq: &SeqCounter,
    sink: &EventSink,
    hub: &ContextHub,
    block: &DecisionBlockHandle,
    decision: &aa_domain::entities::PlanDecision,
    last_content: &mut String,
) -> Result<()> {
    engine.storage.upsert_plan_decision(decision).await?;
    let status = if decision.error.is_some() { BlockStatus::Error } else { BlockStatus::Success };
    block
        .upsert(
            engine.storage.as_ref(),
            decision.id,
            decision.final_answer.as_deref().unwrap_or_default(),
            &decision.reasoning_message,
            status,
            decision.error.as_ref().map(|e| e.message.clone()),
        )
        .await?;
    super::blocks::rebuild_transcript(engine.storage.as_ref(), completion_id).await?;
    let _ = sink
        .send(Event {
            event_name: "block.upsert",
            completion_id,
            agent_execution_id: execution_id,
            seq: block.decision_seq,
            data: serde_json::json!({ "block_index": block.block_index, "status": "success" }),
        })
        .await;
    let _ = sink
        .send(Event {
            event_name: "decision.final",
            completion_id,
            agent_execution_id: execution_id,
            seq: seq.next_seq(),
            data: serde_json::json!({ "decision_seq": block.decision_seq }),
        })
        .await;

    *last_content = decision.final_answer.clone().unwrap_or_default();
    let status = if decision.error.is_some() { CompletionStatus::Error } else { CompletionStatus::Success };
    finish_turn(engine, input, execution_id, completion_id, seq, sink, hub, status, last_content).await
}

#[allow(clippy::too_many_arguments)]
async fn finish_turn(
    engine: &Arc<Engine>,
    input: &TurnInput,
    execution_id: AgentExecutionId,
    completion_id: CompletionId,
    seq: &SeqCounter,
    sink: &EventSink,
    hub: &ContextHub,
    status: CompletionStatus,
    final_content: &str,
) -> Result<()> {
    let final_snapshot = hub.slim_snapshot(
        execution_id,
        aa_domain::entities::ContextSnapshotKind::Final,
        0,
        input.model.as_deref(),
        &engine.config.context,
    );
    tasks::schedule_context_snapshot(&engine.session_factory, final_snapshot);

    engine.storage.set_completion_status(completion_id, status).await?;
    let event_status = match status {
        CompletionStatus::Success => "success",
        CompletionStatus::Error => "error",
        CompletionStatus::Stopped => "stopped",
        CompletionStatus::InProgress => "in_progress",
    };
    let _ = sink
        .send(Event {
            event_name: "completion.finished",
            completion_id,
            agent_execution_id: execution_id,
            seq: seq.next_seq(),
            data: serde_json::json!({ "status": event_status }),
        })
        .await;

    if matches!(status, CompletionStatus::Success) {
        tasks::schedule_suggestions(engine.suggester.clone(), completion_id, final_content.to_string());
        if engine.storage.count_prior_turns(input.report_id).await.unwrap_or(1) == 0 {
            tasks::schedule_title_generation(engine.title_generator.clone(), input.report_id, input.prompt.clone());
        }
    }
    tasks::schedule_late_scoring(&engine.session_factory, engine.judge.clone(), completion_id);

    let _ = execution_status_for(status);
    Ok(())
}

async fn stop_turn(
    engine: &Arc<Engine>,
    execution_id: AgentExecutionId,
    completion_id: CompletionId,
    seq: &SeqCounter,
    sink: &EventSink,
    hub: &ContextHub,
) -> Result<()> {
    let final_snapshot = hub.slim_snapshot(
        execution_id,
        aa_domain::entities::ContextSnapshotKind::Final,
        0,
        None,
        &engine.config.context,
    );
    tasks::schedule_context_snapshot(&engine.session_factory, final_snapshot);

    engine.storage.set_completion_status(completion_id, CompletionStatus::Stopped).await?;
    let _ = sink
        .send(Event {
            event_name: "completion.finished",
            completion_id,
            agent_execution_id: execution_id,
            seq: seq.next_seq(),
            data: serde_json::json!({ "status": "stopped" }),
        })
        .await;
    tasks::schedule_late_scoring(&engine.session_factory, engine.judge.clone(), completion_id);
    Ok(())
}

fn execution_status_for(status: CompletionStatus) -> AgentExecutionStatus {
    match status {
        CompletionStatus::Success => AgentExecutionStatus::Success,
        CompletionStatus::Error => AgentExecutionStatus::Error,
        CompletionStatus::Stopped => AgentExecutionStatus::Sigkill,
        CompletionStatus::InProgress => AgentExecutionStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_domain::capability::ModelCapabilities;
    use aa_domain::collaborators::*;
    use aa_domain::entities::{
        CompletionBlock, ContextSnapshot, ObservationPolicy, PlanDecision, PlanTypeFilter,
        ToolDescriptor, ToolExecution,
    };
    use aa_domain::config::Config;
    use aa_domain::stream::{BoxStream, StreamEvent};
    use aa_planner::{ChatRequest, ChatResponse, LlmStream};
    use aa_tools::{ToolExecutor, ToolOutcome};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeStorage {
        blocks: Mutex<Vec<CompletionBlock>>,
        status: Mutex<Option<CompletionStatus>>,
        decisions: Mutex<Vec<PlanDecision>>,
        executions: Mutex<Vec<ToolExecution>>,
    }

    #[async_trait]
    impl Storage for FakeStorage {
        async fn fetch_schema_tables(&self, _: ReportId, _: &[String], _: Option<&str>) -> Result<Vec<RawTable>> {
            Ok(vec![])
        }
        async fn fetch_instructions(&self, _: ReportId, _: Option<&str>) -> Result<Vec<RawInstruction>> {
            Ok(vec![])
        }
        async fn fetch_prior_completions(&self, _: ReportId, _: CompletionId, _: usize) -> Result<Vec<RawCompletionRecord>> {
            Ok(vec![])
        }
        async fn fetch_resources(&self, _: ReportId) -> Result<Vec<RawResource>> {
            Ok(vec![])
        }
        async fn fetch_mentions(&self, _: CompletionId) -> Result<Vec<RawMention>> {
            Ok(vec![])
        }
        async fn fetch_entities(&self, _: ReportId) -> Result<Vec<RawEntity>> {
            Ok(vec![])
        }
        async fn fetch_files(&self, _: ReportId) -> Result<Vec<RawFile>> {
            Ok(vec![])
        }
        async fn fetch_widgets(&self, _: ReportId) -> Result<Vec<RawWidget>> {
            Ok(vec![])
        }
        async fn fetch_queries(&self, _: ReportId) -> Result<Vec<RawQuery>> {
            Ok(vec![])
        }
        async fn fetch_code(&self, _: ReportId) -> Result<Vec<RawCode>> {
            Ok(vec![])
        }
        async fn count_prior_turns(&self, _: ReportId) -> Result<u32> {
            Ok(1)
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
        async fn rebuild_transcript(&self, _: CompletionId) -> Result<String> {
            let blocks = self.blocks.lock();
            let mut ordered: Vec<&CompletionBlock> = blocks.iter().collect();
            ordered.sort_by_key(|b| b.block_index);
            Ok(ordered.iter().map(|b| b.content.as_str()).collect::<Vec<_>>().join("\n"))
        }
        async fn set_completion_status(&self, _: CompletionId, status: CompletionStatus) -> Result<()> {
            *self.status.lock() = Some(status);
            Ok(())
        }
        async fn save_context_snapshot(&self, _: &ContextSnapshot) -> Result<()> {
            Ok(())
        }
    }

    struct NeverStop;
    #[async_trait]
    impl Watcher for NeverStop {
        async fn stop_requested(&self, _: CompletionId) -> bool {
            false
        }
    }

    struct TestSessionFactory(Arc<dyn Storage>);
    impl super::super::SessionFactory for TestSessionFactory {
        fn new_session(&self) -> Arc<dyn Storage> {
            self.0.clone()
        }
    }

    struct ScriptedLlm {
        responses: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl LlmStream for ScriptedLlm {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            unimplemented!("loop tests only exercise chat_stream")
        }
        async fn chat_stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let mut responses = self.responses.lock();
            let text = if responses.is_empty() {
                r#"{"reasoning":"done","message":"done","analysis_complete":true,"final_answer":"All done."}"#
            } else {
                responses.remove(0)
            };
            let events: Vec<Result<StreamEvent>> = vec![
                Ok(StreamEvent::Token { text: text.to_string() }),
                Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) }),
            ];
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
        fn capabilities(&self) -> &ModelCapabilities {
            static CAPS: std::sync::OnceLock<ModelCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(ModelCapabilities::default)
        }
        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    struct EchoToolExecutor;
    #[async_trait]
    impl ToolExecutor for EchoToolExecutor {
        async fn execute(
            &self,
            _tool_name: &str,
            _tool_action: Option<&str>,
            arguments: Value,
            _runtime_ctx: &aa_tools::RuntimeCtx,
            _emit: aa_tools::Emit<'_>,
        ) -> Result<ToolOutcome> {
            Ok(ToolOutcome {
                result_json: arguments,
                result_summary: "ok".into(),
                created_artifacts: Default::default(),
            })
        }
    }

    struct AlwaysFailToolExecutor;
    #[async_trait]
    impl ToolExecutor for AlwaysFailToolExecutor {
        async fn execute(
            &self,
            _tool_name: &str,
            _tool_action: Option<&str>,
            _arguments: Value,
            _runtime_ctx: &aa_tools::RuntimeCtx,
            _emit: aa_tools::Emit<'_>,
        ) -> Result<ToolOutcome> {
            Err(aa_domain::Error::ToolExecution { transient: false, message: "boom".into() })
        }
    }

    fn test_input() -> TurnInput {
        TurnInput {
            report_id: ReportId::new(),
            completion_id: CompletionId::new(),
            prompt: "how is revenue trending?".into(),
            model: None,
            build_id: None,
            schema_filter: SchemaFilter::default(),
            plan_type: PlanType::Action,
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.tools.retry.backoff_ms = 1;
        config.tools.retry.jitter_ms = 0;
        config
    }

    async fn drain(mut source: EventSource) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = source.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn direct_answer_emits_exactly_one_completion_finished() {
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage::default());
        let engine = Arc::new(Engine::new(
            storage.clone(),
            Arc::new(NeverStop),
            Arc::new(TestSessionFactory(storage.clone())),
            Arc::new(ScriptedLlm { responses: Mutex::new(vec![]) }),
            Arc::new(EchoToolExecutor),
            Arc::new(aa_tools::ToolRegistry::new()),
            Arc::new(fast_config()),
        ));
        let (_id, source) = run_turn(engine, test_input());
        let events = drain(source).await;
        let finished: Vec<_> = events.iter().filter(|e| e.event_name == "completion.finished").collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data["status"], "success");
    }

    #[tokio::test]
    async fn tool_call_then_final_answer_runs_one_tool() {
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage::default());
        let mut registry = aa_tools::ToolRegistry::new();
        registry.register(ToolDescriptor {
            name: "query_data".into(),
            plan_types: vec![PlanTypeFilter::Both],
            argument_schema: serde_json::json!({}),
            observation_policy: ObservationPolicy::OnTrigger,
            capability_flags: vec![],
        });
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                r#"{"reasoning":"need data","message":"fetching","action":{"name":"query_data","arguments":{"sql":"select 1"}},"analysis_complete":false}"#,
            ]),
        };
        let engine = Arc::new(Engine::new(
            storage.clone(),
            Arc::new(NeverStop),
            Arc::new(TestSessionFactory(storage.clone())),
            Arc::new(llm),
            Arc::new(EchoToolExecutor),
            Arc::new(registry),
            Arc::new(fast_config()),
        ));
        let (_id, source) = run_turn(engine, test_input());
        let events = drain(source).await;
        let tool_events: Vec<_> = events.iter().filter(|e| e.event_name == "tool.finished").collect();
        assert_eq!(tool_events.len(), 1);
        let finished: Vec<_> = events.iter().filter(|e| e.event_name == "completion.finished").collect();
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn tool_failure_breaker_trips_after_configured_threshold() {
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage::default());
        let mut registry = aa_tools::ToolRegistry::new();
        registry.register(ToolDescriptor {
            name: "flaky_tool".into(),
            plan_types: vec![PlanTypeFilter::Both],
            argument_schema: serde_json::json!({}),
            observation_policy: ObservationPolicy::OnTrigger,
            capability_flags: vec![],
        });
        let action_decision = r#"{"reasoning":"trying","message":"trying","action":{"name":"flaky_tool","arguments":{}},"analysis_complete":false}"#;
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![action_decision, action_decision, action_decision]),
        };
        let mut config = fast_config();
        config.tools.retry.max_attempts = 1;
        config.agent_loop.tool_failure_breaker = 3;
        let engine = Arc::new(Engine::new(
            storage.clone(),
            Arc::new(NeverStop),
            Arc::new(TestSessionFactory(storage.clone())),
            Arc::new(llm),
            Arc::new(AlwaysFailToolExecutor),
            Arc::new(registry),
            Arc::new(config),
        ));
        let (_id, source) = run_turn(engine, test_input());
        let events = drain(source).await;
        let finished: Vec<_> = events.iter().filter(|e| e.event_name == "completion.finished").collect();
        assert_eq!(finished.len(), 1);
        let tool_finishes = events.iter().filter(|e| e.event_name == "tool.finished").count();
        assert_eq!(tool_finishes, 3);
    }

    #[tokio::test]
    async fn invalid_output_retries_then_synthesizes_terminal_decision() {
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage::default());
        let llm = ScriptedLlm {
            responses: Mutex::new(vec!["not json", "still not json", "still not json"]),
        };
        let engine = Arc::new(Engine::new(
            storage.clone(),
            Arc::new(NeverStop),
            Arc::new(TestSessionFactory(storage.clone())),
            Arc::new(llm),
            Arc::new(EchoToolExecutor),
            Arc::new(aa_tools::ToolRegistry::new()),
            Arc::new(fast_config()),
        ));
        let (_id, source) = run_turn(engine, test_input());
        let events = drain(source).await;
        let finished: Vec<_> = events.iter().filter(|e| e.event_name == "completion.finished").collect();
        assert_eq!(finished.len(), 1);
        let retries = events.iter().filter(|e| e.event_name == "planner.retry").count();
        assert_eq!(retries, 3);
    }

    #[tokio::test]
    async fn stop_request_short_circuits_before_any_planner_call() {
        struct AlwaysStop;
        #[async_trait]
        impl Watcher for AlwaysStop {
            async fn stop_requested(&self, _: CompletionId) -> bool {
                true
            }
        }
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage::default());
        let engine = Arc::new(Engine::new(
            storage.clone(),
            Arc::new(AlwaysStop),
            Arc::new(TestSessionFactory(storage.clone())),
            Arc::new(ScriptedLlm { responses: Mutex::new(vec![]) }),
            Arc::new(EchoToolExecutor),
            Arc::new(aa_tools::ToolRegistry::new()),
            Arc::new(fast_config()),
        ));
        let (_id, source) = run_turn(engine, test_input());
        let events = drain(source).await;
        let finished: Vec<_> = events.iter().filter(|e| e.event_name == "completion.finished").collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data["status"], "stopped");
    }

    #[tokio::test]
    async fn unresolvable_tool_is_logged_as_an_observation_and_loop_continues() {
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage::default());
        let bad_action = r#"{"reasoning":"x","message":"x","action":{"name":"no_such_tool","arguments":{}},"analysis_complete":false}"#;
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![bad_action]),
        };
        let engine = Arc::new(Engine::new(
            storage.clone(),
            Arc::new(NeverStop),
            Arc::new(TestSessionFactory(storage.clone())),
            Arc::new(llm),
            Arc::new(EchoToolExecutor),
            Arc::new(aa_tools::ToolRegistry::new()),
            Arc::new(fast_config()),
        ));
        let (_id, source) = run_turn(engine, test_input());
        let events = drain(source).await;
        let finished: Vec<_> = events.iter().filter(|e| e.event_name == "completion.finished").collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data["status"], "success");
    }

    #[test]
    fn execution_status_maps_completion_status() {
        assert_eq!(execution_status_for(CompletionStatus::Success), AgentExecutionStatus::Success);
        assert_eq!(execution_status_for(CompletionStatus::Error), AgentExecutionStatus::Error);
        assert_eq!(execution_status_for(CompletionStatus::Stopped), AgentExecutionStatus::Sigkill);
    }
}
