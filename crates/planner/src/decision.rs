//! Parsing and validating raw model output into a [`PlanDecision`] (§4.6).
//! The model is asked (via `ChatRequest::json_mode`) to answer with a
//! single JSON object; everything here is about turning that object into
//! a typed, invariant-checked decision or a [`PlannerValidationCode`].

use aa_domain::entities::{PlanAction, PlanDecision, PlanError, PlanType};
use aa_domain::error::PlannerValidationCode;
use aa_domain::ids::{AgentExecutionId, PlanDecisionId};
use aa_domain::{Error, Result};
use chrono::Utc;
use serde::Deserialize;

/// The wire shape the planner is instructed to emit. Field names match
/// the prompt's documented schema exactly, since callers will see parse
/// errors if the model drifts from it.
#[derive(Debug, Deserialize)]
struct RawDecision {
    reasoning: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    action: Option<RawAction>,
    #[serde(default)]
    analysis_complete: bool,
    #[serde(default)]
    final_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Parse and validate one model turn's raw text into a [`PlanDecision`].
///
/// Validation rules (§4.6):
/// - the payload must be a single JSON object matching the schema above
///   (`input_validation_error` otherwise);
/// - `action` and `analysis_complete` are mutually exclusive — a
///   decision either takes one more step or finishes, never both
///   (`validation_error`);
/// - a decision that neither acts nor completes has nothing for the
///   loop to do with it (`missing_action`).
pub fn parse_decision(
    raw_text: &str,
    agent_execution_id: AgentExecutionId,
    decision_seq: u64,
    plan_type: PlanType,
) -> Result<PlanDecision> {
    let raw: RawDecision = serde_json::from_str(raw_text.trim()).map_err(|e| {
        Error::PlannerValidation {
            code: PlannerValidationCode::InputValidationError,
            message: format!("could not parse planner output as JSON: {e}"),
        }
    })?;

    if raw.action.is_some() && raw.analysis_complete {
        return Err(Error::PlannerValidation {
            code: PlannerValidationCode::ValidationError,
            message: "decision cannot both take an action and mark analysis complete".into(),
        });
    }
    if raw.analysis_complete && raw.final_answer.is_none() {
        return Err(Error::PlannerValidation {
            code: PlannerValidationCode::ValidationError,
            message: "analysis_complete requires a final_answer".into(),
        });
    }
    if raw.action.is_none() && !raw.analysis_complete {
        return Err(Error::PlannerValidation {
            code: PlannerValidationCode::MissingAction,
            message: "decision has neither an action nor a completed analysis".into(),
        });
    }

    let now = Utc::now();
    Ok(PlanDecision {
        id: PlanDecisionId::new(),
        agent_execution_id,
        decision_seq,
        plan_type,
        reasoning_message: raw.reasoning,
        assistant_message: raw.message,
        action: raw.action.map(|a| PlanAction {
            name: a.name,
            arguments: a.arguments,
        }),
        analysis_complete: raw.analysis_complete,
        final_answer: raw.final_answer,
        error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Build the terminal decision the Agent Loop synthesizes once
/// `max_invalid_retries` consecutive invalid outputs have been seen
/// (§4.6, §7) — the loop itself calls this, not the driver, since only
/// the loop knows the retry budget was exhausted.
pub fn synthesize_invalid_terminal(
    agent_execution_id: AgentExecutionId,
    decision_seq: u64,
    plan_type: PlanType,
    error: &Error,
) -> PlanDecision {
    let (code, message) = match error {
        Error::PlannerValidation { code, message } => (code.as_str().to_string(), message.clone()),
        other => (
            PlannerValidationCode::InputValidationError.as_str().to_string(),
            other.to_string(),
        ),
    };
    let now = Utc::now();
    PlanDecision {
        id: PlanDecisionId::new(),
        agent_execution_id,
        decision_seq,
        plan_type,
        reasoning_message: String::new(),
        assistant_message: String::new(),
        action: None,
        analysis_complete: true,
        final_answer: None,
        error: Some(PlanError { code, message }),
        created_at: now,
        updated_at: now,
    }
}
