//! Streaming tool side effects (§4.11): as a `create_data`/`create_widget`
//! family tool reports `tool.progress` events mid-execution, known `stage`
//! values mutate this loop iteration's Query/Step/Visualization state and
//! emit artifact deltas. Reset fresh per tool call — these are the
//! "per-iteration artifact handles" the loop resets before running an
//! artifact-producing tool.

use aa_domain::entities::{DataModel, DataModelColumn, Query, Step, StepStatus, Visualization};
use aa_domain::ids::ToolExecutionId;
use serde_json::Value;

/// The in-progress Query/Step/Visualization a single tool execution is
/// building up, if it has started streaming one.
#[derive(Default)]
pub struct ArtifactState {
    pub query: Option<Query>,
    pub step: Option<Step>,
    pub visualizations: Vec<Visualization>,
}

impl ArtifactState {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reads `payload.stage` and mutates `state` accordingly, returning the
/// `(event_name, data)` pairs this stage produces. An unrecognized or
/// missing `stage` produces no events — the caller falls back to a
/// generic passthrough for those.
pub fn dispatch_stage(
    state: &mut ArtifactState,
    tool_execution_id: ToolExecutionId,
    payload: &Value,
) -> Vec<(&'static str, Value)> {
    let Some(stage) = payload.get("stage").and_then(Value::as_str) else {
        return Vec::new();
    };

    match stage {
        "data_model_type_determined" => on_data_model_type_determined(state, tool_execution_id, payload),
        "column_added" => on_column_added(state, payload),
        "series_configured" => on_series_configured(state, payload),
        "validating_code" => on_validating_code(state, payload),
        "widget_creation_needed" => on_widget_creation_needed(state, tool_execution_id, payload),
        _ => Vec::new(),
    }
}

fn on_data_model_type_determined(
    state: &mut ArtifactState,
    tool_execution_id: ToolExecutionId,
    payload: &Value,
) -> Vec<(&'static str, Value)> {
    if state.step.is_some() {
        return Vec::new();
    }

    let model_type = payload.get("data_model_type").and_then(Value::as_str).map(str::to_string);
    let sql = payload.get("sql").and_then(Value::as_str).map(str::to_string);

    let query = Query {
        id: new_id(),
        tool_execution_id,
        sql,
    };
    let step = Step {
        id: new_id(),
        query_id: query.id.clone(),
        status: StepStatus::InProgress,
        data_model: DataModel {
            model_type: model_type.clone(),
            ..DataModel::default()
        },
        code: None,
        error_message: None,
    };
    let visualization = Visualization {
        id: new_id(),
        step_id: step.id.clone(),
        view: None,
    };

    let events = vec![
        ("query.created", serde_json::json!({ "query_id": query.id })),
        (
            "visualization.created",
            serde_json::json!({ "visualization_id": visualization.id, "step_id": step.id }),
        ),
        (
            "block.delta.artifact",
            serde_json::json!({
                "step_id": step.id,
                "changed_fields": ["data_model.type"],
                "data_model_type": model_type,
            }),
        ),
    ];

    state.query = Some(query);
    state.visualizations.push(visualization);
    state.step = Some(step);

    events
}

fn on_column_added(state: &mut ArtifactState, payload: &Value) -> Vec<(&'static str, Value)> {
    let Some(step) = state.step.as_mut() else {
        return Vec::new();
    };
    let Some(column_name) = payload.get("generated_column_name").and_then(Value::as_str) else {
        return Vec::new();
    };

    let column = DataModelColumn {
        generated_column_name: column_name.to_string(),
        source_column_name: payload.get("source_column_name").and_then(Value::as_str).map(str::to_string),
        data_type: payload.get("data_type").and_then(Value::as_str).map(str::to_string),
    };

    if let Some(existing) = step
        .data_model
        .columns
        .iter_mut()
        .find(|c| c.generated_column_name == column.generated_column_name)
    {
        *existing = column;
    } else {
        step.data_model.columns.push(column);
    }

    vec![(
        "block.delta.artifact",
        serde_json::json!({
            "step_id": step.id,
            "changed_fields": ["data_model.columns"],
            "columns": step.data_model.columns,
        }),
    )]
}

fn on_series_configured(state: &mut ArtifactState, payload: &Value) -> Vec<(&'static str, Value)> {
    let Some(step) = state.step.as_mut() else {
        return Vec::new();
    };
    step.data_model.series = payload.get("series").cloned();

    vec![(
        "block.delta.artifact",
        serde_json::json!({
            "step_id": step.id,
            "changed_fields": ["data_model.series"],
            "series": step.data_model.series,
        }),
    )]
}

fn on_validating_code(state: &mut ArtifactState, payload: &Value) -> Vec<(&'static str, Value)> {
    let valid = payload.get("valid").and_then(Value::as_bool).unwrap_or(true);
    if valid {
        return Vec::new();
    }
    let Some(step) = state.step.as_mut() else {
        return Vec::new();
    };
    let message = payload.get("message").and_then(Value::as_str).unwrap_or("code validation failed").to_string();
    step.status = StepStatus::Error;
    step.error_message = Some(message.clone());

    vec![(
        "block.delta.artifact",
        serde_json::json!({
            "step_id": step.id,
            "changed_fields": ["status", "error_message"],
            "status": "error",
            "error_message": message,
        }),
    )]
}

fn on_widget_creation_needed(
    state: &mut ArtifactState,
    tool_execution_id: ToolExecutionId,
    payload: &Value,
) -> Vec<(&'static str, Value)> {
    let data_model = payload.get("data_model").cloned().unwrap_or(Value::Null);

    if state.step.is_none() {
        let query = Query {
            id: new_id(),
            tool_execution_id,
            sql: None,
        };
        let step = Step {
            id: new_id(),
            query_id: query.id.clone(),
            status: StepStatus::Success,
            data_model: DataModel::default(),
            code: None,
            error_message: None,
        };
        let visualization = Visualization {
            id: new_id(),
            step_id: step.id.clone(),
            view: None,
        };
        state.query = Some(query);
        state.visualizations.push(visualization);
        state.step = Some(step);
    }

    let step = state.step.as_mut().expect("step created above if absent");
    step.status = StepStatus::Success;

    vec![(
        "block.delta.artifact",
        serde_json::json!({
            "step_id": step.id,
            "changed_fields": ["data_model", "status"],
            "data_model": data_model,
            "status": "success",
        }),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_model_type_determined_creates_query_step_and_visualization() {
        let mut state = ArtifactState::new();
        let events = dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "data_model_type_determined", "data_model_type": "table", "sql": "select 1" }),
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, "query.created");
        assert_eq!(events[1].0, "visualization.created");
        assert_eq!(events[2].0, "block.delta.artifact");
        assert!(state.step.is_some());
        assert_eq!(state.visualizations.len(), 1);
    }

    #[test]
    fn data_model_type_determined_is_a_noop_if_step_already_exists() {
        let mut state = ArtifactState::new();
        dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "data_model_type_determined", "data_model_type": "table" }),
        );
        let events = dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "data_model_type_determined", "data_model_type": "chart" }),
        );
        assert!(events.is_empty());
        assert_eq!(state.step.unwrap().data_model.model_type.as_deref(), Some("table"));
    }

    #[test]
    fn column_added_dedups_by_generated_column_name() {
        let mut state = ArtifactState::new();
        dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "data_model_type_determined" }),
        );
        dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "column_added", "generated_column_name": "revenue", "data_type": "int" }),
        );
        let events = dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "column_added", "generated_column_name": "revenue", "data_type": "float" }),
        );
        assert_eq!(events.len(), 1);
        let step = state.step.unwrap();
        assert_eq!(step.data_model.columns.len(), 1);
        assert_eq!(step.data_model.columns[0].data_type.as_deref(), Some("float"));
    }

    #[test]
    fn column_added_before_a_step_exists_is_a_noop() {
        let mut state = ArtifactState::new();
        let events = dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "column_added", "generated_column_name": "revenue" }),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn validating_code_with_valid_true_is_a_noop() {
        let mut state = ArtifactState::new();
        dispatch_stage(&mut state, ToolExecutionId::new(), &serde_json::json!({ "stage": "data_model_type_determined" }));
        let events = dispatch_stage(&mut state, ToolExecutionId::new(), &serde_json::json!({ "stage": "validating_code", "valid": true }));
        assert!(events.is_empty());
        assert_eq!(state.step.unwrap().status, StepStatus::InProgress);
    }

    #[test]
    fn validating_code_with_valid_false_marks_step_error() {
        let mut state = ArtifactState::new();
        dispatch_stage(&mut state, ToolExecutionId::new(), &serde_json::json!({ "stage": "data_model_type_determined" }));
        let events = dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "validating_code", "valid": false, "message": "syntax error" }),
        );
        assert_eq!(events.len(), 1);
        let step = state.step.unwrap();
        assert_eq!(step.status, StepStatus::Error);
        assert_eq!(step.error_message.as_deref(), Some("syntax error"));
    }

    #[test]
    fn widget_creation_needed_finalizes_even_if_streaming_was_skipped() {
        let mut state = ArtifactState::new();
        let events = dispatch_stage(
            &mut state,
            ToolExecutionId::new(),
            &serde_json::json!({ "stage": "widget_creation_needed", "data_model": { "type": "chart" } }),
        );
        assert_eq!(events.len(), 1);
        let step = state.step.unwrap();
        assert_eq!(step.status, StepStatus::Success);
    }

    #[test]
    fn unknown_stage_produces_no_events() {
        let mut state = ArtifactState::new();
        let events = dispatch_stage(&mut state, ToolExecutionId::new(), &serde_json::json!({ "stage": "something_else" }));
        assert!(events.is_empty());
    }

    #[test]
    fn missing_stage_produces_no_events() {
        let mut state = ArtifactState::new();
        let events = dispatch_stage(&mut state, ToolExecutionId::new(), &serde_json::json!({ "no_stage_here": true }));
        assert!(events.is_empty());
    }
}
