/// Shared error type used across every orchestrator crate.
///
/// The variants that matter to the loop's recovery logic (§7) are
/// [`Error::PlannerValidation`], [`Error::ToolResolve`], and
/// [`Error::ToolExecution`] — callers match on these to decide whether to
/// retry, surface an observation, or trip a circuit breaker. Everything
/// else is treated as fatal by the loop.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("planner validation [{code}]: {message}")]
    PlannerValidation {
        code: PlannerValidationCode,
        message: String,
    },

    #[error("tool resolve: {0}")]
    ToolResolve(String),

    #[error("tool execution ({transient}): {message}")]
    ToolExecution { transient: bool, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

/// §4.6: the three codes a planner validation failure can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerValidationCode {
    InputValidationError,
    ValidationError,
    MissingAction,
}

impl PlannerValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlannerValidationCode::InputValidationError => "input_validation_error",
            PlannerValidationCode::ValidationError => "validation_error",
            PlannerValidationCode::MissingAction => "missing_action",
        }
    }
}

impl std::fmt::Display for PlannerValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_code_renders_stable_string() {
        assert_eq!(
            PlannerValidationCode::MissingAction.as_str(),
            "missing_action"
        );
    }
}
