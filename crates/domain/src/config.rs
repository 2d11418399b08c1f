//! Ambient configuration for the orchestrator. Every sub-config follows
//! the same shape: `#[serde(default = "d_fn")]` per field plus a manual
//! `Default` impl that calls the same `d_fn`s, so a partial TOML/YAML
//! document and `Config::default()` agree on every value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent_loop: AgentLoopConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub tool_policy: ToolPolicy,
}

impl Config {
    /// Checks cross-field constraints the individual `Default` impls
    /// can't express on their own. Mirrors the severity split used by
    /// deployment tooling: warnings are logged, errors abort startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.agent_loop.step_limit == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "agent_loop.step_limit must be at least 1".into(),
            });
        }
        if self.agent_loop.tool_failure_breaker == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "agent_loop.tool_failure_breaker=0 trips on the first tool failure"
                    .into(),
            });
        }
        if self.tools.retry.max_attempts == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "tools.retry.max_attempts must be at least 1".into(),
            });
        }
        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent Loop (C7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Maximum planner iterations per turn (§4.7, P3).
    #[serde(default = "d_step_limit")]
    pub step_limit: u32,
    /// Consecutive invalid planner outputs tolerated before the loop
    /// synthesizes a terminal decision (§4.6, P3).
    #[serde(default = "d_max_invalid_retries")]
    pub max_invalid_retries: u32,
    /// Failures of a single tool within one turn before the per-tool
    /// breaker trips (§4.7, P4).
    #[serde(default = "d_tool_failure_breaker")]
    pub tool_failure_breaker: u32,
    /// How many trailing identical `(tool, args-hash)` signatures trip
    /// the repeat-success breaker (§4.7, P5).
    #[serde(default = "d_repeat_success_window")]
    pub repeat_success_window: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            step_limit: d_step_limit(),
            max_invalid_retries: d_max_invalid_retries(),
            tool_failure_breaker: d_tool_failure_breaker(),
            repeat_success_window: d_repeat_success_window(),
        }
    }
}

fn d_step_limit() -> u32 {
    10
}
fn d_max_invalid_retries() -> u32 {
    2
}
fn d_tool_failure_breaker() -> u32 {
    3
}
fn d_repeat_success_window() -> usize {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context Hub (C1-C4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Top-K tables rendered in full per data source in "sample" mode (§4.2).
    #[serde(default = "d_schema_sample_k")]
    pub schema_sample_k: usize,
    /// Hard cap on table names listed in "index" mode (§4.2).
    #[serde(default = "d_schema_index_limit")]
    pub schema_index_limit: usize,
    /// Same pattern as schemas, applied to repository resources (§4.2).
    #[serde(default = "d_resource_sample_k")]
    pub resource_sample_k: usize,
    #[serde(default = "d_resource_index_limit")]
    pub resource_index_limit: usize,
    /// Hard character cap on the rendered Messages section (§4.2).
    #[serde(default = "d_messages_char_cap")]
    pub messages_char_cap: usize,
    /// Last-N prior messages considered by the Message Builder (§4.3).
    #[serde(default = "d_messages_max")]
    pub messages_max: usize,
    /// Ring size for the Observations section (§4.4).
    #[serde(default = "d_observations_max")]
    pub observations_max: usize,
    /// Cap on `intelligent` + `always` instructions sent to the planner (§4.3).
    #[serde(default = "d_max_instructions_in_context")]
    pub max_instructions_in_context: usize,
    /// Secondary substring-match weight used by the instruction scorer (§4.3).
    #[serde(default = "d_instruction_substring_weight")]
    pub instruction_substring_weight: f64,
    /// Fallback tokenizer divisor when a model id has no known tokenizer (§4.1, §9 open question).
    #[serde(default = "d_fallback_chars_per_token")]
    pub fallback_chars_per_token: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            schema_sample_k: d_schema_sample_k(),
            schema_index_limit: d_schema_index_limit(),
            resource_sample_k: d_resource_sample_k(),
            resource_index_limit: d_resource_index_limit(),
            messages_char_cap: d_messages_char_cap(),
            messages_max: d_messages_max(),
            observations_max: d_observations_max(),
            max_instructions_in_context: d_max_instructions_in_context(),
            instruction_substring_weight: d_instruction_substring_weight(),
            fallback_chars_per_token: d_fallback_chars_per_token(),
        }
    }
}

fn d_schema_sample_k() -> usize {
    8
}
fn d_schema_index_limit() -> usize {
    200
}
fn d_resource_sample_k() -> usize {
    8
}
fn d_resource_index_limit() -> usize {
    200
}
fn d_messages_char_cap() -> usize {
    8000
}
fn d_messages_max() -> usize {
    20
}
fn d_observations_max() -> usize {
    8
}
fn d_max_instructions_in_context() -> usize {
    50
}
fn d_instruction_substring_weight() -> f64 {
    0.8
}
fn d_fallback_chars_per_token() -> f64 {
    4.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool Registry & Runner (C5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub timeout: TimeoutPolicy,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: TimeoutPolicy::default(),
        }
    }
}

/// §4.5 default: max 2 attempts, 500ms base, x2 multiplier, ±200ms jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "d_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_retry_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "d_retry_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "d_retry_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: d_retry_max_attempts(),
            backoff_ms: d_retry_backoff_ms(),
            backoff_multiplier: d_retry_backoff_multiplier(),
            jitter_ms: d_retry_jitter_ms(),
        }
    }
}

fn d_retry_max_attempts() -> u32 {
    2
}
fn d_retry_backoff_ms() -> u64 {
    500
}
fn d_retry_backoff_multiplier() -> f64 {
    2.0
}
fn d_retry_jitter_ms() -> u64 {
    200
}

/// §4.5 default: 5s start / 30s idle / 120s hard cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default = "d_start_timeout_s")]
    pub start_timeout_s: u64,
    #[serde(default = "d_idle_timeout_s")]
    pub idle_timeout_s: u64,
    #[serde(default = "d_hard_timeout_s")]
    pub hard_timeout_s: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            start_timeout_s: d_start_timeout_s(),
            idle_timeout_s: d_idle_timeout_s(),
            hard_timeout_s: d_hard_timeout_s(),
        }
    }
}

fn d_start_timeout_s() -> u64 {
    5
}
fn d_idle_timeout_s() -> u64 {
    30
}
fn d_hard_timeout_s() -> u64 {
    120
}

/// Allow/deny list gating which tools the registry exposes (deny wins,
/// case-insensitive, namespace-prefix matching: `"exec"` denies `"exec.foo"`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();
        let matches = |pattern: &str| {
            let pattern = pattern.to_ascii_lowercase();
            name == pattern || name.starts_with(&format!("{pattern}."))
        };
        if self.deny.iter().any(|p| matches(p)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| matches(p))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planner Driver (C6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "d_planner_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Model id → context window, used by the Token Counter (C1) to
    /// compute `remaining_tokens`. Unknown ids fall back to
    /// `context.fallback_chars_per_token`-based estimation (§9).
    #[serde(default)]
    pub model_context_windows: HashMap<String, u32>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_planner_timeout_ms(),
            model_context_windows: HashMap::new(),
        }
    }
}

fn d_planner_timeout_ms() -> u64 {
    20_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// OpenTelemetry observability configuration. When `otlp_endpoint` is
/// `None` (the default), no OTel exporter starts and the process logs
/// structured JSON only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Trace sampling rate (`0.0` = never, `1.0` = always), via
    /// `TraceIdRatioBased` sampling so the decision is consistent across
    /// an entire trace.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_service_name() -> String {
    "ai-analyst-orchestrator".into()
}
fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_validation_issues() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn tool_policy_deny_wins_over_allow() {
        let policy = ToolPolicy {
            allow: vec!["exec".into()],
            deny: vec!["exec.dangerous".into()],
        };
        assert!(policy.allows("exec.safe"));
        assert!(!policy.allows("exec.dangerous"));
        assert!(!policy.allows("exec.dangerous.nested"));
    }

    #[test]
    fn tool_policy_namespace_prefix_is_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["Exec".into()],
        };
        assert!(!policy.allows("exec.run"));
        assert!(policy.allows("memory.search"));
    }

    #[test]
    fn empty_allow_list_permits_everything_not_denied() {
        let policy = ToolPolicy::default();
        assert!(policy.allows("anything.goes"));
    }

    #[test]
    fn zero_step_limit_is_a_validation_error() {
        let mut cfg = Config::default();
        cfg.agent_loop.step_limit = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn toml_round_trip_fills_in_defaults() {
        let cfg: AgentLoopConfig = toml::from_str("step_limit = 5").unwrap();
        assert_eq!(cfg.step_limit, 5);
        assert_eq!(cfg.max_invalid_retries, 2);
    }
}
