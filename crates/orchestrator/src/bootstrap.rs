//! Engine construction shared by every CLI subcommand that needs a live
//! [`Engine`] (`run`, `doctor`). Validates config the same way a real
//! deployment would before wiring in whichever collaborators the caller
//! provides — the demo binary always reaches for [`crate::demo`].

use std::sync::Arc;

use aa_domain::collaborators::{Storage, Watcher};
use aa_domain::config::{Config, ConfigSeverity};
use aa_planner::LlmStream;
use aa_tools::{ToolExecutor, ToolRegistry};

use aa_orchestrator::runtime::SharedSessionFactory;
use aa_orchestrator::state::Engine;

/// Validates `config`, logging every issue, and fails hard if any issue
/// is `Error` severity. Mirrors how a real deployment gates startup on
/// its own config checks.
pub fn validate_or_bail(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }
    Ok(())
}

/// Wires a fully usable [`Engine`] around the given collaborators. The
/// storage handle doubles as the session factory's shared backend, which
/// is correct for any storage implementation that's already safe to use
/// concurrently (a pooled database client, for instance) — callers with
/// a storage backend that needs per-task isolation should build their
/// own [`crate::runtime::SessionFactory`] instead.
pub fn build_engine(
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    watcher: Arc<dyn Watcher>,
    llm: Arc<dyn LlmStream>,
    tool_executor: Arc<dyn ToolExecutor>,
    tool_registry: Arc<ToolRegistry>,
) -> Engine {
    let session_factory = Arc::new(SharedSessionFactory(storage.clone()));
    Engine::new(storage, watcher, session_factory, llm, tool_executor, tool_registry, config)
}
