//! Per-turn runtime — ties the Context Hub, Planner Driver, and Tool Runner
//! into one cancellable execution. Entry point: [`run_turn`] takes a
//! [`turn::TurnInput`] and returns an [`events::EventSource`] of SSE-shaped
//! [`events::Event`]s.

pub mod artifacts;
pub mod blocks;
pub mod cancel;
pub mod events;
pub mod tasks;
pub mod turn;

pub use turn::{run_turn, TurnInput};

use std::sync::Arc;

use aa_domain::collaborators::Storage;

/// Hands out an isolated storage session for a background task (§5, §9).
/// A task obtained this way never shares the calling loop's own session,
/// so a slow or failing background write can't stall or corrupt the
/// turn's own persistence.
pub trait SessionFactory: Send + Sync {
    fn new_session(&self) -> Arc<dyn Storage>;
}

/// The common case: every session is the same shared handle. Useful for
/// storage backends that are already safe to use concurrently (a
/// connection-pooled database client, for instance).
pub struct SharedSessionFactory(pub Arc<dyn Storage>);

impl SessionFactory for SharedSessionFactory {
    fn new_session(&self) -> Arc<dyn Storage> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_domain::collaborators::*;
    use aa_domain::entities::{CompletionBlock, CompletionStatus, ContextSnapshot, PlanDecision, ToolExecution};
    use aa_domain::ids::{CompletionId, ReportId};
    use async_trait::async_trait;

    struct NullStorage;

    #[async_trait]
    impl Storage for NullStorage {
        async fn fetch_schema_tables(&self, _: ReportId, _: &[String], _: Option<&str>) -> aa_domain::Result<Vec<RawTable>> {
            Ok(vec![])
        }
        async fn fetch_instructions(&self, _: ReportId, _: Option<&str>) -> aa_domain::Result<Vec<RawInstruction>> {
            Ok(vec![])
        }
        async fn fetch_prior_completions(&self, _: ReportId, _: CompletionId, _: usize) -> aa_domain::Result<Vec<RawCompletionRecord>> {
            Ok(vec![])
        }
        async fn fetch_resources(&self, _: ReportId) -> aa_domain::Result<Vec<RawResource>> {
            Ok(vec![])
        }
        async fn fetch_mentions(&self, _: CompletionId) -> aa_domain::Result<Vec<RawMention>> {
            Ok(vec![])
        }
        async fn fetch_entities(&self, _: ReportId) -> aa_domain::Result<Vec<RawEntity>> {
            Ok(vec![])
        }
        async fn fetch_files(&self, _: ReportId) -> aa_domain::Result<Vec<RawFile>> {
            Ok(vec![])
        }
        async fn fetch_widgets(&self, _: ReportId) -> aa_domain::Result<Vec<RawWidget>> {
            Ok(vec![])
        }
        async fn fetch_queries(&self, _: ReportId) -> aa_domain::Result<Vec<RawQuery>> {
            Ok(vec![])
        }
        async fn fetch_code(&self, _: ReportId) -> aa_domain::Result<Vec<RawCode>> {
            Ok(vec![])
        }
        async fn count_prior_turns(&self, _: ReportId) -> aa_domain::Result<u32> {
            Ok(0)
        }
        async fn upsert_plan_decision(&self, _: &PlanDecision) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn upsert_completion_block(&self, _: &CompletionBlock) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn upsert_tool_execution(&self, _: &ToolExecution) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn rebuild_transcript(&self, _: CompletionId) -> aa_domain::Result<String> {
            Ok(String::new())
        }
        async fn set_completion_status(&self, _: CompletionId, _: CompletionStatus) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn save_context_snapshot(&self, _: &ContextSnapshot) -> aa_domain::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn shared_session_factory_returns_the_same_handle() {
        let storage: Arc<dyn Storage> = Arc::new(NullStorage);
        let factory = SharedSessionFactory(storage.clone());
        let a = factory.new_session();
        let b = factory.new_session();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &storage));
    }
}
