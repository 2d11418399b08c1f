//! Background Tasks (C10): fire-and-forget work the Agent Loop schedules
//! but never waits on — Judge scoring, title generation, slim context
//! snapshot persistence. Each gets its own storage session from the
//! `SessionFactory` so none of them share the loop's own session, and a
//! failure here never propagates to the user-visible turn (§5, §9).

use std::sync::Arc;

use aa_domain::collaborators::Storage;
use aa_domain::entities::ContextSnapshot;
use aa_domain::ids::{CompletionId, ReportId};
use async_trait::async_trait;

use super::SessionFactory;

/// Scores a turn. Concrete scoring logic is an external collaborator;
/// this crate only owns the scheduling contract from §4.7: one "early"
/// call when a loop iteration starts, one "late" call once the turn
/// finishes.
#[async_trait]
pub trait JudgeScorer: Send + Sync {
    async fn score_early(&self, storage: &dyn Storage, completion_id: CompletionId);
    async fn score_late(&self, storage: &dyn Storage, completion_id: CompletionId);
}

/// Drafts zero or more instruction suggestions after a successful turn
/// (§4.10). Concrete drafting logic is out of scope; this is the hook
/// the loop calls into once `analysis_complete` fires.
#[async_trait]
pub trait Suggester: Send + Sync {
    async fn suggest(&self, completion_id: CompletionId, final_answer: &str) -> Vec<String>;
}

/// Names a report from its first turn (§4.7 terminal handling).
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, report_id: ReportId, first_prompt: &str) -> Option<String>;
}

fn spawn_detached<Fut>(fut: Fut)
where
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

pub fn schedule_early_scoring(
    session_factory: &Arc<dyn SessionFactory>,
    judge: Option<Arc<dyn JudgeScorer>>,
    completion_id: CompletionId,
) {
    let Some(judge) = judge else { return };
    let storage = session_factory.new_session();
    spawn_detached(async move {
        judge.score_early(storage.as_ref(), completion_id).await;
    });
}

pub fn schedule_late_scoring(
    session_factory: &Arc<dyn SessionFactory>,
    judge: Option<Arc<dyn JudgeScorer>>,
    completion_id: CompletionId,
) {
    let Some(judge) = judge else { return };
    let storage = session_factory.new_session();
    spawn_detached(async move {
        judge.score_late(storage.as_ref(), completion_id).await;
    });
}

/// Fires a detached title-generation call. There's no `Storage` method to
/// write the result back against, so a generated title is only logged —
/// picking it up is left to whichever collaborator owns report metadata.
pub fn schedule_title_generation(
    generator: Option<Arc<dyn TitleGenerator>>,
    report_id: ReportId,
    first_prompt: String,
) {
    let Some(generator) = generator else { return };
    spawn_detached(async move {
        if let Some(title) = generator.generate(report_id, &first_prompt).await {
            tracing::info!(%report_id, title, "generated report title");
        }
    });
}

pub fn schedule_suggestions(
    suggester: Option<Arc<dyn Suggester>>,
    completion_id: CompletionId,
    final_answer: String,
) {
    let Some(suggester) = suggester else { return };
    spawn_detached(async move {
        let suggestions = suggester.suggest(completion_id, &final_answer).await;
        tracing::info!(%completion_id, count = suggestions.len(), "drafted instruction suggestions");
    });
}

/// Persists a context snapshot off the hot path (§4.7 steps 2/6: the
/// pre_tool and post_tool snapshots are taken mid-loop but don't need to
/// block the next iteration on a storage round-trip).
pub fn schedule_context_snapshot(session_factory: &Arc<dyn SessionFactory>, snapshot: ContextSnapshot) {
    let storage = session_factory.new_session();
    spawn_detached(async move {
        if let Err(err) = storage.save_context_snapshot(&snapshot).await {
            tracing::warn!(error = %err, "background context snapshot persistence failed");
        }
    });
}
