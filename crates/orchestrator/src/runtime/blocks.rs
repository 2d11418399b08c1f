//! Block Persistence (C9): the upsert keyed by a decision or tool link,
//! and the transcript rebuild that follows every write (§4.9).

use aa_domain::collaborators::Storage;
use aa_domain::entities::{BlockLink, BlockStatus, CompletionBlock};
use aa_domain::ids::{CompletionBlockId, CompletionId, PlanDecisionId, ToolExecutionId};
use aa_domain::Result;
use chrono::Utc;

/// Owns the single block for one decision, keyed by
/// `(completion_id, plan_decision_id)`. `block_index` and `decision_seq`
/// are pinned when the skeleton block is first created (I4) and never
/// change across the partial → final upserts that follow.
#[derive(Debug, Clone)]
pub struct DecisionBlockHandle {
    pub block_id: CompletionBlockId,
    pub completion_id: CompletionId,
    pub block_index: u32,
    pub decision_seq: u64,
}

impl DecisionBlockHandle {
    pub fn new(completion_id: CompletionId, block_index: u32, decision_seq: u64) -> Self {
        Self {
            block_id: CompletionBlockId::new(),
            completion_id,
            block_index,
            decision_seq,
        }
    }

    pub async fn upsert(
        &self,
        storage: &dyn Storage,
        plan_decision_id: PlanDecisionId,
        content: &str,
        reasoning: &str,
        status: BlockStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        storage
            .upsert_completion_block(&CompletionBlock {
                id: self.block_id,
                completion_id: self.completion_id,
                block_index: self.block_index,
                seq: self.decision_seq,
                link: BlockLink::Decision(plan_decision_id),
                content: content.to_string(),
                reasoning: reasoning.to_string(),
                status,
                error_message,
                created_at: now,
                updated_at: now,
            })
            .await
    }
}

/// The tool-block counterpart, keyed by `(completion_id, tool_execution_id)`.
/// Its `seq` is pinned at tool-finish time rather than at creation — a
/// tool's progress events arrive interleaved with other seqs, so the block
/// is stamped with whatever seq was current when the result landed.
#[derive(Debug, Clone)]
pub struct ToolBlockHandle {
    pub block_id: CompletionBlockId,
    pub completion_id: CompletionId,
    pub block_index: u32,
}

impl ToolBlockHandle {
    pub fn new(completion_id: CompletionId, block_index: u32) -> Self {
        Self {
            block_id: CompletionBlockId::new(),
            completion_id,
            block_index,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        storage: &dyn Storage,
        tool_execution_id: ToolExecutionId,
        seq: u64,
        content: &str,
        reasoning: &str,
        status: BlockStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        storage
            .upsert_completion_block(&CompletionBlock {
                id: self.block_id,
                completion_id: self.completion_id,
                block_index: self.block_index,
                seq,
                link: BlockLink::Tool(tool_execution_id),
                content: content.to_string(),
                reasoning: reasoning.to_string(),
                status,
                error_message,
                created_at: now,
                updated_at: now,
            })
            .await
    }
}

/// Rewrites the completion's textual content from its ordered blocks
/// (P7: idempotent across repeated calls over an unchanged block set).
pub async fn rebuild_transcript(storage: &dyn Storage, completion_id: CompletionId) -> Result<String> {
    storage.rebuild_transcript(completion_id).await
}
