use std::sync::Arc;

use aa_domain::collaborators::{Storage, Watcher};
use aa_domain::config::Config;
use aa_planner::LlmStream;
use aa_tools::{ToolExecutor, ToolRegistry, ToolRunner};

use crate::runtime::cancel::CancelMap;
use crate::runtime::tasks::{JudgeScorer, Suggester, TitleGenerator};
use crate::runtime::SessionFactory;

/// Everything the Agent Loop needs across the lifetime of the process,
/// wired once at startup and shared behind an `Arc` by every running turn.
///
/// Collaborators the loop only consumes through a trait (storage, the LLM,
/// tool execution, scheduling) live here; per-turn state lives in
/// `runtime::turn` instead.
pub struct Engine {
    pub storage: Arc<dyn Storage>,
    pub watcher: Arc<dyn Watcher>,
    pub session_factory: Arc<dyn SessionFactory>,
    pub llm: Arc<dyn LlmStream>,
    pub tool_runner: Arc<ToolRunner>,
    pub tool_registry: Arc<ToolRegistry>,
    pub config: Arc<Config>,
    pub cancel_map: Arc<CancelMap>,
    pub judge: Option<Arc<dyn JudgeScorer>>,
    pub suggester: Option<Arc<dyn Suggester>>,
    pub title_generator: Option<Arc<dyn TitleGenerator>>,
}

impl Engine {
    pub fn new(
        storage: Arc<dyn Storage>,
        watcher: Arc<dyn Watcher>,
        session_factory: Arc<dyn SessionFactory>,
        llm: Arc<dyn LlmStream>,
        tool_executor: Arc<dyn ToolExecutor>,
        tool_registry: Arc<ToolRegistry>,
        config: Arc<Config>,
    ) -> Self {
        let tool_runner = Arc::new(ToolRunner::new(
            tool_executor,
            config.tools.retry.clone(),
            config.tools.timeout.clone(),
        ));
        Self {
            storage,
            watcher,
            session_factory,
            llm,
            tool_runner,
            tool_registry,
            config,
            cancel_map: Arc::new(CancelMap::new()),
            judge: None,
            suggester: None,
            title_generator: None,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgeScorer>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn Suggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn with_title_generator(mut self, title_generator: Arc<dyn TitleGenerator>) -> Self {
        self.title_generator = Some(title_generator);
        self
    }
}
