//! The Context Hub (C4): owns the static and warm section caches for one
//! turn, fans out to the Section Builders, and assembles the rendered
//! context the Planner Driver sees. A builder's failure never reaches a
//! caller of the Hub — it degrades to an empty section and a logged
//! warning (§4.3, §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use aa_domain::collaborators::Storage;
use aa_domain::config::ContextConfig;
use aa_domain::entities::{ContextSnapshot, ContextSnapshotKind, ObservationPolicy};
use aa_domain::ids::{AgentExecutionId, CompletionId, ContextSnapshotId, ReportId};

use crate::builders::{
    self, ObservationAccumulator, SchemaFilter,
};
use crate::sections::Section;
use crate::token::count_tokens;

/// Parameters that don't change across a turn's loop iterations; bundled
/// so `prime_static` doesn't need a dozen positional arguments.
#[derive(Debug, Clone)]
pub struct TurnInputs {
    pub report_id: ReportId,
    pub completion_id: CompletionId,
    /// The user query instructions are matched against. `None` means no
    /// query is present at all (distinct from an empty/non-matching
    /// string) and triggers the Instruction Builder's fill-to-max path
    /// (§4.3, scenario 6) instead of keyword scoring.
    pub prompt: Option<String>,
    pub build_id: Option<String>,
    pub schema_filter: SchemaFilter,
}

/// Read-only composite of every section currently cached. Handed to the
/// Planner Driver (C6) for prompt assembly.
pub struct ContextView<'a> {
    pub static_sections: &'a HashMap<&'static str, Section>,
    pub warm_sections: &'a HashMap<&'static str, Section>,
}

impl<'a> ContextView<'a> {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.static_sections
            .get(name)
            .or_else(|| self.warm_sections.get(name))
    }

    pub fn render_all(&self, config: &ContextConfig) -> String {
        let mut out = String::new();
        for section in self.static_sections.values() {
            out.push_str(&section.render(config));
        }
        for section in self.warm_sections.values() {
            out.push_str(&section.render(config));
        }
        out
    }
}

pub struct ContextHub {
    storage: Arc<dyn Storage>,
    static_cache: HashMap<&'static str, Section>,
    warm_cache: HashMap<&'static str, Section>,
    observations: ObservationAccumulator,
}

impl ContextHub {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            static_cache: HashMap::new(),
            warm_cache: HashMap::new(),
            observations: ObservationAccumulator::new(),
        }
    }

    /// Fan out to every static builder in parallel and cache what comes
    /// back. A builder that errors logs a warning and the section is
    /// simply absent from the cache (render treats a missing section as
    /// empty) rather than failing the whole prime (§4.3).
    pub async fn prime_static(&mut self, inputs: &TurnInputs, config: &ContextConfig) {
        let (schemas, instructions, messages, resources, mentions, entities, files, widgets, queries, code) = tokio::join!(
            builders::build_schemas(self.storage.as_ref(), inputs.report_id, &inputs.schema_filter),
            builders::build_instructions(
                self.storage.as_ref(),
                inputs.report_id,
                inputs.build_id.as_deref(),
                inputs.prompt.as_deref(),
                config.max_instructions_in_context,
                config.instruction_substring_weight,
            ),
            builders::build_messages(
                self.storage.as_ref(),
                inputs.report_id,
                inputs.completion_id,
                config.messages_max,
            ),
            builders::build_resources(self.storage.as_ref(), inputs.report_id),
            builders::build_mentions(self.storage.as_ref(), inputs.completion_id),
            builders::build_entities(self.storage.as_ref(), inputs.report_id),
            builders::build_files(self.storage.as_ref(), inputs.report_id),
            builders::build_widgets(self.storage.as_ref(), inputs.report_id),
            builders::build_queries(self.storage.as_ref(), inputs.report_id),
            builders::build_code(self.storage.as_ref(), inputs.report_id),
        );

        self.store_static("schemas", schemas);
        self.store_static("instructions", instructions);
        self.store_static("messages", messages);
        self.store_static("resources", resources);
        self.store_static("mentions", mentions);
        self.store_static("entities", entities);
        self.store_static("files", files);
        self.store_static("widgets", widgets);
        self.store_static("queries", queries);
        self.store_static("code", code);
    }

    fn store_static(&mut self, name: &'static str, result: aa_domain::Result<Section>) {
        match result {
            Ok(section) => {
                self.static_cache.insert(name, section);
            }
            Err(err) => {
                tracing::warn!(section = name, error = %err, "section builder failed, omitting section");
            }
        }
    }

    pub fn add_tool_observation(
        &mut self,
        tool_name: impl Into<String>,
        status: impl Into<String>,
        summary: impl Into<String>,
        policy: ObservationPolicy,
    ) {
        self.observations
            .add_tool_observation(tool_name, status, summary, policy);
    }

    /// Refreshes sections that can change between loop iterations.
    /// Called every iteration after the first (§5): iteration 0 only has
    /// `prime_static`'s output since no tool has run yet.
    pub fn refresh_warm(&mut self, observations_max: usize) {
        self.observations.truncate_to(observations_max);
        self.warm_cache.insert("observations", self.observations.build());
    }

    pub fn get_view(&self) -> ContextView<'_> {
        ContextView {
            static_sections: &self.static_cache,
            warm_sections: &self.warm_cache,
        }
    }

    pub fn build_context(&self, config: &ContextConfig) -> String {
        self.get_view().render_all(config)
    }

    /// A slim, usage-only snapshot: section name to token count rather
    /// than full rendered content, to keep persisted snapshots small
    /// (§4.4, §6). `kind`/`loop_index` identify where in the turn this
    /// checkpoint was taken.
    pub fn slim_snapshot(
        &self,
        agent_execution_id: AgentExecutionId,
        kind: ContextSnapshotKind,
        loop_index: u32,
        model_id: Option<&str>,
        config: &ContextConfig,
    ) -> ContextSnapshot {
        let view = self.get_view();
        let mut usage = serde_json::Map::new();
        for (name, section) in view.static_sections.iter().chain(view.warm_sections.iter()) {
            let rendered = section.render(config);
            usage.insert(
                (*name).to_string(),
                serde_json::json!(count_tokens(&rendered, model_id, config)),
            );
        }
        ContextSnapshot {
            id: ContextSnapshotId::new(),
            agent_execution_id,
            kind,
            loop_index,
            payload: serde_json::Value::Object(usage),
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_domain::collaborators::*;
    use aa_domain::entities::{CompletionBlock, CompletionStatus, PlanDecision, ToolExecution};
    use async_trait::async_trait;

    struct EmptyStorage;

    #[async_trait]
    impl Storage for EmptyStorage {
        async fn fetch_schema_tables(
            &self,
            _report_id: ReportId,
            _data_source_ids: &[String],
            _user_id: Option<&str>,
        ) -> aa_domain::Result<Vec<RawTable>> {
            Ok(vec![])
        }
        async fn fetch_instructions(
            &self,
            _report_id: ReportId,
            _build_id: Option<&str>,
        ) -> aa_domain::Result<Vec<RawInstruction>> {
            Ok(vec![])
        }
        async fn fetch_prior_completions(
            &self,
            _report_id: ReportId,
            _exclude_completion_id: CompletionId,
            _limit: usize,
        ) -> aa_domain::Result<Vec<RawCompletionRecord>> {
            Ok(vec![])
        }
        async fn fetch_resources(&self, _report_id: ReportId) -> aa_domain::Result<Vec<RawResource>> {
            Ok(vec![])
        }
        async fn fetch_mentions(&self, _completion_id: CompletionId) -> aa_domain::Result<Vec<RawMention>> {
            Ok(vec![])
        }
        async fn fetch_entities(&self, _report_id: ReportId) -> aa_domain::Result<Vec<RawEntity>> {
            Ok(vec![])
        }
        async fn fetch_files(&self, _report_id: ReportId) -> aa_domain::Result<Vec<RawFile>> {
            Ok(vec![])
        }
        async fn fetch_widgets(&self, _report_id: ReportId) -> aa_domain::Result<Vec<RawWidget>> {
            Ok(vec![])
        }
        async fn fetch_queries(&self, _report_id: ReportId) -> aa_domain::Result<Vec<RawQuery>> {
            Ok(vec![])
        }
        async fn fetch_code(&self, _report_id: ReportId) -> aa_domain::Result<Vec<RawCode>> {
            Ok(vec![])
        }
        async fn count_prior_turns(&self, _report_id: ReportId) -> aa_domain::Result<u32> {
            Ok(0)
        }
        async fn upsert_plan_decision(&self, _decision: &PlanDecision) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn upsert_completion_block(&self, _block: &CompletionBlock) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn upsert_tool_execution(&self, _execution: &ToolExecution) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn rebuild_transcript(&self, _completion_id: CompletionId) -> aa_domain::Result<String> {
            Ok(String::new())
        }
        async fn set_completion_status(
            &self,
            _completion_id: CompletionId,
            _status: CompletionStatus,
        ) -> aa_domain::Result<()> {
            Ok(())
        }
        async fn save_context_snapshot(&self, _snapshot: &ContextSnapshot) -> aa_domain::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn prime_static_populates_every_static_section() {
        let mut hub = ContextHub::new(Arc::new(EmptyStorage));
        let inputs = TurnInputs {
            report_id: ReportId::new(),
            completion_id: CompletionId::new(),
            prompt: Some("hello".into()),
            build_id: None,
            schema_filter: SchemaFilter::default(),
        };
        hub.prime_static(&inputs, &ContextConfig::default()).await;
        let view = hub.get_view();
        assert!(view.section("schemas").is_some());
        assert!(view.section("messages").is_some());
        assert!(view.section("observations").is_none());
    }

    #[tokio::test]
    async fn refresh_warm_caps_observations_and_adds_section() {
        let mut hub = ContextHub::new(Arc::new(EmptyStorage));
        for i in 0..10 {
            hub.add_tool_observation(format!("tool_{i}"), "success", "ok", ObservationPolicy::OnTrigger);
        }
        hub.refresh_warm(8);
        let view = hub.get_view();
        let Some(Section::Observations(s)) = view.section("observations") else {
            panic!("missing observations section")
        };
        assert_eq!(s.items.len(), 8);
    }

    #[tokio::test]
    async fn slim_snapshot_reports_token_counts_not_raw_content() {
        let mut hub = ContextHub::new(Arc::new(EmptyStorage));
        let inputs = TurnInputs {
            report_id: ReportId::new(),
            completion_id: CompletionId::new(),
            prompt: Some("hello".into()),
            build_id: None,
            schema_filter: SchemaFilter::default(),
        };
        hub.prime_static(&inputs, &ContextConfig::default()).await;
        let snapshot = hub.slim_snapshot(
            AgentExecutionId::new(),
            ContextSnapshotKind::Initial,
            0,
            Some("gpt-4o"),
            &ContextConfig::default(),
        );
        let obj = snapshot.payload.as_object().unwrap();
        assert!(obj.get("schemas").unwrap().is_number());
    }
}
