//! Section Builders (C3). Each builder is a pure-ish async function that
//! turns collaborator data into one [`Section`] value. Builders never
//! panic and never need to be infallible themselves — the Context Hub
//! treats a builder's `Err` as "render an empty section" (§4.3) — but a
//! builder that can easily avoid an error should.

use std::collections::HashSet;

use aa_domain::collaborators::Storage;
use aa_domain::entities::{LoadMode, ObservationPolicy};
use aa_domain::ids::{CompletionId, ReportId};
use aa_domain::Result;
use regex::Regex;

use crate::sections::{
    ColumnInfo, CodeItem, CodeSection, DataSourceSchema, EntitiesSection, EntityItem, FileItem,
    FilesSection, InstructionItem, InstructionsSection, MentionItem, MentionsSection, MessageItem,
    MessageRole, MessagesSection, ObservationItem, ObservationsSection, QueriesSection, QueryItem,
    ResourceItem, ResourcesSection, Section, TableInfo, WidgetItem, WidgetsSection,
};
use crate::truncation::take_last;

/// How the Schema Builder orders tables within a data source before
/// truncating to `schema_sample_k` (§4.3 open question, resolved here:
/// default is the composite score; the others are available for callers
/// that know better, e.g. an explicit user request for "alphabetical").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSortMode {
    Score,
    Alpha,
    Usage,
}

/// Narrows which tables the Schema Builder considers: an explicit data
/// source allowlist and/or a table-name regex (§4.3).
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    pub data_source_ids: Vec<String>,
    pub table_name_regex: Option<String>,
    pub user_id: Option<String>,
    pub sort: Option<SchemaSortMode>,
}

fn schema_score(table: &aa_domain::collaborators::RawTable) -> f64 {
    let recency_factor = 1.0 / (1.0 + table.recency_days.max(0.0));
    (table.usage_count as f64 * recency_factor)
        + table.success_rate
        + table.feedback_score
        + table.structural_signal
        - table.failure_penalty
}

/// Builds the Schemas section: fetches candidate tables, scores and
/// ranks them, and groups them back into per-data-source schemas. The
/// caller (Context Hub) applies `schema_sample_k`/`schema_index_limit`
/// at render time, so this builder keeps every table that passed the
/// filter, ranked best-first (§4.2, §4.3).
pub async fn build_schemas(
    storage: &dyn Storage,
    report_id: ReportId,
    filter: &SchemaFilter,
) -> Result<Section> {
    let tables = storage
        .fetch_schema_tables(report_id, &filter.data_source_ids, filter.user_id.as_deref())
        .await?;

    let name_re = match &filter.table_name_regex {
        Some(pattern) => Some(
            Regex::new(pattern)
                .map_err(|e| aa_domain::Error::Fatal(format!("invalid table_name_regex: {e}")))?,
        ),
        None => None,
    };

    let mut by_source: Vec<((String, String), Vec<(f64, TableInfo)>)> = Vec::new();
    for raw in &tables {
        if let Some(re) = &name_re {
            if !re.is_match(&raw.table_name) {
                continue;
            }
        }
        let score = schema_score(raw);
        let info = TableInfo {
            name: raw.table_name.clone(),
            columns: raw
                .columns
                .iter()
                .map(|(name, data_type)| ColumnInfo {
                    name: name.clone(),
                    data_type: data_type.clone(),
                })
                .collect(),
            primary_keys: raw.primary_keys.clone(),
            foreign_keys: raw.foreign_keys.clone(),
            usage_count: Some(raw.usage_count),
        };
        let key = (raw.data_source_id.clone(), raw.data_source_name.clone());
        match by_source.iter_mut().find(|(k, _)| *k == key) {
            Some((_, entries)) => entries.push((score, info)),
            None => by_source.push((key, vec![(score, info)])),
        }
    }

    let sort = filter.sort.unwrap_or(SchemaSortMode::Score);
    let mut data_sources = Vec::with_capacity(by_source.len());
    for ((data_source_id, data_source_name), mut scored) in by_source {
        match sort {
            SchemaSortMode::Score => {
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal))
            }
            SchemaSortMode::Alpha => scored.sort_by(|a, b| a.1.name.cmp(&b.1.name)),
            SchemaSortMode::Usage => scored.sort_by(|a, b| {
                b.1.usage_count
                    .unwrap_or(0)
                    .cmp(&a.1.usage_count.unwrap_or(0))
            }),
        }
        data_sources.push(DataSourceSchema {
            data_source_id,
            data_source_name,
            tables: scored.into_iter().map(|(_, t)| t).collect(),
        });
    }

    Ok(Section::Schemas(crate::sections::SchemasSection { data_sources }))
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn keywords(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

/// Builds the Instructions section. `always_load` instructions are kept
/// unconditionally; when a query is present, the rest are scored against
/// it via a Jaccard keyword match plus a substring-match bonus weighted by
/// `instruction_substring_weight`, and only those that score above zero
/// are kept. When no query is present at all (`prompt = None`) there is
/// nothing to score against, so the remaining slots up to
/// `max_instructions_in_context` are filled from the non-disabled,
/// non-always instructions in their original order, tagged
/// `load_reason="fill"` (§4.3, scenario 6). Either way the combined list
/// is capped at `max_instructions_in_context`.
pub async fn build_instructions(
    storage: &dyn Storage,
    report_id: ReportId,
    build_id: Option<&str>,
    prompt: Option<&str>,
    max_instructions: usize,
    substring_weight: f64,
) -> Result<Section> {
    let raw = storage.fetch_instructions(report_id, build_id).await?;

    let mut always = Vec::new();
    let mut rest = Vec::new();
    for instr in raw.into_iter().filter(|i| !i.disabled) {
        if instr.always_load {
            always.push(InstructionItem {
                id: instr.id,
                text: instr.text,
                category: instr.category,
                load_mode: LoadMode::Always,
                load_reason: "always".into(),
            });
        } else {
            rest.push(instr);
        }
    }

    let remaining = max_instructions.saturating_sub(always.len());
    let mut items = always;

    match prompt {
        Some(prompt) => {
            let prompt_keywords = keywords(prompt);
            let prompt_lower = prompt.to_lowercase();
            let mut scored = Vec::new();
            for instr in rest {
                let instr_keywords = keywords(&instr.text);
                let mut score = jaccard(&prompt_keywords, &instr_keywords);
                if prompt_lower.contains(&instr.text.to_lowercase())
                    || instr_keywords.iter().any(|k| prompt_lower.contains(k.as_str()))
                {
                    score += substring_weight;
                }
                if score > 0.0 {
                    scored.push((
                        score,
                        InstructionItem {
                            id: instr.id,
                            text: instr.text,
                            category: instr.category,
                            load_mode: LoadMode::Intelligent,
                            load_reason: format!("search_match:{score:.3}"),
                        },
                    ));
                }
            }
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            for (_, item) in scored.into_iter().take(remaining) {
                items.push(item);
            }
        }
        None => {
            for instr in rest.into_iter().take(remaining) {
                items.push(InstructionItem {
                    id: instr.id,
                    text: instr.text,
                    category: instr.category,
                    load_mode: LoadMode::Intelligent,
                    load_reason: "fill".into(),
                });
            }
        }
    }

    Ok(Section::Instructions(InstructionsSection { items }))
}

/// Builds the Messages section from prior completions in the report,
/// excluding the still-open current completion (§4.3). Caps to the most
/// recent `messages_max` entries before rendering applies its own
/// character cap.
pub async fn build_messages(
    storage: &dyn Storage,
    report_id: ReportId,
    current_completion_id: CompletionId,
    messages_max: usize,
) -> Result<Section> {
    let raw = storage
        .fetch_prior_completions(report_id, current_completion_id, messages_max)
        .await?;
    let items: Vec<MessageItem> = raw
        .into_iter()
        .map(|r| MessageItem {
            role: if r.role_is_user {
                MessageRole::User
            } else {
                MessageRole::Assistant
            },
            timestamp: r.created_at,
            content: r.text,
            mentions: r.mentions,
        })
        .collect();
    let items = take_last(items, messages_max);
    Ok(Section::Messages(MessagesSection { items }))
}

/// Accumulates tool observations over the course of one turn. Not
/// storage-backed: the Agent Loop feeds it directly as tools finish,
/// and the Context Hub asks it for a [`Section`] snapshot on demand
/// (§4.4). The Hub is responsible for capping stored entries at
/// `observations_max`; the ring itself keeps everything it's given.
#[derive(Debug, Clone, Default)]
pub struct ObservationAccumulator {
    items: Vec<ObservationItem>,
}

impl ObservationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tool_observation(
        &mut self,
        tool_name: impl Into<String>,
        status: impl Into<String>,
        summary: impl Into<String>,
        observation_policy: ObservationPolicy,
    ) {
        self.items.push(ObservationItem {
            tool_name: tool_name.into(),
            status: status.into(),
            summary: summary.into(),
            observation_policy,
        });
    }

    /// Drops everything but the most recent `cap` entries. Called by the
    /// Hub after every tool finishes so the accumulator never grows past
    /// `observations_max` even across a long-running turn.
    pub fn truncate_to(&mut self, cap: usize) {
        if self.items.len() > cap {
            let drop = self.items.len() - cap;
            self.items.drain(0..drop);
        }
    }

    pub fn build(&self) -> Section {
        Section::Observations(ObservationsSection {
            items: self.items.clone(),
        })
    }
}

pub async fn build_resources(storage: &dyn Storage, report_id: ReportId) -> Result<Section> {
    let mut raw = storage.fetch_resources(report_id).await?;
    raw.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
    let resources = raw
        .into_iter()
        .map(|r| ResourceItem {
            name: r.name,
            kind: r.kind,
            usage_count: Some(r.usage_count),
        })
        .collect();
    Ok(Section::Resources(ResourcesSection { resources }))
}

pub async fn build_mentions(
    storage: &dyn Storage,
    completion_id: CompletionId,
) -> Result<Section> {
    let raw = storage.fetch_mentions(completion_id).await?;
    let items = raw
        .into_iter()
        .map(|m| MentionItem {
            kind: m.kind,
            id: m.id,
            label: m.label,
        })
        .collect();
    Ok(Section::Mentions(MentionsSection { items }))
}

pub async fn build_entities(storage: &dyn Storage, report_id: ReportId) -> Result<Section> {
    let raw = storage.fetch_entities(report_id).await?;
    let items = raw
        .into_iter()
        .map(|e| EntityItem {
            entity_type: e.entity_type,
            id: e.id,
            summary: e.summary,
        })
        .collect();
    Ok(Section::Entities(EntitiesSection { items }))
}

pub async fn build_files(storage: &dyn Storage, report_id: ReportId) -> Result<Section> {
    let raw = storage.fetch_files(report_id).await?;
    let items = raw
        .into_iter()
        .map(|f| FileItem {
            filename: f.filename,
            summary: f.summary,
        })
        .collect();
    Ok(Section::Files(FilesSection { items }))
}

pub async fn build_widgets(storage: &dyn Storage, report_id: ReportId) -> Result<Section> {
    let raw = storage.fetch_widgets(report_id).await?;
    let items = raw
        .into_iter()
        .map(|w| WidgetItem {
            id: w.id,
            title: w.title,
        })
        .collect();
    Ok(Section::Widgets(WidgetsSection { items }))
}

pub async fn build_queries(storage: &dyn Storage, report_id: ReportId) -> Result<Section> {
    let raw = storage.fetch_queries(report_id).await?;
    let items = raw
        .into_iter()
        .map(|q| QueryItem {
            id: q.id,
            sql: q.sql,
        })
        .collect();
    Ok(Section::Queries(QueriesSection { items }))
}

pub async fn build_code(storage: &dyn Storage, report_id: ReportId) -> Result<Section> {
    let raw = storage.fetch_code(report_id).await?;
    let items = raw
        .into_iter()
        .map(|c| CodeItem {
            path: c.path,
            language: c.language,
            content: c.content,
        })
        .collect();
    Ok(Section::Code(CodeSection { items }))
}
