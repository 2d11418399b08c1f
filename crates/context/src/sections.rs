//! Typed, renderable context fragments (C2). Each section is a plain
//! value type; `render()` is pure and referentially transparent (L3) and
//! produces stable XML-like markup so content can't break out of its tag.

use aa_domain::entities::{LoadMode, ObservationPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::truncation::{escape_xml, truncate_per_item};

const OBSERVATION_RENDER_CAP: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<String>,
    pub usage_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceSchema {
    pub data_source_id: String,
    pub data_source_name: String,
    /// Already ranked best-first by the Schema Builder's composite score.
    pub tables: Vec<TableInfo>,
}

/// §4.2: a "sample" of the top-K ranked tables rendered fully, and a
/// compact "index" listing up to `index_limit` table names.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemasSection {
    pub data_sources: Vec<DataSourceSchema>,
}

impl SchemasSection {
    pub fn render(&self, sample_k: usize, index_limit: usize) -> String {
        let mut out = String::from("<schemas>\n");
        for ds in &self.data_sources {
            out.push_str(&format!(
                "  <data_source id=\"{}\" name=\"{}\">\n",
                escape_xml(&ds.data_source_id),
                escape_xml(&ds.data_source_name)
            ));
            out.push_str("    <sample>\n");
            for table in ds.tables.iter().take(sample_k) {
                out.push_str(&render_table(table));
            }
            out.push_str("    </sample>\n");
            out.push_str("    <index>");
            let names: Vec<&str> = ds
                .tables
                .iter()
                .take(index_limit)
                .map(|t| t.name.as_str())
                .collect();
            out.push_str(&escape_xml(&names.join(", ")));
            out.push_str("</index>\n");
            out.push_str("  </data_source>\n");
        }
        out.push_str("</schemas>\n");
        out
    }
}

fn render_table(table: &TableInfo) -> String {
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{}:{}", c.name, c.data_type))
        .collect();
    format!(
        "      <table name=\"{}\" pk=\"{}\" fk=\"{}\">{}</table>\n",
        escape_xml(&table.name),
        escape_xml(&table.primary_keys.join(",")),
        escape_xml(&table.foreign_keys.join(",")),
        escape_xml(&cols.join(", "))
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionItem {
    pub id: String,
    pub text: String,
    pub category: String,
    pub load_mode: LoadMode,
    pub load_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstructionsSection {
    pub items: Vec<InstructionItem>,
}

impl InstructionsSection {
    pub fn render(&self) -> String {
        let mut out = String::from("<instructions>\n");
        for item in &self.items {
            out.push_str(&format!(
                "  <instruction id=\"{}\" category=\"{}\" load_reason=\"{}\">{}</instruction>\n",
                escape_xml(&item.id),
                escape_xml(&item.category),
                escape_xml(&item.load_reason),
                escape_xml(&item.text)
            ));
        }
        out.push_str("</instructions>\n");
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageItem {
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagesSection {
    pub items: Vec<MessageItem>,
}

impl MessagesSection {
    /// Role-tagged, timestamp-prefixed lines, truncated to `char_cap`
    /// with an explicit marker (§4.2).
    pub fn render(&self, char_cap: usize) -> String {
        let mut body = String::new();
        for item in &self.items {
            let role = match item.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            body.push_str(&format!(
                "[{}] {}: {}\n",
                item.timestamp.to_rfc3339(),
                role,
                item.content
            ));
        }
        let (capped, truncated) = truncate_per_item(&body, char_cap);
        let mut out = String::from("<messages");
        if truncated {
            out.push_str(" truncated=\"true\"");
        }
        out.push_str(">\n");
        out.push_str(&escape_xml(&capped));
        out.push_str("\n</messages>\n");
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationItem {
    pub tool_name: String,
    pub status: String,
    pub summary: String,
    pub observation_policy: ObservationPolicy,
}

/// Ring of prior tool executions this turn (§3). The Hub caps the
/// stored list at `observations_max`; `render` applies its own, smaller
/// cap of the most recent 5 (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservationsSection {
    pub items: Vec<ObservationItem>,
}

impl ObservationsSection {
    pub fn render(&self) -> String {
        let visible: Vec<&ObservationItem> = self
            .items
            .iter()
            .filter(|o| o.observation_policy != ObservationPolicy::Never)
            .rev()
            .take(OBSERVATION_RENDER_CAP)
            .collect();
        let mut out = String::from("<observations>\n");
        for obs in visible.into_iter().rev() {
            out.push_str(&format!(
                "  <observation tool=\"{}\" status=\"{}\">{}</observation>\n",
                escape_xml(&obs.tool_name),
                escape_xml(&obs.status),
                escape_xml(&obs.summary)
            ));
        }
        out.push_str("</observations>\n");
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionItem {
    pub kind: String,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MentionsSection {
    pub items: Vec<MentionItem>,
}

impl MentionsSection {
    pub fn render(&self) -> String {
        render_simple_list("mentions", "mention", &self.items, |m| {
            format!(
                "kind=\"{}\" id=\"{}\">{}",
                escape_xml(&m.kind),
                escape_xml(&m.id),
                escape_xml(&m.label)
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityItem {
    pub entity_type: String,
    pub id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntitiesSection {
    pub items: Vec<EntityItem>,
}

impl EntitiesSection {
    pub fn render(&self) -> String {
        render_simple_list("entities", "entity", &self.items, |e| {
            format!(
                "type=\"{}\" id=\"{}\">{}",
                escape_xml(&e.entity_type),
                escape_xml(&e.id),
                escape_xml(&e.summary)
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileItem {
    pub filename: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilesSection {
    pub items: Vec<FileItem>,
}

impl FilesSection {
    pub fn render(&self) -> String {
        render_simple_list("files", "file", &self.items, |f| {
            format!("name=\"{}\">{}", escape_xml(&f.filename), escape_xml(&f.summary))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceItem {
    pub name: String,
    pub kind: String,
    pub usage_count: Option<u64>,
}

/// Mirrors the Schemas sample+index pattern (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourcesSection {
    /// Already ranked best-first.
    pub resources: Vec<ResourceItem>,
}

impl ResourcesSection {
    pub fn render(&self, sample_k: usize, index_limit: usize) -> String {
        let mut out = String::from("<resources>\n  <sample>\n");
        for r in self.resources.iter().take(sample_k) {
            out.push_str(&format!(
                "    <resource name=\"{}\" kind=\"{}\"/>\n",
                escape_xml(&r.name),
                escape_xml(&r.kind)
            ));
        }
        out.push_str("  </sample>\n  <index>");
        let names: Vec<&str> = self
            .resources
            .iter()
            .take(index_limit)
            .map(|r| r.name.as_str())
            .collect();
        out.push_str(&escape_xml(&names.join(", ")));
        out.push_str("</index>\n</resources>\n");
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetItem {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WidgetsSection {
    pub items: Vec<WidgetItem>,
}

impl WidgetsSection {
    pub fn render(&self) -> String {
        render_simple_list("widgets", "widget", &self.items, |w| {
            format!("id=\"{}\">{}", escape_xml(&w.id), escape_xml(&w.title))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryItem {
    pub id: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueriesSection {
    pub items: Vec<QueryItem>,
}

impl QueriesSection {
    pub fn render(&self) -> String {
        render_simple_list("queries", "query", &self.items, |q| {
            format!("id=\"{}\">{}", escape_xml(&q.id), escape_xml(&q.sql))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeItem {
    pub path: String,
    pub language: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodeSection {
    pub items: Vec<CodeItem>,
}

impl CodeSection {
    pub fn render(&self) -> String {
        let mut out = String::from("<code>\n");
        for item in &self.items {
            out.push_str(&format!(
                "  <file path=\"{}\" language=\"{}\">{}</file>\n",
                escape_xml(&item.path),
                escape_xml(&item.language),
                escape_xml(&item.content)
            ));
        }
        out.push_str("</code>\n");
        out
    }
}

fn render_simple_list<T>(
    tag: &str,
    item_tag: &str,
    items: &[T],
    attrs_and_body: impl Fn(&T) -> String,
) -> String {
    let mut out = format!("<{tag}>\n");
    for item in items {
        out.push_str(&format!("  <{item_tag} {}</{item_tag}>\n", attrs_and_body(item)));
    }
    out.push_str(&format!("</{tag}>\n"));
    out
}

/// The tagged replacement for duck-typed section objects (§9): every
/// variant is a concrete value type and `render` dispatches statically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Section {
    Schemas(SchemasSection),
    Instructions(InstructionsSection),
    Messages(MessagesSection),
    Observations(ObservationsSection),
    Mentions(MentionsSection),
    Entities(EntitiesSection),
    Files(FilesSection),
    Resources(ResourcesSection),
    Widgets(WidgetsSection),
    Queries(QueriesSection),
    Code(CodeSection),
}

impl Section {
    pub fn name(&self) -> &'static str {
        match self {
            Section::Schemas(_) => "schemas",
            Section::Instructions(_) => "instructions",
            Section::Messages(_) => "messages",
            Section::Observations(_) => "observations",
            Section::Mentions(_) => "mentions",
            Section::Entities(_) => "entities",
            Section::Files(_) => "files",
            Section::Resources(_) => "resources",
            Section::Widgets(_) => "widgets",
            Section::Queries(_) => "queries",
            Section::Code(_) => "code",
        }
    }

    /// Render with the caps from [`aa_domain::config::ContextConfig`].
    /// Sections that don't need caps (mentions, entities, files, widgets,
    /// queries, code) ignore the extra parameters.
    pub fn render(&self, config: &aa_domain::config::ContextConfig) -> String {
        match self {
            Section::Schemas(s) => s.render(config.schema_sample_k, config.schema_index_limit),
            Section::Instructions(s) => s.render(),
            Section::Messages(s) => s.render(config.messages_char_cap),
            Section::Observations(s) => s.render(),
            Section::Mentions(s) => s.render(),
            Section::Entities(s) => s.render(),
            Section::Files(s) => s.render(),
            Section::Resources(s) => {
                s.render(config.resource_sample_k, config.resource_index_limit)
            }
            Section::Widgets(s) => s.render(),
            Section::Queries(s) => s.render(),
            Section::Code(s) => s.render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_is_truncated_with_marker() {
        let section = MessagesSection {
            items: vec![MessageItem {
                role: MessageRole::User,
                timestamp: Utc::now(),
                content: "x".repeat(100),
                mentions: vec![],
            }],
        };
        let rendered = section.render(20);
        assert!(rendered.contains("[TRUNCATED]"));
    }

    #[test]
    fn observations_render_caps_at_five_most_recent() {
        let items: Vec<ObservationItem> = (0..8)
            .map(|i| ObservationItem {
                tool_name: format!("tool_{i}"),
                status: "success".into(),
                summary: format!("obs {i}"),
                observation_policy: ObservationPolicy::OnTrigger,
            })
            .collect();
        let section = ObservationsSection { items };
        let rendered = section.render();
        assert!(rendered.contains("obs 7"));
        assert!(rendered.contains("obs 3"));
        assert!(!rendered.contains("obs 2"));
    }

    #[test]
    fn observations_render_omits_never_policy() {
        let items = vec![ObservationItem {
            tool_name: "silent".into(),
            status: "success".into(),
            summary: "hidden".into(),
            observation_policy: ObservationPolicy::Never,
        }];
        let section = ObservationsSection { items };
        assert!(!section.render().contains("hidden"));
    }

    #[test]
    fn schemas_render_enforces_sample_and_index_caps() {
        let tables: Vec<TableInfo> = (0..20)
            .map(|i| TableInfo {
                name: format!("t{i}"),
                columns: vec![],
                primary_keys: vec![],
                foreign_keys: vec![],
                usage_count: None,
            })
            .collect();
        let section = SchemasSection {
            data_sources: vec![DataSourceSchema {
                data_source_id: "ds1".into(),
                data_source_name: "warehouse".into(),
                tables,
            }],
        };
        let rendered = section.render(3, 10);
        assert_eq!(rendered.matches("<table ").count(), 3);
        assert_eq!(rendered.matches("t9").count(), 1);
        assert_eq!(rendered.matches("t15").count(), 0);
    }

    #[test]
    fn render_escapes_injection_attempts() {
        let section = EntitiesSection {
            items: vec![EntityItem {
                entity_type: "user".into(),
                id: "1".into(),
                summary: "</entity><malicious>".into(),
            }],
        };
        assert!(!section.render().contains("<malicious>"));
    }
}
