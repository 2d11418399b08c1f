//! Tool Registry (C5): the catalog of [`ToolDescriptor`]s the Planner
//! Driver is shown and the Runner resolves calls against. Concrete tool
//! behavior lives behind [`crate::executor::ToolExecutor`]; the registry
//! only knows names, schemas, and policy.

use aa_domain::config::ToolPolicy;
use aa_domain::entities::{PlanType, ToolDescriptor};
use aa_domain::{Error, Result};

#[derive(Debug, Default)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing any existing one with the same
    /// name so re-registration (e.g. a hot-reloaded tool pack) is
    /// idempotent rather than producing duplicates in the catalog.
    pub fn register(&mut self, descriptor: ToolDescriptor) {
        self.descriptors.retain(|d| d.name != descriptor.name);
        self.descriptors.push(descriptor);
    }

    /// The deduplicated action+research catalog for one plan type,
    /// filtered through `policy` (§4.5).
    pub fn enumerate_for(&self, plan_type: PlanType, policy: &ToolPolicy) -> Vec<&ToolDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.applies_to(plan_type) && policy.allows(&d.name))
            .collect()
    }

    pub fn resolve(&self, name: &str, policy: &ToolPolicy) -> Result<&ToolDescriptor> {
        if !policy.allows(name) {
            return Err(Error::ToolResolve(format!("tool '{name}' is denied by policy")));
        }
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::ToolResolve(format!("unknown tool '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_domain::entities::{ObservationPolicy, PlanTypeFilter};

    fn descriptor(name: &str, filters: Vec<PlanTypeFilter>) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            plan_types: filters,
            argument_schema: serde_json::json!({}),
            observation_policy: ObservationPolicy::OnTrigger,
            capability_flags: vec![],
        }
    }

    #[test]
    fn registering_twice_replaces_not_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("query_data", vec![PlanTypeFilter::Both]));
        registry.register(descriptor("query_data", vec![PlanTypeFilter::Action]));
        let all = registry.enumerate_for(PlanType::Action, &ToolPolicy::default());
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn enumerate_filters_by_plan_type() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("search_web", vec![PlanTypeFilter::Research]));
        registry.register(descriptor("create_widget", vec![PlanTypeFilter::Action]));
        let action = registry.enumerate_for(PlanType::Action, &ToolPolicy::default());
        assert_eq!(action.len(), 1);
        assert_eq!(action[0].name, "create_widget");
    }

    #[test]
    fn resolve_respects_deny_policy() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("exec.run", vec![PlanTypeFilter::Both]));
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["exec".into()],
        };
        assert!(registry.resolve("exec.run", &policy).is_err());
    }

    #[test]
    fn resolve_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        assert!(registry.resolve("nonexistent", &ToolPolicy::default()).is_err());
    }
}
