//! Tool Registry (spec §4.9).
//!
//! Stores one `ToolRecord` per `fullName` (`serverName__originalName`) and
//! applies the visibility rules on every enumeration: core tools are
//! always exposed; `alwaysVisibleTools` overrides everything else;
//! `exposeTools` narrows the default-expose-all set when configured;
//! `hideTools` subtracts from whatever survived. Patterns are matched with
//! [`crate::proxy::patterns::any_match`] against the full namespaced name.

use std::collections::HashMap;

use serde_json::Value;

use crate::proxy::patterns::any_match;
use crate::proxy::target::ToolDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureReason {
    CoreTool,
    AlwaysVisible,
    DefaultExposed,
    ExposeListMatch,
    HiddenByRule,
    NotInExposeList,
}

#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub full_name: String,
    pub server: String,
    pub original_name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub discovered: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct VisibilityRules {
    pub expose_tools: Vec<String>,
    pub hide_tools: Vec<String>,
    pub always_visible_tools: Vec<String>,
    pub expose_core_tools: bool,
}

impl Default for VisibilityRules {
    fn default() -> Self {
        Self {
            expose_tools: Vec::new(),
            hide_tools: Vec::new(),
            always_visible_tools: Vec::new(),
            expose_core_tools: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RegistryStats {
    pub discovered: usize,
    pub enabled: usize,
    pub exposed: usize,
    pub by_server: HashMap<String, usize>,
    pub by_reason: HashMap<&'static str, usize>,
}

pub struct ToolRegistry {
    tools: HashMap<String, ToolRecord>,
    core_tools: Vec<String>,
    rules: VisibilityRules,
}

impl ToolRegistry {
    pub fn new(rules: VisibilityRules) -> Self {
        Self {
            tools: HashMap::new(),
            core_tools: Vec::new(),
            rules,
        }
    }

    /// Marks `names` as this system's own core tools (e.g. debugger
    /// operations when the debugger feature is bound), always exposed
    /// regardless of `exposeTools`/`hideTools`.
    pub fn set_core_tools(&mut self, names: Vec<String>) {
        self.core_tools = names;
    }

    pub fn register(&mut self, server: &str, descriptors: Vec<ToolDescriptor>) {
        self.tools.retain(|_, t| t.server != server);
        for d in descriptors {
            let full_name = format!("{server}__{}", d.original_name);
            let description = Some(match d.description {
                Some(desc) => format!("[{server}] {desc}"),
                None => format!("[{server}]"),
            });
            self.tools.insert(
                full_name.clone(),
                ToolRecord {
                    full_name,
                    server: server.to_string(),
                    original_name: d.original_name,
                    description,
                    input_schema: d.input_schema,
                    discovered: true,
                    enabled: true,
                },
            );
        }
    }

    pub fn unregister_server(&mut self, server: &str) {
        self.tools.retain(|_, t| t.server != server);
    }

    pub fn get(&self, full_name: &str) -> Option<&ToolRecord> {
        self.tools.get(full_name)
    }

    fn is_exposed(&self, full_name: &str) -> (bool, ExposureReason) {
        if self.rules.expose_core_tools && self.core_tools.iter().any(|c| c == full_name) {
            return (true, ExposureReason::CoreTool);
        }
        if any_match(&self.rules.always_visible_tools, full_name) {
            return (true, ExposureReason::AlwaysVisible);
        }
        if self.rules.expose_tools.is_empty() {
            if any_match(&self.rules.hide_tools, full_name) {
                return (false, ExposureReason::HiddenByRule);
            }
            return (true, ExposureReason::DefaultExposed);
        }
        if !any_match(&self.rules.expose_tools, full_name) {
            return (false, ExposureReason::NotInExposeList);
        }
        if any_match(&self.rules.hide_tools, full_name) {
            return (false, ExposureReason::HiddenByRule);
        }
        (true, ExposureReason::ExposeListMatch)
    }

    /// Tools currently visible to the upstream client, in the merged
    /// `listTools()` view (spec §4.10).
    pub fn visible_tools(&self) -> Vec<&ToolRecord> {
        self.tools
            .values()
            .filter(|t| t.enabled && self.is_exposed(&t.full_name).0)
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for t in self.tools.values() {
            stats.discovered += 1;
            *stats.by_server.entry(t.server.clone()).or_insert(0) += 1;
            if t.enabled {
                stats.enabled += 1;
            }
            let (exposed, reason) = self.is_exposed(&t.full_name);
            if exposed && t.enabled {
                stats.exposed += 1;
            }
            *stats.by_reason.entry(reason_label(reason)).or_insert(0) += 1;
        }
        stats
    }
}

fn reason_label(reason: ExposureReason) -> &'static str {
    match reason {
        ExposureReason::CoreTool => "core_tool",
        ExposureReason::AlwaysVisible => "always_visible",
        ExposureReason::DefaultExposed => "default_exposed",
        ExposureReason::ExposeListMatch => "expose_list_match",
        ExposureReason::HiddenByRule => "hidden_by_rule",
        ExposureReason::NotInExposeList => "not_in_expose_list",
    }
}
