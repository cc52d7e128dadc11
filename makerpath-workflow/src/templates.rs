//! Bundled workflow templates
//!
//! Templates are embedded at compile time with `include_str!` and parsed with
//! the same parser used for pasted definitions.

use crate::definition::PathCatalogEntry;
use crate::parser::{ParseResult, ParsedWorkflow, WorkflowParser};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "market_report.json",
        include_str!("../builtin/templates/market_report.json"),
    ),
    (
        "prompt_workbench.json",
        include_str!("../builtin/templates/prompt_workbench.json"),
    ),
    (
        "source_translation.json",
        include_str!("../builtin/templates/source_translation.json"),
    ),
];

/// Workflow templates keyed by workflow key
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, ParsedWorkflow>,
}

impl TemplateLibrary {
    /// Library with no templates
    pub fn empty() -> Self {
        Self::default()
    }

    /// Library holding the bundled templates
    ///
    /// A bundled template that fails to parse is logged and skipped.
    pub fn builtin() -> Self {
        let mut library = Self::empty();
        for (file, content) in BUILTIN_TEMPLATES {
            match WorkflowParser::parse(content) {
                Ok(parsed) => library.insert(parsed),
                Err(e) => warn!("Skipping bundled template {}: {}", file, e),
            }
        }
        debug!("Loaded {} bundled templates", library.len());
        library
    }

    /// Add or replace a template
    pub fn insert(&mut self, parsed: ParsedWorkflow) {
        self.templates.insert(parsed.key.clone(), parsed);
    }

    /// Parse `raw` and add it; returns the workflow key
    pub fn add_from_str(&mut self, raw: &str) -> ParseResult<String> {
        let parsed = WorkflowParser::parse(raw)?;
        let key = parsed.key.clone();
        self.insert(parsed);
        Ok(key)
    }

    /// Template by workflow key
    pub fn get(&self, key: &str) -> Option<&ParsedWorkflow> {
        self.templates.get(key)
    }

    /// Picker entries ordered by key
    pub fn catalog(&self) -> Vec<PathCatalogEntry> {
        self.templates
            .values()
            .map(|t| t.catalog_entry.clone())
            .collect()
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
