use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use brandframe_contracts::layout::{TemplateDefinition, TemplateSummary};
use serde_json::Value;
use tracing::warn;

use super::is_safe_key;
use crate::error::{error_chain_text, PosterError};
use crate::pipeline::Outcome;

/// Named layout bundles.
pub trait TemplateStore: Send + Sync {
    fn load(&self, template_id: &str) -> Result<Option<TemplateDefinition>>;
    /// Catalog rows. A missing or broken catalog is an empty list.
    fn list(&self) -> Vec<TemplateSummary>;
}

/// A missing template is fatal for the run, and so is an unreadable one.
pub fn load_template(store: &dyn TemplateStore, template_id: &str) -> Outcome<TemplateDefinition> {
    match store.load(template_id) {
        Ok(Some(template)) => Outcome::Ok(template),
        Ok(None) => Outcome::Fatal(PosterError::TemplateNotFound(template_id.to_string()).to_string()),
        Err(err) => Outcome::Fatal(format!(
            "Failed to load template {template_id}: {}",
            error_chain_text(&err, 300)
        )),
    }
}

/// Templates as `<root>/<id>.json` with a catalog in `<root>/index.json`.
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    root: PathBuf,
}

impl DirTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_index(&self) -> Result<Vec<TemplateSummary>> {
        let path = self.root.join("index.json");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid template index JSON in {}", path.display()))?;
        let rows = value
            .get("templates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<TemplateSummary>(row).ok())
            .collect())
    }
}

impl TemplateStore for DirTemplateStore {
    fn load(&self, template_id: &str) -> Result<Option<TemplateDefinition>> {
        if !is_safe_key(template_id) {
            return Ok(None);
        }
        let id = template_id.trim();
        let path = self.root.join(format!("{id}.json"));
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid template JSON in {}", path.display()))?;
        let Some(template) = TemplateDefinition::from_value(id, &value) else {
            bail!("template {} is not a JSON object", path.display());
        };
        Ok(Some(template))
    }

    fn list(&self) -> Vec<TemplateSummary> {
        match self.read_index() {
            Ok(rows) => rows,
            Err(err) => {
                warn!("template index unavailable: {err:#}");
                Vec::new()
            }
        }
    }
}

/// In-process template store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: BTreeMap<String, TemplateDefinition>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: TemplateDefinition) {
        self.templates.insert(template.id.clone(), template);
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load(&self, template_id: &str) -> Result<Option<TemplateDefinition>> {
        Ok(self.templates.get(template_id).cloned())
    }

    fn list(&self) -> Vec<TemplateSummary> {
        self.templates
            .values()
            .map(|template| TemplateSummary {
                id: template.id.clone(),
                name: template.name.clone(),
                description: None,
                category: None,
                thumbnail: None,
            })
            .collect()
    }
}
