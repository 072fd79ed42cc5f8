use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use brandframe_contracts::brand::BrandProfile;
use brandframe_contracts::events::EventWriter;
use serde_json::json;

use crate::model::{GenerationModel, ModelRequest, ModelSettings, RawContent};
use crate::pipeline::PipelineContext;
use crate::stores::{MemoryBrandStore, MemoryTemplateStore};

enum Scripted {
    Reply(RawContent),
    Fault(String),
}

/// Replays queued replies in call order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then_text(self, text: &str) -> Self {
        self.then(RawContent::Text(text.to_string()))
    }

    pub(crate) fn then(self, content: RawContent) -> Self {
        self.push(Scripted::Reply(content));
        self
    }

    pub(crate) fn then_fault(self, message: &str) -> Self {
        self.push(Scripted::Fault(message.to_string()));
        self
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    pub(crate) fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl GenerationModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(&self, request: &ModelRequest) -> Result<RawContent> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("request log poisoned"))?
            .push(request.clone());
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("script poisoned"))?
            .pop_front();
        match next {
            Some(Scripted::Reply(content)) => Ok(content),
            Some(Scripted::Fault(message)) => bail!("{message}"),
            None => bail!("scripted model exhausted at {}", request.task.name()),
        }
    }
}

pub(crate) fn fresh_market() -> BrandProfile {
    BrandProfile::from_value(&json!({
        "id": "kit-1",
        "name": "Fresh Market",
        "colors": ["#1B5E20", "#FFC107", "#FFFFFF"],
        "tone": "Warm, Friendly",
        "logoUrl": "https://cdn.example.com/fresh-logo.png",
        "assetUrls": ["https://cdn.example.com/basket.png"]
    }))
    .unwrap_or_else(|| BrandProfile::fallback("kit-1"))
}

/// Collaborators for one offline run.
pub(crate) struct Harness {
    pub(crate) brands: MemoryBrandStore,
    pub(crate) templates: MemoryTemplateStore,
    pub(crate) model: ScriptedModel,
    pub(crate) settings: ModelSettings,
    pub(crate) events: EventWriter,
}

impl Harness {
    pub(crate) fn new(model: ScriptedModel) -> Self {
        let mut brands = MemoryBrandStore::new();
        brands.insert("u1", "kit-1", fresh_market());
        Self {
            brands,
            templates: MemoryTemplateStore::new(),
            model,
            settings: ModelSettings::new("gemini-2.5-flash", "gemini-3-pro-image-preview"),
            events: EventWriter::discard("run-test", "test"),
        }
    }

    pub(crate) fn ctx(&self) -> PipelineContext<'_> {
        PipelineContext {
            brands: &self.brands,
            templates: &self.templates,
            model: &self.model,
            settings: &self.settings,
            events: &self.events,
        }
    }
}
