pub mod builder;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod pipelines;
pub mod placeholders;
pub mod stores;

#[cfg(test)]
mod testkit;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use brandframe_contracts::events::EventWriter;
use brandframe_contracts::layout::TemplateSummary;
use brandframe_contracts::models::{ModelSelector, CAPABILITY_IMAGE, CAPABILITY_TEXT};
use brandframe_contracts::runs::{PipelineKind, PipelineResult};
use tracing::info;
use uuid::Uuid;

pub use builder::{CanvasBuilder, ImageRegistry};
pub use config::EngineConfig;
pub use error::PosterError;
pub use model::{
    ContentPart, DryrunModel, GeminiModel, GenerationModel, ModelRequest, ModelSettings,
    ModelTask, RawContent,
};
pub use normalize::{normalize_image_reference, ImageReference};
pub use pipeline::{Outcome, Pipeline, PipelineContext, PipelineState, RunMeta, Stage, StageFn};
pub use pipelines::{
    CreativeRequest, CreativeState, ProductRequest, ProductState, TemplateRequest, TemplateState,
};
pub use placeholders::PlaceholderMap;
pub use stores::{
    BrandProfileStore, DirTemplateStore, JsonBrandStore, MemoryBrandStore, MemoryTemplateStore,
    TemplateStore,
};

use pipelines::{creative_pipeline, product_pipeline, template_pipeline};

/// Entry point for poster runs. Holds the shared collaborators; every run
/// gets its own id, state and event log, so one engine can serve runs on
/// several threads.
pub struct PosterEngine {
    brands: Arc<dyn BrandProfileStore>,
    templates: Arc<dyn TemplateStore>,
    model: Arc<dyn GenerationModel>,
    settings: ModelSettings,
    events_dir: Option<PathBuf>,
    selection_warnings: Vec<String>,
}

impl PosterEngine {
    /// Resolves models through the registry and opens the file stores under
    /// the data dir. Without a credential, or with `dryrun` set, the offline
    /// backend is used.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let selector = ModelSelector::default();
        let live_key = config.api_key.as_deref().filter(|_| !config.uses_dryrun());
        let (text, image) = if live_key.is_some() {
            (
                selector.select(Some(config.text_model.as_str()), CAPABILITY_TEXT),
                selector.select(Some(config.image_model.as_str()), CAPABILITY_IMAGE),
            )
        } else {
            (
                selector.select_dryrun(CAPABILITY_TEXT),
                selector.select_dryrun(CAPABILITY_IMAGE),
            )
        };
        let text = text.map_err(|err| anyhow!(err))?;
        let image = image.map_err(|err| anyhow!(err))?;

        let model: Arc<dyn GenerationModel> = match live_key {
            Some(api_key) => Arc::new(GeminiModel::new(api_key, config)),
            None => Arc::new(DryrunModel),
        };
        let selection_warnings = if live_key.is_some() {
            [&text, &image]
                .into_iter()
                .filter_map(|selection| selection.fallback_reason.clone())
                .collect()
        } else {
            Vec::new()
        };
        info!(
            backend = model.name(),
            text_model = %text.model.name,
            image_model = %image.model.name,
            data_dir = %config.data_dir.display(),
            "poster engine ready"
        );

        Ok(Self {
            brands: Arc::new(JsonBrandStore::new(config.brands_dir())),
            templates: Arc::new(DirTemplateStore::new(config.templates_dir())),
            model,
            settings: ModelSettings::new(text.model.name, image.model.name),
            events_dir: config.events_dir.clone(),
            selection_warnings,
        })
    }

    pub fn with_parts(
        brands: Arc<dyn BrandProfileStore>,
        templates: Arc<dyn TemplateStore>,
        model: Arc<dyn GenerationModel>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            brands,
            templates,
            model,
            settings,
            events_dir: None,
            selection_warnings: Vec::new(),
        }
    }

    pub fn with_events_dir(mut self, events_dir: Option<PathBuf>) -> Self {
        self.events_dir = events_dir;
        self
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &str {
        self.model.name()
    }

    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.templates.list()
    }

    pub fn run_creative(&self, request: CreativeRequest) -> PipelineResult {
        let run_id = new_run_id();
        let events = self.event_writer(&run_id, PipelineKind::Creative);
        let mut state = CreativeState::new(run_id, request);
        self.seed(&mut state.meta);
        creative_pipeline()
            .run(&self.context(&events), state)
            .into_result()
    }

    pub fn run_product(&self, request: ProductRequest) -> PipelineResult {
        let run_id = new_run_id();
        let events = self.event_writer(&run_id, PipelineKind::Product);
        let mut state = ProductState::new(run_id, request);
        self.seed(&mut state.meta);
        product_pipeline()
            .run(&self.context(&events), state)
            .into_result()
    }

    pub fn run_template(&self, request: TemplateRequest) -> PipelineResult {
        let run_id = new_run_id();
        let events = self.event_writer(&run_id, PipelineKind::Template);
        let mut state = TemplateState::new(run_id, request);
        self.seed(&mut state.meta);
        template_pipeline()
            .run(&self.context(&events), state)
            .into_result()
    }

    fn seed(&self, meta: &mut RunMeta) {
        for warning in &self.selection_warnings {
            meta.warn(warning.clone());
        }
    }

    fn event_writer(&self, run_id: &str, pipeline: PipelineKind) -> EventWriter {
        match &self.events_dir {
            Some(dir) => EventWriter::new(dir.join(format!("{run_id}.jsonl")), run_id, pipeline.as_str()),
            None => EventWriter::discard(run_id, pipeline.as_str()),
        }
    }

    fn context<'a>(&'a self, events: &'a EventWriter) -> PipelineContext<'a> {
        PipelineContext {
            brands: self.brands.as_ref(),
            templates: self.templates.as_ref(),
            model: self.model.as_ref(),
            settings: &self.settings,
            events,
        }
    }
}

fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}
