mod dryrun;
mod gemini;

use serde_json::Value;

pub use dryrun::DryrunModel;
pub use gemini::GeminiModel;

/// What a model call is for. Backends may shape the request by task; the
/// dryrun backend also uses the carried hints to build offline replies.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTask {
    RefinePrompt { draft: String, brand_name: String },
    DesignLayouts,
    GenerateImage { aspect_ratio: Option<String> },
    WriteCopy { roles: Vec<String> },
}

impl ModelTask {
    pub fn name(&self) -> &'static str {
        match self {
            ModelTask::RefinePrompt { .. } => "refine_prompt",
            ModelTask::DesignLayouts => "design_layouts",
            ModelTask::GenerateImage { .. } => "generate_image",
            ModelTask::WriteCopy { .. } => "write_copy",
        }
    }

    fn wants_json(&self) -> bool {
        matches!(self, ModelTask::DesignLayouts | ModelTask::WriteCopy { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub temperature: f64,
    pub task: ModelTask,
}

impl ModelRequest {
    pub fn new(
        model: impl Into<String>,
        task: ModelTask,
        temperature: f64,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            user_prompt: user_prompt.into(),
            temperature,
            task,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// A structured fragment, such as an inline image wrapper.
    Rich(Value),
}

/// What a model call returned, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl RawContent {
    /// All parts joined into one string. Rich parts are rendered as compact
    /// JSON so their embedded references stay searchable.
    pub fn concatenated(&self) -> String {
        match self {
            RawContent::Text(text) => text.trim().to_string(),
            RawContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => text.clone(),
                    ContentPart::Rich(value) => value.to_string(),
                })
                .collect::<String>()
                .trim()
                .to_string(),
        }
    }

    /// Text parts only; rich parts are dropped.
    pub fn text(&self) -> String {
        match self {
            RawContent::Text(text) => text.trim().to_string(),
            RawContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    ContentPart::Rich(_) => None,
                })
                .collect::<String>()
                .trim()
                .to_string(),
        }
    }
}

/// The text/image generation capability. Shared across runs, so
/// implementations must tolerate concurrent calls.
pub trait GenerationModel: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(&self, request: &ModelRequest) -> anyhow::Result<RawContent>;
}

/// Model names and per-stage sampling temperatures.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub text_model: String,
    pub image_model: String,
}

impl ModelSettings {
    pub const REFINE_TEMPERATURE: f64 = 0.2;
    pub const DESIGN_TEMPERATURE: f64 = 0.7;
    pub const IMAGE_TEMPERATURE: f64 = 1.0;
    pub const COPY_TEMPERATURE: f64 = 0.7;

    pub fn new(text_model: impl Into<String>, image_model: impl Into<String>) -> Self {
        Self {
            text_model: text_model.into(),
            image_model: image_model.into(),
        }
    }
}
