use std::env;
use std::path::PathBuf;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

/// Process-level settings, read once from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub data_dir: PathBuf,
    pub events_dir: Option<PathBuf>,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub dryrun: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            data_dir: PathBuf::from("data"),
            events_dir: None,
            request_timeout_s: 90.0,
            transport_retries: 2,
            dryrun: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: read("GEMINI_API_KEY").or_else(|| read("GOOGLE_API_KEY")),
            api_base: read("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            text_model: read("BRANDFRAME_TEXT_MODEL").unwrap_or(defaults.text_model),
            image_model: read("BRANDFRAME_IMAGE_MODEL").unwrap_or(defaults.image_model),
            data_dir: read("BRANDFRAME_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            events_dir: read("BRANDFRAME_EVENTS_DIR").map(PathBuf::from),
            request_timeout_s: clamped(read("BRANDFRAME_REQUEST_TIMEOUT"), 90.0, 15.0, 300.0),
            transport_retries: clamped(read("BRANDFRAME_TRANSPORT_RETRIES"), 2.0, 0.0, 4.0).round()
                as usize,
            dryrun: false,
        }
    }

    /// Dryrun is forced, or no credential is available.
    pub fn uses_dryrun(&self) -> bool {
        self.dryrun || self.api_key.is_none()
    }

    pub fn brands_dir(&self) -> PathBuf {
        self.data_dir.join("brands")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }
}

fn clamped(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
