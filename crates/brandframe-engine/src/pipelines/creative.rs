use brandframe_contracts::brand::BrandProfile;
use brandframe_contracts::canvas::CanvasFormats;
use brandframe_contracts::events::payload;
use brandframe_contracts::runs::{FailureKind, PipelineKind, PipelineResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{fetch_brand, resolved_brand, BrandedState};
use crate::error::{error_chain_text, truncate_text};
use crate::model::{ModelRequest, ModelSettings, ModelTask};
use crate::normalize::{normalize_image_reference, ImageReference};
use crate::pipeline::{Outcome, Pipeline, PipelineContext, PipelineState, RunMeta, Stage};

pub const ERROR_IMAGE_URL: &str = "https://placehold.co/1080x1080?text=Error+Generating";
pub const UNPARSED_IMAGE_URL: &str =
    "https://placehold.co/1080x1080/000000/FFF?text=Gemini+Image+Generated";
pub const SUPPORTED_ASPECT_RATIOS: [&str; 3] = ["1:1", "9:16", "16:9"];

const DEFAULT_ASPECT_RATIO: &str = "1:1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeRequest {
    pub user_id: String,
    pub brandkit_id: String,
    pub prompt: String,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreativeState {
    pub meta: RunMeta,
    pub request: CreativeRequest,
    pub aspect_ratio: String,
    pub brand: Option<BrandProfile>,
    pub refined_prompt: Option<String>,
    pub image_url: Option<String>,
}

impl CreativeState {
    /// Unsupported aspect ratios are replaced by `1:1` with a warning.
    pub fn new(run_id: impl Into<String>, request: CreativeRequest) -> Self {
        let mut meta = RunMeta::new(run_id);
        let requested = request
            .aspect_ratio
            .as_deref()
            .map(str::trim)
            .filter(|ratio| !ratio.is_empty());
        let aspect_ratio = match requested {
            None => DEFAULT_ASPECT_RATIO.to_string(),
            Some(ratio) if SUPPORTED_ASPECT_RATIOS.contains(&ratio) => ratio.to_string(),
            Some(ratio) => {
                meta.warn(format!(
                    "Unsupported aspect ratio {ratio}; using {DEFAULT_ASPECT_RATIO}"
                ));
                DEFAULT_ASPECT_RATIO.to_string()
            }
        };
        Self {
            meta,
            request,
            aspect_ratio,
            brand: None,
            refined_prompt: None,
            image_url: None,
        }
    }

    pub fn into_result(self) -> PipelineResult {
        let mut result = self
            .meta
            .into_result(PipelineKind::Creative, CanvasFormats::new());
        result.image_url = self.image_url;
        result.refined_prompt = self.refined_prompt;
        result
    }
}

impl PipelineState for CreativeState {
    fn meta(&self) -> &RunMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RunMeta {
        &mut self.meta
    }
}

impl BrandedState for CreativeState {
    fn brand_key(&self) -> (&str, &str) {
        (&self.request.user_id, &self.request.brandkit_id)
    }

    fn brand_slot(&mut self) -> &mut Option<BrandProfile> {
        &mut self.brand
    }
}

fn refine_system_prompt(brand: &BrandProfile, aspect_ratio: &str) -> String {
    format!(
        "You are an expert creative director for a retail brand.\n\
         Your task is to refine a user's prompt for an image generation model so it follows the brand's style guide and produces a professional retail media creative.\n\n\
         Brand Name: {name}\n\
         Brand Colors: {colors}\n\
         Tone: {tone}\n\
         Brand Logo URL: {logo}\n\n\
         Output ONLY the refined prompt, optimized for an AI image generator. Do not add conversational filler.\n\
         The aspect ratio requested is {aspect_ratio}.",
        name = brand.name,
        colors = brand.colors_line(),
        tone = brand.tone,
        logo = brand.logo_url,
    )
}

/// Never fails the run: a fault or an empty reply keeps the user's prompt.
fn refine_prompt(ctx: &PipelineContext<'_>, mut state: CreativeState) -> anyhow::Result<CreativeState> {
    let original = state.request.prompt.clone();
    let request = {
        let brand = resolved_brand(&state.brand)?;
        ModelRequest::new(
            &ctx.settings.text_model,
            ModelTask::RefinePrompt {
                draft: original.clone(),
                brand_name: brand.name.clone(),
            },
            ModelSettings::REFINE_TEMPERATURE,
            original.clone(),
        )
        .with_system(refine_system_prompt(brand, &state.aspect_ratio))
    };

    let outcome = match ctx.model.invoke(&request) {
        Ok(content) => {
            let refined = content.text();
            if refined.is_empty() {
                Outcome::Fallback {
                    value: original,
                    reason: "Prompt refinement returned no text; using the original prompt"
                        .to_string(),
                }
            } else {
                Outcome::Ok(refined)
            }
        }
        Err(err) => Outcome::Fallback {
            value: original,
            reason: format!(
                "Prompt refinement failed; using the original prompt: {}",
                error_chain_text(&err, 300)
            ),
        },
    };
    state.refined_prompt = ctx.settle("refine_prompt", &mut state, outcome);
    Ok(state)
}

/// A model fault fails the run but still leaves the error placeholder as the
/// image reference. An unparseable reply completes with the generic
/// placeholder.
fn generate_image(ctx: &PipelineContext<'_>, mut state: CreativeState) -> anyhow::Result<CreativeState> {
    let prompt = state
        .refined_prompt
        .clone()
        .unwrap_or_else(|| state.request.prompt.clone());
    let request = ModelRequest::new(
        &ctx.settings.image_model,
        ModelTask::GenerateImage {
            aspect_ratio: Some(state.aspect_ratio.clone()),
        },
        ModelSettings::IMAGE_TEMPERATURE,
        prompt,
    );

    let content = match ctx.model.invoke(&request) {
        Ok(content) => content,
        Err(err) => {
            let detail = error_chain_text(&err, 500);
            warn!(run_id = %state.meta.run_id, stage = "generate_image", "image model failed: {detail}");
            state.image_url = Some(ERROR_IMAGE_URL.to_string());
            state
                .meta
                .fail(FailureKind::Fault, format!("Image generation failed: {detail}"));
            return Ok(state);
        }
    };

    let outcome = match normalize_image_reference(&content) {
        Some(reference) => Outcome::Ok(reference),
        None => Outcome::Fallback {
            value: ImageReference::Url(UNPARSED_IMAGE_URL.to_string()),
            reason: format!(
                "Image reply could not be parsed; using placeholder image ({})",
                truncate_text(&content.concatenated(), 100)
            ),
        },
    };
    if let Some(reference) = ctx.settle("generate_image", &mut state, outcome) {
        let kind = match &reference {
            ImageReference::Url(_) => "url",
            ImageReference::DataUri(_) => "data_uri",
        };
        info!(run_id = %state.meta.run_id, role = "creative", kind, "image generated");
        ctx.events.record(
            "image_generated",
            payload(json!({ "stage": "generate_image", "role": "creative", "kind": kind })),
        );
        state.image_url = Some(reference.into_string());
    }
    Ok(state)
}

const STAGES: &[Stage<CreativeState>] = &[
    Stage {
        name: "fetch_brand",
        run: fetch_brand::<CreativeState>,
    },
    Stage {
        name: "refine_prompt",
        run: refine_prompt,
    },
    Stage {
        name: "generate_image",
        run: generate_image,
    },
];

pub(crate) fn creative_pipeline() -> Pipeline<CreativeState> {
    Pipeline::new(PipelineKind::Creative, STAGES)
}

#[cfg(test)]
mod tests {
    use brandframe_contracts::runs::{FailureKind, RunStatus};
    use serde_json::json;

    use super::*;
    use crate::model::{ContentPart, RawContent};
    use crate::testkit::{Harness, ScriptedModel};

    fn request(aspect_ratio: Option<&str>) -> CreativeRequest {
        CreativeRequest {
            user_id: "u1".to_string(),
            brandkit_id: "kit-1".to_string(),
            prompt: "A basket of fresh peaches on a wooden table".to_string(),
            aspect_ratio: aspect_ratio.map(str::to_string),
        }
    }

    fn run(harness: &Harness, aspect_ratio: Option<&str>) -> CreativeState {
        creative_pipeline().run(&harness.ctx(), CreativeState::new("run-1", request(aspect_ratio)))
    }

    #[test]
    fn refined_prompt_drives_image_generation() {
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text("Sunlit peaches in a rustic crate, Fresh Market greens")
                .then_text("https://cdn.example.com/peaches.png"),
        );
        let state = run(&harness, Some("9:16"));

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(
            state.refined_prompt.as_deref(),
            Some("Sunlit peaches in a rustic crate, Fresh Market greens")
        );
        assert_eq!(state.image_url.as_deref(), Some("https://cdn.example.com/peaches.png"));

        let requests = harness.model.requests();
        assert_eq!(requests.len(), 2);
        let system = requests[0].system_prompt.clone().unwrap_or_default();
        assert!(system.contains("Brand Name: Fresh Market"));
        assert!(system.contains("#1B5E20, #FFC107, #FFFFFF"));
        assert!(system.contains("The aspect ratio requested is 9:16."));
        assert_eq!(requests[0].temperature, ModelSettings::REFINE_TEMPERATURE);
        assert_eq!(requests[1].user_prompt, "Sunlit peaches in a rustic crate, Fresh Market greens");
        assert_eq!(requests[1].temperature, ModelSettings::IMAGE_TEMPERATURE);
        assert_eq!(
            requests[1].task,
            ModelTask::GenerateImage {
                aspect_ratio: Some("9:16".to_string())
            }
        );
    }

    #[test]
    fn refinement_fault_keeps_original_prompt_and_continues() {
        let harness = Harness::new(
            ScriptedModel::new()
                .then_fault("503 upstream unavailable")
                .then_text("https://cdn.example.com/peaches.png"),
        );
        let state = run(&harness, None);

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(
            state.refined_prompt.as_deref(),
            Some("A basket of fresh peaches on a wooden table")
        );
        assert!(state.meta.warnings[0].starts_with("Prompt refinement failed"));
        assert_eq!(
            harness.model.requests()[1].user_prompt,
            "A basket of fresh peaches on a wooden table"
        );
    }

    #[test]
    fn unparseable_image_reply_completes_with_placeholder() {
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text("refined")
                .then_text("I cannot draw that, sorry."),
        );
        let state = run(&harness, None);

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(state.image_url.as_deref(), Some(UNPARSED_IMAGE_URL));
        assert!(state
            .meta
            .warnings
            .iter()
            .any(|warning| warning.contains("could not be parsed")));
    }

    #[test]
    fn inline_image_parts_become_data_uri() {
        let harness = Harness::new(ScriptedModel::new().then_text("refined").then(RawContent::Parts(vec![
            ContentPart::Text("Here you go".to_string()),
            ContentPart::Rich(json!({
                "type": "image_url",
                "image_url": {"url": "data:image/png;base64,iVBORw0KGgo="}
            })),
        ])));
        let state = run(&harness, None);
        assert_eq!(state.image_url.as_deref(), Some("data:image/png;base64,iVBORw0KGgo="));
    }

    #[test]
    fn image_model_fault_fails_with_error_placeholder() {
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text("refined")
                .then_fault("quota exceeded"),
        );
        let state = run(&harness, None);

        assert_eq!(state.meta.status, RunStatus::Failed);
        assert_eq!(state.meta.failure, Some(FailureKind::Fault));
        assert_eq!(state.image_url.as_deref(), Some(ERROR_IMAGE_URL));
        assert!(state
            .meta
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("quota exceeded"));

        let result = state.into_result();
        assert_eq!(result.image_url.as_deref(), Some(ERROR_IMAGE_URL));
        assert_eq!(result.message, "Creative generation failed");
    }

    #[test]
    fn unsupported_aspect_ratio_is_replaced() {
        let state = CreativeState::new("run-1", request(Some("4:3")));
        assert_eq!(state.aspect_ratio, "1:1");
        assert_eq!(state.meta.warnings.len(), 1);

        let state = CreativeState::new("run-1", request(Some(" 16:9 ")));
        assert_eq!(state.aspect_ratio, "16:9");
        assert!(state.meta.warnings.is_empty());
    }

    #[test]
    fn unknown_brand_uses_default_profile() {
        let harness = Harness::new(ScriptedModel::new().then_text("refined").then_text("https://x.example/a.png"));
        let mut request = request(None);
        request.brandkit_id = "missing-kit".to_string();
        let state = creative_pipeline().run(&harness.ctx(), CreativeState::new("run-2", request));

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(
            state.brand.map(|brand| brand.name),
            Some(brandframe_contracts::brand::DEFAULT_BRAND_NAME.to_string())
        );
    }
}
