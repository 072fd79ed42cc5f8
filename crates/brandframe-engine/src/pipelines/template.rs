use std::collections::BTreeMap;

use brandframe_contracts::brand::BrandProfile;
use brandframe_contracts::canvas::CanvasFormats;
use brandframe_contracts::json::extract_json_object_from_text;
use brandframe_contracts::layout::{FormatKey, LayoutSpec, TemplateDefinition};
use brandframe_contracts::runs::{FailureKind, PipelineKind, PipelineResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{fetch_brand, resolved_brand, BrandedState};
use crate::builder::{CanvasBuilder, ImageRegistry};
use crate::error::{error_chain_text, PosterError};
use crate::model::{ModelRequest, ModelSettings, ModelTask};
use crate::pipeline::{Outcome, Pipeline, PipelineContext, PipelineState, RunMeta, Stage};
use crate::placeholders::{resolve_layout, PlaceholderMap};
use crate::stores::load_template;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRequest {
    pub user_id: String,
    pub brandkit_id: String,
    pub template_id: String,
}

#[derive(Debug, Clone)]
pub struct TemplateState {
    pub meta: RunMeta,
    pub request: TemplateRequest,
    pub brand: Option<BrandProfile>,
    pub template: Option<TemplateDefinition>,
    /// Generated copy keyed by element role.
    pub generated: IndexMap<String, String>,
    pub resolved: BTreeMap<FormatKey, LayoutSpec>,
    pub formats: CanvasFormats,
}

impl TemplateState {
    pub fn new(run_id: impl Into<String>, request: TemplateRequest) -> Self {
        Self {
            meta: RunMeta::new(run_id),
            request,
            brand: None,
            template: None,
            generated: IndexMap::new(),
            resolved: BTreeMap::new(),
            formats: CanvasFormats::new(),
        }
    }

    pub fn into_result(self) -> PipelineResult {
        self.meta.into_result(PipelineKind::Template, self.formats)
    }

    fn require_template(&mut self) -> Option<TemplateDefinition> {
        if self.template.is_none() {
            self.meta
                .fail(FailureKind::Business, PosterError::MissingTemplate.to_string());
        }
        self.template.clone()
    }
}

impl PipelineState for TemplateState {
    fn meta(&self) -> &RunMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RunMeta {
        &mut self.meta
    }
}

impl BrandedState for TemplateState {
    fn brand_key(&self) -> (&str, &str) {
        (&self.request.user_id, &self.request.brandkit_id)
    }

    fn brand_slot(&mut self) -> &mut Option<BrandProfile> {
        &mut self.brand
    }
}

fn fetch_template(ctx: &PipelineContext<'_>, mut state: TemplateState) -> anyhow::Result<TemplateState> {
    let outcome = load_template(ctx.templates, &state.request.template_id);
    if let Some(template) = ctx.settle("load_template", &mut state, outcome) {
        info!(
            run_id = %state.meta.run_id,
            template = %template.id,
            formats = template.formats.len(),
            "template loaded"
        );
        if template.formats.is_empty() {
            state
                .meta
                .warn(format!("Template {} defines no supported formats", template.id));
        }
        state.template = Some(template);
    }
    Ok(state)
}

fn copy_prompt(brand: &BrandProfile, prompts: &IndexMap<String, String>) -> String {
    let elements = prompts
        .iter()
        .map(|(role, prompt)| format!("- {role}: {}", prompt.replace("{{brand_name}}", &brand.name)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a creative copywriter for {name}.\n\
         Brand tone: {tone}\n\
         Brand style: {style}\n\n\
         Generate marketing copy for each of the following elements.\n\
         Return your response as a JSON object with the role name as key and generated text as value.\n\
         Be concise and impactful. Follow the specific instructions for each element.\n\n\
         Elements to generate:\n\
         {elements}\n\n\
         Return ONLY valid JSON, no markdown, no explanation.",
        name = brand.name,
        tone = brand.tone,
        style = brand.style,
    )
}

fn placeholder_copy(roles: &[String]) -> IndexMap<String, String> {
    roles
        .iter()
        .map(|role| (role.clone(), format!("[{role}]")))
        .collect()
}

/// Non-string values are stringified; nulls are dropped.
fn decode_copy(reply: &str, roles: &[String]) -> Outcome<IndexMap<String, String>> {
    let Some(object) = extract_json_object_from_text(reply) else {
        return Outcome::Fallback {
            value: placeholder_copy(roles),
            reason: "Copy reply was not a JSON object; using role placeholders".to_string(),
        };
    };
    let copy = object
        .into_iter()
        .filter_map(|(role, value)| match value {
            Value::Null => None,
            Value::String(text) => Some((role, text)),
            other => Some((role, other.to_string())),
        })
        .collect();
    Outcome::Ok(copy)
}

/// One batched copywriting call for every text element with a prompt. Never
/// fails the run.
fn generate_texts(ctx: &PipelineContext<'_>, mut state: TemplateState) -> anyhow::Result<TemplateState> {
    let Some(template) = state.require_template() else {
        return Ok(state);
    };
    let prompts = template.generation_prompts();
    if prompts.is_empty() {
        debug!(run_id = %state.meta.run_id, "template has no copy prompts");
        return Ok(state);
    }
    let roles: Vec<String> = prompts.keys().cloned().collect();
    let request = ModelRequest::new(
        &ctx.settings.text_model,
        ModelTask::WriteCopy {
            roles: roles.clone(),
        },
        ModelSettings::COPY_TEMPERATURE,
        copy_prompt(resolved_brand(&state.brand)?, &prompts),
    );

    let outcome = match ctx.model.invoke(&request) {
        Ok(content) => decode_copy(&content.text(), &roles),
        Err(err) => Outcome::Fallback {
            value: placeholder_copy(&roles),
            reason: format!(
                "Copy generation failed; using role placeholders: {}",
                error_chain_text(&err, 300)
            ),
        },
    };
    if let Some(generated) = ctx.settle("generate_texts", &mut state, outcome) {
        debug!(run_id = %state.meta.run_id, texts = generated.len(), "copy generated");
        state.generated = generated;
    }
    Ok(state)
}

fn fill_template(_: &PipelineContext<'_>, mut state: TemplateState) -> anyhow::Result<TemplateState> {
    let Some(template) = state.require_template() else {
        return Ok(state);
    };
    let map = PlaceholderMap::for_brand(resolved_brand(&state.brand)?, &state.generated);
    state.resolved = template
        .formats
        .iter()
        .map(|(format, layout)| (*format, resolve_layout(layout, &map, &state.generated)))
        .collect();
    Ok(state)
}

fn build_canvas(_: &PipelineContext<'_>, mut state: TemplateState) -> anyhow::Result<TemplateState> {
    let images = ImageRegistry::new();
    let formats = CanvasBuilder::new(resolved_brand(&state.brand)?, &images).build(&state.resolved);
    for (format, graph) in &formats {
        debug!(run_id = %state.meta.run_id, format = %format, objects = graph.objects.len(), "canvas built");
    }
    state.formats = formats;
    Ok(state)
}

const STAGES: &[Stage<TemplateState>] = &[
    Stage {
        name: "fetch_brand",
        run: fetch_brand::<TemplateState>,
    },
    Stage {
        name: "load_template",
        run: fetch_template,
    },
    Stage {
        name: "generate_texts",
        run: generate_texts,
    },
    Stage {
        name: "fill_template",
        run: fill_template,
    },
    Stage {
        name: "build_canvas",
        run: build_canvas,
    },
];

pub(crate) fn template_pipeline() -> Pipeline<TemplateState> {
    Pipeline::new(PipelineKind::Template, STAGES)
}

#[cfg(test)]
mod tests {
    use brandframe_contracts::canvas::CanvasObject;
    use brandframe_contracts::runs::RunStatus;
    use serde_json::json;

    use super::*;
    use crate::testkit::{Harness, ScriptedModel};

    fn bold_sale() -> TemplateDefinition {
        let raw = json!({
            "id": "bold_sale",
            "name": "Bold Sale",
            "formats": {
                "instagram_post": {
                    "width": 1080,
                    "height": 1080,
                    "background": "{{colors.primary}}",
                    "elements": [
                        {"type": "text", "role": "headline", "content": "{{generated_headline}}",
                         "prompt": "A punchy sale headline for {{brand_name}}", "left": 540, "top": 200,
                         "fontSize": 80, "fontWeight": "bold", "fill": "{{colors.text}}",
                         "textAlign": "center", "originX": "center"},
                        {"type": "image", "role": "logo", "source": "{{logo_url}}", "left": 40, "top": 40},
                        {"type": "image", "role": "hero", "source": "{{asset_urls.3}}"},
                        {"type": "rect", "left": 0, "top": 900, "width": 1080, "height": 180,
                         "fill": "transparent", "stroke": "{{colors.secondary}}"}
                    ]
                },
                "instagram_story": {
                    "background": {"kind": "solid", "color": "{{colors.secondary}}"},
                    "elements": [
                        {"type": "text", "role": "cta", "content": "{{generated_cta}}", "prompt": "Short call to action"},
                        {"type": "text", "role": "headline", "content": "{{generated_headline}}", "prompt": "ignored duplicate"},
                        {"type": "text", "role": "footer", "content": "Offer from {{brand_name}}"}
                    ]
                }
            }
        });
        TemplateDefinition::from_value("bold_sale", &raw)
            .unwrap_or_else(|| panic!("fixture template must parse"))
    }

    fn harness(model: ScriptedModel) -> Harness {
        let mut harness = Harness::new(model);
        harness.templates.insert(bold_sale());
        harness
    }

    fn run(harness: &Harness, template_id: &str) -> TemplateState {
        let request = TemplateRequest {
            user_id: "u1".to_string(),
            brandkit_id: "kit-1".to_string(),
            template_id: template_id.to_string(),
        };
        template_pipeline().run(&harness.ctx(), TemplateState::new("run-t", request))
    }

    fn texts(state: &TemplateState, format: FormatKey) -> Vec<String> {
        state.formats[&format]
            .objects
            .iter()
            .filter_map(|object| match object {
                CanvasObject::Textbox(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn fills_brand_tokens_and_generated_copy() {
        let harness = harness(
            ScriptedModel::new().then_text(r#"{"headline": "Summer Savings", "cta": "Shop today"}"#),
        );
        let state = run(&harness, "bold_sale");

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(state.formats.len(), 2);
        assert!(!state.formats.contains_key(&FormatKey::Facebook));

        let instagram = &state.formats[&FormatKey::Instagram];
        assert_eq!(instagram.background, "#1B5E20");
        assert_eq!(texts(&state, FormatKey::Instagram), vec!["Summer Savings"]);
        assert_eq!(
            texts(&state, FormatKey::Story),
            vec!["Shop today", "Summer Savings", "Offer from Fresh Market"]
        );
        assert_eq!(state.formats[&FormatKey::Story].background, "#FFC107");
        assert_eq!(state.formats[&FormatKey::Story].height, 1920);

        let images: Vec<&str> = instagram
            .objects
            .iter()
            .filter_map(|object| match object {
                CanvasObject::Image(image) => Some(image.src.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(images, vec!["https://cdn.example.com/fresh-logo.png"]);

        let rect = instagram.objects.iter().find_map(|object| match object {
            CanvasObject::Rect(rect) => Some(rect.clone()),
            _ => None,
        });
        let rect = rect.unwrap_or_else(|| panic!("rect expected"));
        assert_eq!(rect.fill, "rgba(0,0,0,0)");
        assert_eq!(rect.stroke.as_deref(), Some("#FFC107"));
        assert_eq!(rect.stroke_width, Some(1.0));

        let requests = harness.model.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0]
            .user_prompt
            .contains("- headline: A punchy sale headline for Fresh Market"));
        assert!(!requests[0].user_prompt.contains("ignored duplicate"));
        assert_eq!(
            requests[0].task,
            ModelTask::WriteCopy {
                roles: vec!["headline".to_string(), "cta".to_string()]
            }
        );
    }

    #[test]
    fn missing_template_fails_with_its_id() {
        let harness = harness(ScriptedModel::new());
        let state = run(&harness, "does_not_exist");

        assert_eq!(state.meta.status, RunStatus::Failed);
        assert_eq!(state.meta.failure, Some(FailureKind::Business));
        assert!(state
            .meta
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("does_not_exist"));
        assert!(harness.model.requests().is_empty());

        let result = state.into_result();
        assert!(result.formats.is_empty());
        assert!(result.digest.is_none());
    }

    #[test]
    fn undecodable_copy_uses_role_placeholders() {
        let harness = harness(ScriptedModel::new().then_text("Headline: Summer Savings"));
        let state = run(&harness, "bold_sale");

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(texts(&state, FormatKey::Instagram), vec!["[headline]"]);
        assert_eq!(texts(&state, FormatKey::Story)[0], "[cta]");
        assert_eq!(state.meta.warnings.len(), 1);
    }

    #[test]
    fn copy_fault_uses_role_placeholders() {
        let harness = harness(ScriptedModel::new().then_fault("deadline exceeded"));
        let state = run(&harness, "bold_sale");

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(texts(&state, FormatKey::Instagram), vec!["[headline]"]);
        assert!(state.meta.warnings[0].contains("deadline exceeded"));
    }

    #[test]
    fn roles_missing_from_reply_fall_back_individually() {
        let harness = harness(ScriptedModel::new().then_text(r#"{"headline": 40, "cta": null}"#));
        let state = run(&harness, "bold_sale");

        assert_eq!(texts(&state, FormatKey::Instagram), vec!["40"]);
        assert_eq!(texts(&state, FormatKey::Story)[0], "[cta]");
        assert!(state.meta.warnings.is_empty());
    }
}
