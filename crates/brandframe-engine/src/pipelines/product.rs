use anyhow::Context;
use brandframe_contracts::brand::BrandProfile;
use brandframe_contracts::canvas::CanvasFormats;
use brandframe_contracts::events::payload;
use brandframe_contracts::json::{extract_json_object_from_text, strip_code_fence};
use brandframe_contracts::layout::{FormatKey, PosterLayouts};
use brandframe_contracts::runs::{FailureKind, PipelineKind, PipelineResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{fetch_brand, resolved_brand, BrandedState};
use crate::builder::{CanvasBuilder, ImageRegistry};
use crate::error::{error_chain_text, PosterError};
use crate::model::{ModelRequest, ModelSettings, ModelTask};
use crate::normalize::normalize_image_reference;
use crate::pipeline::{Outcome, Pipeline, PipelineContext, PipelineState, RunMeta, Stage};

fn default_poster_type() -> String {
    "sale".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRequest {
    pub user_id: String,
    pub brandkit_id: String,
    pub product_name: String,
    #[serde(default)]
    pub product_description: Option<String>,
    #[serde(default = "default_poster_type")]
    pub poster_type: String,
    #[serde(default)]
    pub poster_description: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    /// URL or data URI of a caller-supplied product photo.
    #[serde(default)]
    pub product_image: Option<String>,
}

impl ProductRequest {
    fn product_image(&self) -> Option<&str> {
        self.product_image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ProductState {
    pub meta: RunMeta,
    pub request: ProductRequest,
    pub brand: Option<BrandProfile>,
    pub layouts: Option<PosterLayouts>,
    pub images: ImageRegistry,
    pub formats: CanvasFormats,
}

impl ProductState {
    pub fn new(run_id: impl Into<String>, request: ProductRequest) -> Self {
        Self {
            meta: RunMeta::new(run_id),
            request,
            brand: None,
            layouts: None,
            images: ImageRegistry::new(),
            formats: CanvasFormats::new(),
        }
    }

    pub fn into_result(self) -> PipelineResult {
        self.meta.into_result(PipelineKind::Product, self.formats)
    }
}

impl PipelineState for ProductState {
    fn meta(&self) -> &RunMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RunMeta {
        &mut self.meta
    }
}

impl BrandedState for ProductState {
    fn brand_key(&self) -> (&str, &str) {
        (&self.request.user_id, &self.request.brandkit_id)
    }

    fn brand_slot(&mut self) -> &mut Option<BrandProfile> {
        &mut self.brand
    }
}

fn design_prompt(brand: &BrandProfile, request: &ProductRequest) -> String {
    let formats = FormatKey::ALL
        .iter()
        .enumerate()
        .map(|(index, format)| {
            format!(
                "{}. {}: {}x{} ({})",
                index + 1,
                format.key(),
                format.width(),
                format.height(),
                format.display_name()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r##"You are an expert retail poster designer. Create a JSON layout specification for a product poster.

BRAND INFORMATION:
- Primary Color: {primary}
- Secondary Color: {secondary}
- Brand Name: {name}
- Tone: {tone}
- Style: {style}
- Has Logo: {has_logo}

PRODUCT INFORMATION:
- Product Name: {product_name}
- Description: {description}
- Poster Type: {poster_type}
- Design Preferences: {preferences}
- Tagline: {tagline}
- Has Product Image: {has_product_image}

Create layouts for these formats:
{formats}

Return a JSON object with this structure:
{{
  "images_to_generate": [{{"role": "background", "prompt": "detailed image prompt", "required": true}}],
  "instagram": {{
    "background": "solid" | "gradient" | "image",
    "background_color": "#hex",
    "gradient_colors": ["#hex1", "#hex2"],
    "elements": [
      {{"type": "text", "role": "headline" | "product_name" | "tagline" | "cta", "content": "text", "left": number, "top": number, "fontSize": number, "fontWeight": "normal" | "bold", "fontFamily": "Arial", "fill": "#hex", "textAlign": "left" | "center" | "right", "width": number}},
      {{"type": "image", "role": "logo" | "product" | "background" | "decorative", "left": number, "top": number, "scaleToWidth": number, "scaleToHeight": number}},
      {{"type": "rect", "left": number, "top": number, "width": number, "height": number, "fill": "#hex", "opacity": number, "rx": number}}
    ]
  }},
  "story": {{ same structure }},
  "facebook": {{ same structure }}
}}

DESIGN GUIDELINES:
- Use brand colors prominently
- Keep at least 40px of padding from the edges
- Keep text readable with good contrast
- For {poster_type} posters, emphasize urgency and value
- Without a product image, request a product showcase image in images_to_generate

Return ONLY valid JSON, no markdown, no explanation."##,
        primary = brand.primary_color(),
        secondary = brand.secondary_color(),
        name = brand.name,
        tone = brand.tone,
        style = brand.style,
        has_logo = brand.has_logo(),
        product_name = request.product_name,
        description = request.product_description.as_deref().unwrap_or_default(),
        poster_type = request.poster_type,
        preferences = request.poster_description.as_deref().unwrap_or_default(),
        tagline = request.tagline.as_deref().unwrap_or_default(),
        has_product_image = request.product_image().is_some(),
    )
}

/// A reply that is not a JSON object fails the run; so does an object that
/// covers none of the three formats.
fn parse_layouts(reply: &str) -> Outcome<PosterLayouts> {
    let Some(object) = extract_json_object_from_text(reply) else {
        let reason = match serde_json::from_str::<Value>(&strip_code_fence(reply)) {
            Err(err) => err.to_string(),
            Ok(_) => "reply is not a JSON object".to_string(),
        };
        return Outcome::Fatal(PosterError::LayoutParse(reason).to_string());
    };
    match PosterLayouts::from_value(&Value::Object(object)) {
        Some(layouts) if !layouts.formats.is_empty() => Outcome::Ok(layouts),
        _ => Outcome::Fatal(PosterError::MissingLayout.to_string()),
    }
}

fn design_layouts(ctx: &PipelineContext<'_>, mut state: ProductState) -> anyhow::Result<ProductState> {
    let prompt = design_prompt(resolved_brand(&state.brand)?, &state.request);
    let request = ModelRequest::new(
        &ctx.settings.text_model,
        ModelTask::DesignLayouts,
        ModelSettings::DESIGN_TEMPERATURE,
        prompt,
    );
    let reply = ctx
        .model
        .invoke(&request)
        .context("layout design call failed")?
        .text();

    if let Some(layouts) = ctx.settle("design_layouts", &mut state, parse_layouts(&reply)) {
        info!(
            run_id = %state.meta.run_id,
            formats = layouts.formats.len(),
            images = layouts.images_to_generate.len(),
            "layouts designed"
        );
        state.layouts = Some(layouts);
    }
    Ok(state)
}

fn image_prompt(brand: &BrandProfile, prompt: &str) -> String {
    let colors = if brand.colors.is_empty() {
        brand.primary_color().to_string()
    } else {
        brand.colors_line()
    };
    format!(
        "Create a professional retail marketing image for {name}.\n\
         Brand colors: {colors}\n\n\
         {prompt}\n\n\
         The image should be high quality and suitable for retail marketing materials.\n\
         No text in the image. Clean, modern aesthetic.",
        name = brand.name,
        prompt = prompt.trim(),
    )
}

fn skip_image(ctx: &PipelineContext<'_>, state: &mut ProductState, role: &str, reason: &str) {
    warn!(run_id = %state.meta.run_id, role, "image skipped: {reason}");
    ctx.events.record(
        "image_skipped",
        payload(json!({ "stage": "generate_images", "role": role, "reason": reason })),
    );
    state
        .meta
        .warn(format!("Image for role {role} was not generated: {reason}"));
}

/// Best effort and strictly in list order. A later entry with the same role
/// replaces the earlier image.
fn generate_images(ctx: &PipelineContext<'_>, mut state: ProductState) -> anyhow::Result<ProductState> {
    let specs = state
        .layouts
        .as_ref()
        .map(|layouts| layouts.images_to_generate.clone())
        .unwrap_or_default();
    if specs.is_empty() {
        debug!(run_id = %state.meta.run_id, "no images requested");
        return Ok(state);
    }
    let brand = resolved_brand(&state.brand)?.clone();

    for spec in specs {
        if spec.prompt.trim().is_empty() {
            ctx.events.record(
                "image_skipped",
                payload(json!({ "stage": "generate_images", "role": spec.role, "reason": "empty prompt" })),
            );
            continue;
        }
        let request = ModelRequest::new(
            &ctx.settings.image_model,
            ModelTask::GenerateImage { aspect_ratio: None },
            ModelSettings::IMAGE_TEMPERATURE,
            image_prompt(&brand, &spec.prompt),
        );
        match ctx.model.invoke(&request) {
            Ok(content) => match normalize_image_reference(&content) {
                Some(reference) => {
                    info!(run_id = %state.meta.run_id, role = %spec.role, "image generated");
                    ctx.events.record(
                        "image_generated",
                        payload(json!({ "stage": "generate_images", "role": spec.role })),
                    );
                    state.images.insert(spec.role, reference.into_string());
                }
                None => skip_image(ctx, &mut state, &spec.role, "reply held no image reference"),
            },
            Err(err) => skip_image(
                ctx,
                &mut state,
                &spec.role,
                &format!("image model failed: {}", error_chain_text(&err, 300)),
            ),
        }
    }
    Ok(state)
}

fn build_canvas(_: &PipelineContext<'_>, mut state: ProductState) -> anyhow::Result<ProductState> {
    let Some(layouts) = state.layouts.as_ref() else {
        state
            .meta
            .fail(FailureKind::Business, PosterError::MissingLayout.to_string());
        return Ok(state);
    };
    let formats = CanvasBuilder::new(resolved_brand(&state.brand)?, &state.images)
        .with_product_image(state.request.product_image())
        .build(&layouts.formats);
    for (format, graph) in &formats {
        debug!(run_id = %state.meta.run_id, format = %format, objects = graph.objects.len(), "canvas built");
    }
    state.formats = formats;
    Ok(state)
}

const STAGES: &[Stage<ProductState>] = &[
    Stage {
        name: "fetch_brand",
        run: fetch_brand::<ProductState>,
    },
    Stage {
        name: "design_layouts",
        run: design_layouts,
    },
    Stage {
        name: "generate_images",
        run: generate_images,
    },
    Stage {
        name: "build_canvas",
        run: build_canvas,
    },
];

pub(crate) fn product_pipeline() -> Pipeline<ProductState> {
    Pipeline::new(PipelineKind::Product, STAGES)
}

#[cfg(test)]
mod tests {
    use brandframe_contracts::canvas::CanvasObject;
    use brandframe_contracts::runs::RunStatus;

    use super::*;
    use crate::testkit::{Harness, ScriptedModel};

    const BACKGROUND_URL: &str = "https://cdn.example.com/generated/bg.png";

    fn request(product_image: Option<&str>) -> ProductRequest {
        ProductRequest {
            user_id: "u1".to_string(),
            brandkit_id: "kit-1".to_string(),
            product_name: "Organic Peaches".to_string(),
            product_description: Some("Sweet, locally grown".to_string()),
            poster_type: "sale".to_string(),
            poster_description: None,
            tagline: Some("Taste the summer".to_string()),
            product_image: product_image.map(str::to_string),
        }
    }

    fn layout_reply() -> String {
        json!({
            "images_to_generate": [
                {"role": "background", "prompt": "sunny orchard backdrop", "required": true}
            ],
            "instagram": {
                "background": "image",
                "background_color": "#1B5E20",
                "elements": [
                    {"type": "text", "role": "headline", "content": "Peach Week", "fontSize": 72},
                    {"type": "image", "role": "product", "left": 300, "top": 300, "scaleToWidth": 480}
                ]
            },
            "story": {
                "background": "gradient",
                "gradient_colors": ["#1B5E20", "#FFC107"],
                "elements": [{"type": "image", "role": "logo", "left": 40, "top": 40}]
            },
            "facebook": {
                "background": "image",
                "elements": [{"type": "rect", "width": 400, "height": 120, "fill": "#FFC107", "rx": 12}]
            }
        })
        .to_string()
    }

    fn run(harness: &Harness, product_image: Option<&str>) -> ProductState {
        product_pipeline().run(&harness.ctx(), ProductState::new("run-p", request(product_image)))
    }

    fn full_bleed_sources(state: &ProductState, format: FormatKey) -> Vec<String> {
        state
            .formats
            .get(&format)
            .map(|graph| {
                graph
                    .objects
                    .iter()
                    .filter_map(|object| match object {
                        CanvasObject::Image(image)
                            if image.scale_to_width == Some(f64::from(graph.width))
                                && image.scale_to_height == Some(f64::from(graph.height)) =>
                        {
                            Some(image.src.clone())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn generated_background_fills_every_image_background_format() {
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text(&format!("```json\n{}\n```", layout_reply()))
                .then_text(BACKGROUND_URL),
        );
        let state = run(&harness, None);

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(state.formats.len(), 3);
        assert_eq!(full_bleed_sources(&state, FormatKey::Instagram), vec![BACKGROUND_URL]);
        assert_eq!(full_bleed_sources(&state, FormatKey::Facebook), vec![BACKGROUND_URL]);
        assert!(full_bleed_sources(&state, FormatKey::Story).is_empty());

        let instagram = &state.formats[&FormatKey::Instagram];
        assert!(!instagram
            .objects
            .iter()
            .any(|object| matches!(object, CanvasObject::Image(image) if image.src != BACKGROUND_URL)));

        let requests = harness.model.requests();
        assert!(requests[0].user_prompt.contains("Primary Color: #1B5E20"));
        assert!(requests[0].user_prompt.contains("Has Product Image: false"));
        assert!(requests[1].user_prompt.contains("sunny orchard backdrop"));
        assert!(requests[1].user_prompt.contains("No text in the image."));
        assert!(state.into_result().digest.is_some());
    }

    #[test]
    fn supplied_product_image_binds_to_product_role() {
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text(&layout_reply())
                .then_text(BACKGROUND_URL),
        );
        let state = run(&harness, Some("data:image/png;base64,AAAA"));

        let instagram = &state.formats[&FormatKey::Instagram];
        assert!(instagram.objects.iter().any(|object| matches!(
            object,
            CanvasObject::Image(image) if image.src == "data:image/png;base64,AAAA"
        )));
        assert!(harness.model.requests()[0]
            .user_prompt
            .contains("Has Product Image: true"));
    }

    #[test]
    fn unparseable_layout_is_a_business_failure() {
        let harness = Harness::new(ScriptedModel::new().then_text("Here is a lovely design idea!"));
        let state = run(&harness, None);

        assert_eq!(state.meta.status, RunStatus::Failed);
        assert_eq!(state.meta.failure, Some(FailureKind::Business));
        assert!(state
            .meta
            .error
            .as_deref()
            .unwrap_or_default()
            .starts_with("Failed to parse AI response:"));
        assert!(state.formats.is_empty());
        assert_eq!(harness.model.requests().len(), 1);
    }

    #[test]
    fn layout_without_formats_is_missing_layout() {
        let harness = Harness::new(ScriptedModel::new().then_text(r#"{"images_to_generate": []}"#));
        let state = run(&harness, None);
        assert_eq!(state.meta.status, RunStatus::Failed);
        assert_eq!(
            state.meta.error.as_deref(),
            Some(PosterError::MissingLayout.to_string().as_str())
        );
    }

    #[test]
    fn layout_call_fault_is_a_fault() {
        let harness = Harness::new(ScriptedModel::new().then_fault("connection reset"));
        let state = run(&harness, None);
        assert_eq!(state.meta.status, RunStatus::Failed);
        assert_eq!(state.meta.failure, Some(FailureKind::Fault));
        assert!(state
            .meta
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("connection reset"));
    }

    #[test]
    fn failed_or_empty_image_requests_are_skipped() {
        let reply = json!({
            "images_to_generate": [
                {"role": "decorative", "prompt": ""},
                {"role": "background", "prompt": "orchard"},
                {"role": "product", "prompt": "peach closeup"}
            ],
            "instagram": {"background": "image", "elements": [{"type": "image", "role": "product"}]}
        })
        .to_string();
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text(&reply)
                .then_fault("safety block")
                .then_text("https://cdn.example.com/peach.png"),
        );
        let state = run(&harness, None);

        assert_eq!(state.meta.status, RunStatus::Completed);
        assert_eq!(harness.model.requests().len(), 3);
        assert!(!state.images.contains_key("background"));
        assert_eq!(
            state.images.get("product").map(String::as_str),
            Some("https://cdn.example.com/peach.png")
        );
        assert_eq!(state.meta.warnings.len(), 1);
        assert!(state.meta.warnings[0].contains("background"));

        let instagram = &state.formats[&FormatKey::Instagram];
        assert_eq!(instagram.background, "#ffffff");
        assert_eq!(instagram.objects.len(), 1);
    }

    #[test]
    fn later_image_for_same_role_wins() {
        let reply = json!({
            "images_to_generate": [
                {"role": "background", "prompt": "first"},
                {"role": "background", "prompt": "second"}
            ],
            "facebook": {"background": "image"}
        })
        .to_string();
        let harness = Harness::new(
            ScriptedModel::new()
                .then_text(&reply)
                .then_text("https://cdn.example.com/one.png")
                .then_text("https://cdn.example.com/two.png"),
        );
        let state = run(&harness, None);
        assert_eq!(
            full_bleed_sources(&state, FormatKey::Facebook),
            vec!["https://cdn.example.com/two.png"]
        );
    }

    #[test]
    fn poster_type_defaults_to_sale() -> anyhow::Result<()> {
        let request: ProductRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "brandkit_id": "kit-1",
            "product_name": "Peaches"
        }))?;
        assert_eq!(request.poster_type, "sale");
        assert!(request.product_image().is_none());
        Ok(())
    }
}
