use std::io::Cursor;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use brandframe_contracts::brand::{DEFAULT_PRIMARY_COLOR, DEFAULT_SECONDARY_COLOR};
use image::{ImageFormat, Rgb, RgbImage};
use regex::Regex;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::{ContentPart, GenerationModel, ModelRequest, ModelTask, RawContent};

static HEX_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[0-9A-Fa-f]{6}\b").expect("valid hex color regex"));

const DRYRUN_IMAGE_SIZE: u32 = 64;

/// Offline backend. Replies are a pure function of the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunModel;

impl DryrunModel {
    fn refine(draft: &str, brand_name: &str) -> RawContent {
        RawContent::Text(format!(
            "{}, in the visual style of {brand_name}, clean retail composition, studio lighting",
            draft.trim()
        ))
    }

    fn design(prompt: &str) -> RawContent {
        let mut colors = HEX_COLOR_RE
            .find_iter(prompt)
            .map(|found| found.as_str().to_string());
        let primary = colors
            .next()
            .unwrap_or_else(|| DEFAULT_PRIMARY_COLOR.to_string());
        let secondary = colors
            .next()
            .unwrap_or_else(|| DEFAULT_SECONDARY_COLOR.to_string());

        let layouts = json!({
            "images_to_generate": [{
                "role": "background",
                "prompt": "soft abstract retail backdrop with gentle light",
                "required": true
            }],
            "instagram": {
                "background": "image",
                "background_color": primary,
                "elements": [
                    {"type": "rect", "left": 0, "top": 820, "width": 1080, "height": 260, "fill": primary, "opacity": 0.85},
                    {"type": "image", "role": "logo", "left": 40, "top": 40, "scaleToWidth": 160},
                    {"type": "image", "role": "product", "left": 340, "top": 260, "scaleToWidth": 400},
                    {"type": "text", "role": "headline", "content": "Limited Time Offer", "left": 60, "top": 860, "fontSize": 64, "fontWeight": "bold", "fill": "#FFFFFF", "width": 960},
                    {"type": "text", "role": "cta", "content": "Shop now", "left": 60, "top": 960, "fontSize": 36, "fill": secondary}
                ]
            },
            "story": {
                "background": "gradient",
                "gradient_colors": [primary, secondary],
                "elements": [
                    {"type": "image", "role": "logo", "left": 60, "top": 80, "scaleToWidth": 200},
                    {"type": "image", "role": "product", "left": 240, "top": 560, "scaleToWidth": 600},
                    {"type": "text", "role": "headline", "content": "Limited Time Offer", "left": 540, "top": 1400, "fontSize": 80, "fontWeight": "bold", "fill": "#FFFFFF", "textAlign": "center", "width": 960},
                    {"type": "rect", "left": 340, "top": 1640, "width": 400, "height": 110, "fill": secondary, "rx": 24},
                    {"type": "text", "role": "cta", "content": "Shop now", "left": 440, "top": 1670, "fontSize": 44, "fill": "#FFFFFF"}
                ]
            },
            "facebook": {
                "background": "solid",
                "background_color": primary,
                "elements": [
                    {"type": "image", "role": "product", "left": 680, "top": 60, "scaleToHeight": 500},
                    {"type": "text", "role": "headline", "content": "Limited Time Offer", "left": 60, "top": 200, "fontSize": 56, "fontWeight": "bold", "fill": "#FFFFFF", "width": 560},
                    {"type": "text", "role": "cta", "content": "Shop now", "left": 60, "top": 420, "fontSize": 32, "fill": secondary},
                    {"type": "image", "role": "logo", "left": 60, "top": 40, "scaleToWidth": 140}
                ]
            }
        });
        RawContent::Text(format!("```json\n{layouts:#}\n```"))
    }

    fn image(prompt: &str) -> Result<RawContent> {
        let digest = Sha256::digest(prompt.as_bytes());
        let mut image = RgbImage::new(DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([digest[0], digest[1], digest[2]]);
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(RawContent::Parts(vec![
            ContentPart::Text("Generated image:".to_string()),
            ContentPart::Rich(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", BASE64.encode(bytes)) },
            })),
        ]))
    }

    fn copy(roles: &[String]) -> RawContent {
        let mut copy = Map::new();
        for role in roles {
            let text = match role.as_str() {
                "headline" => "Fresh Deals Every Day".to_string(),
                "subheadline" | "tagline" => "Quality you can count on".to_string(),
                "cta" => "Shop Now".to_string(),
                other => format!("Sample {} copy", other.replace('_', " ")),
            };
            copy.insert(role.clone(), Value::String(text));
        }
        RawContent::Text(Value::Object(copy).to_string())
    }
}

impl GenerationModel for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn invoke(&self, request: &ModelRequest) -> Result<RawContent> {
        match &request.task {
            ModelTask::RefinePrompt { draft, brand_name } => Ok(Self::refine(draft, brand_name)),
            ModelTask::DesignLayouts => Ok(Self::design(&request.user_prompt)),
            ModelTask::GenerateImage { .. } => Self::image(&request.user_prompt),
            ModelTask::WriteCopy { roles } => Ok(Self::copy(roles)),
        }
    }
}
