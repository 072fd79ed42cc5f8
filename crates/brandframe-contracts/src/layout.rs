use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::json::{first_present, value_as_f64, value_as_non_empty_string, value_as_string_list};

/// The three fixed output formats. Declaration order is output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKey {
    Instagram,
    Story,
    Facebook,
}

impl FormatKey {
    pub const ALL: [FormatKey; 3] = [FormatKey::Instagram, FormatKey::Story, FormatKey::Facebook];

    pub fn key(self) -> &'static str {
        match self {
            FormatKey::Instagram => "instagram",
            FormatKey::Story => "story",
            FormatKey::Facebook => "facebook",
        }
    }

    /// Accepts either the template key or the short key.
    pub fn from_template_key(raw: &str) -> Option<Self> {
        FormatKey::ALL
            .into_iter()
            .find(|format| raw == format.template_key() || raw == format.key())
    }

    /// Key used by template definitions for the same format.
    pub fn template_key(self) -> &'static str {
        match self {
            FormatKey::Instagram => "instagram_post",
            FormatKey::Story => "instagram_story",
            FormatKey::Facebook => "facebook",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            FormatKey::Instagram => "Instagram Post",
            FormatKey::Story => "Instagram Story",
            FormatKey::Facebook => "Facebook Post",
        }
    }

    pub fn width(self) -> u32 {
        match self {
            FormatKey::Instagram | FormatKey::Story => 1080,
            FormatKey::Facebook => 1200,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            FormatKey::Instagram => 1080,
            FormatKey::Story => 1920,
            FormatKey::Facebook => 630,
        }
    }

    pub fn from_key(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        FormatKey::ALL
            .into_iter()
            .find(|format| format.key() == normalized || format.template_key() == normalized)
    }
}

impl std::fmt::Display for FormatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Where a layout came from. Model-designed and template-defined layouts fill
/// missing element fields with different defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutSource {
    Designed,
    Template,
}

/// Fallback values for element fields a layout left out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementDefaults {
    pub text_left: f64,
    pub text_top: f64,
    pub font_size: f64,
    pub text_align: Option<&'static str>,
    pub image_scale_to_width: Option<f64>,
}

impl LayoutSource {
    pub fn defaults(self) -> ElementDefaults {
        match self {
            LayoutSource::Designed => ElementDefaults {
                text_left: 50.0,
                text_top: 50.0,
                font_size: 32.0,
                text_align: Some("left"),
                image_scale_to_width: None,
            },
            LayoutSource::Template => ElementDefaults {
                text_left: 0.0,
                text_top: 0.0,
                font_size: 24.0,
                text_align: None,
                image_scale_to_width: Some(200.0),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    Solid,
    Gradient,
    Image,
}

impl BackgroundKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "solid" => Some(BackgroundKind::Solid),
            "gradient" => Some(BackgroundKind::Gradient),
            "image" => Some(BackgroundKind::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSpec {
    pub kind: BackgroundKind,
    pub color: Option<String>,
    #[serde(default)]
    pub gradient_colors: Vec<String>,
    pub image_role: String,
}

impl BackgroundSpec {
    pub fn solid(color: impl Into<String>) -> Self {
        Self {
            kind: BackgroundKind::Solid,
            color: Some(color.into()),
            gradient_colors: Vec::new(),
            image_role: "background".to_string(),
        }
    }

    /// Designed layouts spell the background as sibling keys
    /// (`background`, `background_color`, `gradient_colors`).
    fn from_layout_object(object: &Map<String, Value>) -> Self {
        if let Some(nested) = object.get("background").and_then(Value::as_object) {
            return Self::from_background_object(nested);
        }
        let kind = object
            .get("background")
            .and_then(Value::as_str)
            .and_then(BackgroundKind::parse)
            .unwrap_or(BackgroundKind::Solid);
        Self {
            kind,
            color: value_as_non_empty_string(first_present(
                object,
                &["background_color", "backgroundColor"],
            )),
            gradient_colors: value_as_string_list(first_present(
                object,
                &["gradient_colors", "gradientColors"],
            )),
            image_role: value_as_non_empty_string(object.get("background_role"))
                .unwrap_or_else(|| "background".to_string()),
        }
    }

    fn from_background_object(object: &Map<String, Value>) -> Self {
        let kind = first_present(object, &["kind", "type"])
            .and_then(Value::as_str)
            .and_then(BackgroundKind::parse)
            .unwrap_or(BackgroundKind::Solid);
        Self {
            kind,
            color: value_as_non_empty_string(first_present(object, &["color", "background_color"])),
            gradient_colors: value_as_string_list(first_present(
                object,
                &["colors", "gradient_colors"],
            )),
            image_role: value_as_non_empty_string(first_present(object, &["role", "image_role"]))
                .unwrap_or_else(|| "background".to_string()),
        }
    }

    /// Templates give the background as a bare color (placeholders allowed)
    /// or as a background object.
    fn from_template_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Object(object)) => Self::from_background_object(object),
            Some(Value::String(color)) if !color.trim().is_empty() => Self::solid(color.trim()),
            _ => Self::solid("#FFFFFF"),
        }
    }

    pub fn map_strings(&self, f: &impl Fn(&str) -> String) -> Self {
        Self {
            kind: self.kind,
            color: self.color.as_deref().map(f),
            gradient_colors: self.gradient_colors.iter().map(|c| f(c)).collect(),
            image_role: f(&self.image_role),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    pub role: String,
    pub content: String,
    pub prompt: Option<String>,
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub font_size: Option<f64>,
    pub font_weight: Option<String>,
    pub font_family: Option<String>,
    pub fill: Option<String>,
    pub text_align: Option<String>,
    pub width: Option<f64>,
    pub origin_x: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    pub role: String,
    pub source: Option<String>,
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub scale_to_width: Option<f64>,
    pub scale_to_height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectElement {
    pub role: String,
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub fill: Option<String>,
    pub opacity: Option<f64>,
    pub rx: Option<f64>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayoutElement {
    Text(TextElement),
    Image(ImageElement),
    Rect(RectElement),
}

impl LayoutElement {
    /// Reads one element. Elements of an unknown `type` yield `None` and are
    /// skipped by the caller.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object.get("type").and_then(Value::as_str)?;
        let role = value_as_non_empty_string(object.get("role")).unwrap_or_default();
        let left = value_as_f64(object.get("left"));
        let top = value_as_f64(object.get("top"));
        match kind.trim().to_ascii_lowercase().as_str() {
            "text" | "textbox" => Some(LayoutElement::Text(TextElement {
                role,
                content: value_as_text(first_present(object, &["content", "text"]))
                    .unwrap_or_default(),
                prompt: value_as_non_empty_string(object.get("prompt")),
                left,
                top,
                font_size: value_as_f64(first_present(object, &["fontSize", "font_size"])),
                font_weight: value_as_text(first_present(object, &["fontWeight", "font_weight"])),
                font_family: value_as_non_empty_string(first_present(
                    object,
                    &["fontFamily", "font_family"],
                )),
                fill: value_as_non_empty_string(object.get("fill")),
                text_align: value_as_non_empty_string(first_present(
                    object,
                    &["textAlign", "text_align"],
                )),
                width: value_as_f64(object.get("width")).filter(|width| *width != 0.0),
                origin_x: value_as_non_empty_string(first_present(object, &["originX", "origin_x"])),
            })),
            "image" => Some(LayoutElement::Image(ImageElement {
                role,
                source: value_as_non_empty_string(first_present(object, &["source", "src"])),
                left,
                top,
                scale_to_width: value_as_f64(first_present(
                    object,
                    &["scaleToWidth", "scale_to_width"],
                ))
                .filter(|value| *value != 0.0),
                scale_to_height: value_as_f64(first_present(
                    object,
                    &["scaleToHeight", "scale_to_height"],
                ))
                .filter(|value| *value != 0.0),
            })),
            "rect" | "rectangle" => Some(LayoutElement::Rect(RectElement {
                role,
                left,
                top,
                width: value_as_f64(object.get("width")),
                height: value_as_f64(object.get("height")),
                fill: value_as_non_empty_string(object.get("fill")),
                opacity: value_as_f64(object.get("opacity")),
                rx: value_as_f64(object.get("rx")).filter(|value| *value != 0.0),
                stroke: value_as_non_empty_string(object.get("stroke")),
                stroke_width: value_as_f64(first_present(object, &["strokeWidth", "stroke_width"])),
            })),
            _ => None,
        }
    }

    pub fn role(&self) -> &str {
        match self {
            LayoutElement::Text(text) => &text.role,
            LayoutElement::Image(image) => &image.role,
            LayoutElement::Rect(rect) => &rect.role,
        }
    }

    /// Applies `f` to every string-valued field. Numeric fields pass through.
    pub fn map_strings(&self, f: &impl Fn(&str) -> String) -> Self {
        let opt = |value: &Option<String>| value.as_deref().map(f);
        match self {
            LayoutElement::Text(text) => LayoutElement::Text(TextElement {
                role: f(&text.role),
                content: f(&text.content),
                prompt: opt(&text.prompt),
                font_weight: opt(&text.font_weight),
                font_family: opt(&text.font_family),
                fill: opt(&text.fill),
                text_align: opt(&text.text_align),
                origin_x: opt(&text.origin_x),
                ..text.clone()
            }),
            LayoutElement::Image(image) => LayoutElement::Image(ImageElement {
                role: f(&image.role),
                source: opt(&image.source),
                ..image.clone()
            }),
            LayoutElement::Rect(rect) => LayoutElement::Rect(RectElement {
                role: f(&rect.role),
                fill: opt(&rect.fill),
                stroke: opt(&rect.stroke),
                ..rect.clone()
            }),
        }
    }
}

/// Format-scoped layout: a background plus ordered elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSpec {
    pub source: LayoutSource,
    pub background: BackgroundSpec,
    pub elements: Vec<LayoutElement>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl LayoutSpec {
    pub fn from_designed_value(value: &Value) -> Option<Self> {
        let object = value.as_object().filter(|object| !object.is_empty())?;
        Some(Self {
            source: LayoutSource::Designed,
            background: BackgroundSpec::from_layout_object(object),
            elements: parse_elements(object.get("elements")),
            width: None,
            height: None,
        })
    }

    pub fn from_template_value(value: &Value) -> Option<Self> {
        let object = value.as_object().filter(|object| !object.is_empty())?;
        Some(Self {
            source: LayoutSource::Template,
            background: BackgroundSpec::from_template_value(object.get("background")),
            elements: parse_elements(object.get("elements")),
            width: value_as_dimension(object.get("width")),
            height: value_as_dimension(object.get("height")),
        })
    }

    pub fn width_for(&self, format: FormatKey) -> u32 {
        self.width.unwrap_or_else(|| format.width())
    }

    pub fn height_for(&self, format: FormatKey) -> u32 {
        self.height.unwrap_or_else(|| format.height())
    }
}

fn parse_elements(value: Option<&Value>) -> Vec<LayoutElement> {
    value
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(LayoutElement::from_value).collect())
        .unwrap_or_default()
}

/// An image the layout designer asked to have generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequestSpec {
    pub role: String,
    pub prompt: String,
    pub required: bool,
}

/// Full layout reply from the designer model: images to generate plus one
/// layout per format it covered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PosterLayouts {
    pub images_to_generate: Vec<ImageRequestSpec>,
    pub formats: BTreeMap<FormatKey, LayoutSpec>,
}

impl PosterLayouts {
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let images_to_generate = object
            .get("images_to_generate")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_object)
                    .map(|row| ImageRequestSpec {
                        role: value_as_non_empty_string(row.get("role"))
                            .unwrap_or_else(|| "unknown".to_string()),
                        prompt: value_as_non_empty_string(row.get("prompt")).unwrap_or_default(),
                        required: row.get("required").and_then(Value::as_bool).unwrap_or(false),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let formats = FormatKey::ALL
            .into_iter()
            .filter_map(|format| {
                object
                    .get(format.key())
                    .and_then(LayoutSpec::from_designed_value)
                    .map(|layout| (format, layout))
            })
            .collect();
        Some(Self {
            images_to_generate,
            formats,
        })
    }
}

/// A named layout bundle from the template store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub id: String,
    pub name: String,
    pub formats: BTreeMap<FormatKey, LayoutSpec>,
    /// Formats in the order the template file declares them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_order: Vec<FormatKey>,
}

impl TemplateDefinition {
    pub fn from_value(id: &str, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let formats_object = object.get("formats").and_then(Value::as_object);
        let formats = FormatKey::ALL
            .into_iter()
            .filter_map(|format| {
                let raw = formats_object.and_then(|formats| {
                    first_present(formats, &[format.template_key(), format.key()])
                })?;
                LayoutSpec::from_template_value(raw).map(|layout| (format, layout))
            })
            .collect::<BTreeMap<_, _>>();
        let mut declared_order = Vec::new();
        for format in formats_object
            .into_iter()
            .flat_map(|formats| formats.keys())
            .filter_map(|key| FormatKey::from_template_key(key))
        {
            if formats.contains_key(&format) && !declared_order.contains(&format) {
                declared_order.push(format);
            }
        }
        Some(Self {
            id: value_as_non_empty_string(object.get("id")).unwrap_or_else(|| id.to_string()),
            name: value_as_non_empty_string(object.get("name"))
                .unwrap_or_else(|| "Unknown".to_string()),
            formats,
            declared_order,
        })
    }

    /// Generation prompts of every text element, deduplicated by role. Formats
    /// are walked in declaration order and the first prompt seen for a role
    /// wins.
    pub fn generation_prompts(&self) -> IndexMap<String, String> {
        let mut order = self.declared_order.clone();
        order.extend(self.formats.keys().filter(|format| !self.declared_order.contains(format)));
        let mut prompts = IndexMap::new();
        for layout in order.iter().filter_map(|format| self.formats.get(format)) {
            for element in &layout.elements {
                let LayoutElement::Text(text) = element else {
                    continue;
                };
                let Some(prompt) = text.prompt.as_ref() else {
                    continue;
                };
                if text.role.is_empty() || prompts.contains_key(&text.role) {
                    continue;
                }
                prompts.insert(text.role.clone(), prompt.clone());
            }
        }
        prompts
    }
}

/// One row of the template store's `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

fn value_as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn value_as_dimension(value: Option<&Value>) -> Option<u32> {
    value_as_f64(value)
        .filter(|dimension| *dimension > 0.0)
        .map(|dimension| dimension.round() as u32)
}
