use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::layout::FormatKey;

/// One drawable object on the editor canvas. Field names follow the canvas
/// editor's object model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CanvasObject {
    Textbox(CanvasText),
    Image(CanvasImage),
    Rect(CanvasRect),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasText {
    pub text: String,
    pub left: f64,
    pub top: f64,
    pub font_size: f64,
    pub font_weight: String,
    pub font_family: String,
    pub fill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_align: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_x: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasImage {
    pub src: String,
    pub left: f64,
    pub top: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_to_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_to_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evented: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub fill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ry: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evented: Option<bool>,
}

impl CanvasObject {
    pub fn kind(&self) -> &'static str {
        match self {
            CanvasObject::Textbox(_) => "textbox",
            CanvasObject::Image(_) => "image",
            CanvasObject::Rect(_) => "rect",
        }
    }
}

/// Serialized canvas scene for one format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasGraph {
    pub objects: Vec<CanvasObject>,
    pub background: String,
    pub width: u32,
    pub height: u32,
}

pub type CanvasFormats = BTreeMap<FormatKey, CanvasGraph>;

/// Stable content hash of a set of canvas graphs. Format keys serialize in
/// declaration order, so equal graphs always hash equal.
pub fn formats_digest(formats: &CanvasFormats) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(formats)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
