use std::collections::BTreeMap;

use brandframe_contracts::brand::BrandProfile;
use brandframe_contracts::canvas::{
    CanvasFormats, CanvasGraph, CanvasImage, CanvasObject, CanvasRect, CanvasText,
};
use brandframe_contracts::layout::{
    BackgroundKind, ElementDefaults, FormatKey, ImageElement, LayoutElement, LayoutSource,
    LayoutSpec, RectElement, TextElement,
};
use tracing::debug;

use crate::placeholders::has_unresolved_token;

/// Generated images keyed by role.
pub type ImageRegistry = BTreeMap<String, String>;

const DEFAULT_BACKGROUND: &str = "#ffffff";
const DEFAULT_FILL: &str = "#000000";
const DEFAULT_FONT_FAMILY: &str = "Arial";
const DEFAULT_FONT_WEIGHT: &str = "normal";

/// Turns format-scoped layouts into canvas graphs. Holds only shared
/// read-only inputs, so every format builds independently and the output is
/// a pure function of the inputs.
#[derive(Debug, Clone, Copy)]
pub struct CanvasBuilder<'a> {
    brand: &'a BrandProfile,
    images: &'a ImageRegistry,
    product_image: Option<&'a str>,
}

impl<'a> CanvasBuilder<'a> {
    pub fn new(brand: &'a BrandProfile, images: &'a ImageRegistry) -> Self {
        Self {
            brand,
            images,
            product_image: None,
        }
    }

    pub fn with_product_image(mut self, product_image: Option<&'a str>) -> Self {
        self.product_image = product_image.filter(|image| !image.trim().is_empty());
        self
    }

    /// Formats without a layout are absent from the output.
    pub fn build(&self, layouts: &BTreeMap<FormatKey, LayoutSpec>) -> CanvasFormats {
        layouts
            .iter()
            .map(|(format, layout)| (*format, self.build_format(*format, layout)))
            .collect()
    }

    pub fn build_format(&self, format: FormatKey, layout: &LayoutSpec) -> CanvasGraph {
        let width = layout.width_for(format);
        let height = layout.height_for(format);
        let defaults = layout.source.defaults();
        let mut objects = Vec::with_capacity(layout.elements.len() + 1);
        let background = self.background(layout, width, height, &mut objects);

        for element in &layout.elements {
            let object = match element {
                LayoutElement::Text(text) => Some(text_object(text, &defaults)),
                LayoutElement::Image(image) => self.image_object(layout.source, image, &defaults),
                LayoutElement::Rect(rect) => Some(rect_object(rect)),
            };
            match object {
                Some(object) => objects.push(object),
                None => debug!(
                    format = %format,
                    role = element.role(),
                    "image element has no source; dropped"
                ),
            }
        }

        CanvasGraph {
            objects,
            background,
            width,
            height,
        }
    }

    fn background(
        &self,
        layout: &LayoutSpec,
        width: u32,
        height: u32,
        objects: &mut Vec<CanvasObject>,
    ) -> String {
        let spec = &layout.background;
        let plain = spec
            .color
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKGROUND.to_string());
        match spec.kind {
            BackgroundKind::Solid => plain,
            // Multi-stop gradients are flattened to their first stop.
            BackgroundKind::Gradient => {
                let fill = spec
                    .gradient_colors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_BACKGROUND.to_string());
                objects.push(CanvasObject::Rect(CanvasRect {
                    left: 0.0,
                    top: 0.0,
                    width: f64::from(width),
                    height: f64::from(height),
                    fill: fill.clone(),
                    opacity: None,
                    rx: None,
                    ry: None,
                    stroke: None,
                    stroke_width: None,
                    selectable: Some(false),
                    evented: Some(false),
                }));
                fill
            }
            BackgroundKind::Image => {
                let source = self
                    .images
                    .get(&spec.image_role)
                    .or_else(|| self.images.get("background"));
                if let Some(src) = source {
                    objects.push(CanvasObject::Image(CanvasImage {
                        src: src.clone(),
                        left: 0.0,
                        top: 0.0,
                        scale_to_width: Some(f64::from(width)),
                        scale_to_height: Some(f64::from(height)),
                        selectable: Some(false),
                        evented: Some(false),
                    }));
                }
                plain
            }
        }
    }

    /// Template images bind only through their resolved `source`. Designed
    /// images bind by role: brand logo, then product image, then the
    /// generated registry.
    fn bind_image(&self, source: LayoutSource, image: &ImageElement) -> Option<String> {
        match source {
            LayoutSource::Template => image
                .source
                .as_deref()
                .map(str::trim)
                .filter(|src| !src.is_empty() && !has_unresolved_token(src))
                .map(str::to_string),
            LayoutSource::Designed => {
                let role = image.role.as_str();
                if role == "logo" && self.brand.has_logo() {
                    return Some(self.brand.logo_url.clone());
                }
                if role == "product" {
                    if let Some(product_image) = self.product_image {
                        return Some(product_image.to_string());
                    }
                }
                self.images.get(role).cloned()
            }
        }
    }

    fn image_object(
        &self,
        source: LayoutSource,
        image: &ImageElement,
        defaults: &ElementDefaults,
    ) -> Option<CanvasObject> {
        let src = self.bind_image(source, image)?;
        Some(CanvasObject::Image(CanvasImage {
            src,
            left: image.left.unwrap_or(0.0),
            top: image.top.unwrap_or(0.0),
            scale_to_width: image.scale_to_width.or(defaults.image_scale_to_width),
            scale_to_height: image.scale_to_height,
            selectable: None,
            evented: None,
        }))
    }
}

fn text_object(text: &TextElement, defaults: &ElementDefaults) -> CanvasObject {
    CanvasObject::Textbox(CanvasText {
        text: text.content.clone(),
        left: text.left.unwrap_or(defaults.text_left),
        top: text.top.unwrap_or(defaults.text_top),
        font_size: text.font_size.unwrap_or(defaults.font_size),
        font_weight: text
            .font_weight
            .clone()
            .unwrap_or_else(|| DEFAULT_FONT_WEIGHT.to_string()),
        font_family: text
            .font_family
            .clone()
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string()),
        fill: text.fill.clone().unwrap_or_else(|| DEFAULT_FILL.to_string()),
        text_align: text
            .text_align
            .clone()
            .or_else(|| defaults.text_align.map(str::to_string)),
        width: text.width,
        origin_x: text.origin_x.clone(),
    })
}

fn rect_object(rect: &RectElement) -> CanvasObject {
    let fill = match rect.fill.as_deref() {
        Some("transparent") => "rgba(0,0,0,0)".to_string(),
        Some(fill) => fill.to_string(),
        None => DEFAULT_FILL.to_string(),
    };
    CanvasObject::Rect(CanvasRect {
        left: rect.left.unwrap_or(0.0),
        top: rect.top.unwrap_or(0.0),
        width: rect.width.unwrap_or(100.0),
        height: rect.height.unwrap_or(100.0),
        fill,
        opacity: rect.opacity,
        rx: rect.rx,
        ry: rect.rx,
        stroke_width: rect
            .stroke
            .as_ref()
            .map(|_| rect.stroke_width.unwrap_or(1.0)),
        stroke: rect.stroke.clone(),
        selectable: None,
        evented: None,
    })
}

#[cfg(test)]
mod tests {
    use brandframe_contracts::canvas::formats_digest;
    use brandframe_contracts::layout::PosterLayouts;
    use serde_json::json;

    use super::*;

    fn brand() -> BrandProfile {
        BrandProfile::from_value(&json!({
            "name": "Fresh Market",
            "colors": ["#112233", "#445566"],
            "logoUrl": "https://cdn.example.com/logo.png"
        }))
        .unwrap_or_else(|| BrandProfile::fallback(""))
    }

    fn designed(value: serde_json::Value) -> LayoutSpec {
        LayoutSpec::from_designed_value(&value).unwrap_or_else(|| LayoutSpec {
            source: LayoutSource::Designed,
            background: brandframe_contracts::layout::BackgroundSpec::solid("#ffffff"),
            elements: Vec::new(),
            width: None,
            height: None,
        })
    }

    #[test]
    fn product_image_without_input_is_never_emitted() {
        let brand = brand();
        let images = ImageRegistry::new();
        let layout = designed(json!({
            "background": "solid",
            "background_color": "#fafafa",
            "elements": [
                {"type": "image", "role": "product", "left": 300, "top": 300},
                {"type": "image", "role": "logo", "left": 40, "top": 40, "scaleToWidth": 120}
            ]
        }));
        let graph = CanvasBuilder::new(&brand, &images).build_format(FormatKey::Instagram, &layout);

        assert_eq!(graph.objects.len(), 1);
        assert!(matches!(
            &graph.objects[0],
            CanvasObject::Image(image) if image.src == "https://cdn.example.com/logo.png"
                && image.scale_to_width == Some(120.0)
        ));
        assert_eq!(graph.background, "#fafafa");
        assert_eq!((graph.width, graph.height), (1080, 1080));
    }

    #[test]
    fn product_role_binds_supplied_image() {
        let brand = brand();
        let images = ImageRegistry::new();
        let layout = designed(json!({
            "elements": [{"type": "image", "role": "product"}]
        }));
        let graph = CanvasBuilder::new(&brand, &images)
            .with_product_image(Some("data:image/png;base64,AAAA"))
            .build_format(FormatKey::Facebook, &layout);
        assert!(matches!(
            &graph.objects[0],
            CanvasObject::Image(image) if image.src == "data:image/png;base64,AAAA" && image.left == 0.0
        ));
        assert_eq!((graph.width, graph.height), (1200, 630));
    }

    #[test]
    fn gradient_becomes_first_stop_rect() {
        let brand = brand();
        let images = ImageRegistry::new();
        let layout = designed(json!({
            "background": "gradient",
            "gradient_colors": ["#ff0000", "#00ff00"],
            "elements": [{"type": "text", "content": "Hi"}]
        }));
        let graph = CanvasBuilder::new(&brand, &images).build_format(FormatKey::Story, &layout);

        assert_eq!(graph.background, "#ff0000");
        match &graph.objects[0] {
            CanvasObject::Rect(rect) => {
                assert_eq!((rect.width, rect.height), (1080.0, 1920.0));
                assert_eq!(rect.fill, "#ff0000");
                assert_eq!(rect.selectable, Some(false));
                assert_eq!(rect.evented, Some(false));
            }
            other => panic!("unexpected object {other:?}"),
        }
        match &graph.objects[1] {
            CanvasObject::Textbox(text) => {
                assert_eq!((text.left, text.top, text.font_size), (50.0, 50.0, 32.0));
                assert_eq!(text.text_align.as_deref(), Some("left"));
                assert_eq!(text.font_weight, "normal");
                assert_eq!(text.fill, "#000000");
            }
            other => panic!("unexpected object {other:?}"),
        }
    }

    #[test]
    fn image_background_uses_registry_or_keeps_plain_color() {
        let brand = brand();
        let layout = designed(json!({"background": "image", "background_color": "#101010"}));

        let empty = ImageRegistry::new();
        let graph = CanvasBuilder::new(&brand, &empty).build_format(FormatKey::Instagram, &layout);
        assert!(graph.objects.is_empty());
        assert_eq!(graph.background, "#101010");

        let mut images = ImageRegistry::new();
        images.insert("background".to_string(), "https://img.test/bg.png".to_string());
        let graph = CanvasBuilder::new(&brand, &images).build_format(FormatKey::Story, &layout);
        match &graph.objects[0] {
            CanvasObject::Image(image) => {
                assert_eq!(image.src, "https://img.test/bg.png");
                assert_eq!(image.scale_to_width, Some(1080.0));
                assert_eq!(image.scale_to_height, Some(1920.0));
                assert_eq!(image.selectable, Some(false));
            }
            other => panic!("unexpected object {other:?}"),
        }
    }

    #[test]
    fn rect_corner_radius_is_uniform() {
        let brand = brand();
        let images = ImageRegistry::new();
        let layout = designed(json!({
            "elements": [
                {"type": "rect", "rx": 12, "opacity": 0.5},
                {"type": "rect", "fill": "transparent", "stroke": "#ffffff"}
            ]
        }));
        let graph = CanvasBuilder::new(&brand, &images).build_format(FormatKey::Instagram, &layout);
        match (&graph.objects[0], &graph.objects[1]) {
            (CanvasObject::Rect(rounded), CanvasObject::Rect(outlined)) => {
                assert_eq!((rounded.rx, rounded.ry), (Some(12.0), Some(12.0)));
                assert_eq!(rounded.opacity, Some(0.5));
                assert_eq!((rounded.width, rounded.height), (100.0, 100.0));
                assert_eq!(rounded.fill, "#000000");
                assert_eq!(outlined.fill, "rgba(0,0,0,0)");
                assert_eq!(outlined.stroke_width, Some(1.0));
                assert_eq!(outlined.rx, None);
            }
            other => panic!("unexpected objects {other:?}"),
        }
    }

    #[test]
    fn template_images_bind_only_resolved_sources() {
        let brand = brand();
        let images = ImageRegistry::new();
        let layout = LayoutSpec::from_template_value(&json!({
            "width": 1000,
            "height": 500,
            "background": "#000000",
            "elements": [
                {"type": "image", "role": "logo", "source": "https://cdn.example.com/logo.png"},
                {"type": "image", "role": "logo", "source": "{{asset_urls.4}}"},
                {"type": "image", "role": "logo"},
                {"type": "text", "content": "Hello", "originX": "center"}
            ]
        }));
        let Some(layout) = layout else {
            panic!("template layout should parse");
        };
        let graph = CanvasBuilder::new(&brand, &images).build_format(FormatKey::Facebook, &layout);

        assert_eq!((graph.width, graph.height), (1000, 500));
        assert_eq!(graph.objects.len(), 2);
        assert!(matches!(
            &graph.objects[0],
            CanvasObject::Image(image) if image.scale_to_width == Some(200.0)
        ));
        match &graph.objects[1] {
            CanvasObject::Textbox(text) => {
                assert_eq!((text.left, text.top, text.font_size), (0.0, 0.0, 24.0));
                assert_eq!(text.text_align, None);
                assert_eq!(text.origin_x.as_deref(), Some("center"));
            }
            other => panic!("unexpected object {other:?}"),
        }
    }

    #[test]
    fn non_finite_template_numbers_fall_back_to_defaults() -> anyhow::Result<()> {
        let brand = brand();
        let images = ImageRegistry::new();
        let layout = LayoutSpec::from_template_value(&json!({
            "background": "#000000",
            "elements": [
                {"type": "text", "content": "hi", "fontSize": "NaN", "left": "inf", "top": "1e400"}
            ]
        }));
        let Some(layout) = layout else {
            panic!("template layout should parse");
        };
        let mut layouts = BTreeMap::new();
        layouts.insert(FormatKey::Instagram, layout);
        let formats = CanvasBuilder::new(&brand, &images).build(&layouts);

        match &formats[&FormatKey::Instagram].objects[0] {
            CanvasObject::Textbox(text) => {
                assert_eq!((text.left, text.top, text.font_size), (0.0, 0.0, 24.0));
            }
            other => panic!("unexpected object {other:?}"),
        }
        let encoded = serde_json::to_string(&formats)?;
        assert!(!encoded.contains("null"));
        let decoded: CanvasFormats = serde_json::from_str(&encoded)?;
        assert_eq!(decoded, formats);
        Ok(())
    }

    #[test]
    fn unreferenced_registry_images_are_harmless() -> anyhow::Result<()> {
        let brand = brand();
        let mut images = ImageRegistry::new();
        images.insert("decorative".to_string(), "https://img.test/unused.png".to_string());
        let layout = designed(json!({"background": "solid", "elements": []}));
        let graph = CanvasBuilder::new(&brand, &images).build_format(FormatKey::Instagram, &layout);
        assert!(graph.objects.is_empty());
        assert_eq!(serde_json::to_value(&graph)?["background"], json!("#ffffff"));
        Ok(())
    }

    #[test]
    fn building_twice_is_byte_identical() -> anyhow::Result<()> {
        let brand = brand();
        let mut images = ImageRegistry::new();
        images.insert("background".to_string(), "https://img.test/bg.png".to_string());
        let layouts = PosterLayouts::from_value(&json!({
            "instagram": {"background": "image", "elements": [{"type": "text", "content": "A"}]},
            "story": {"background": "gradient", "gradient_colors": ["#111111"], "elements": []},
            "facebook": {"background": "solid", "background_color": "#222222",
                         "elements": [{"type": "image", "role": "logo"}]}
        }))
        .unwrap_or_default();

        let builder = CanvasBuilder::new(&brand, &images);
        let first = builder.build(&layouts.formats);
        let second = builder.build(&layouts.formats);
        assert_eq!(serde_json::to_vec(&first)?, serde_json::to_vec(&second)?);
        assert_eq!(formats_digest(&first)?, formats_digest(&second)?);
        assert_eq!(first.len(), 3);
        Ok(())
    }

    #[test]
    fn missing_format_layouts_stay_absent() {
        let brand = brand();
        let images = ImageRegistry::new();
        let mut layouts = BTreeMap::new();
        layouts.insert(FormatKey::Story, designed(json!({"background": "solid"})));
        let formats = CanvasBuilder::new(&brand, &images).build(&layouts);
        assert_eq!(formats.keys().copied().collect::<Vec<_>>(), vec![FormatKey::Story]);
    }
}
