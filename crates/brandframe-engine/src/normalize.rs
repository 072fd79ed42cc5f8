use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::model::RawContent;

static HTTP_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"']+"#).expect("valid url regex"));
static DATA_URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data:image/[^;]+;base64,[^"'\s]+"#).expect("valid data uri regex")
});

/// A usable image reference pulled out of a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ImageReference {
    Url(String),
    DataUri(String),
}

impl ImageReference {
    fn classify(reference: String) -> Self {
        if reference.starts_with("data:") {
            ImageReference::DataUri(reference)
        } else {
            ImageReference::Url(reference)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::Url(url) | ImageReference::DataUri(url) => url,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            ImageReference::Url(url) | ImageReference::DataUri(url) => url,
        }
    }
}

/// Extracts one image reference from `raw`, or `None` when nothing usable is
/// present. First match wins:
///
/// 1. text starting with `{` and mentioning `image_url` is decoded as JSON and
///    its `image_url` (a string or an object with `url`) is taken
/// 2. the first http(s) URL
/// 3. the first `data:image/...;base64,...` reference
pub fn normalize_image_reference(raw: &RawContent) -> Option<ImageReference> {
    let text = raw.concatenated();
    if text.is_empty() {
        return None;
    }

    if text.starts_with('{') && text.contains("image_url") {
        if let Some(reference) = structured_image_url(&text) {
            return Some(ImageReference::classify(reference));
        }
    }

    if let Some(found) = HTTP_URL_RE.find(&text) {
        return Some(ImageReference::Url(found.as_str().to_string()));
    }
    DATA_URI_RE
        .find(&text)
        .map(|found| ImageReference::DataUri(found.as_str().to_string()))
}

/// Strict JSON only. Single-quoted object text is retried once with quotes
/// swapped when it holds no double quotes; anything else falls through.
fn structured_image_url(text: &str) -> Option<String> {
    let parsed = serde_json::from_str::<Value>(text).ok().or_else(|| {
        if text.contains('"') {
            return None;
        }
        serde_json::from_str::<Value>(&text.replace('\'', "\"")).ok()
    })?;
    let image_url = parsed.as_object()?.get("image_url")?;
    let reference = match image_url {
        Value::String(url) => url.trim(),
        Value::Object(object) => object.get("url").and_then(Value::as_str)?.trim(),
        _ => return None,
    };
    Some(reference.to_string()).filter(|reference| !reference.is_empty())
}
