use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use brandframe_contracts::brand::BrandProfile;
use brandframe_contracts::layout::{LayoutElement, LayoutSpec};
use indexmap::IndexMap;
use regex::{Captures, Regex};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("valid placeholder regex"));
static GENERATED_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{generated_([^}]+)\}\}$").expect("valid generated placeholder regex")
});

pub const TEXT_COLOR: &str = "#FFFFFF";

/// Flat key to value map. Dotted keys such as `colors.primary` are plain
/// strings, never walked as paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    values: BTreeMap<String, String>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brand colors, logo, assets and every generated text as
    /// `generated_<role>`.
    pub fn for_brand(brand: &BrandProfile, generated: &IndexMap<String, String>) -> Self {
        let mut map = Self::new();
        map.insert("colors.primary", brand.primary_color());
        map.insert("colors.secondary", brand.secondary_color());
        map.insert("colors.text", TEXT_COLOR);
        map.insert("brand_name", &brand.name);
        map.insert("logo_url", &brand.logo_url);
        for (index, url) in brand.assets.iter().enumerate() {
            map.insert(format!("asset_urls.{index}"), url);
        }
        for (role, text) in generated {
            map.insert(format!("generated_{role}"), text);
        }
        map
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// One left-to-right pass. Substituted text is not rescanned and unknown
    /// tokens stay byte-for-byte intact.
    pub fn resolve<'a>(&self, text: &'a str) -> Cow<'a, str> {
        TOKEN_RE.replace_all(text, |caps: &Captures<'_>| {
            let key = &caps[1];
            self.get(key)
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
    }
}

/// Resolves every string field of `element`. Text whose whole content is a
/// single `{{generated_<role>}}` token reads the generated texts by role, then
/// by the full token name, and falls back to `[<role>]`.
pub fn resolve_element(
    element: &LayoutElement,
    map: &PlaceholderMap,
    generated: &IndexMap<String, String>,
) -> LayoutElement {
    let mut resolved = element.map_strings(&|value: &str| map.resolve(value).into_owned());
    if let (LayoutElement::Text(original), LayoutElement::Text(text)) = (element, &mut resolved) {
        if let Some(caps) = GENERATED_ONLY_RE.captures(original.content.trim()) {
            let token_role = &caps[1];
            text.content = generated
                .get(token_role)
                .or_else(|| generated.get(&format!("generated_{token_role}")))
                .cloned()
                .unwrap_or_else(|| {
                    let role = if original.role.is_empty() {
                        token_role
                    } else {
                        original.role.as_str()
                    };
                    format!("[{role}]")
                });
        }
    }
    resolved
}

pub fn resolve_layout(
    layout: &LayoutSpec,
    map: &PlaceholderMap,
    generated: &IndexMap<String, String>,
) -> LayoutSpec {
    LayoutSpec {
        source: layout.source,
        background: layout
            .background
            .map_strings(&|value: &str| map.resolve(value).into_owned()),
        elements: layout
            .elements
            .iter()
            .map(|element| resolve_element(element, map, generated))
            .collect(),
        width: layout.width,
        height: layout.height,
    }
}

/// True when `text` still holds a `{{...}}` token.
pub fn has_unresolved_token(text: &str) -> bool {
    TOKEN_RE.is_match(text)
}
