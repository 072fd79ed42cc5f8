use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json::{first_present, value_as_non_empty_string, value_as_string_list};

pub const DEFAULT_BRAND_NAME: &str = "BrandFrame Default (Fallback)";
pub const DEFAULT_BRAND_COLORS: [&str; 3] = ["#00539F", "#D6001C", "#FFFFFF"];
pub const DEFAULT_BRAND_LOGO_URL: &str = "https://placehold.co/400x160/00539F/FFFFFF?text=Logo";
pub const DEFAULT_BRAND_TONE: &str = "Professional, Fresh, Quality";
pub const DEFAULT_PRIMARY_COLOR: &str = "#00539F";
pub const DEFAULT_SECONDARY_COLOR: &str = "#D6001C";

/// Brand kit as read from the brand store. Read-only once a run has fetched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandProfile {
    pub id: Option<String>,
    pub name: String,
    pub colors: Vec<String>,
    pub tone: String,
    pub style: String,
    pub logo_url: String,
    pub fonts: Vec<String>,
    pub assets: Vec<String>,
}

impl BrandProfile {
    /// The profile used whenever the store cannot produce one.
    pub fn fallback(brandkit_id: &str) -> Self {
        Self {
            id: Some(brandkit_id.to_string()).filter(|id| !id.is_empty()),
            name: DEFAULT_BRAND_NAME.to_string(),
            colors: DEFAULT_BRAND_COLORS.iter().map(|c| c.to_string()).collect(),
            tone: DEFAULT_BRAND_TONE.to_string(),
            style: "Modern".to_string(),
            logo_url: DEFAULT_BRAND_LOGO_URL.to_string(),
            fonts: vec!["Arial".to_string()],
            assets: Vec::new(),
        }
    }

    /// Reads a store document. Both `logoUrl`/`logo_url` and
    /// `assetUrls`/`assets` spellings are accepted; missing fields take the
    /// same defaults the prompts use.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            id: value_as_non_empty_string(object.get("id")),
            name: value_as_non_empty_string(object.get("name"))
                .unwrap_or_else(|| "Brand".to_string()),
            colors: value_as_string_list(object.get("colors")),
            tone: value_as_non_empty_string(object.get("tone"))
                .unwrap_or_else(|| "Professional".to_string()),
            style: value_as_non_empty_string(object.get("style"))
                .unwrap_or_else(|| "Modern".to_string()),
            logo_url: value_as_non_empty_string(first_present(object, &["logoUrl", "logo_url"]))
                .unwrap_or_default(),
            fonts: value_as_string_list(object.get("fonts")),
            assets: value_as_string_list(first_present(object, &["assetUrls", "assets"])),
        })
    }

    pub fn primary_color(&self) -> &str {
        self.colors
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_PRIMARY_COLOR)
    }

    pub fn secondary_color(&self) -> &str {
        self.colors
            .get(1)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SECONDARY_COLOR)
    }

    pub fn colors_line(&self) -> String {
        self.colors.join(", ")
    }

    pub fn has_logo(&self) -> bool {
        !self.logo_url.trim().is_empty()
    }
}
