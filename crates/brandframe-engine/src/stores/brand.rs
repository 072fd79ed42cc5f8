use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brandframe_contracts::brand::BrandProfile;
use serde_json::Value;
use tracing::{debug, warn};

use super::is_safe_key;
use crate::error::error_chain_text;
use crate::pipeline::Outcome;

/// Brand kit lookup. Implementations report I/O trouble as errors; callers
/// go through [`resolve_brand`], which never fails.
pub trait BrandProfileStore: Send + Sync {
    fn lookup(&self, user_id: &str, brandkit_id: &str) -> Result<Option<BrandProfile>>;
    fn find_by_brandkit(&self, brandkit_id: &str) -> Result<Option<BrandProfile>>;
}

/// Direct lookup, then a search by brandkit id, then the default profile.
pub fn resolve_brand(
    store: &dyn BrandProfileStore,
    user_id: &str,
    brandkit_id: &str,
) -> Outcome<BrandProfile> {
    let found = store.lookup(user_id, brandkit_id).and_then(|profile| match profile {
        Some(profile) => Ok(Some(profile)),
        None => store.find_by_brandkit(brandkit_id),
    });
    match found {
        Ok(Some(profile)) => Outcome::Ok(profile),
        Ok(None) => Outcome::Fallback {
            value: BrandProfile::fallback(brandkit_id),
            reason: format!("BrandKit {brandkit_id} not found; using default brand profile"),
        },
        Err(err) => Outcome::Fallback {
            value: BrandProfile::fallback(brandkit_id),
            reason: format!(
                "Brand lookup failed; using default brand profile: {}",
                error_chain_text(&err, 300)
            ),
        },
    }
}

/// Brand kits as JSON files under `<root>/users/<user>/brandkits/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonBrandStore {
    root: PathBuf,
}

impl JsonBrandStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn kit_path(&self, user_id: &str, brandkit_id: &str) -> PathBuf {
        self.root
            .join("users")
            .join(user_id.trim())
            .join("brandkits")
            .join(format!("{}.json", brandkit_id.trim()))
    }

    fn read_profile(path: &Path) -> Result<Option<BrandProfile>> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid brand kit JSON in {}", path.display()))?;
        Ok(BrandProfile::from_value(&value))
    }
}

impl BrandProfileStore for JsonBrandStore {
    fn lookup(&self, user_id: &str, brandkit_id: &str) -> Result<Option<BrandProfile>> {
        if !is_safe_key(user_id) || !is_safe_key(brandkit_id) {
            return Ok(None);
        }
        let path = self.kit_path(user_id, brandkit_id);
        if !path.is_file() {
            debug!(path = %path.display(), "brand kit not found by direct lookup");
            return Ok(None);
        }
        Self::read_profile(&path)
    }

    fn find_by_brandkit(&self, brandkit_id: &str) -> Result<Option<BrandProfile>> {
        if !is_safe_key(brandkit_id) {
            return Ok(None);
        }
        let users_dir = self.root.join("users");
        if !users_dir.is_dir() {
            return Ok(None);
        }
        let mut user_dirs: Vec<PathBuf> = fs::read_dir(&users_dir)
            .with_context(|| format!("failed listing {}", users_dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_dir())
            .collect();
        user_dirs.sort();

        let wanted = brandkit_id.trim();
        for user_dir in user_dirs {
            let kits_dir = user_dir.join("brandkits");
            let direct = kits_dir.join(format!("{wanted}.json"));
            if direct.is_file() {
                return Self::read_profile(&direct);
            }
            let Ok(entries) = fs::read_dir(&kits_dir) else {
                continue;
            };
            let mut kit_paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
                .collect();
            kit_paths.sort();
            for path in kit_paths {
                match Self::read_profile(&path) {
                    Ok(Some(profile)) if profile.id.as_deref() == Some(wanted) => {
                        return Ok(Some(profile))
                    }
                    Ok(_) => {}
                    Err(err) => warn!(path = %path.display(), "skipping unreadable brand kit: {err:#}"),
                }
            }
        }
        Ok(None)
    }
}

/// In-process brand store keyed by `(user, brandkit)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBrandStore {
    profiles: HashMap<(String, String), BrandProfile>,
}

impl MemoryBrandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: &str, brandkit_id: &str, profile: BrandProfile) {
        self.profiles
            .insert((user_id.to_string(), brandkit_id.to_string()), profile);
    }
}

impl BrandProfileStore for MemoryBrandStore {
    fn lookup(&self, user_id: &str, brandkit_id: &str) -> Result<Option<BrandProfile>> {
        Ok(self
            .profiles
            .get(&(user_id.to_string(), brandkit_id.to_string()))
            .cloned())
    }

    fn find_by_brandkit(&self, brandkit_id: &str) -> Result<Option<BrandProfile>> {
        let mut matches: Vec<(&(String, String), &BrandProfile)> = self
            .profiles
            .iter()
            .filter(|((_, kit), profile)| {
                kit == brandkit_id || profile.id.as_deref() == Some(brandkit_id)
            })
            .collect();
        matches.sort_by(|left, right| left.0.cmp(right.0));
        Ok(matches.first().map(|(_, profile)| (*profile).clone()))
    }
}
