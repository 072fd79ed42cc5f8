use super::registry::{ModelRegistry, ModelSpec};

/// The model a run will use for one capability. `fallback_reason` is set
/// whenever the chosen model is not the one asked for, and becomes a run
/// warning in live mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

impl ModelSelection {
    fn exact(model: ModelSpec) -> Self {
        let requested = Some(model.name.clone());
        Self {
            model,
            requested,
            fallback_reason: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    registry: ModelRegistry,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(ModelRegistry::new(None))
    }
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// Resolves `requested` for `capability`. A blank, unknown or incapable
    /// name falls back to the first live model with that capability.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|name| !name.is_empty());
        let Some(name) = requested else {
            return self.fallback(capability, None, "no model configured".to_string());
        };
        if let Some(model) = self.registry.ensure(name, capability) {
            return Ok(ModelSelection::exact(model));
        }
        let problem = if self.registry.get(name).is_some() {
            format!("{name} cannot produce {capability} output")
        } else {
            format!("{name} is not a known model")
        };
        self.fallback(capability, Some(name), problem)
    }

    /// Picks the first dryrun model for `capability`, ignoring the request.
    pub fn select_dryrun(&self, capability: &str) -> Result<ModelSelection, String> {
        self.registry
            .by_capability(capability)
            .into_iter()
            .find(ModelSpec::is_dryrun)
            .map(|model| ModelSelection {
                model,
                requested: None,
                fallback_reason: Some("Dryrun mode; offline model selected.".to_string()),
            })
            .ok_or_else(|| format!("No dryrun model for capability '{capability}'."))
    }

    fn fallback(
        &self,
        capability: &str,
        requested: Option<&str>,
        problem: String,
    ) -> Result<ModelSelection, String> {
        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .next()
            .ok_or_else(|| format!("No model can produce {capability} output."))?;
        let fallback_reason = Some(format!("{problem}; using {} for {capability}", model.name));
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}
