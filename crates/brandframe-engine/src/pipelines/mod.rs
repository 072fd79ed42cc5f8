mod creative;
mod product;
mod template;

use anyhow::Context;
use brandframe_contracts::brand::BrandProfile;

pub use creative::{
    CreativeRequest, CreativeState, ERROR_IMAGE_URL, SUPPORTED_ASPECT_RATIOS, UNPARSED_IMAGE_URL,
};
pub use product::{ProductRequest, ProductState};
pub use template::{TemplateRequest, TemplateState};

pub(crate) use creative::creative_pipeline;
pub(crate) use product::product_pipeline;
pub(crate) use template::template_pipeline;

use crate::pipeline::{PipelineContext, PipelineState};
use crate::stores::resolve_brand;

/// States that start by resolving a brand kit.
pub(crate) trait BrandedState: PipelineState {
    fn brand_key(&self) -> (&str, &str);
    fn brand_slot(&mut self) -> &mut Option<BrandProfile>;
}

/// First stage of every pipeline. Never fails: a missing or unreadable kit
/// yields the default profile with a warning.
pub(crate) fn fetch_brand<S: BrandedState>(
    ctx: &PipelineContext<'_>,
    mut state: S,
) -> anyhow::Result<S> {
    let outcome = {
        let (user_id, brandkit_id) = state.brand_key();
        resolve_brand(ctx.brands, user_id, brandkit_id)
    };
    if let Some(brand) = ctx.settle("fetch_brand", &mut state, outcome) {
        tracing::debug!(run_id = %state.meta().run_id, brand = %brand.name, "brand resolved");
        *state.brand_slot() = Some(brand);
    }
    Ok(state)
}

pub(crate) fn resolved_brand(brand: &Option<BrandProfile>) -> anyhow::Result<&BrandProfile> {
    brand.as_ref().context("brand profile was not resolved")
}
