mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAPABILITY_IMAGE, CAPABILITY_TEXT};
pub use selectors::{ModelSelection, ModelSelector};
