mod brand;
mod template;

pub use brand::{resolve_brand, BrandProfileStore, JsonBrandStore, MemoryBrandStore};
pub use template::{load_template, DirTemplateStore, MemoryTemplateStore, TemplateStore};

/// Store keys become file names, so anything that could leave the store root
/// is rejected.
pub(crate) fn is_safe_key(key: &str) -> bool {
    let trimmed = key.trim();
    !trimmed.is_empty()
        && !trimmed.contains('/')
        && !trimmed.contains('\\')
        && !trimmed.contains("..")
}

#[cfg(test)]
mod tests {
    use super::is_safe_key;

    #[test]
    fn keys_with_path_segments_are_rejected() {
        assert!(is_safe_key("summer_sale"));
        assert!(!is_safe_key("../secrets"));
        assert!(!is_safe_key("a/b"));
        assert!(!is_safe_key("a\\b"));
        assert!(!is_safe_key("  "));
    }
}
