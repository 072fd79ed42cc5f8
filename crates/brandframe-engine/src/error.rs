use thiserror::Error;

/// Known business failures. These end a run with a client-error class; every
/// other error that escapes a stage is treated as a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PosterError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("Failed to parse AI response: {0}")]
    LayoutParse(String),
    #[error("No layout specification available")]
    MissingLayout,
    #[error("No template definition")]
    MissingTemplate,
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn error_chain_text_joins_causes_and_truncates() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("Gemini request failed")
            .err()
            .unwrap_or_else(|| anyhow::anyhow!("unreachable"));
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: connection reset"
        );
        assert_eq!(error_chain_text(&err, 6), "Gemini…");
    }

    #[test]
    fn poster_errors_render_user_facing_text() {
        assert_eq!(
            PosterError::TemplateNotFound("summer".to_string()).to_string(),
            "Template not found: summer"
        );
        assert!(PosterError::LayoutParse("expected value".to_string())
            .to_string()
            .starts_with("Failed to parse AI response"));
    }

    #[test]
    fn push_unique_warning_skips_blanks_and_duplicates() {
        let mut warnings = Vec::new();
        push_unique_warning(&mut warnings, "refine failed".to_string());
        push_unique_warning(&mut warnings, "refine failed".to_string());
        push_unique_warning(&mut warnings, "  ".to_string());
        assert_eq!(warnings, vec!["refine failed"]);
    }
}
