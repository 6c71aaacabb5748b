//! Source-key to markdown-key rewriting
//!
//! Pure function: swap the source prefix for the markdown prefix and replace
//! the final extension with `.md`. Intermediate path segments pass through
//! byte-for-byte, so nested directory layouts survive the rewrite.

use crate::error::{PipelineError, Result};

/// Rewrite a source key into its markdown artifact key.
///
/// The key must start with `source_prefix`. A name without a dot-extension
/// gets `.md` appended; a leading dot (hidden files) does not count as an
/// extension.
pub fn route(key: &str, source_prefix: &str, markdown_prefix: &str) -> Result<String> {
    let rest = key.strip_prefix(source_prefix).ok_or_else(|| {
        PipelineError::Internal(format!(
            "key '{}' is outside the source prefix '{}'",
            key, source_prefix
        ))
    })?;

    let (dir, name) = match rest.rfind('/') {
        Some(i) => (&rest[..=i], &rest[i + 1..]),
        None => ("", rest),
    };

    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };

    Ok(format!("{}{}{}.md", markdown_prefix, dir, stem))
}
