//! Placeholder expansion for command text, URLs and bodies.
//!
//! Rendering is pure: the per-run context is built by the caller and no
//! state survives a render.

use std::error::Error as _;

use tera::{Context, Tera};

use crate::error::{Result, TempusError};

const DEFAULT_OPEN: &str = "{{";
const DEFAULT_CLOSE: &str = "}}";

/// Parse a delimiter override like `"{[ ]}"`.
///
/// Empty input yields the default pair. Anything that is not exactly two
/// distinct whitespace-separated tokens is [`TempusError::InvalidDelimiters`].
pub(crate) fn parse_delimiters(spec: &str) -> Result<(String, String)> {
    if spec.trim().is_empty() {
        return Ok((DEFAULT_OPEN.to_string(), DEFAULT_CLOSE.to_string()));
    }
    let parts: Vec<&str> = spec.split_whitespace().collect();
    if parts.len() != 2 || parts[0] == parts[1] {
        return Err(TempusError::InvalidDelimiters);
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Expand placeholders in `text` against `ctx`, honoring a delimiter
/// override.
pub(crate) fn render(text: &str, delimiters: &str, ctx: &Context) -> Result<String> {
    let (open, close) = parse_delimiters(delimiters)?;

    // Custom pairs are translated to the engine's own before rendering.
    let normalized = if open == DEFAULT_OPEN && close == DEFAULT_CLOSE {
        text.to_string()
    } else {
        text.replace(&open, DEFAULT_OPEN).replace(&close, DEFAULT_CLOSE)
    };

    Tera::one_off(&normalized, ctx, false).map_err(|err| {
        // The render error's chain carries the actual syntax problem.
        let detail = err
            .source()
            .map(|src| src.to_string())
            .unwrap_or_else(|| err.to_string());
        TempusError::Template(detail)
    })
}
