//! Input validation for user-supplied text
//!
//! Questions, well names and formation names are checked for size, stripped
//! of control characters and screened for injection patterns before they
//! reach any model or tool.

use crate::errors::{AppError, Result};

/// Maximum question length in characters
pub const MAX_QUERY_CHARS: usize = 2000;
/// Maximum question size in bytes
pub const MAX_QUERY_BYTES: usize = 10_000;
/// Maximum well name length in characters
pub const MAX_WELL_CHARS: usize = 50;
/// Maximum well name size in bytes
pub const MAX_WELL_BYTES: usize = 200;
/// Maximum formation name length in characters
pub const MAX_FORMATION_CHARS: usize = 100;
/// Maximum formation name size in bytes
pub const MAX_FORMATION_BYTES: usize = 500;

const QUERY_PATTERNS: &[(&str, &str)] = &[
    ("<script", "script tag"),
    ("javascript:", "javascript protocol"),
    ("onerror=", "event handler"),
    ("onload=", "event handler"),
    ("eval(", "eval call"),
    ("exec(", "exec call"),
    ("__import__", "dynamic import"),
    ("subprocess", "subprocess execution"),
];

const NAME_PATTERNS: &[(&str, &str)] = &[
    ("<script", "script tag"),
    ("javascript:", "javascript protocol"),
    ("../", "path traversal"),
    ("..\\", "path traversal"),
];

/// Validate and sanitize a question, returning the trimmed clean text
pub fn validate_query(query: &str) -> Result<String> {
    let cleaned = strip_control_chars(query, true);
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(AppError::validation("Query cannot be empty").with_context("field", "query"));
    }
    check_size("query", query, MAX_QUERY_CHARS, MAX_QUERY_BYTES)?;

    let lower = cleaned.to_lowercase();
    reject_patterns("query", &lower, QUERY_PATTERNS)?;
    if has_import_os(&lower) {
        return Err(dangerous("query", "os import"));
    }
    if has_shell_assignment(&lower) {
        return Err(dangerous("query", "shell assignment"));
    }

    Ok(cleaned.to_string())
}

/// Validate a well name; it must contain at least one digit
pub fn validate_well(well: &str) -> Result<String> {
    let cleaned = strip_control_chars(well, false);
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(AppError::validation("Well name cannot be empty").with_context("field", "well"));
    }
    check_size("well", well, MAX_WELL_CHARS, MAX_WELL_BYTES)?;

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::validation("Well name must contain at least one digit")
            .with_context("field", "well"));
    }
    reject_patterns("well", &cleaned.to_lowercase(), NAME_PATTERNS)?;

    Ok(cleaned.to_string())
}

/// Validate a formation name
pub fn validate_formation(formation: &str) -> Result<String> {
    let cleaned = strip_control_chars(formation, false);
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(AppError::validation("Formation name cannot be empty")
            .with_context("field", "formation"));
    }
    check_size("formation", formation, MAX_FORMATION_CHARS, MAX_FORMATION_BYTES)?;
    reject_patterns("formation", &cleaned.to_lowercase(), NAME_PATTERNS)?;

    Ok(cleaned.to_string())
}

fn strip_control_chars(text: &str, keep_whitespace: bool) -> String {
    text.chars()
        .filter(|&c| !c.is_control() || (keep_whitespace && matches!(c, '\n' | '\t' | '\r')))
        .collect()
}

fn check_size(field: &str, text: &str, max_chars: usize, max_bytes: usize) -> Result<()> {
    if text.len() > max_bytes {
        return Err(AppError::validation(format!(
            "{} too large: {} bytes (max {})",
            field,
            text.len(),
            max_bytes
        ))
        .with_context("field", field));
    }

    let chars = text.chars().count();
    if chars > max_chars {
        return Err(AppError::validation(format!(
            "{} too long: {} characters (max {})",
            field, chars, max_chars
        ))
        .with_context("field", field));
    }
    Ok(())
}

fn reject_patterns(field: &str, lower: &str, patterns: &[(&str, &str)]) -> Result<()> {
    match patterns.iter().find(|(pattern, _)| lower.contains(pattern)) {
        Some((_, description)) => Err(dangerous(field, description)),
        None => Ok(()),
    }
}

fn dangerous(field: &str, description: &str) -> AppError {
    AppError::validation(format!(
        "{} contains a potentially dangerous pattern: {}",
        field, description
    ))
    .with_context("field", field)
}

/// `import` followed by whitespace and `os`
fn has_import_os(lower: &str) -> bool {
    lower.match_indices("import").any(|(idx, m)| {
        let rest = &lower[idx + m.len()..];
        let trimmed = rest.trim_start();
        trimmed.len() < rest.len() && trimmed.starts_with("os")
    })
}

/// `shell` followed by optional whitespace and `=`
fn has_shell_assignment(lower: &str) -> bool {
    lower
        .match_indices("shell")
        .any(|(idx, m)| lower[idx + m.len()..].trim_start().starts_with('='))
}
