//! Validation helpers for resource names and numeric limits
//!
//! Used by queue and topic creation.

/// Longest accepted queue or topic name
pub const MAX_NAME_LEN: usize = 80;

/// Validate a queue or topic name
///
/// Names are 1..=80 characters of ASCII alphanumerics, `-`, `_` or `.`.
pub fn validate_resource_name(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name cannot be empty", kind));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "{} name '{}' is longer than {} characters",
            kind, name, MAX_NAME_LEN
        ));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!(
            "{} name '{}' contains invalid character '{}'",
            kind, name, bad
        ));
    }

    Ok(())
}
