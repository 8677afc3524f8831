use crate::errors::KeyFormatError;

pub const SEPARATOR: char = '.';

/// Check a dot-separated key and split it into segments.
///
/// The empty key addresses the root and yields no segments; callers that
/// cannot act on the root reject it themselves.
pub fn split_key(key: &str) -> Result<Vec<&str>, KeyFormatError> {
    if key.is_empty() {
        return Ok(Vec::new());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(KeyFormatError::Whitespace(key.to_string()));
    }
    if key.starts_with(SEPARATOR) || key.ends_with(SEPARATOR) {
        return Err(KeyFormatError::DanglingSeparator(key.to_string()));
    }
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(KeyFormatError::ConsecutiveSeparators(key.to_string()));
    }
    Ok(segments)
}

/// Like [`split_key`] but refuses the root.
pub fn validate_key(key: &str) -> Result<Vec<&str>, KeyFormatError> {
    if key.is_empty() {
        return Err(KeyFormatError::Empty);
    }
    split_key(key)
}

/// A single segment, as used for rename targets.
pub fn validate_name(name: &str) -> Result<(), KeyFormatError> {
    if name.is_empty() {
        return Err(KeyFormatError::Empty);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(KeyFormatError::Whitespace(name.to_string()));
    }
    if name.contains(SEPARATOR) {
        return Err(KeyFormatError::SeparatorInName(name.to_string()));
    }
    Ok(())
}

pub fn join_key(
    prefix: &str,
    segment: &str,
) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{segment}")
    }
}

/// Parent key and last segment; the parent of a top-level key is `""`.
pub fn split_parent(key: &str) -> (&str, &str) {
    match key.rfind(SEPARATOR) {
        Some(pos) => (&key[..pos], &key[pos + 1..]),
        None => ("", key),
    }
}
