//! File name validation.
//!
//! Remote providers disagree on what they accept, and most of them report a
//! rejected name with an opaque error code after a round trip. Names that no
//! provider accepts are caught here, before a request is ever issued.

use crate::error::{ErrorKind, Result};

/// Longest name (in bytes) accepted by any supported provider.
pub const MAX_NAME_BYTES: usize = 255;

/// Validates a single file name (not a path).
///
/// Returns the name unchanged if valid, or
/// [`InvalidName`](crate::error::ErrorKind::InvalidName) otherwise.
///
/// # Examples
///
/// ```
/// use relabel_platform::validate_name;
/// // Valid names
/// assert!(validate_name("report.pdf").is_ok());
/// assert!(validate_name(".hidden").is_ok());
/// assert!(validate_name("with spaces (1).txt").is_ok());
/// // Invalid names
/// assert!(validate_name("").is_err());
/// assert!(validate_name("a/b.txt").is_err());
/// assert!(validate_name("..").is_err());
/// assert!(validate_name("name.").is_err());
/// ```
pub fn validate(name: &str) -> Result<&str> {
    let invalid = || exn::Exn::from(ErrorKind::InvalidName(name.to_string()));
    if name.is_empty() || name.len() > MAX_NAME_BYTES {
        return Err(invalid());
    }
    // Null bytes truncate names in C-based backends and slashes are folder
    // separators on every provider we talk to.
    if name.contains(['/', '\0']) {
        return Err(invalid());
    }
    if name == "." || name == ".." {
        return Err(invalid());
    }
    if name.starts_with(char::is_whitespace) || name.ends_with(char::is_whitespace) || name.ends_with('.') {
        return Err(invalid());
    }
    Ok(name)
}
