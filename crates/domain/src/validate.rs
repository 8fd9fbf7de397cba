//! Input validation for user-supplied identifiers.
//!
//! Usernames, project names and group names share the charset
//! `[A-Za-z0-9_-]`; only the length bounds differ. Names are
//! case-sensitive.

use crate::error::{Error, Result};

fn charset_ok(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Usernames: 3–50 characters from the shared charset.
pub fn validate_username(username: &str) -> Result<()> {
    if !(3..=50).contains(&username.len()) {
        return Err(Error::InvalidInput(format!(
            "username must be 3-50 characters, got {}",
            username.len()
        )));
    }
    if !charset_ok(username) {
        return Err(Error::InvalidInput(
            "username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// Project and group names: 1–255 characters from the shared charset.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(Error::InvalidInput(format!(
            "{kind} name must be 1-255 characters, got {}",
            name.len()
        )));
    }
    if !charset_ok(name) {
        return Err(Error::InvalidInput(format!(
            "{kind} name may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Exit codes carried by completion frames must fit the persisted range.
pub fn validate_exit_code(exit_code: i32) -> Result<()> {
    if !(-128..=255).contains(&exit_code) {
        return Err(Error::InvalidInput(format!(
            "exit code {exit_code} outside [-128, 255]"
        )));
    }
    Ok(())
}
