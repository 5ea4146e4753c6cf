use std::fmt;
use std::path::PathBuf;

use super::StorageError;

const MAX_NAME_BYTES: usize = 255;

pub(crate) fn expand_home_path(raw_path: &str) -> Result<PathBuf, StorageError> {
    if let Some(suffix) = raw_path.strip_prefix("~/") {
        let home = std::env::var("HOME").map_err(|_| StorageError::HomeDirectoryUnavailable)?;
        return Ok(PathBuf::from(home).join(suffix));
    }

    if raw_path == "$HOME" || raw_path.starts_with("$HOME/") {
        let home = std::env::var("HOME").map_err(|_| StorageError::HomeDirectoryUnavailable)?;
        let suffix = raw_path.strip_prefix("$HOME").unwrap_or_default();
        return Ok(PathBuf::from(format!("{home}{suffix}")));
    }

    Ok(PathBuf::from(raw_path))
}

/// Expands `raw_path` and anchors it at the working directory, dropping `.`
/// components. Symlinks are not resolved.
pub(crate) fn absolute_path(raw_path: &str) -> Result<PathBuf, StorageError> {
    let expanded = expand_home_path(raw_path)?;
    std::path::absolute(&expanded)
        .map_err(|source| StorageError::io("resolve absolute path", expanded, source))
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidName {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl fmt::Display for InvalidName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.field, self.value, self.reason)
    }
}

impl std::error::Error for InvalidName {}

/// Usernames and filenames become single path components under the storage
/// root. Leading dots are reserved for in-progress uploads.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), InvalidName> {
    let reject = |reason| {
        Err(InvalidName {
            field,
            value: value.to_owned(),
            reason,
        })
    };

    if value.is_empty() {
        return reject("must not be empty");
    }
    if value.len() > MAX_NAME_BYTES {
        return reject("longer than 255 bytes");
    }
    if value.starts_with('.') {
        return reject("must not start with '.'");
    }
    if value
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return reject("contains a path separator or control character");
    }

    Ok(())
}
