use std::fmt;
use std::io;
use std::path::PathBuf;

use super::codec::CodecKeyError;

#[derive(Debug)]
pub enum StorageError {
    HomeDirectoryUnavailable,
    InvalidDownloadDelivery {
        value: String,
    },
    InvalidCodecKey(CodecKeyError),
    CreateDir {
        path: PathBuf,
        source: io::Error,
    },
    NotFound {
        username: String,
        filename: String,
    },
    SourceUnavailable {
        path: PathBuf,
        source: io::Error,
    },
    ShortSource {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    QuotaExceeded {
        username: String,
        quota_bytes: u64,
        required_bytes: u64,
    },
    UploadNeedsHighPriority {
        username: String,
        size: u64,
        limit: u64,
    },
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Short text sent to the client after `ERR`.
    pub fn reply_reason(&self) -> String {
        match self {
            Self::NotFound { .. } => "not found".to_owned(),
            Self::QuotaExceeded { .. } => "quota exceeded".to_owned(),
            Self::UploadNeedsHighPriority { size, limit, .. } => {
                format!("upload of {size} bytes exceeds {limit}; needs HIGH priority")
            }
            Self::ShortSource {
                expected, actual, ..
            } => format!("source has {actual} bytes, expected {expected}"),
            Self::SourceUnavailable { source, .. } => format!("cannot read source: {source}"),
            Self::Io { action, .. } => format!("storage failure while trying to {action}"),
            Self::HomeDirectoryUnavailable
            | Self::InvalidDownloadDelivery { .. }
            | Self::InvalidCodecKey(_)
            | Self::CreateDir { .. } => "storage unavailable".to_owned(),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HomeDirectoryUnavailable => {
                write!(f, "cannot resolve storage path because HOME is not set")
            }
            Self::InvalidDownloadDelivery { value } => write!(
                f,
                "invalid storage.download_delivery '{value}'; allowed values: path, inline"
            ),
            Self::InvalidCodecKey(source) => write!(f, "invalid storage.codec_key: {source}"),
            Self::CreateDir { path, source } => write!(
                f,
                "failed to create storage directory '{}': {source}",
                path.display()
            ),
            Self::NotFound { username, filename } => {
                write!(f, "file '{filename}' of user '{username}' not found")
            }
            Self::SourceUnavailable { path, source } => write!(
                f,
                "failed to open upload source '{}': {source}",
                path.display()
            ),
            Self::ShortSource {
                path,
                expected,
                actual,
            } => write!(
                f,
                "upload source '{}' ended after {actual} of {expected} bytes",
                path.display()
            ),
            Self::QuotaExceeded {
                username,
                quota_bytes,
                required_bytes,
            } => write!(
                f,
                "user '{username}' would need {required_bytes} bytes, quota is {quota_bytes}"
            ),
            Self::UploadNeedsHighPriority {
                username,
                size,
                limit,
            } => write!(
                f,
                "user '{username}' is below HIGH priority and may not upload {size} bytes (limit {limit})"
            ),
            Self::Io {
                action,
                path,
                source,
            } => write!(f, "failed to {action} '{}': {source}", path.display()),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidCodecKey(source) => Some(source),
            Self::CreateDir { source, .. }
            | Self::SourceUnavailable { source, .. }
            | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
