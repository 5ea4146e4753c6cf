use std::fmt;
use std::path::PathBuf;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum AccountError {
    UserExists { username: String },
    InvalidCredentials,
    UnknownUser { username: String },
    UnsupportedBackend { backend: String },
    ResolvePath(StorageError),
    SledPathInsideStorage { path: PathBuf, root: PathBuf },
    Sled(sled::Error),
    SerializeUser(serde_json::Error),
    DeserializeUser { key: String, source: serde_json::Error },
}

impl AccountError {
    /// Short text sent to the client after `ERR`.
    pub fn reply_reason(&self) -> String {
        match self {
            Self::UserExists { .. } => "user exists".to_owned(),
            Self::InvalidCredentials => "invalid credentials".to_owned(),
            Self::UnknownUser { .. } => "unknown user".to_owned(),
            Self::UnsupportedBackend { .. }
            | Self::ResolvePath(_)
            | Self::SledPathInsideStorage { .. }
            | Self::Sled(_)
            | Self::SerializeUser(_)
            | Self::DeserializeUser { .. } => "account store unavailable".to_owned(),
        }
    }
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserExists { username } => write!(f, "user '{username}' already exists"),
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::UnknownUser { username } => write!(f, "user '{username}' does not exist"),
            Self::UnsupportedBackend { backend } => write!(
                f,
                "unsupported accounts.backend '{backend}'; allowed values: memory, sled"
            ),
            Self::ResolvePath(source) => write!(f, "failed to resolve account store path: {source}"),
            Self::SledPathInsideStorage { path, root } => write!(
                f,
                "accounts.sled_path '{}' lies inside storage.root '{}'",
                path.display(),
                root.display()
            ),
            Self::Sled(source) => write!(f, "sled account backend error: {source}"),
            Self::SerializeUser(source) => write!(f, "failed to serialize user: {source}"),
            Self::DeserializeUser { key, source } => {
                write!(f, "failed to deserialize user at key '{key}': {source}")
            }
        }
    }
}

impl std::error::Error for AccountError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResolvePath(source) => Some(source),
            Self::Sled(source) => Some(source),
            Self::SerializeUser(source) | Self::DeserializeUser { source, .. } => Some(source),
            _ => None,
        }
    }
}
