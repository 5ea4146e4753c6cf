use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toml::Value;

use crate::accounts::AccountBackendKind;
use crate::logging::LogLevel;
use crate::storage::DownloadDelivery;

pub const CONFIG_ENV_VAR: &str = "VAULTLINE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "vaultline.toml";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub queues: QueuesConfig,
    pub scheduling: SchedulingConfig,
    pub accounts: AccountsConfig,
    pub storage: StorageConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            human_friendly: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub acceptor_threads: usize,
    pub dispatcher_threads: usize,
    pub worker_threads: usize,
    pub read_timeout_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9090,
            acceptor_threads: 4,
            dispatcher_threads: 2,
            worker_threads: 4,
            read_timeout_ms: 5_000,
            max_line_bytes: 4_096,
        }
    }
}

/// Capacities of the two staging queues; `0` leaves a queue unbounded.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QueuesConfig {
    pub client_capacity: usize,
    pub task_capacity: usize,
}

/// With `account_priority_override` set, a registered user's stored priority
/// replaces the table priority of their UPLOAD/LIST/DOWNLOAD/DELETE tasks.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulingConfig {
    pub account_priority_override: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AccountsConfig {
    pub backend: String,
    pub sled_path: String,
    pub default_quota_bytes: u64,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            backend: "sled".to_owned(),
            sled_path: "./vaultline-accounts.db".to_owned(),
            default_quota_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub root: String,
    pub download_dir: String,
    pub download_delivery: String,
    pub download_ttl_secs: u64,
    pub large_upload_bytes: u64,
    pub codec_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./storage".to_owned(),
            download_dir: std::env::temp_dir()
                .join("vaultline-downloads")
                .to_string_lossy()
                .into_owned(),
            download_delivery: "path".to_owned(),
            download_ttl_secs: 600,
            large_upload_bytes: 10 * 1024 * 1024,
            codec_key: "vaultline:at-rest:7f3a".to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 10_000,
        }
    }
}

impl AppConfig {
    /// Resolves the config file (`$VAULTLINE_CONFIG`, then `./vaultline.toml`, then
    /// built-in defaults) and applies the command line on top of it.
    ///
    /// The command line is `[port] [--section.key value ...]`.
    pub fn load_with_discovery(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .or_else(|| {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                candidate.is_file().then_some(candidate)
            });

        match path {
            Some(path) => Self::load_from_toml_with_args(path, args),
            None => Self::load_from_value_with_args(default_value()?, args),
        }
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let display_path = path.as_ref().to_string_lossy().to_string();
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: display_path.clone(),
            source,
        })?;
        let file_value: Value = toml_content
            .parse()
            .map_err(|source| ConfigError::TomlParse {
                path: display_path,
                source,
            })?;

        let mut root_value = default_value()?;
        merge_values(&mut root_value, file_value);
        Self::load_from_value_with_args(root_value, args)
    }

    fn load_from_value_with_args(
        mut root_value: Value,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        for (key_path, raw_value) in parse_cli_args(args)? {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        let config: Self = root_value.try_into().map_err(ConfigError::Deserialize)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let thread_counts = [
            ("server.acceptor_threads", self.server.acceptor_threads),
            ("server.dispatcher_threads", self.server.dispatcher_threads),
            ("server.worker_threads", self.server.worker_threads),
        ];
        for (key, count) in thread_counts {
            if count == 0 {
                return Err(ConfigError::InvalidSetting {
                    key,
                    reason: "must be at least 1".to_owned(),
                });
            }
        }

        if self.server.max_line_bytes < 16 {
            return Err(ConfigError::InvalidSetting {
                key: "server.max_line_bytes",
                reason: "must be at least 16 bytes".to_owned(),
            });
        }
        if self.server.read_timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "server.read_timeout_ms",
                reason: "must be positive".to_owned(),
            });
        }
        if LogLevel::from_config_value(&self.logging.level).is_none() {
            return Err(ConfigError::InvalidSetting {
                key: "logging.level",
                reason: format!("allowed values: {}", LogLevel::ALLOWED_VALUES),
            });
        }
        if AccountBackendKind::parse(&self.accounts.backend).is_none() {
            return Err(ConfigError::InvalidSetting {
                key: "accounts.backend",
                reason: "allowed values: memory, sled".to_owned(),
            });
        }
        if DownloadDelivery::parse(&self.storage.download_delivery).is_none() {
            return Err(ConfigError::InvalidSetting {
                key: "storage.download_delivery",
                reason: "allowed values: path, inline".to_owned(),
            });
        }
        if self.storage.codec_key.is_empty() || self.storage.codec_key.bytes().any(|b| b == 0) {
            return Err(ConfigError::InvalidSetting {
                key: "storage.codec_key",
                reason: "must be non-empty and contain no NUL bytes".to_owned(),
            });
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    SerializeDefaults(toml::ser::Error),
    InvalidPort {
        value: String,
    },
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    InvalidSetting {
        key: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::SerializeDefaults(source) => {
                write!(f, "failed to render built-in config defaults: {source}")
            }
            Self::InvalidPort { value } => {
                write!(f, "invalid port '{value}', expected an integer in 0..=65535")
            }
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI override '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
            Self::InvalidSetting { key, reason } => write!(f, "invalid '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_value() -> Result<Value, ConfigError> {
    Value::try_from(AppConfig::default()).map_err(ConfigError::SerializeDefaults)
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Splits the optional leading port from `--section.key value` overrides.
fn parse_cli_args(
    args: impl IntoIterator<Item = String>,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter().peekable();

    let leading_port = iter.peek().is_some_and(|first| !first.starts_with("--"));
    if leading_port && let Some(raw) = iter.next() {
        if raw.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidPort { value: raw });
        }
        parsed.push(("server.port".to_owned(), raw));
    }

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        parsed.push((stripped.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }
    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let mut current = root;
    for section in &parts {
        current = current
            .as_table_mut()
            .ok_or_else(unknown)?
            .get_mut(*section)
            .ok_or_else(unknown)?;
    }

    *current = parse_value_using_current_type(key_path, raw_value, current)?;
    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{AppConfig, ConfigError, default_value};

    fn write_temp_config(content: &str, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vaultline-config-test-{suffix}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, content).expect("failed to write temp config");
        path
    }

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let path = write_temp_config(
            r#"
[logging]
level = "debug"

[server]
worker_threads = 8
"#,
            "partial",
        );

        let config = AppConfig::load_from_toml_with_args(&path, Vec::<String>::new())
            .expect("config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.human_friendly);
        assert_eq!(config.server.worker_threads, 8);
        assert_eq!(config.server.acceptor_threads, 4);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.accounts.default_quota_bytes, 100 * 1024 * 1024);
        assert!(!config.scheduling.account_priority_override);
        assert_eq!(config.storage.large_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn leading_port_and_overrides_are_applied() {
        let path = write_temp_config("[server]\nport = 7000\n", "port");

        let config = AppConfig::load_from_toml_with_args(
            &path,
            args(&[
                "9191",
                "--server.worker_threads",
                "2",
                "--scheduling.account_priority_override",
                "true",
                "--storage.download_delivery",
                "inline",
            ]),
        )
        .expect("config with overrides should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.server.port, 9191);
        assert_eq!(config.server.worker_threads, 2);
        assert!(config.scheduling.account_priority_override);
        assert_eq!(config.storage.download_delivery, "inline");
    }

    #[test]
    fn rejects_non_numeric_port() {
        let path = write_temp_config("", "bad-port");
        let err = AppConfig::load_from_toml_with_args(&path, args(&["http"]))
            .expect_err("non numeric port should fail");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(err, ConfigError::InvalidPort { .. }));
    }

    #[test]
    fn rejects_unknown_override_path() {
        let path = write_temp_config("", "unknown-path");
        let err = AppConfig::load_from_toml_with_args(&path, args(&["--server.nonexistent", "x"]))
            .expect_err("unknown override key should fail");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(err, ConfigError::UnknownPath { .. }));
    }

    #[test]
    fn rejects_mistyped_override_value() {
        let path = write_temp_config("", "mistyped");
        let err = AppConfig::load_from_toml_with_args(
            &path,
            args(&["--shutdown.join_timeout_ms", "soon"]),
        )
        .expect_err("non integer override should fail");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(
            err,
            ConfigError::InvalidValueForType {
                expected: "integer",
                ..
            }
        ));
    }

    #[test]
    fn zero_worker_threads_fail_validation() {
        let path = write_temp_config("[server]\nworker_threads = 0\n", "zero-workers");
        let err = AppConfig::load_from_toml_with_args(&path, Vec::<String>::new())
            .expect_err("zero workers should be rejected");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                key: "server.worker_threads",
                ..
            }
        ));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let path = write_temp_config("[server]\nthreads = 3\n", "unknown-key");
        let err = AppConfig::load_from_toml_with_args(&path, Vec::<String>::new())
            .expect_err("typo keys should be rejected");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(err, ConfigError::Deserialize(_)));
    }

    #[test]
    fn empty_codec_key_fails_validation() {
        let mut config = AppConfig::default();
        config.storage.codec_key.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting {
                key: "storage.codec_key",
                ..
            })
        ));
    }

    #[test]
    fn unknown_enum_values_fail_validation() {
        let cases = [
            ("--accounts.backend", "postgres", "accounts.backend"),
            ("--storage.download_delivery", "fax", "storage.download_delivery"),
            ("--logging.level", "loud", "logging.level"),
        ];
        for (flag, value, expected_key) in cases {
            let err = AppConfig::load_from_value_with_args(
                default_value().expect("defaults serialize"),
                vec![flag.to_owned(), value.to_owned()],
            )
            .expect_err("unknown value should be rejected");
            assert!(
                matches!(err, ConfigError::InvalidSetting { key, .. } if key == expected_key),
                "{flag} {value} gave {err}"
            );
        }
    }
}
