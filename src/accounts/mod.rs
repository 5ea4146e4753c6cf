mod backend;
mod error;
mod sled_backend;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::storage;
use crate::tasks::Priority;

pub use backend::{AccountBackend, AccountBackendKind, MemoryBackend};
pub use error::AccountError;
pub use sled_backend::SledAccounts;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
    pub priority: Priority,
    pub quota_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Registered users, guarded by one mutex.
///
/// Signup writes through to the backend while holding the lock, so an
/// account becomes visible only after it is durable.
pub struct AccountStore {
    users: Mutex<HashMap<String, User>>,
    backend: Box<dyn AccountBackend>,
    default_quota_bytes: u64,
}

impl AccountStore {
    pub fn open(
        backend: Box<dyn AccountBackend>,
        default_quota_bytes: u64,
    ) -> Result<Self, AccountError> {
        let users = backend
            .load_users()?
            .into_iter()
            .map(|user| (user.username.clone(), user))
            .collect();

        Ok(Self {
            users: Mutex::new(users),
            backend,
            default_quota_bytes,
        })
    }

    #[cfg(test)]
    pub fn in_memory(default_quota_bytes: u64) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            backend: Box::new(MemoryBackend::default()),
            default_quota_bytes,
        }
    }

    pub fn from_app_config(app_config: &AppConfig, logger: &Logger) -> Result<Self, AccountError> {
        let accounts = &app_config.accounts;
        let Some(kind) = AccountBackendKind::parse(&accounts.backend) else {
            return Err(AccountError::UnsupportedBackend {
                backend: accounts.backend.clone(),
            });
        };

        let backend: Box<dyn AccountBackend> = match kind {
            AccountBackendKind::Memory => Box::new(MemoryBackend::default()),
            AccountBackendKind::Sled => {
                let path = sled_location(app_config)?;
                logger.log(
                    LogLevel::Debug,
                    Some("accounts::init"),
                    "Opening sled account backend",
                    Some(json!({
                        "configured_path": accounts.sled_path,
                        "resolved_path": path.display().to_string(),
                    })),
                );
                Box::new(SledAccounts::open(&path)?)
            }
        };

        let store = Self::open(backend, accounts.default_quota_bytes)?;
        logger.log(
            LogLevel::Info,
            Some("accounts::init"),
            "Account store initialized",
            Some(json!({
                "backend": store.backend_name(),
                "users_loaded": store.count(),
                "default_quota_bytes": accounts.default_quota_bytes,
            })),
        );
        Ok(store)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn signup(
        &self,
        username: &str,
        password: &str,
        priority: Priority,
    ) -> Result<User, AccountError> {
        let mut users = self.users.lock().expect("account store mutex poisoned");
        if users.contains_key(username) {
            return Err(AccountError::UserExists {
                username: username.to_owned(),
            });
        }

        let user = User {
            username: username.to_owned(),
            password: password.to_owned(),
            priority,
            quota_bytes: self.default_quota_bytes,
            created_at: Utc::now(),
        };
        self.backend.insert_user(&user)?;
        users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(), AccountError> {
        let users = self.users.lock().expect("account store mutex poisoned");
        match users.get(username) {
            Some(user) if user.password == password => Ok(()),
            _ => Err(AccountError::InvalidCredentials),
        }
    }

    pub fn exists(&self, username: &str) -> bool {
        self.users
            .lock()
            .expect("account store mutex poisoned")
            .contains_key(username)
    }

    pub fn priority_of(&self, username: &str) -> Option<Priority> {
        self.users
            .lock()
            .expect("account store mutex poisoned")
            .get(username)
            .map(|user| user.priority)
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.users
            .lock()
            .expect("account store mutex poisoned")
            .get(username)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.users.lock().expect("account store mutex poisoned").len()
    }

    pub fn flush(&self) -> Result<(), AccountError> {
        self.backend.flush()
    }
}

/// Absolute sled directory. It must not live under the storage root, where
/// it would share a namespace with the per-user directories.
fn sled_location(app_config: &AppConfig) -> Result<PathBuf, AccountError> {
    let root = storage::absolute_path(&app_config.storage.root).map_err(AccountError::ResolvePath)?;
    let path =
        storage::absolute_path(&app_config.accounts.sled_path).map_err(AccountError::ResolvePath)?;
    if path.starts_with(&root) {
        return Err(AccountError::SledPathInsideStorage { path, root });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use crate::config::AppConfig;
    use crate::logging::LogLevel;
    use crate::logging::testing::capturing_logger;
    use crate::tasks::Priority;

    use super::{AccountError, AccountStore, sled_location};

    #[test]
    fn signup_then_login() {
        let store = AccountStore::in_memory(100);
        let user = store
            .signup("alice", "pw", Priority::High)
            .expect("signup should work");
        assert_eq!(user.quota_bytes, 100);

        assert!(store.login("alice", "pw").is_ok());
        assert!(matches!(
            store.login("alice", "wrong"),
            Err(AccountError::InvalidCredentials)
        ));
        assert!(matches!(
            store.login("nobody", "pw"),
            Err(AccountError::InvalidCredentials)
        ));
        assert_eq!(store.priority_of("alice"), Some(Priority::High));
        assert_eq!(store.priority_of("nobody"), None);
    }

    #[test]
    fn duplicate_signup_is_rejected_and_keeps_first_password() {
        let store = AccountStore::in_memory(100);
        store
            .signup("bob", "first", Priority::Normal)
            .expect("signup should work");
        let error = store
            .signup("bob", "second", Priority::Low)
            .expect_err("duplicate must fail");
        assert_eq!(error.reply_reason(), "user exists");
        assert!(store.login("bob", "first").is_ok());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn concurrent_signups_of_one_name_have_a_single_winner() {
        let store = Arc::new(AccountStore::in_memory(100));
        let handles = (0..8)
            .map(|index| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .signup("race", &format!("pw-{index}"), Priority::Normal)
                        .map(|_| index)
                        .ok()
                })
            })
            .collect::<Vec<_>>();

        let winners = handles
            .into_iter()
            .filter_map(|handle| handle.join().expect("signup thread should not panic"))
            .collect::<HashSet<_>>();
        assert_eq!(winners.len(), 1);
        let winner = winners.into_iter().next().expect("one winner");
        assert!(store.login("race", &format!("pw-{winner}")).is_ok());
    }

    #[test]
    fn sled_backend_reloads_users_from_app_config() {
        let base = std::env::temp_dir().join(format!(
            "vaultline-accounts-config-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let mut config = AppConfig::default();
        config.storage.root = base.join("storage").display().to_string();
        config.accounts.backend = "sled".to_owned();
        config.accounts.sled_path = base.join("accounts.db").display().to_string();
        let (logger, sink) = capturing_logger(LogLevel::Info);

        {
            let store = AccountStore::from_app_config(&config, &logger).expect("init should work");
            assert_eq!(store.backend_name(), "sled");
            store
                .signup("carol", "pw", Priority::Low)
                .expect("signup should work");
        }

        let store = AccountStore::from_app_config(&config, &logger).expect("reopen should work");
        assert!(store.login("carol", "pw").is_ok());
        assert_eq!(store.priority_of("carol"), Some(Priority::Low));
        assert!(base.join("accounts.db").exists());
        assert!(sink.lines().iter().any(|line| line.contains("Account store initialized")));

        drop(store);
        let _ = std::fs::remove_dir_all(base);
    }

    #[test]
    fn sled_directory_must_stay_outside_the_storage_root() {
        let defaults = AppConfig::default();
        let path = sled_location(&defaults).expect("defaults keep the database apart");
        assert!(path.is_absolute());
        assert!(path.ends_with("vaultline-accounts.db"));

        let base = std::env::temp_dir().join("vaultline-accounts-overlap");
        let mut config = AppConfig::default();
        config.storage.root = base.join("storage").display().to_string();
        for inside in ["storage/accounts.db", "storage", "storage/./nested/db"] {
            config.accounts.sled_path = base.join(inside).display().to_string();
            assert!(
                matches!(
                    sled_location(&config),
                    Err(AccountError::SledPathInsideStorage { .. })
                ),
                "{inside} should be rejected"
            );
        }

        config.accounts.sled_path = base.join("storage-accounts.db").display().to_string();
        assert!(sled_location(&config).is_ok());

        let (logger, _) = capturing_logger(LogLevel::Error);
        config.accounts.sled_path = base.join("storage/accounts.db").display().to_string();
        assert!(matches!(
            AccountStore::from_app_config(&config, &logger),
            Err(AccountError::SledPathInsideStorage { .. })
        ));
        assert!(!base.join("storage/accounts.db").exists());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = AppConfig::default();
        config.accounts.backend = "postgres".to_owned();
        let (logger, _) = capturing_logger(LogLevel::Error);
        assert!(matches!(
            AccountStore::from_app_config(&config, &logger),
            Err(AccountError::UnsupportedBackend { .. })
        ));
    }
}
