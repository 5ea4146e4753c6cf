use std::collections::HashMap;
use std::sync::Mutex;

use super::{AccountError, User};

/// Durable home of user records. The in-memory map in `AccountStore` is the
/// source of truth while running; a backend only has to survive restarts.
pub trait AccountBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn load_users(&self) -> Result<Vec<User>, AccountError>;
    fn insert_user(&self, user: &User) -> Result<(), AccountError>;
    fn flush(&self) -> Result<(), AccountError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountBackendKind {
    Memory,
    Sled,
}

impl AccountBackendKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "memory" => Some(Self::Memory),
            "sled" => Some(Self::Sled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sled => "sled",
        }
    }
}

/// Keeps nothing beyond the process lifetime.
#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<HashMap<String, User>>,
}

impl AccountBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load_users(&self) -> Result<Vec<User>, AccountError> {
        let users = self.users.lock().expect("memory account backend poisoned");
        Ok(users.values().cloned().collect())
    }

    fn insert_user(&self, user: &User) -> Result<(), AccountError> {
        self.users
            .lock()
            .expect("memory account backend poisoned")
            .insert(user.username.clone(), user.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), AccountError> {
        Ok(())
    }
}
