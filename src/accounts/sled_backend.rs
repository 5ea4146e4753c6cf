use std::path::Path;

use super::{AccountBackend, AccountError, User};

pub struct SledAccounts {
    db: sled::Db,
}

const KEYSPACE_VERSION: &str = "v1";
const USER_PREFIX: &[u8] = b"v1:u:";

impl SledAccounts {
    pub fn open(data_path: &Path) -> Result<Self, AccountError> {
        let db = sled::Config::new()
            .path(data_path)
            .open()
            .map_err(AccountError::Sled)?;
        Ok(Self { db })
    }
}

fn user_key(username: &str) -> String {
    format!("{KEYSPACE_VERSION}:u:{username}")
}

impl AccountBackend for SledAccounts {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn load_users(&self) -> Result<Vec<User>, AccountError> {
        let mut users = Vec::new();
        for entry in self.db.scan_prefix(USER_PREFIX) {
            let (key, value) = entry.map_err(AccountError::Sled)?;
            let user: User = serde_json::from_slice(value.as_ref()).map_err(|source| {
                AccountError::DeserializeUser {
                    key: String::from_utf8_lossy(key.as_ref()).into_owned(),
                    source,
                }
            })?;
            users.push(user);
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    fn insert_user(&self, user: &User) -> Result<(), AccountError> {
        let value = serde_json::to_vec(user).map_err(AccountError::SerializeUser)?;
        self.db
            .insert(user_key(&user.username).as_bytes(), value)
            .map_err(AccountError::Sled)?;
        self.db.flush().map_err(AccountError::Sled)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AccountError> {
        self.db.flush().map(|_| ()).map_err(AccountError::Sled)
    }
}
