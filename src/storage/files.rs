use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::tasks::Priority;

use super::codec::{ContentCodec, XorCodec};
use super::path::expand_home_path;
use super::StorageError;

const CHUNK_SIZE: usize = 8 * 1024;
const UPLOAD_TEMP_PREFIX: &str = ".upload-";
const EXPORT_SUFFIX: &str = ".download";
const DEFAULT_LARGE_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_DOWNLOAD_TTL: Duration = Duration::from_secs(600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadDelivery {
    /// Decoded copy written under the download directory; the reply names it.
    Path,
    /// Decoded bytes streamed back on the requesting connection.
    Inline,
}

impl DownloadDelivery {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "path" => Some(Self::Path),
            "inline" => Some(Self::Inline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Inline => "inline",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Download {
    Exported { path: PathBuf, bytes: u64 },
    Inline(Vec<u8>),
}

/// Removes a half-written upload unless it was renamed into place.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Per-user directories of encoded files.
///
/// Every operation on a user's directory runs under that user's lock, so a
/// listing never sees a half-renamed upload and a download never races a
/// delete. Uploads stream into a hidden temp file first and are renamed over
/// the target only once fully written.
pub struct FileStore {
    root: PathBuf,
    download_dir: PathBuf,
    delivery: DownloadDelivery,
    large_upload_bytes: u64,
    download_ttl: Duration,
    codec: Box<dyn ContentCodec>,
    /// Entries live only while some operation holds or waits for the lock.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn open(
        root: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
        delivery: DownloadDelivery,
        codec: Box<dyn ContentCodec>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let download_dir = download_dir.into();
        for dir in [&root, &download_dir] {
            fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(Self {
            root,
            download_dir,
            delivery,
            large_upload_bytes: DEFAULT_LARGE_UPLOAD_BYTES,
            download_ttl: DEFAULT_DOWNLOAD_TTL,
            codec,
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Uploads above `bytes` need a HIGH priority account; `0` lifts the limit.
    pub fn with_large_upload_limit(mut self, bytes: u64) -> Self {
        self.large_upload_bytes = bytes;
        self
    }

    pub fn with_download_ttl(mut self, ttl: Duration) -> Self {
        self.download_ttl = ttl;
        self
    }

    pub fn from_app_config(app_config: &AppConfig, logger: &Logger) -> Result<Self, StorageError> {
        let storage = &app_config.storage;
        let delivery = DownloadDelivery::parse(&storage.download_delivery).ok_or_else(|| {
            StorageError::InvalidDownloadDelivery {
                value: storage.download_delivery.clone(),
            }
        })?;
        let codec = XorCodec::new(storage.codec_key.as_bytes())
            .map_err(StorageError::InvalidCodecKey)?;
        let root = expand_home_path(&storage.root)?;
        let download_dir = expand_home_path(&storage.download_dir)?;

        let store = Self::open(&root, &download_dir, delivery, Box::new(codec))?
            .with_large_upload_limit(storage.large_upload_bytes)
            .with_download_ttl(Duration::from_secs(storage.download_ttl_secs));
        logger.log(
            LogLevel::Info,
            Some("storage::files"),
            "File store initialized",
            Some(json!({
                "root": root.display().to_string(),
                "download_dir": download_dir.display().to_string(),
                "download_delivery": delivery.as_str(),
                "download_ttl_secs": storage.download_ttl_secs,
                "large_upload_bytes": storage.large_upload_bytes,
                "codec": store.codec.name(),
            })),
        );
        Ok(store)
    }

    /// HIGH priority accounts get the bytes inline; everyone else, and
    /// requests without an account, get the configured mode.
    pub fn delivery_for(&self, priority: Option<Priority>) -> DownloadDelivery {
        match priority {
            Some(Priority::High) => DownloadDelivery::Inline,
            _ => self.delivery,
        }
    }

    /// Rejects uploads over the large-upload limit from accounts below HIGH.
    pub fn admit_upload(
        &self,
        username: &str,
        size: u64,
        priority: Priority,
    ) -> Result<(), StorageError> {
        if self.large_upload_bytes > 0 && size > self.large_upload_bytes && priority < Priority::High {
            return Err(StorageError::UploadNeedsHighPriority {
                username: username.to_owned(),
                size,
                limit: self.large_upload_bytes,
            });
        }
        Ok(())
    }

    pub fn user_dir(&self, username: &str) -> PathBuf {
        self.root.join(username)
    }

    pub fn ensure_user_dir(&self, username: &str) -> Result<(), StorageError> {
        let dir = self.user_dir(username);
        fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDir { path: dir, source })
    }

    /// Streams exactly `size` bytes from `source` into
    /// `<root>/<username>/<filename>`, replacing any previous content.
    pub fn upload(
        &self,
        username: &str,
        filename: &str,
        size: u64,
        source: &Path,
        quota_bytes: Option<u64>,
    ) -> Result<u64, StorageError> {
        self.ensure_user_dir(username)?;

        let mut input = File::open(source).map_err(|error| StorageError::SourceUnavailable {
            path: source.to_path_buf(),
            source: error,
        })?;
        let temp_path = self
            .user_dir(username)
            .join(format!("{UPLOAD_TEMP_PREFIX}{}", Uuid::new_v4()));
        let mut guard = TempFileGuard::new(temp_path.clone());
        let mut output = File::create(&temp_path)
            .map_err(|error| StorageError::io("create upload temp file", &temp_path, error))?;

        let written = self.encode_stream(&mut input, &mut output, size, source, &temp_path)?;
        output
            .sync_all()
            .map_err(|error| StorageError::io("flush upload", &temp_path, error))?;
        drop(output);

        self.with_user(username, || {
            let target = self.user_dir(username).join(filename);
            if let Some(quota_bytes) = quota_bytes {
                let replaced = file_len(&target)?;
                let required_bytes = self.usage_locked(username)?.saturating_sub(replaced) + written;
                if required_bytes > quota_bytes {
                    return Err(StorageError::QuotaExceeded {
                        username: username.to_owned(),
                        quota_bytes,
                        required_bytes,
                    });
                }
            }

            fs::rename(&temp_path, &target)
                .map_err(|error| StorageError::io("publish upload", &target, error))?;
            guard.disarm();
            Ok(written)
        })
    }

    fn encode_stream(
        &self,
        input: &mut File,
        output: &mut File,
        size: u64,
        source: &Path,
        temp_path: &Path,
    ) -> Result<u64, StorageError> {
        let mut limited = input.take(size);
        let mut buffer = vec![0_u8; CHUNK_SIZE];
        let mut offset = 0_u64;

        loop {
            let read = match limited.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    return Err(StorageError::SourceUnavailable {
                        path: source.to_path_buf(),
                        source: error,
                    });
                }
            };
            let chunk = &mut buffer[..read];
            self.codec.encode_in_place(offset, chunk);
            output
                .write_all(chunk)
                .map_err(|error| StorageError::io("write upload", temp_path, error))?;
            offset += read as u64;
        }

        if offset < size {
            return Err(StorageError::ShortSource {
                path: source.to_path_buf(),
                expected: size,
                actual: offset,
            });
        }
        Ok(offset)
    }

    /// Sorted filenames of `username`; a user without a directory has none.
    pub fn list(&self, username: &str) -> Result<Vec<String>, StorageError> {
        self.with_user(username, || self.list_locked(username))
    }

    fn list_locked(&self, username: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.user_dir(username);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StorageError::io("list directory", dir, error)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| StorageError::io("list directory", &dir, error))?;
            let is_file = entry
                .file_type()
                .map_err(|error| StorageError::io("inspect entry", entry.path(), error))?
                .is_file();
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read_decoded(&self, username: &str, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.user_dir(username).join(filename);
        let mut content = self.with_user(username, || {
            fs::read(&path).map_err(|error| {
                not_found_or(error, username, filename, |error| {
                    StorageError::io("read stored file", &path, error)
                })
            })
        })?;
        self.codec.decode_in_place(0, &mut content);
        Ok(content)
    }

    /// Decodes a stored file and hands it out as `delivery` asks. Exporting a
    /// copy also sweeps exports older than the download TTL.
    pub fn download(
        &self,
        username: &str,
        filename: &str,
        delivery: DownloadDelivery,
    ) -> Result<Download, StorageError> {
        let content = self.read_decoded(username, filename)?;
        match delivery {
            DownloadDelivery::Inline => Ok(Download::Inline(content)),
            DownloadDelivery::Path => {
                // Best effort; a failed sweep must not fail the download.
                let _ = self.sweep_exports(self.download_ttl);
                let path = self.download_dir.join(format!(
                    "{username}_{filename}_{}{EXPORT_SUFFIX}",
                    Uuid::new_v4()
                ));
                fs::write(&path, &content)
                    .map_err(|error| StorageError::io("write decoded copy", &path, error))?;
                Ok(Download::Exported {
                    path,
                    bytes: content.len() as u64,
                })
            }
        }
    }

    /// Removes exported copies at least `max_age` old and returns how many
    /// were removed. `Duration::ZERO` removes all of them.
    pub fn sweep_exports(&self, max_age: Duration) -> Result<usize, StorageError> {
        let entries = fs::read_dir(&self.download_dir)
            .map_err(|error| StorageError::io("list download directory", &self.download_dir, error))?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|error| {
                StorageError::io("list download directory", &self.download_dir, error)
            })?;
            if !entry.file_name().to_string_lossy().ends_with(EXPORT_SUFFIX) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|error| StorageError::io("stat decoded copy", entry.path(), error))?;
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or_default();
            if metadata.is_file() && age >= max_age {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                    Err(error) => {
                        return Err(StorageError::io("remove decoded copy", entry.path(), error));
                    }
                }
            }
        }
        Ok(removed)
    }

    pub fn delete(&self, username: &str, filename: &str) -> Result<(), StorageError> {
        let path = self.user_dir(username).join(filename);
        self.with_user(username, || {
            if !path.is_file() {
                return Err(StorageError::NotFound {
                    username: username.to_owned(),
                    filename: filename.to_owned(),
                });
            }
            fs::remove_file(&path).map_err(|error| {
                not_found_or(error, username, filename, |error| {
                    StorageError::io("delete stored file", &path, error)
                })
            })
        })
    }

    #[cfg(test)]
    pub fn usage_bytes(&self, username: &str) -> Result<u64, StorageError> {
        self.with_user(username, || self.usage_locked(username))
    }

    fn usage_locked(&self, username: &str) -> Result<u64, StorageError> {
        let dir = self.user_dir(username);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(StorageError::io("measure directory", dir, error)),
        };

        let mut total = 0;
        for entry in entries {
            let entry = entry.map_err(|error| StorageError::io("measure directory", &dir, error))?;
            let metadata = entry
                .metadata()
                .map_err(|error| StorageError::io("stat stored file", entry.path(), error))?;
            if metadata.is_file() && !entry.file_name().to_string_lossy().starts_with('.') {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    fn with_user<R>(&self, username: &str, operation: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.user_locks.lock().expect("user lock table poisoned");
            Arc::clone(locks.entry(username.to_owned()).or_default())
        };
        let result = {
            let _guard = lock.lock().expect("user directory lock poisoned");
            operation()
        };

        // Clones are only taken under the table lock, so a count of two (the
        // table's and ours) means nobody else holds or waits for this entry.
        let mut locks = self.user_locks.lock().expect("user lock table poisoned");
        if Arc::strong_count(&lock) == 2 {
            locks.remove(username);
        }
        result
    }

    #[cfg(test)]
    fn tracked_user_locks(&self) -> usize {
        self.user_locks.lock().expect("user lock table poisoned").len()
    }
}

fn file_len(path: &Path) -> Result<u64, StorageError> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(error) => Err(StorageError::io("stat stored file", path, error)),
    }
}

fn not_found_or(
    error: io::Error,
    username: &str,
    filename: &str,
    other: impl FnOnce(io::Error) -> StorageError,
) -> StorageError {
    if error.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            username: username.to_owned(),
            filename: filename.to_owned(),
        }
    } else {
        other(error)
    }
}
