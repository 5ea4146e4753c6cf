mod codec;
mod error;
mod files;
mod path;

#[cfg(test)]
pub use codec::{ContentCodec, XorCodec};
pub use error::StorageError;
pub use files::{Download, DownloadDelivery, FileStore};
pub(crate) use path::absolute_path;
pub use path::{InvalidName, validate_name};
