//! Streaming helpers for S3-compatible object stores.
//!
//! Two things live here: a writable [`MultipartWriter`] that transparently
//! drives a multipart upload as bytes are fed to it, and a readable
//! [`ConcatStream`] that presents every object under a key prefix as one
//! logical byte stream. Everything else (auth, transport, retries) is the
//! storage client's problem; this crate only sequences the calls.
//!
//! ```no_run
//! # async fn example() -> skiff::Result<()> {
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use skiff::{Key, Skiff, WriteStreamOptions};
//!
//! # let s3_config: skiff::S3Config = todo!();
//! let skiff = Skiff::new(Arc::new(s3_config.new_store().await?));
//!
//! let key = Key::try_from(PathBuf::from("logs/2023/app.log"))?;
//! let mut writer = skiff
//!     .create_write_stream(key, WriteStreamOptions::default())
//!     .await?;
//! writer.write(b"hello").await?;
//! writer.close().await?;
//!
//! let mut stream = skiff.create_prefixed_read_stream("logs/2023/").await?;
//! while let Some(bytes) = stream.next().await {
//!     let bytes = bytes?;
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Component;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use regex::Regex;

mod config;
pub use config::Config;
mod errors;
pub use errors::{Error, KeyError, Result};
pub(crate) mod s3;
pub use s3::S3Config;
pub use s3::S3;
mod read;
pub use read::ConcatStream;
mod write;
pub use write::{MultipartWriter, WriteStreamOptions, MIN_PART_SIZE};
#[cfg(test)]
pub(crate) mod mock;

/// One completed part of a multipart upload, as acknowledged by the store.
#[derive(Clone, Debug)]
pub struct Part {
    pub e_tag: Option<String>,
    pub part_number: i32,
}

/// One page of a prefix listing.
pub struct ListPage {
    /// Object keys in the order the store returned them.
    pub keys: Vec<String>,
    /// Token for the next page, or `None` when this is the last page.
    pub continuation: Option<String>,
}

/// A wrapper around [`std::path::PathBuf`] that rejects unsavory key names.
///
/// The following rules applied during the [`TryFrom<PathBuf>`] implementation:
///
/// * paths must not start with `/`
/// * paths are delimited by `/`
/// * paths are normalized (`//` are replaced with `/` and never end in `/`)
/// * paths must not contain relative segments (ie `.` or `..`)
/// * only characters explicitly documented as safe [in the S3
///   docs](https://docs.aws.amazon.com/AmazonS3/latest/userguide/object-keys.html) are allowed in
///   path segments
///
/// Users are allowed to break these rules at their own risk by using the less restrictive
/// [`Key::from_pathbuf()`] method.
#[derive(Clone, Debug)]
pub struct Key {
    key: PathBuf,
}

impl Key {
    /// For users who know the keys they will be passing to [`ObjectStore`] methods are safe for
    /// their intended backend.
    ///
    /// This method skips all validation checks and so is less computationally costly but also may
    /// result in backend API errors. To signify to consumers of this library that the value may
    /// possibly be bad even though no checks are performed here, this method returns a
    /// [`std::result::Result`] that happens to always be [`std::result::Result::Ok<Key>`].
    pub fn from_pathbuf(key: PathBuf) -> Result<Key> {
        Ok(Key { key })
    }
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        format!("{}", k.key.display())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.key.display())
    }
}

impl TryFrom<PathBuf> for Key {
    type Error = Error;

    fn try_from(pb: PathBuf) -> Result<Key> {
        let key = pb
            .components()
            .try_fold(PathBuf::new(), validate_component)?;
        Ok(Key { key })
    }
}

fn validate_component(mut pb: PathBuf, c: Component<'_>) -> std::result::Result<PathBuf, KeyError> {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-!.*'()]+$").unwrap());
    match c {
        Component::Prefix(_) => return Err(KeyError::PrefixNotAllowed),
        Component::RootDir => return Err(KeyError::RootDirNotAllowed),
        Component::CurDir => return Err(KeyError::CurDirNotAllowed),
        Component::ParentDir => return Err(KeyError::ParentDirNotAllowed),
        Component::Normal(s) => {
            if let Some(s) = s.to_str() {
                if !RE.is_match(s) {
                    return Err(KeyError::PathComponentsMustMatchRegex(
                        RE.as_str().to_string(),
                    ));
                }
            } else {
                return Err(KeyError::PathComponentsMustBeValidUnicode);
            }
        }
    }
    pb.push(c);
    Ok(pb)
}

/// A stream of object bytes as produced by an [`ObjectStore`] backend.
pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

/// The storage-client operations this crate sequences.
///
/// Each method maps onto exactly one backend call; there is no retry or error
/// reclassification at this seam, backend errors pass through unchanged. Any
/// store providing these operations (and an explicit end-of-pages signal from
/// `list_page`) can sit behind [`Skiff`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Begin a multipart upload for `key`, returning the store-assigned upload id.
    async fn initiate_multipart_upload(
        &self,
        key: &Key,
        content_type: Option<&str>,
    ) -> Result<String>;

    /// Upload one part. Part numbers start at 1 and must be assigned in
    /// ascending order by the caller.
    async fn upload_part(
        &self,
        upload_id: &str,
        key: &Key,
        part_number: i32,
        body: Bytes,
    ) -> Result<Part>;

    /// Finalize the upload. `parts` must hold every uploaded part exactly
    /// once, in ascending part-number order.
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &Key,
        parts: &[Part],
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, upload_id: &str, key: &Key) -> Result<()>;

    /// Fetch one object as a byte stream.
    async fn get(&self, key: &Key) -> Result<ObjectBody>;

    /// Fetch one page of a prefix listing. `continuation` is the token from
    /// the previous page, `None` for the first page.
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage>;
}

/// Entry point tying a backend [`ObjectStore`] to the streaming helpers.
#[derive(Clone)]
pub struct Skiff {
    store: Arc<dyn ObjectStore>,
}

impl Skiff {
    pub fn new(store: Arc<dyn ObjectStore>) -> Skiff {
        Skiff { store }
    }

    /// Open a writable multipart upload for `key`.
    ///
    /// Awaits initiation with the store; on failure no further backend call
    /// is ever issued for this upload. The returned writer always has its
    /// upload id assigned, so no part can precede it.
    pub async fn create_write_stream(
        &self,
        key: Key,
        options: WriteStreamOptions,
    ) -> Result<MultipartWriter> {
        options.validate()?;
        MultipartWriter::initiate(self.store.clone(), key, options).await
    }

    /// Present every object under `prefix` as a single concatenated byte
    /// stream, in listing order.
    ///
    /// The listing is driven to exhaustion before the stream is returned; a
    /// failure on any page discards the keys collected so far and surfaces
    /// the error, no partial stream is handed out. Objects are fetched
    /// lazily, one at a time, as the stream is consumed.
    pub async fn create_prefixed_read_stream(&self, prefix: &str) -> Result<ConcatStream> {
        read::prefixed_stream(self.store.clone(), prefix).await
    }
}
