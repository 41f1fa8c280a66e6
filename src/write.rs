use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::body::Body;
use tracing::debug;

use super::errors::{Error, Result};
use super::{Key, ObjectStore, Part};

/// Every part except the last must be at least this large (the S3 multipart
/// minimum).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

const DEFAULT_PART_SIZE: usize = 6 * 1024 * 1024; // 6 MB

/// Options for [`super::Skiff::create_write_stream`].
#[derive(Clone, Debug)]
pub struct WriteStreamOptions {
    /// Size of each non-final part. Must be at least [`MIN_PART_SIZE`].
    pub part_size: usize,
    /// Passed through to the store on initiation.
    pub content_type: Option<String>,
}

impl Default for WriteStreamOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            content_type: None,
        }
    }
}

impl WriteStreamOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.part_size < MIN_PART_SIZE {
            return Err(Error::PartSizeTooSmall(self.part_size));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    Open,
    Closing,
    Completed,
    Aborted,
    Failed,
}

impl WriterState {
    fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

/// A writable byte sink backed by one multipart upload.
///
/// Bytes are buffered until a full part accumulates, then flushed as a
/// sequentially numbered part; [`close`](Self::close) flushes the remainder
/// and finalizes the upload. Nothing is retried here: a part failure parks the
/// writer in a failed state and the caller decides between
/// [`abort`](Self::abort) and giving up. Dropping a writer without closing or
/// aborting leaks the multipart upload on the server side.
pub struct MultipartWriter {
    store: Arc<dyn ObjectStore>,
    key: Key,
    upload_id: String,
    part_size: usize,
    buffer: BytesMut,
    next_part_number: i32,
    parts: Vec<Part>,
    state: WriterState,
}

impl MultipartWriter {
    pub(crate) async fn initiate(
        store: Arc<dyn ObjectStore>,
        key: Key,
        options: WriteStreamOptions,
    ) -> Result<MultipartWriter> {
        let upload_id = store
            .initiate_multipart_upload(&key, options.content_type.as_deref())
            .await?;
        debug!("initiated multipart upload {upload_id} for {key}");

        Ok(MultipartWriter {
            store,
            key,
            upload_id,
            part_size: options.part_size,
            buffer: BytesMut::with_capacity(options.part_size),
            next_part_number: 1,
            parts: Vec::new(),
            state: WriterState::Open,
        })
    }

    /// The store-assigned upload id, usable to abort the upload externally if
    /// this writer is abandoned.
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Append bytes to the upload, flushing a part for every `part_size`
    /// bytes accumulated. Parts flush sequentially; a flush failure fails the
    /// writer and surfaces the store's error unchanged.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.state != WriterState::Open {
            return Err(Error::UploadNotWritable(self.state.name()));
        }
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.flush_part(part).await?;
        }
        Ok(())
    }

    /// Drain a [`hyper::body::Body`] into the upload.
    pub async fn write_body(&mut self, mut body: Body) -> Result<()> {
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            self.write(&chunk).await?;
        }
        Ok(())
    }

    /// Flush any remaining buffered bytes as the final part (an upload with
    /// no parts yet always gets exactly one, possibly empty, final part) and
    /// finalize the upload.
    ///
    /// A failed completion leaves the upload uncompleted; `close` may be
    /// called again to retry it, or [`abort`](Self::abort) to give up.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Open | WriterState::Closing => {}
            state => return Err(Error::UploadNotWritable(state.name())),
        }
        // Further writes would put a part after the final short one, so the
        // writer stops accepting them even if completion fails below.
        self.state = WriterState::Closing;

        if !self.buffer.is_empty() || self.parts.is_empty() {
            let part = self.buffer.split().freeze();
            self.flush_part(part).await?;
        }

        self.store
            .complete_multipart_upload(&self.upload_id, &self.key, &self.parts)
            .await?;
        self.state = WriterState::Completed;
        debug!(
            "completed multipart upload {} for {} with {} parts",
            self.upload_id,
            self.key,
            self.parts.len()
        );
        Ok(())
    }

    /// Abort the upload on the store. Valid even when no part was uploaded
    /// and after a part or completion failure.
    pub async fn abort(&mut self) -> Result<()> {
        match self.state {
            WriterState::Open | WriterState::Closing | WriterState::Failed => {}
            state => return Err(Error::UploadNotWritable(state.name())),
        }
        self.store
            .abort_multipart_upload(&self.upload_id, &self.key)
            .await?;
        self.state = WriterState::Aborted;
        debug!("aborted multipart upload {} for {}", self.upload_id, self.key);
        Ok(())
    }

    async fn flush_part(&mut self, body: Bytes) -> Result<()> {
        let part_number = self.next_part_number;
        let len = body.len();
        match self
            .store
            .upload_part(&self.upload_id, &self.key, part_number, body)
            .await
        {
            Ok(part) => {
                debug!("uploaded part {} ({} bytes) for {}", part_number, len, self.key);
                self.next_part_number += 1;
                self.parts.push(part);
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e)
            }
        }
    }
}
