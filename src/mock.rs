//! Scriptable in-memory [`ObjectStore`] used by the module tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use super::errors::{Error, Result};
use super::{Key, ListPage, ObjectBody, ObjectStore, Part};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    Initiate { key: String },
    UploadPart { part_number: i32, len: usize },
    Complete { parts: Vec<i32> },
    Abort,
    Get { key: String },
    ListPage { continuation: Option<String> },
}

/// Records every call and fails on cue. Continuation tokens are page indices
/// rendered as strings.
#[derive(Default)]
pub(crate) struct MockStore {
    pub calls: Mutex<Vec<Call>>,
    pub uploaded: Mutex<Vec<u8>>,

    pub fail_initiate: bool,
    /// Fail the upload of this part number.
    pub fail_part: Option<i32>,
    /// Fail this many completion attempts before succeeding.
    pub fail_complete_times: Mutex<u32>,

    /// Pages of keys returned by `list_page`, in order.
    pub pages: Vec<Vec<String>>,
    /// Fail when this page index is requested.
    pub fail_page: Option<usize>,
    /// Object contents, keyed by object key, as pre-chunked bytes.
    pub objects: HashMap<String, Vec<Bytes>>,
    /// Fail the `get` call for this key.
    pub fail_get: Option<String>,
    /// Yield this key's chunks, then a read error.
    pub fail_read_mid: Option<String>,
}

impl MockStore {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// The part numbers of the first successful completion call, if any.
    pub fn completed_parts(&self) -> Option<Vec<i32>> {
        self.calls.lock().unwrap().iter().find_map(|c| match c {
            Call::Complete { parts } => Some(parts.clone()),
            _ => None,
        })
    }

    /// Every byte handed to `upload_part`, in order.
    pub fn uploaded_bytes(&self) -> Vec<u8> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn initiate_multipart_upload(
        &self,
        key: &Key,
        _content_type: Option<&str>,
    ) -> Result<String> {
        self.record(Call::Initiate {
            key: key.to_string(),
        });
        if self.fail_initiate {
            return Err(Error::Mock("initiate failed"));
        }
        Ok("upload-1".to_string())
    }

    async fn upload_part(
        &self,
        _upload_id: &str,
        _key: &Key,
        part_number: i32,
        body: Bytes,
    ) -> Result<Part> {
        self.record(Call::UploadPart {
            part_number,
            len: body.len(),
        });
        if self.fail_part == Some(part_number) {
            return Err(Error::Mock("part upload failed"));
        }
        self.uploaded.lock().unwrap().extend_from_slice(&body);
        Ok(Part {
            e_tag: Some(format!("etag-{part_number}")),
            part_number,
        })
    }

    async fn complete_multipart_upload(
        &self,
        _upload_id: &str,
        _key: &Key,
        parts: &[Part],
    ) -> Result<()> {
        self.record(Call::Complete {
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        let mut remaining = self.fail_complete_times.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(Error::Mock("complete failed"));
        }
        Ok(())
    }

    async fn abort_multipart_upload(&self, _upload_id: &str, _key: &Key) -> Result<()> {
        self.record(Call::Abort);
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let key = key.to_string();
        self.record(Call::Get { key: key.clone() });
        if self.fail_get.as_deref() == Some(key.as_str()) {
            return Err(Error::Mock("get failed"));
        }
        let mut items: Vec<Result<Bytes>> = self
            .objects
            .get(&key)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Ok)
            .collect();
        if self.fail_read_mid.as_deref() == Some(key.as_str()) {
            items.push(Err(Error::Mock("object read failed")));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn list_page(&self, _prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        self.record(Call::ListPage {
            continuation: continuation.clone(),
        });
        let index: usize = continuation.map(|t| t.parse().unwrap()).unwrap_or(0);
        if self.fail_page == Some(index) {
            return Err(Error::Mock("listing page failed"));
        }
        let keys = self.pages.get(index).cloned().unwrap_or_default();
        let continuation = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(ListPage { keys, continuation })
    }
}
