use core::pin::Pin;
use core::task::{Context, Poll};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::Stream;
use futures::{FutureExt, StreamExt};
use tracing::debug;

use super::errors::Result;
use super::{Key, ObjectBody, ObjectStore};

type Opener = Box<dyn FnOnce() -> BoxFuture<'static, Result<ObjectBody>> + Send>;

/// Drive the prefix listing to exhaustion, then hand back a stream that
/// concatenates every listed object in listing order.
///
/// Each object's fetch is deferred until the stream actually reaches it, so
/// at most one object connection is open at a time. Because no fetch starts
/// before listing finishes, a failed page never leaves a fetch in flight; the
/// keys collected so far are simply dropped.
pub(crate) async fn prefixed_stream(
    store: Arc<dyn ObjectStore>,
    prefix: &str,
) -> Result<ConcatStream> {
    let mut keys = Vec::new();
    let mut continuation = None;
    loop {
        let page = store.list_page(prefix, continuation).await?;
        keys.extend(page.keys);
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }
    debug!("collected {} keys under prefix {prefix}", keys.len());

    let openers = keys
        .into_iter()
        .map(|key| {
            let store = store.clone();
            Box::new(move || {
                async move {
                    let key = Key::from_pathbuf(PathBuf::from(key))?;
                    store.get(&key).await
                }
                .boxed()
            }) as Opener
        })
        .collect();
    Ok(ConcatStream::from_openers(openers))
}

enum Source {
    Pending(Opener),
    Opening(BoxFuture<'static, Result<ObjectBody>>),
    Open(ObjectBody),
    Drained,
}

/// Exposes N ordered byte sources as one ordered byte stream.
///
/// Source `i + 1` is never touched before source `i` has signalled
/// end-of-data; the cursor only moves forward, and the stream itself ends
/// only after the last source does. Any open or read error is yielded once
/// and exhausts the stream. There is no skip-and-continue.
pub struct ConcatStream {
    sources: Vec<Source>,
    cursor: usize,
    done: bool,
}

impl ConcatStream {
    /// Concatenate already-open byte sources.
    pub fn new(bodies: Vec<ObjectBody>) -> ConcatStream {
        ConcatStream {
            sources: bodies.into_iter().map(Source::Open).collect(),
            cursor: 0,
            done: false,
        }
    }

    fn from_openers(openers: Vec<Opener>) -> ConcatStream {
        ConcatStream {
            sources: openers.into_iter().map(Source::Pending).collect(),
            cursor: 0,
            done: false,
        }
    }
}

impl Stream for ConcatStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            let Some(source) = this.sources.get_mut(this.cursor) else {
                this.done = true;
                return Poll::Ready(None);
            };
            match source {
                Source::Pending(_) => {
                    let Source::Pending(opener) = std::mem::replace(source, Source::Drained)
                    else {
                        unreachable!()
                    };
                    *source = Source::Opening(opener());
                }
                Source::Opening(fut) => match fut.poll_unpin(cx) {
                    Poll::Ready(Ok(body)) => *source = Source::Open(body),
                    Poll::Ready(Err(e)) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Source::Open(body) => match body.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(bytes))) => return Poll::Ready(Some(Ok(bytes))),
                    Poll::Ready(Some(Err(e))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        *source = Source::Drained;
                        this.cursor += 1;
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Source::Drained => this.cursor += 1,
            }
        }
    }
}
