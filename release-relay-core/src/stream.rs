//! Adapters over [`ByteStream`]: chunk bounding and byte accounting.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::contract::ByteStream;
use crate::error::RelayError;

/// Default upper bound for a single block (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Re-slice `inner` so that no yielded block exceeds `max_chunk` bytes.
///
/// Splitting is zero-copy; empty blocks are dropped. At most one upstream block
/// is held at a time.
pub fn bounded_chunks(inner: ByteStream, max_chunk: usize) -> ByteStream {
    Box::pin(BoundedChunks {
        inner,
        pending: Bytes::new(),
        max_chunk: max_chunk.max(1),
        done: false,
    })
}

struct BoundedChunks {
    inner: ByteStream,
    pending: Bytes,
    max_chunk: usize,
    done: bool,
}

impl Stream for BoundedChunks {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if !self.pending.is_empty() {
                let take = self.pending.len().min(self.max_chunk);
                let block = self.pending.split_to(take);
                return Poll::Ready(Some(Ok(block)));
            }
            if self.done {
                return Poll::Ready(None);
            }
            match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(block))) => self.pending = block,
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(Default)]
struct TallyState {
    bytes: AtomicU64,
    error: Mutex<Option<RelayError>>,
}

/// Read side of a [`tally`]ed stream, kept by the caller while the stream
/// itself is handed to the sink.
#[derive(Clone, Default)]
pub struct Tally {
    state: Arc<TallyState>,
}

impl Tally {
    /// Bytes that have passed through so far.
    pub fn bytes(&self) -> u64 {
        self.state.bytes.load(Ordering::Acquire)
    }

    /// First error the source produced, if any.
    pub fn source_error(&self) -> Option<RelayError> {
        self.state
            .error
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or(None)
    }
}

/// Wrap `inner` so the returned [`Tally`] observes byte counts and source errors.
pub fn tally(inner: ByteStream) -> (ByteStream, Tally) {
    let tally = Tally::default();
    let stream = TallyStream {
        inner,
        state: tally.state.clone(),
    };
    (Box::pin(stream), tally)
}

struct TallyStream {
    inner: ByteStream,
    state: Arc<TallyState>,
}

impl Stream for TallyStream {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(Some(Ok(block))) => {
                self.state
                    .bytes
                    .fetch_add(block.len() as u64, Ordering::AcqRel);
            }
            Poll::Ready(Some(Err(e))) => {
                if let Ok(mut slot) = self.state.error.lock() {
                    slot.get_or_insert_with(|| e.clone());
                }
            }
            _ => {}
        }
        polled
    }
}
