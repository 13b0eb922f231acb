//! End-to-end relay of one [`TransferRequest`].
//!
//! The coordinator walks a fixed state machine:
//!
//! ```text
//! Idle → BucketResolving → Streaming → Publishing → Completed
//!                                          │
//!                                          └→ ConflictResolving → Streaming → Publishing → ...
//! any non-retryable error / exhausted retries → Failed
//! ```
//!
//! Every publish attempt opens a fresh source stream; a stream that a failed
//! attempt has touched is never replayed. A name conflict is resolved at most
//! once per request; a second conflict ends the transfer.
//!
//! # Cancellation
//! Dropping the future returned by [`TransferCoordinator::run`] drops the open
//! source stream and any request in flight. Bytes the sink already accepted are
//! not rolled back.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::conflict::resolve_conflict;
use crate::contract::{
    ArtifactRepository, Bucket, ByteSource, SourceBody, StoredObjectDescriptor, TransferOutcome,
    TransferRequest,
};
use crate::error::RelayError;
use crate::resolver::BucketResolver;
use crate::retry::{with_retry, RetryPolicy};
use crate::stream::tally;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    BucketResolving,
    Streaming,
    Publishing,
    ConflictResolving,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

/// Everything observed while driving one request.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    /// Visited states in order, starting with `Idle` and ending in a terminal state.
    pub states: Vec<TransferState>,
    pub publish_attempts: u32,
    /// Bytes pulled from the source by the successful attempt (0 on failure).
    pub bytes_relayed: u64,
    /// Browse URL of the resolved bucket; `None` if resolution failed.
    pub bucket_url: Option<String>,
}

#[derive(Default)]
struct StateTrail {
    states: Mutex<Vec<TransferState>>,
}

impl StateTrail {
    fn new() -> Self {
        let trail = Self::default();
        trail.enter(TransferState::Idle);
        trail
    }

    fn enter(&self, state: TransferState) {
        debug!(state = ?state, "Transfer state change");
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(state);
    }

    fn finish(
        self,
        outcome: TransferOutcome,
        bytes_relayed: u64,
        bucket: Option<&Bucket>,
    ) -> TransferReport {
        self.enter(if outcome.is_success() {
            TransferState::Completed
        } else {
            TransferState::Failed
        });
        let states = self
            .states
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let publish_attempts = states
            .iter()
            .filter(|s| **s == TransferState::Publishing)
            .count() as u32;
        TransferReport {
            outcome,
            states,
            publish_attempts,
            bytes_relayed,
            bucket_url: bucket.map(|b| b.browse_url.clone()),
        }
    }
}

/// Explicit context for transfers: the authenticated source and repository
/// clients plus the shared bucket cache. Cheap to share behind an `Arc`.
pub struct TransferCoordinator<S: ?Sized, R: ?Sized> {
    source: Arc<S>,
    repository: Arc<R>,
    buckets: BucketResolver<R>,
    policy: RetryPolicy,
}

impl<S, R> TransferCoordinator<S, R>
where
    S: ByteSource + ?Sized,
    R: ArtifactRepository + ?Sized,
{
    pub fn new(source: Arc<S>, repository: Arc<R>, policy: RetryPolicy) -> Self {
        let buckets = BucketResolver::new(repository.clone(), policy);
        Self {
            source,
            repository,
            buckets,
            policy,
        }
    }

    /// Relay `request` and report its terminal outcome.
    pub async fn transfer(&self, request: &TransferRequest) -> TransferOutcome {
        self.run(request).await.outcome
    }

    /// Like [`Self::transfer`] but returns the full [`TransferReport`].
    pub async fn run(&self, request: &TransferRequest) -> TransferReport {
        let span = info_span!(
            "transfer",
            transfer_id = %Uuid::new_v4(),
            tag = %request.bucket_tag,
            name = %request.target_name,
        );
        self.drive(request).instrument(span).await
    }

    async fn drive(&self, request: &TransferRequest) -> TransferReport {
        let trail = StateTrail::new();
        info!(source_ref = %request.source_ref, "Transfer started");

        trail.enter(TransferState::BucketResolving);
        let bucket = match self.buckets.resolve_or_create(&request.bucket_tag).await {
            Ok(bucket) => bucket,
            Err(e) => {
                error!(error = %e, "Transfer failed while resolving bucket");
                return trail.finish(e.into(), 0, None);
            }
        };

        let mut conflict_resolved = false;
        loop {
            let published = with_retry(&self.policy, "publish", |attempt| {
                self.publish_once(&bucket, request, attempt, &trail)
            })
            .await;

            match published {
                Ok((descriptor, bytes)) => {
                    info!(
                        bytes,
                        download_url = %descriptor.download_url,
                        "Transfer completed"
                    );
                    return trail.finish(TransferOutcome::Success(descriptor), bytes, Some(&bucket));
                }
                Err(RelayError::NameConflict(msg)) if !conflict_resolved => {
                    info!(reason = %msg, "Name already taken in bucket, replacing it");
                    trail.enter(TransferState::ConflictResolving);
                    if let Err(e) =
                        resolve_conflict(&*self.repository, &bucket, &request.target_name).await
                    {
                        error!(error = %e, "Transfer failed while resolving conflict");
                        return trail.finish(e.into(), 0, Some(&bucket));
                    }
                    conflict_resolved = true;
                }
                Err(RelayError::NameConflict(msg)) => {
                    error!(reason = %msg, "Name conflict persisted after resolution");
                    let e = RelayError::ConflictUnresolved(format!(
                        "{} still conflicts after removing the previous asset: {msg}",
                        request.target_name
                    ));
                    return trail.finish(e.into(), 0, Some(&bucket));
                }
                Err(e) => {
                    error!(error = %e, "Transfer failed");
                    return trail.finish(e.into(), 0, Some(&bucket));
                }
            }
        }
    }

    async fn publish_once(
        &self,
        bucket: &Bucket,
        request: &TransferRequest,
        attempt: u32,
        trail: &StateTrail,
    ) -> Result<(StoredObjectDescriptor, u64), RelayError> {
        trail.enter(TransferState::Streaming);
        let opened = self.source.open(&request.source_ref).await?;
        let content_length = opened.content_length;
        let (stream, tally) = tally(opened.stream);
        let body = SourceBody::new(stream).with_content_length(content_length);

        trail.enter(TransferState::Publishing);
        debug!(attempt, content_length = ?content_length, "Publishing stream");
        match self
            .repository
            .upload_asset(bucket, &request.target_name, body)
            .await
        {
            Ok(descriptor) => {
                let bytes = tally.bytes();
                if descriptor.size_bytes != bytes {
                    warn!(
                        reported = descriptor.size_bytes,
                        streamed = bytes,
                        "Sink reported a size different from the streamed byte count"
                    );
                }
                Ok((descriptor, bytes))
            }
            // A body that broke mid-send is the source's fault, whatever the sink said.
            Err(sink_error) => match tally.source_error() {
                Some(source_error) => {
                    debug!(attempt, sink_error = %sink_error, "Upload failed because the source stream broke");
                    Err(source_error)
                }
                None => Err(sink_error),
            },
        }
    }
}
