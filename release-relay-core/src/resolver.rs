//! Tag → bucket resolution with a process-local cache.
//!
//! Each tag owns an async mutex slot. The first caller for a tag holds the slot
//! while it looks up or creates the bucket; concurrent callers for the same tag
//! wait on the slot and then read the cached bucket, so a tag is created at
//! most once per process. Failures are not cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::contract::{ArtifactRepository, Bucket};
use crate::error::RelayError;
use crate::retry::{with_retry, RetryPolicy};

type Slot = Arc<tokio::sync::Mutex<Option<Bucket>>>;

pub struct BucketResolver<R: ?Sized> {
    repository: Arc<R>,
    policy: RetryPolicy,
    slots: Mutex<HashMap<String, Slot>>,
}

impl<R> BucketResolver<R>
where
    R: ArtifactRepository + ?Sized,
{
    pub fn new(repository: Arc<R>, policy: RetryPolicy) -> Self {
        Self {
            repository,
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the bucket for `tag`, creating it if the repository has none.
    ///
    /// An existing bucket is returned verbatim. If creation loses a race (the tag
    /// appeared meanwhile) the lookup is repeated once before giving up with
    /// [`RelayError::BucketResolutionFailed`].
    pub async fn resolve_or_create(&self, tag: &str) -> Result<Bucket, RelayError> {
        let slot = self.slot(tag);
        let mut cached = slot.lock().await;
        if let Some(bucket) = cached.as_ref() {
            debug!(tag, bucket_id = bucket.id, "Bucket served from cache");
            return Ok(bucket.clone());
        }

        let bucket = self.lookup_or_create(tag).await?;
        *cached = Some(bucket.clone());
        Ok(bucket)
    }

    /// Drop the cached bucket for `tag`; the next call resolves it again.
    pub fn evict(&self, tag: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(tag);
    }

    fn slot(&self, tag: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(tag.to_string()).or_default().clone()
    }

    async fn find(&self, tag: &str) -> Result<Option<Bucket>, RelayError> {
        with_retry(&self.policy, "find_bucket", |_| self.repository.find_bucket(tag)).await
    }

    async fn lookup_or_create(&self, tag: &str) -> Result<Bucket, RelayError> {
        match self.find(tag).await {
            Ok(Some(bucket)) => {
                info!(tag, bucket_id = bucket.id, "Found existing bucket");
                return Ok(bucket);
            }
            Ok(None) => debug!(tag, "No bucket for tag, creating one"),
            Err(e) => warn!(tag, error = %e, "Bucket lookup failed, attempting creation anyway"),
        }

        let create_error = match with_retry(&self.policy, "create_bucket", |_| {
            self.repository.create_bucket(tag)
        })
        .await
        {
            Ok(bucket) => {
                info!(tag, bucket_id = bucket.id, "Created bucket");
                return Ok(bucket);
            }
            Err(e) => e,
        };

        warn!(tag, error = %create_error, "Bucket creation failed, looking the tag up again");
        match self.find(tag).await {
            Ok(Some(bucket)) => {
                info!(tag, bucket_id = bucket.id, "Bucket appeared concurrently, using it");
                Ok(bucket)
            }
            Ok(None) => {
                error!(tag, error = %create_error, "Bucket could not be created or found");
                Err(RelayError::BucketResolutionFailed(format!(
                    "tag {tag}: {create_error}"
                )))
            }
            Err(lookup_error) => {
                error!(tag, create_error = %create_error, lookup_error = %lookup_error, "Bucket resolution failed");
                Err(RelayError::BucketResolutionFailed(format!(
                    "tag {tag}: {create_error}; lookup after create: {lookup_error}"
                )))
            }
        }
    }
}
