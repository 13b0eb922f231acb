//! In-memory stand-ins for the two relay seams, shared by integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use release_relay_core::contract::{
    ArtifactRepository, AssetEntry, Bucket, ByteSource, SourceBody, SourceRef,
    StoredObjectDescriptor,
};
use release_relay_core::RelayError;

pub const MIB: usize = 1024 * 1024;

/// Serves `blocks` blocks of `block_size` bytes for every reference. Each open
/// can be scripted to break after a number of blocks.
pub struct ScriptedSource {
    block: Bytes,
    blocks: usize,
    interruptions: Mutex<VecDeque<usize>>,
    pub opens: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self {
            block: Bytes::from(vec![0xA5u8; block_size]),
            blocks,
            interruptions: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
        }
    }

    /// The next opens break after the given number of blocks, in order.
    pub fn interrupting(self, plan: Vec<usize>) -> Self {
        *self.interruptions.lock().unwrap() = plan.into();
        self
    }

    pub fn total_bytes(&self) -> u64 {
        (self.block.len() * self.blocks) as u64
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteSource for ScriptedSource {
    async fn open(&self, _source_ref: &SourceRef) -> Result<SourceBody, RelayError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let cut = self.interruptions.lock().unwrap().pop_front();
        let mut items: Vec<Result<Bytes, RelayError>> = Vec::new();
        for i in 0..self.blocks {
            if cut == Some(i) {
                items.push(Err(RelayError::SourceInterrupted(format!(
                    "connection reset after {i} blocks"
                ))));
                break;
            }
            items.push(Ok(self.block.clone()));
        }
        Ok(SourceBody::new(Box::pin(futures::stream::iter(items)))
            .with_content_length(Some(self.total_bytes())))
    }
}

#[derive(Default)]
struct RepoState {
    buckets: HashMap<String, Bucket>,
    assets: HashMap<u64, Vec<AssetEntry>>,
    next_id: u64,
}

/// Release store kept in memory. Uploads drain the whole body before
/// answering, and answer `NameConflict` for a taken name.
#[derive(Default)]
pub struct FakeRepository {
    state: Mutex<RepoState>,
    pub finds: AtomicUsize,
    pub creates: AtomicUsize,
    pub uploads: AtomicUsize,
    pub lists: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Length hint seen by each upload, in order.
    pub content_lengths: Mutex<Vec<Option<u64>>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, tag: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state.buckets.insert(tag.to_string(), bucket(tag, id));
        }
        self
    }

    pub fn with_asset(self, tag: &str, name: &str, size: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let bucket_id = state.buckets[tag].id;
            state.next_id += 1;
            let id = state.next_id;
            state.assets.entry(bucket_id).or_default().push(AssetEntry {
                id,
                name: name.to_string(),
                size_bytes: size,
            });
        }
        self
    }

    pub fn assets_named(&self, tag: &str, name: &str) -> Vec<AssetEntry> {
        let state = self.state.lock().unwrap();
        let Some(bucket) = state.buckets.get(tag) else {
            return vec![];
        };
        state
            .assets
            .get(&bucket.id)
            .map(|assets| assets.iter().filter(|a| a.name == name).cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn bucket(tag: &str, id: u64) -> Bucket {
    Bucket {
        tag: tag.to_string(),
        id,
        publish_endpoint: format!("https://uploads.test/releases/{id}/assets{{?name,label}}"),
        browse_url: format!("https://releases.test/tag/{tag}"),
    }
}

#[async_trait]
impl ArtifactRepository for FakeRepository {
    async fn find_bucket(&self, tag: &str) -> Result<Option<Bucket>, RelayError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().buckets.get(tag).cloned())
    }

    async fn create_bucket(&self, tag: &str) -> Result<Bucket, RelayError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if state.buckets.contains_key(tag) {
            return Err(RelayError::NameConflict(format!("tag {tag} already_exists")));
        }
        state.next_id += 1;
        let created = bucket(tag, state.next_id);
        state.buckets.insert(tag.to_string(), created.clone());
        Ok(created)
    }

    async fn upload_asset(
        &self,
        bucket: &Bucket,
        name: &str,
        mut body: SourceBody,
    ) -> Result<StoredObjectDescriptor, RelayError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.content_lengths.lock().unwrap().push(body.content_length);
        let mut size = 0u64;
        while let Some(block) = body.next().await {
            match block {
                Ok(block) => size += block.len() as u64,
                Err(e) => return Err(RelayError::Transport(format!("request body failed: {e}"))),
            }
        }

        let mut state = self.state.lock().unwrap();
        if state
            .assets
            .get(&bucket.id)
            .is_some_and(|assets| assets.iter().any(|a| a.name == name))
        {
            return Err(RelayError::NameConflict(format!("{name} already_exists")));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.assets.entry(bucket.id).or_default().push(AssetEntry {
            id,
            name: name.to_string(),
            size_bytes: size,
        });
        Ok(StoredObjectDescriptor {
            name: name.to_string(),
            size_bytes: size,
            download_url: format!("https://releases.test/download/{}/{id}/{name}", bucket.tag),
        })
    }

    async fn list_assets(&self, bucket: &Bucket) -> Result<Vec<AssetEntry>, RelayError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state.assets.get(&bucket.id).cloned().unwrap_or_default())
    }

    async fn delete_asset(&self, bucket: &Bucket, asset_id: u64) -> Result<(), RelayError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(assets) = state.assets.get_mut(&bucket.id) {
            assets.retain(|a| a.id != asset_id);
        }
        Ok(())
    }
}

pub fn request(name: &str, tag: &str) -> release_relay_core::TransferRequest {
    release_relay_core::TransferRequest {
        source_ref: SourceRef::new(format!("file-id-{name}")),
        target_name: name.to_string(),
        bucket_tag: tag.to_string(),
    }
}
