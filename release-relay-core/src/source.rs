//! Local-disk [`ByteSource`]: the source reference is a file path.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

use crate::contract::{ByteSource, SourceBody, SourceRef};
use crate::error::RelayError;
use crate::stream::DEFAULT_CHUNK_SIZE;

pub struct LocalFileSource {
    chunk_size: usize,
}

impl LocalFileSource {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for LocalFileSource {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[async_trait]
impl ByteSource for LocalFileSource {
    async fn open(&self, source_ref: &SourceRef) -> Result<SourceBody, RelayError> {
        let path = PathBuf::from(source_ref.as_str());
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            error!(error = ?e, path = %path.display(), "Failed to open local source file");
            RelayError::SourceUnavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        let content_length = file.metadata().await.ok().map(|m| m.len());
        debug!(
            path = %path.display(),
            chunk_size = self.chunk_size,
            content_length = ?content_length,
            "Opened local source file"
        );

        let chunk_size = self.chunk_size;
        let stream = futures::stream::try_unfold(file, move |mut file| async move {
            let mut buf = vec![0u8; chunk_size];
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| RelayError::SourceInterrupted(format!("read failed: {e}")))?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), file)))
        });
        Ok(SourceBody::new(Box::pin(stream)).with_content_length(content_length))
    }
}
