//! Replicated-store writer with optimistic concurrency.
//!
//! When the sqlite blob is shared between writers (a cloud worker and a
//! local tool), each writer downloads the canonical blob with a generation
//! token, mutates locally, and uploads only if the generation is unchanged.
//! A mismatch surfaces as `AppError::Conflict` so the caller re-reads and
//! re-applies.

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

/// A versioned remote blob. Generation tokens are opaque and monotonic.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the canonical blob and its generation; None when absent.
    async fn download(&self) -> AppResult<Option<(Vec<u8>, u64)>>;

    /// Conditional upload: succeeds only if the remote generation still
    /// matches `expected` (None = create, must not exist). Returns the new
    /// generation.
    async fn upload(&self, bytes: Vec<u8>, expected: Option<u64>) -> AppResult<u64>;
}

pub struct ReplicatedWriter<S> {
    store: S,
    max_attempts: u32,
}

impl<S: BlobStore> ReplicatedWriter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: 3,
        }
    }

    /// Read-modify-write with bounded re-reads on generation conflicts.
    pub async fn update<F>(&self, mut mutate: F) -> AppResult<u64>
    where
        F: FnMut(Option<&[u8]>) -> AppResult<Vec<u8>>,
    {
        let mut last_err = None;
        for _ in 0..self.max_attempts {
            let current = self.store.download().await?;
            let (bytes, generation) = match &current {
                Some((b, g)) => (Some(b.as_slice()), Some(*g)),
                None => (None, None),
            };
            let mutated = mutate(bytes)?;
            match self.store.upload(mutated, generation).await {
                Ok(new_gen) => return Ok(new_gen),
                Err(e @ AppError::Conflict(_)) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Conflict("update attempts exhausted".into())))
    }
}
