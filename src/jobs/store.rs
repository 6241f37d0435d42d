//! Job storage contract and the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::model::{Job, JobUpdate};

/// Backend-agnostic job storage.
///
/// Implementations must apply each [`JobUpdate`] atomically per record and
/// must return job ids in submission order from [`JobStore::ids`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly allocated job.
    async fn insert(&self, job: Job) -> Result<(), JobError>;

    /// Get a consistent snapshot of a job.
    async fn get(&self, id: Uuid) -> Result<Job, JobError>;

    /// Apply an update under the record's lock and return the new snapshot.
    async fn apply(&self, id: Uuid, update: JobUpdate) -> Result<Job, JobError>;

    /// All job ids in submission order.
    async fn ids(&self) -> Vec<Uuid>;

    /// Remove a job record.
    async fn remove(&self, id: Uuid) -> Result<Job, JobError>;
}

/// In-memory store with one lock per job record.
///
/// The outer map lock is only held long enough to find or insert a record,
/// so transitions on unrelated jobs never wait on each other.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<Uuid, Arc<RwLock<Job>>>>,
    order: RwLock<Vec<Uuid>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, id: Uuid) -> Result<Arc<RwLock<Job>>, JobError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobError::NotFound { id })
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobError> {
        let id = job.id;
        // Hold the order lock across the map insert so ids() never sees a
        // record that is missing from the submission order.
        let mut order = self.order.write().await;
        {
            let mut records = self.records.write().await;
            if records.contains_key(&id) {
                return Err(JobError::Validation(format!("job {id} already exists")));
            }
            records.insert(id, Arc::new(RwLock::new(job)));
        }
        order.push(id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job, JobError> {
        let record = self.record(id).await?;
        let job = record.read().await.clone();
        Ok(job)
    }

    async fn apply(&self, id: Uuid, update: JobUpdate) -> Result<Job, JobError> {
        let record = self.record(id).await?;
        let mut job = record.write().await;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn ids(&self) -> Vec<Uuid> {
        self.order.read().await.clone()
    }

    async fn remove(&self, id: Uuid) -> Result<Job, JobError> {
        let mut order = self.order.write().await;
        let record = self
            .records
            .write()
            .await
            .remove(&id)
            .ok_or(JobError::NotFound { id })?;
        order.retain(|existing| *existing != id);
        let job = record.read().await.clone();
        Ok(job)
    }
}
