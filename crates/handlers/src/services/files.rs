//! File storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{Result, ServiceError};

/// File storage for printable tickets.
#[async_trait]
pub trait FileApi: Send + Sync {
    /// Stores `content` under `file_id`. Uploading an existing id keeps the
    /// stored file and succeeds.
    async fn upload_file(&self, file_id: &str, content: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryFilesState {
    files: HashMap<String, String>,
    uploads: usize,
    fail_on_upload: bool,
}

/// In-memory file storage for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileStorage {
    state: Arc<Mutex<InMemoryFilesState>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upload fail until reset.
    pub fn set_fail_on_upload(&self, fail: bool) {
        self.state().fail_on_upload = fail;
    }

    pub fn file(&self, file_id: &str) -> Option<String> {
        self.state().files.get(file_id).cloned()
    }

    /// Number of upload calls that reached the service, conflicts included.
    pub fn upload_count(&self) -> usize {
        self.state().uploads
    }

    fn state(&self) -> MutexGuard<'_, InMemoryFilesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FileApi for InMemoryFileStorage {
    async fn upload_file(&self, file_id: &str, content: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_on_upload {
            return Err(ServiceError::Unavailable("file storage unavailable".to_string()));
        }
        state.uploads += 1;
        if state.files.contains_key(file_id) {
            tracing::info!(file_id, "file already exists");
            return Ok(());
        }
        state.files.insert(file_id.to_string(), content.to_string());
        Ok(())
    }
}
