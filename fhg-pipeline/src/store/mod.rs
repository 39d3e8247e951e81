//! Task/status store
//!
//! The only shared mutable structure of the pipeline. Each task is written by
//! the worker that owns it; API handlers only read, except for purge.

pub mod memory;

use async_trait::async_trait;
use fhg_common::Result;
use uuid::Uuid;

use crate::models::Task;

pub use memory::InMemoryTaskStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Register a new task with its submitted bytes
    async fn insert(&self, task: &Task, bundle: &[u8]) -> Result<()>;

    /// Persist the current task record (the bundle bytes are left untouched)
    async fn save(&self, task: &Task) -> Result<()>;

    async fn load(&self, task_id: Uuid) -> Result<Option<Task>>;

    async fn load_bundle(&self, task_id: Uuid) -> Result<Option<Vec<u8>>>;

    /// Tasks not yet terminal, oldest first
    async fn list_unfinished(&self) -> Result<Vec<Task>>;

    async fn find_by_upload_key(&self, upload_key: &str) -> Result<Vec<Task>>;

    /// Remove a task and its bundle; `false` if it did not exist
    async fn purge(&self, task_id: Uuid) -> Result<bool>;

    /// Release resources; no calls are made afterwards
    async fn close(&self);
}
