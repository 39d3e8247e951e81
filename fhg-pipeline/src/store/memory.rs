//! In-memory task store for tests and embedded use

use async_trait::async_trait;
use fhg_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::TaskStore;
use crate::models::Task;

struct Entry {
    task: Task,
    bundle: Vec<u8>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task, bundle: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&task.task_id) {
            return Err(Error::InvalidInput(format!("task {} already exists", task.task_id)));
        }
        entries.insert(
            task.task_id,
            Entry {
                task: task.clone(),
                bundle: bundle.to_vec(),
            },
        );
        Ok(())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&task.task_id) {
            Some(entry) => {
                entry.task = task.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("task {}", task.task_id))),
        }
    }

    async fn load(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.entries.read().await.get(&task_id).map(|e| e.task.clone()))
    }

    async fn load_bundle(&self, task_id: Uuid) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(&task_id).map(|e| e.bundle.clone()))
    }

    async fn list_unfinished(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| !e.task.is_terminal())
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn find_by_upload_key(&self, upload_key: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.task.bundle.upload_key.as_deref() == Some(upload_key))
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn purge(&self, task_id: Uuid) -> Result<bool> {
        Ok(self.entries.write().await.remove(&task_id).is_some())
    }

    async fn close(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BundleInfo;
    use fhg_common::events::TaskStatus;

    #[tokio::test]
    async fn test_insert_load_save() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new(BundleInfo::default());
        store.insert(&task, b"{}").await.unwrap();
        assert!(store.insert(&task, b"{}").await.is_err());

        task.status = TaskStatus::Running;
        store.save(&task).await.unwrap();
        let loaded = store.load(task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(store.load_bundle(task.task_id).await.unwrap().unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_unfinished_and_upload_key() {
        let store = InMemoryTaskStore::new();
        let mut done = Task::new(BundleInfo {
            upload_key: Some("k".into()),
            ..Default::default()
        });
        done.status = TaskStatus::Completed;
        let queued = Task::new(BundleInfo {
            upload_key: Some("k".into()),
            ..Default::default()
        });
        store.insert(&done, b"a").await.unwrap();
        store.insert(&queued, b"b").await.unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].task_id, queued.task_id);
        assert_eq!(store.find_by_upload_key("k").await.unwrap().len(), 2);

        assert!(store.purge(done.task_id).await.unwrap());
        assert!(!store.purge(done.task_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_unknown_task_fails() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(BundleInfo::default());
        assert!(matches!(store.save(&task).await, Err(Error::NotFound(_))));
    }
}
