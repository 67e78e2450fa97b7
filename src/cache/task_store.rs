//! Typed task persistence over a `CacheProvider`.

use tracing::debug;

use super::provider::CacheProvider;
use crate::error::{BrokerError, BrokerResult};
use crate::models::{Task, TaskId};

/// Reads and writes `Task` records under `<key_prefix><task_id>`
#[derive(Debug, Clone)]
pub struct TaskStore {
    cache: CacheProvider,
    key_prefix: String,
}

impl TaskStore {
    pub fn new(cache: CacheProvider, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key_for(&self, task_id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, task_id)
    }

    /// Write the record, replacing any previous one for the same id
    pub async fn save(&self, task: &Task) -> BrokerResult<()> {
        let encoded = serde_json::to_string(task)?;
        self.cache.put(&self.key_for(task.id()), &encoded).await?;
        debug!(
            task_id = %task.id(),
            status = %task.status(),
            provider = self.cache.provider_name(),
            "Task record written"
        );
        Ok(())
    }

    /// Read the record, or `None` when the id is unknown
    pub async fn find(&self, task_id: &TaskId) -> BrokerResult<Option<Task>> {
        match self.cache.get(&self.key_for(task_id)).await? {
            Some(encoded) => {
                let task: Task = serde_json::from_str(&encoded).map_err(|e| {
                    BrokerError::Serialization(format!("corrupt record for task {task_id}: {e}"))
                })?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Read the record, failing with `TaskNotFound` when the id is unknown
    pub async fn load(&self, task_id: &TaskId) -> BrokerResult<Task> {
        self.find(task_id)
            .await?
            .ok_or_else(|| BrokerError::task_not_found(task_id))
    }

    pub async fn remove(&self, task_id: &TaskId) -> BrokerResult<()> {
        self.cache.delete(&self.key_for(task_id)).await?;
        Ok(())
    }

    pub fn cache(&self) -> &CacheProvider {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskArgs, TaskOutcome};
    use serde_json::json;

    fn store() -> TaskStore {
        let cache = CacheProvider::in_memory(format!("store-test-{}", uuid::Uuid::new_v4()));
        TaskStore::new(cache, "task:")
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = store();
        let task = Task::pending(TaskId::generate(), "addition", TaskArgs::new().with("x", 1));

        store.save(&task).await.unwrap();
        assert_eq!(store.load(task.id()).await.unwrap(), task);

        let done = task.clone().complete(TaskOutcome::Success(json!(2)));
        store.save(&done).await.unwrap();
        let loaded = store.load(task.id()).await.unwrap();
        assert!(loaded.is_done());
        assert_eq!(loaded.result(), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = store();
        let err = store.load(&TaskId::from("nope")).await.unwrap_err();
        assert!(err.is_task_not_found());
        assert!(store.find(&TaskId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_serialization_error() {
        let store = store();
        let id = TaskId::from("broken");
        store.cache().put(&store.key_for(&id), "{not json").await.unwrap();

        let err = store.load(&id).await.unwrap_err();
        assert!(matches!(err, BrokerError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_keys_use_prefix() {
        let store = store();
        assert_eq!(store.key_for(&TaskId::from("abc")), "task:abc");
    }
}
