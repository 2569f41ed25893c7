//! Lifecycle surface: create, find, list, and delete sandbox instances.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Sandbox, SandboxError, SandboxInfo, SandboxOptions, SandboxState, VmSandbox};
use crate::engine::EngineHandle;

/// Registry of addressable sandbox instances.
///
/// The manager owns the lazily-initialized engine handle: the guest
/// implementation is loaded on the first create and shared by every
/// instance after that. The registry lock is held across construction,
/// so racing `get_or_create` calls for one id serialize and yield exactly
/// one underlying instance — never last-writer-wins.
#[derive(Debug, Default)]
pub struct SandboxManager {
    engine: EngineHandle,
    registry: Mutex<HashMap<String, Arc<VmSandbox>>>,
}

impl SandboxManager {
    /// Create a manager with an uninitialized engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine handle, for callers that want to initialize it eagerly
    /// or with a custom configuration before the first create.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Create a sandbox under a fresh unique id.
    pub async fn create(&self, options: SandboxOptions) -> Result<Arc<VmSandbox>, SandboxError> {
        let id = format!("sbx-{}", uuid::Uuid::new_v4());
        self.get_or_create(&id, options).await
    }

    /// Return the sandbox with this id, creating it if absent.
    ///
    /// Safe to call concurrently for the same id: creation is serialized
    /// by the registry lock, and the options of the losing caller are
    /// dropped in favor of the instance that already exists.
    pub async fn get_or_create(
        &self,
        id: &str,
        options: SandboxOptions,
    ) -> Result<Arc<VmSandbox>, SandboxError> {
        let engine = self.engine.init()?;

        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.get(id) {
            return Ok(Arc::clone(existing));
        }

        let sandbox = Arc::new(VmSandbox::create(id.to_string(), options, &engine).await?);
        registry.insert(id.to_string(), Arc::clone(&sandbox));
        tracing::info!(id, "created sandbox");
        Ok(sandbox)
    }

    /// Look up an existing sandbox.
    pub async fn get(&self, id: &str) -> Option<Arc<VmSandbox>> {
        self.registry.lock().await.get(id).cloned()
    }

    /// Snapshot the registered sandboxes, optionally filtered by state,
    /// ordered by id.
    pub async fn list(&self, filter: Option<SandboxState>) -> Vec<SandboxInfo> {
        let registry = self.registry.lock().await;
        let mut infos: Vec<SandboxInfo> = registry
            .values()
            .map(|s| s.info())
            .filter(|info| filter.is_none_or(|f| info.state == f))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Close and deregister a sandbox. The instance moves to its terminal
    /// `Closed` state; holders of the `Arc` keep storage access but can no
    /// longer execute.
    pub async fn delete(&self, id: &str) -> Result<(), SandboxError> {
        let removed = self.registry.lock().await.remove(id);
        match removed {
            Some(sandbox) => {
                sandbox.close();
                tracing::info!(id, "deleted sandbox");
                Ok(())
            }
            None => Err(SandboxError::Unknown(id.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let manager = SandboxManager::new();
        let a = manager.create(SandboxOptions::default()).await.unwrap();
        let b = manager.create(SandboxOptions::default()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("sbx-"));
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_instance() {
        let manager = SandboxManager::new();
        let first = manager
            .get_or_create("workspace", SandboxOptions::default())
            .await
            .unwrap();
        let second = manager
            .get_or_create("workspace", SandboxOptions::default())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_instance() {
        let manager = Arc::new(SandboxManager::new());
        let m1 = Arc::clone(&manager);
        let m2 = Arc::clone(&manager);

        let (a, b) = tokio::join!(
            m1.get_or_create("x", SandboxOptions::default()),
            m2.get_or_create("x", SandboxOptions::default()),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_and_filter() {
        let manager = SandboxManager::new();
        manager
            .get_or_create("a", SandboxOptions::default())
            .await
            .unwrap();
        manager
            .get_or_create("b", SandboxOptions::default())
            .await
            .unwrap();

        let infos = manager.list(None).await;
        let ids: Vec<&str> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(infos.iter().all(|i| i.state == SandboxState::Running));

        assert!(manager.list(Some(SandboxState::Closed)).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_closes_and_deregisters() {
        let manager = SandboxManager::new();
        let sandbox = manager
            .get_or_create("doomed", SandboxOptions::default())
            .await
            .unwrap();

        manager.delete("doomed").await.unwrap();
        assert!(manager.get("doomed").await.is_none());
        assert_eq!(sandbox.state(), SandboxState::Closed);

        // Executing on a closed sandbox fails.
        let err = sandbox.execute("echo hi").await.unwrap_err();
        assert!(matches!(err, SandboxError::Closed(_)));

        // Deleting an unknown id is an error.
        assert!(matches!(
            manager.delete("doomed").await,
            Err(SandboxError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_shared_across_sandboxes() {
        let manager = SandboxManager::new();
        manager.create(SandboxOptions::default()).await.unwrap();
        let engine = manager.engine().get().unwrap();
        manager.create(SandboxOptions::default()).await.unwrap();
        assert!(Arc::ptr_eq(&engine, &manager.engine().get().unwrap()));
    }
}
