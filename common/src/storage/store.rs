use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Object storage for raw document bytes, either on the local filesystem
/// under `data_dir` or fully in memory.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Wraps a caller-provided backend, mainly for tests that want to
    /// inject a specific store.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Resolved base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Full object contents, buffered in memory.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Deletes every object below the prefix. Deleting an empty prefix is
    /// a no-op; local backends also drop directories that became empty.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Best-effort removal of empty directories left behind by
    /// `delete_prefix` on the local backend.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolves the absolute base directory for local storage; a relative
/// `data_dir` resolves against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_backend_basic_operations() {
        let cfg = AppConfig::for_tests();
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");
        assert!(storage.local_base_path().is_none());

        let location = "documents/abc/file.txt";
        let data = b"document bytes";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);
        assert!(storage.exists(location).await.expect("exists"));

        storage
            .delete_prefix("documents/abc/")
            .await
            .expect("delete");
        assert!(!storage
            .exists(location)
            .await
            .expect("exists after delete"));
    }

    #[tokio::test]
    async fn test_delete_prefix_on_empty_prefix_is_a_noop() {
        let cfg = AppConfig::for_tests();
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");

        storage
            .delete_prefix("documents/never-written/")
            .await
            .expect("deleting nothing succeeds");
    }

    #[tokio::test]
    async fn test_local_backend_cleans_up_directories() {
        let base = format!("/tmp/citechat_storage_test_{}", Uuid::new_v4());
        let mut cfg = AppConfig::for_tests();
        cfg.storage = StorageKind::Local;
        cfg.data_dir = base.clone();

        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");
        let resolved_base = storage
            .local_base_path()
            .expect("resolved base dir")
            .to_path_buf();
        assert_eq!(resolved_base, PathBuf::from(&base));

        let location = "documents/abc/report.pdf";
        storage
            .put(location, Bytes::from_static(b"pdf bytes"))
            .await
            .expect("put");

        let object_dir = resolved_base.join("documents/abc");
        tokio::fs::metadata(&object_dir)
            .await
            .expect("object directory exists after write");

        storage
            .delete_prefix("documents/abc/")
            .await
            .expect("delete");
        assert!(!storage.exists(location).await.expect("exists"));
        assert!(
            tokio::fs::metadata(&object_dir).await.is_err(),
            "object directory should be removed"
        );
        tokio::fs::metadata(&resolved_base)
            .await
            .expect("base directory remains intact");

        let _ = tokio::fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn test_overwrite_replaces_contents() {
        let cfg = AppConfig::for_tests();
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");

        let location = "documents/abc/file.txt";
        storage
            .put(location, Bytes::from_static(b"first"))
            .await
            .expect("put first");
        storage
            .put(location, Bytes::from_static(b"second"))
            .await
            .expect("put second");

        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_get_missing_object_errors() {
        let cfg = AppConfig::for_tests();
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");

        assert!(storage.get("documents/missing.txt").await.is_err());
        assert!(!storage
            .exists("documents/missing.txt")
            .await
            .expect("exists"));
    }
}
