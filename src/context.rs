use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::artifacts::ArtifactStore;
use crate::config::{Config, Limits};
use crate::db::Store;

/// Everything one operation needs: its own store connection, the file store
/// and the configured limits. Core operations are methods on this type.
pub struct PipelineContext {
    store: Store,
    files: ArtifactStore,
    limits: Limits,
}

impl PipelineContext {
    pub fn new(store: Store, files: ArtifactStore, limits: Limits) -> Self {
        Self {
            store,
            files,
            limits,
        }
    }

    /// Open the configured database and file store.
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.base_path).with_context(|| {
            format!(
                "Failed to create base directory: {}",
                config.base_path.display()
            )
        })?;
        let store = Store::open(&config.database_path, config.busy_timeout)?;
        Ok(Self::new(
            store,
            ArtifactStore::new(&config.base_path),
            config.limits,
        ))
    }

    /// In-memory database over a real file root (for testing).
    pub fn in_memory(base_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(
            Store::open_in_memory()?,
            ArtifactStore::new(base_path),
            Limits::default(),
        ))
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn files(&self) -> &ArtifactStore {
        &self.files
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

/// Async-safe handle to a [`PipelineContext`].
///
/// Runs every operation on tokio's blocking pool via `spawn_blocking`, so
/// synchronous SQLite and filesystem work never ties up async worker threads.
#[derive(Clone)]
pub struct ContextHandle {
    inner: Arc<std::sync::Mutex<PipelineContext>>,
}

impl ContextHandle {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(ctx)),
        }
    }

    /// Run a closure with access to the context on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R, E>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PipelineContext) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let ctx = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = ctx
                .lock()
                .map_err(|e| anyhow::anyhow!("Context lock poisoned: {}", e))?;
            f(&guard).map_err(Into::into)
        })
        .await
        .context("Context task panicked")?
    }
}
