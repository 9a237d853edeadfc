//! Workspace persistence behind a narrow async interface.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;
    async fn write(&self, path: &str, content: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn create_directory(&self, path: &str) -> Result<()>;
}

pub async fn read_json<T: DeserializeOwned>(store: &dyn FileStore, path: &str) -> Result<T> {
    let content = store.read(path).await?;
    Ok(serde_json::from_str(&content)?)
}

pub async fn write_json<T: Serialize + ?Sized>(store: &dyn FileStore, path: &str, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    store.write(path, &content).await
}

/// Files on disk under a workspace root. Paths resolving outside the root
/// are rejected.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root without touching the filesystem.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_within(&self.root, Path::new(path))
            .ok_or_else(|| OrchestratorError::PathEscape(path.to_string()))
    }
}

/// Fold `.` and `..` components without touching the filesystem. `..` at
/// the root of an absolute path stays at the root.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// `path` resolved under `root`, or `None` when it lands outside it.
/// Absolute paths are normalized before the prefix check.
pub(crate) fn resolve_within(root: &Path, path: &Path) -> Option<PathBuf> {
    let root = normalize_lexically(root);
    if path.is_absolute() {
        let normalized = normalize_lexically(path);
        return normalized.starts_with(&root).then_some(normalized);
    }

    let mut resolved = root;
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                resolved.pop();
                depth -= 1;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        Ok(fs::read_to_string(&resolved).await?)
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&resolved, content).await?;
        debug!(path = %resolved.display(), bytes = content.len(), "Wrote file");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        Ok(fs::try_exists(&resolved).await?)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        fs::create_dir_all(&resolved).await?;
        Ok(())
    }
}

/// In-memory store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, String>>,
    directories: RwLock<HashSet<String>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: impl Into<String>) -> Self {
        self.files.write().insert(normalize(path), content.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.read().get(&normalize(path)).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_end_matches('/').to_string()
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read(&self, path: &str) -> Result<String> {
        self.get(path).ok_or_else(|| {
            OrchestratorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {path}"),
            ))
        })
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        self.files.write().insert(normalize(path), content.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = normalize(path);
        Ok(self.files.read().contains_key(&key) || self.directories.read().contains(&key))
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.directories.write().insert(normalize(path));
        Ok(())
    }
}
