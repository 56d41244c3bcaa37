//! User directory abstractions and storage backends.
//!
//! The directory is the registry of everyone who has contacted the bot. The
//! broadcast core depends only on [`UserDirectory`]; which backend sits behind
//! it is chosen once at startup through [`DirectoryBackend`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

mod json_file;
mod sqlite;

pub use json_file::JsonFileUserDirectory;
pub use sqlite::SqliteUserDirectory;

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors returned by directory backends.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory file {path} is not valid json: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist directory file {path}: {detail}")]
    Persist { path: PathBuf, detail: String },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One registered user, as snapshotted into a broadcast campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl Recipient {
    pub fn new(id: i64, display_name: impl Into<String>, handle: Option<&str>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            handle: normalize_handle(handle),
        }
    }
}

/// Trims a handle and drops a leading `@`; blank handles become `None`.
pub fn normalize_handle(handle: Option<&str>) -> Option<String> {
    handle
        .map(str::trim)
        .map(|value| value.trim_start_matches('@'))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Async registry contract consumed by the bot runtime and the broadcast core.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Registers `id` unless it is already present. Returns `true` on insert.
    async fn upsert_if_absent(
        &self,
        id: i64,
        handle: Option<&str>,
        display_name: &str,
    ) -> DirectoryResult<bool>;

    /// Every registered user in registration order.
    async fn list_all(&self) -> DirectoryResult<Vec<Recipient>>;

    async fn count(&self) -> DirectoryResult<usize> {
        Ok(self.list_all().await?.len())
    }

    fn backend_label(&self) -> &'static str;
}

/// Storage selection made once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryBackend {
    Memory,
    JsonFile(PathBuf),
    Sqlite(PathBuf),
}

impl DirectoryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::JsonFile(_) => "json",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

/// Opens the configured backend behind the shared directory trait.
pub fn open_user_directory(backend: &DirectoryBackend) -> DirectoryResult<Arc<dyn UserDirectory>> {
    let directory: Arc<dyn UserDirectory> = match backend {
        DirectoryBackend::Memory => Arc::new(InMemoryUserDirectory::new()),
        DirectoryBackend::JsonFile(path) => Arc::new(JsonFileUserDirectory::open(path)?),
        DirectoryBackend::Sqlite(path) => Arc::new(SqliteUserDirectory::new(path)?),
    };
    tracing::info!(backend = backend.as_str(), "user directory opened");
    Ok(directory)
}

/// In-memory directory for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<Vec<Recipient>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients(recipients: Vec<Recipient>) -> Self {
        Self {
            users: RwLock::new(recipients),
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn upsert_if_absent(
        &self,
        id: i64,
        handle: Option<&str>,
        display_name: &str,
    ) -> DirectoryResult<bool> {
        let mut users = self.users.write().await;
        if users.iter().any(|user| user.id == id) {
            return Ok(false);
        }
        users.push(Recipient::new(id, display_name, handle));
        Ok(true)
    }

    async fn list_all(&self) -> DirectoryResult<Vec<Recipient>> {
        Ok(self.users.read().await.clone())
    }

    async fn count(&self) -> DirectoryResult<usize> {
        Ok(self.users.read().await.len())
    }

    fn backend_label(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_handle, open_user_directory, DirectoryBackend, InMemoryUserDirectory, Recipient,
        UserDirectory,
    };

    #[test]
    fn unit_normalize_handle_strips_at_sign_and_blank_values() {
        assert_eq!(normalize_handle(Some(" @trax ")), Some("trax".to_string()));
        assert_eq!(normalize_handle(Some("   ")), None);
        assert_eq!(normalize_handle(Some("@")), None);
        assert_eq!(normalize_handle(None), None);
    }

    #[tokio::test]
    async fn functional_in_memory_upsert_is_noop_for_known_ids() {
        let directory = InMemoryUserDirectory::new();
        assert!(directory
            .upsert_if_absent(7, Some("ada"), "Ada Lovelace")
            .await
            .expect("insert"));
        assert!(!directory
            .upsert_if_absent(7, Some("other"), "Someone Else")
            .await
            .expect("repeat"));
        assert!(directory
            .upsert_if_absent(3, None, "Grace")
            .await
            .expect("insert"));

        let users = directory.list_all().await.expect("list");
        assert_eq!(
            users,
            vec![
                Recipient::new(7, "Ada Lovelace", Some("ada")),
                Recipient::new(3, "Grace", None),
            ]
        );
        assert_eq!(directory.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn functional_open_user_directory_selects_backend() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let json = open_user_directory(&DirectoryBackend::JsonFile(
            tempdir.path().join("users.json"),
        ))
        .expect("json backend");
        assert_eq!(json.backend_label(), "json");

        let sqlite =
            open_user_directory(&DirectoryBackend::Sqlite(tempdir.path().join("users.db")))
                .expect("sqlite backend");
        assert_eq!(sqlite.backend_label(), "sqlite");

        let memory = open_user_directory(&DirectoryBackend::Memory).expect("memory backend");
        assert_eq!(memory.backend_label(), "memory");
    }
}
