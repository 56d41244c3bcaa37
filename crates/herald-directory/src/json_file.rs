//! Flat-file directory backend stored as pretty-printed JSON.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use herald_core::write_text_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{normalize_handle, DirectoryError, DirectoryResult, Recipient, UserDirectory};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<StoredUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    full_name: String,
}

impl From<&StoredUser> for Recipient {
    fn from(user: &StoredUser) -> Self {
        Recipient::new(user.id, user.full_name.clone(), user.username.as_deref())
    }
}

/// Directory persisted to a `{"users": [...]}` JSON document.
///
/// The whole document is cached in memory; every insert rewrites the file
/// atomically before it becomes visible to readers.
pub struct JsonFileUserDirectory {
    path: PathBuf,
    state: RwLock<UsersFile>,
}

impl JsonFileUserDirectory {
    /// Loads `path`, treating a missing file as an empty directory.
    pub fn open(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                UsersFile::default()
            } else {
                serde_json::from_str::<UsersFile>(&raw).map_err(|source| {
                    DirectoryError::InvalidFile {
                        path: path.clone(),
                        source,
                    }
                })?
            }
        } else {
            UsersFile::default()
        };
        tracing::debug!(
            path = %path.display(),
            users = state.users.len(),
            "loaded json user directory"
        );
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &UsersFile) -> DirectoryResult<()> {
        let mut payload = serde_json::to_string_pretty(state)?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload).map_err(|error| DirectoryError::Persist {
            path: self.path.clone(),
            detail: format!("{error:#}"),
        })
    }
}

#[async_trait]
impl UserDirectory for JsonFileUserDirectory {
    async fn upsert_if_absent(
        &self,
        id: i64,
        handle: Option<&str>,
        display_name: &str,
    ) -> DirectoryResult<bool> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|user| user.id == id) {
            return Ok(false);
        }
        state.users.push(StoredUser {
            id,
            username: normalize_handle(handle),
            full_name: display_name.to_string(),
        });
        if let Err(error) = self.persist(&state) {
            state.users.pop();
            return Err(error);
        }
        tracing::debug!(user_id = id, "registered user in json directory");
        Ok(true)
    }

    async fn list_all(&self) -> DirectoryResult<Vec<Recipient>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .iter()
            .map(Recipient::from)
            .collect())
    }

    async fn count(&self) -> DirectoryResult<usize> {
        Ok(self.state.read().await.users.len())
    }

    fn backend_label(&self) -> &'static str {
        "json"
    }
}
