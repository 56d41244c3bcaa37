//! SQLite-backed directory for deployments that keep users in a database.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::current_unix_timestamp_ms;
use rusqlite::{params, Connection};

use crate::{normalize_handle, DirectoryError, DirectoryResult, Recipient, UserDirectory};

/// Persistent SQLite directory. Each call opens its own connection.
#[derive(Debug)]
pub struct SqliteUserDirectory {
    db_path: PathBuf,
}

impl SqliteUserDirectory {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let directory = Self { db_path };
        let connection = directory.open_connection()?;
        directory.initialize_schema(&connection)?;
        Ok(directory)
    }

    fn open_connection(&self) -> DirectoryResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> DirectoryResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL UNIQUE,
                username TEXT NULL,
                full_name TEXT NOT NULL,
                registered_unix_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn upsert_if_absent(
        &self,
        id: i64,
        handle: Option<&str>,
        display_name: &str,
    ) -> DirectoryResult<bool> {
        let connection = self.open_connection()?;
        let registered_unix_ms = i64::try_from(current_unix_timestamp_ms()).unwrap_or(i64::MAX);
        let inserted = connection.execute(
            r#"
            INSERT OR IGNORE INTO users (id, username, full_name, registered_unix_ms)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![id, normalize_handle(handle), display_name, registered_unix_ms],
        )?;
        if inserted > 0 {
            tracing::debug!(user_id = id, "registered user in sqlite directory");
        }
        Ok(inserted > 0)
    }

    async fn list_all(&self) -> DirectoryResult<Vec<Recipient>> {
        let connection = self.open_connection()?;
        let mut statement =
            connection.prepare("SELECT id, username, full_name FROM users ORDER BY seq")?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut recipients = Vec::new();
        for row in rows {
            let (id, username, full_name) = row?;
            recipients.push(Recipient::new(id, full_name, username.as_deref()));
        }
        Ok(recipients)
    }

    async fn count(&self) -> DirectoryResult<usize> {
        let connection = self.open_connection()?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| DirectoryError::InvalidPersistedValue {
            field: "users.count",
            value: count.to_string(),
        })
    }

    fn backend_label(&self) -> &'static str {
        "sqlite"
    }
}
