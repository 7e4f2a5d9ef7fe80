//! `SQLite` backend for the classroom store.
//!
//! One pool serves tasks, the roster and submissions. Autosave workers and the
//! help channel write the same submission rows from different tasks, so every
//! connection waits on busy locks instead of failing, and foreign keys are on
//! so help messages cannot outlive their submission.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::repository::{Storage, StudentRepository, SubmissionRepository, TaskRepository};

mod mapping;
mod migrate;
mod student_repo;
mod submission_repo;
mod task_repo;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECTION_PRAGMAS: [&str; 3] = [
    "PRAGMA foreign_keys = ON;",
    "PRAGMA journal_mode = WAL;",
    "PRAGMA busy_timeout = 5000;",
];

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Open a pool on `database_url` without touching the schema.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if no connection can be opened or a
    /// connection pragma is rejected.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .after_connect(|conn, _meta| Box::pin(configure_connection(conn)))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect and bring the classroom schema up to date.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connecting or a migration fails.
    pub async fn open(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Apply pending schema versions. Already applied versions are skipped.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if a migration statement fails.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }

    /// Serve every repository of [`Storage`] from this pool.
    #[must_use]
    pub fn into_storage(self) -> Storage {
        let tasks: Arc<dyn TaskRepository> = Arc::new(self.clone());
        let students: Arc<dyn StudentRepository> = Arc::new(self.clone());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(self);
        Storage {
            tasks,
            students,
            submissions,
        }
    }
}

async fn configure_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}

impl Storage {
    /// Classroom storage backed by `SQLite`, migrated and ready to use.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connecting or migrating fails.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        Ok(SqliteRepository::open(database_url).await?.into_storage())
    }
}
