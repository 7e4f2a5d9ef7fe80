use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the classroom schema.
///
/// Version 1 creates tasks, students, task submissions, help messages and the
/// indexes the help queue query relies on.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY,
                    teacher_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    subject TEXT NOT NULL DEFAULT '',
                    fields_json TEXT NOT NULL,
                    due_at TEXT,
                    resources_json TEXT NOT NULL DEFAULT '[]'
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS students (
                    id INTEGER PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    email TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS task_submissions (
                    task_id INTEGER NOT NULL,
                    student_id INTEGER NOT NULL,
                    answers_json TEXT NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL CHECK (
                        status IN ('not-started', 'in-progress', 'submitted', 'completed')
                    ),
                    needs_help INTEGER NOT NULL DEFAULT 0 CHECK (needs_help IN (0, 1)),
                    has_unread_help INTEGER NOT NULL DEFAULT 0 CHECK (has_unread_help IN (0, 1)),
                    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
                    last_saved TEXT,
                    submitted_at TEXT,
                    help_requested_at TEXT,
                    PRIMARY KEY (task_id, student_id),
                    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE,
                    CHECK (status IN ('not-started', 'in-progress') OR submitted_at IS NOT NULL)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS help_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL,
                    student_id INTEGER NOT NULL,
                    author TEXT NOT NULL CHECK (author IN ('teacher', 'student')),
                    body TEXT NOT NULL,
                    sent_at TEXT NOT NULL,
                    FOREIGN KEY (task_id, student_id)
                        REFERENCES task_submissions(task_id, student_id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_tasks_teacher
                    ON tasks(teacher_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_task_submissions_help
                    ON task_submissions(needs_help, status, task_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_help_messages_submission
                    ON help_messages(task_id, student_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
