use async_trait::async_trait;
use classroom_core::model::{Task, TaskId, TeacherId};

use super::SqliteRepository;
use super::mapping::{conn, id_to_i64, map_task_row, ser};
use crate::repository::{StorageError, TaskRepository};

const SELECT_TASK: &str = r"
    SELECT
        id AS task_id, teacher_id, title, description, subject,
        fields_json, due_at, resources_json
    FROM tasks
";

#[async_trait]
impl TaskRepository for SqliteRepository {
    async fn upsert_task(&self, task: &Task) -> Result<(), StorageError> {
        let fields_json = serde_json::to_string(task.fields()).map_err(ser)?;
        let resources: Vec<&str> = task.resources().iter().map(|u| u.as_str()).collect();
        let resources_json = serde_json::to_string(&resources).map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO tasks (
                id, teacher_id, title, description, subject, fields_json, due_at, resources_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                teacher_id = excluded.teacher_id,
                title = excluded.title,
                description = excluded.description,
                subject = excluded.subject,
                fields_json = excluded.fields_json,
                due_at = excluded.due_at,
                resources_json = excluded.resources_json
            ",
        )
        .bind(id_to_i64("task_id", task.id().value())?)
        .bind(id_to_i64("teacher_id", task.teacher_id().value())?)
        .bind(task.title())
        .bind(task.description())
        .bind(task.subject())
        .bind(fields_json)
        .bind(task.due_at())
        .bind(resources_json)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        let sql = format!("{SELECT_TASK} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_to_i64("task_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.as_ref().map(map_task_row).transpose()
    }

    async fn list_tasks_for_teacher(
        &self,
        teacher_id: TeacherId,
    ) -> Result<Vec<Task>, StorageError> {
        let sql = format!("{SELECT_TASK} WHERE teacher_id = ?1 ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(id_to_i64("teacher_id", teacher_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        rows.iter().map(map_task_row).collect()
    }
}
