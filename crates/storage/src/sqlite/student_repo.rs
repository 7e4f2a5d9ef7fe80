use async_trait::async_trait;

use super::SqliteRepository;
use super::mapping::{conn, id_to_i64};
use crate::repository::{StorageError, StudentRecord, StudentRepository};

#[async_trait]
impl StudentRepository for SqliteRepository {
    async fn upsert_student(&self, student: &StudentRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO students (id, display_name, email)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email
            ",
        )
        .bind(id_to_i64("student_id", student.id.value())?)
        .bind(&student.display_name)
        .bind(student.email.as_deref())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
