use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classroom_core::model::{
    HelpMessage, SubmissionKey, SubmissionStatus, TaskSubmission, TeacherId,
};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    answers_to_json, conn, id_to_i64, key_to_i64, map_message_row, map_submission_row,
    map_task_row, ser,
};
use crate::repository::{
    HelpRequestRecord, StorageError, StudentRecord, SubmissionRecord, SubmissionRepository,
    status_transition_allowed,
};

const SELECT_SUBMISSION: &str = r"
    SELECT
        task_id, student_id, answers_json, status, needs_help, has_unread_help,
        progress, last_saved, submitted_at, help_requested_at
    FROM task_submissions
    WHERE task_id = ?1 AND student_id = ?2
";

const OPEN_STATUSES: &str = "('not-started', 'in-progress')";

fn to_submission(record: SubmissionRecord) -> Result<TaskSubmission, StorageError> {
    record.into_submission().map_err(ser)
}

impl SqliteRepository {
    async fn load_messages(&self, key: SubmissionKey) -> Result<Vec<HelpMessage>, StorageError> {
        let (task_id, student_id) = key_to_i64(key)?;
        let rows = sqlx::query(
            r"
            SELECT task_id, student_id, author, body, sent_at
            FROM help_messages
            WHERE task_id = ?1 AND student_id = ?2
            ORDER BY id ASC
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| map_message_row(row).map(|(_, message)| message))
            .collect()
    }
}

#[async_trait]
impl SubmissionRepository for SqliteRepository {
    async fn get_submission(
        &self,
        key: SubmissionKey,
    ) -> Result<Option<TaskSubmission>, StorageError> {
        let (task_id, student_id) = key_to_i64(key)?;
        let row = sqlx::query(SELECT_SUBMISSION)
            .bind(task_id)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = map_submission_row(&row)?;
        record.help_messages = self.load_messages(key).await?;
        to_submission(record).map(Some)
    }

    async fn save_answers(&self, submission: &TaskSubmission) -> Result<(), StorageError> {
        if submission.status().is_terminal() {
            return Err(StorageError::Conflict);
        }
        let (task_id, student_id) = key_to_i64(submission.key())?;
        let sql = format!(
            r"
            INSERT INTO task_submissions (
                task_id, student_id, answers_json, status, progress, last_saved
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(task_id, student_id) DO UPDATE SET
                answers_json = excluded.answers_json,
                status = excluded.status,
                progress = excluded.progress,
                last_saved = excluded.last_saved
            WHERE task_submissions.status IN {OPEN_STATUSES}
            "
        );
        let result = sqlx::query(&sql)
            .bind(task_id)
            .bind(student_id)
            .bind(answers_to_json(submission.answers())?)
            .bind(submission.status().as_str())
            .bind(i64::from(submission.progress()))
            .bind(submission.last_saved())
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn save_status(&self, submission: &TaskSubmission) -> Result<(), StorageError> {
        let target = submission.status();
        if !status_transition_allowed(SubmissionStatus::NotStarted, target) {
            return Err(StorageError::Conflict);
        }
        let guard = match target {
            SubmissionStatus::Submitted => format!("task_submissions.status IN {OPEN_STATUSES}"),
            _ => "task_submissions.status <> 'completed'".to_owned(),
        };
        let (task_id, student_id) = key_to_i64(submission.key())?;
        let sql = format!(
            r"
            INSERT INTO task_submissions (
                task_id, student_id, answers_json, status, needs_help, has_unread_help,
                progress, last_saved, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(task_id, student_id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                submitted_at = COALESCE(task_submissions.submitted_at, excluded.submitted_at)
            WHERE {guard}
            "
        );
        let result = sqlx::query(&sql)
            .bind(task_id)
            .bind(student_id)
            .bind(answers_to_json(submission.answers())?)
            .bind(target.as_str())
            .bind(submission.needs_help())
            .bind(submission.has_unread_help())
            .bind(i64::from(submission.progress()))
            .bind(submission.last_saved())
            .bind(submission.submitted_at())
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn set_needs_help(
        &self,
        key: SubmissionKey,
        needs_help: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let (task_id, student_id) = key_to_i64(key)?;
        let requested_at = needs_help.then_some(at);

        let updated = sqlx::query(
            r"
            UPDATE task_submissions
            SET needs_help = ?3, help_requested_at = ?4
            WHERE task_id = ?1 AND student_id = ?2 AND needs_help <> ?3
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .bind(needs_help)
        .bind(requested_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        if !needs_help {
            return Ok(false);
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO task_submissions (task_id, student_id, status, needs_help, help_requested_at)
            VALUES (?1, ?2, 'not-started', 1, ?3)
            ON CONFLICT(task_id, student_id) DO NOTHING
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn append_help_message(
        &self,
        key: SubmissionKey,
        message: &HelpMessage,
    ) -> Result<(), StorageError> {
        let (task_id, student_id) = key_to_i64(key)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO task_submissions (task_id, student_id, status)
            VALUES (?1, ?2, 'not-started')
            ON CONFLICT(task_id, student_id) DO NOTHING
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO help_messages (task_id, student_id, author, body, sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .bind(message.author.as_str())
        .bind(&message.text)
        .bind(message.sent_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            UPDATE task_submissions SET has_unread_help = 1
            WHERE task_id = ?1 AND student_id = ?2
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn set_unread_help(
        &self,
        key: SubmissionKey,
        has_unread_help: bool,
    ) -> Result<bool, StorageError> {
        let (task_id, student_id) = key_to_i64(key)?;
        let result = sqlx::query(
            r"
            UPDATE task_submissions SET has_unread_help = ?3
            WHERE task_id = ?1 AND student_id = ?2 AND has_unread_help <> ?3
            ",
        )
        .bind(task_id)
        .bind(student_id)
        .bind(has_unread_help)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(result.rows_affected() > 0)
    }

    async fn help_requests_for_teacher(
        &self,
        teacher_id: TeacherId,
    ) -> Result<Vec<HelpRequestRecord>, StorageError> {
        let teacher = id_to_i64("teacher_id", teacher_id.value())?;

        let sql = format!(
            r"
            SELECT
                s.task_id, s.student_id, s.answers_json, s.status, s.needs_help,
                s.has_unread_help, s.progress, s.last_saved, s.submitted_at,
                s.help_requested_at,
                t.teacher_id, t.title, t.description, t.subject, t.fields_json,
                t.due_at, t.resources_json,
                st.display_name, st.email
            FROM task_submissions s
            JOIN tasks t ON t.id = s.task_id
            LEFT JOIN students st ON st.id = s.student_id
            WHERE t.teacher_id = ?1
              AND s.needs_help = 1
              AND s.status IN {OPEN_STATUSES}
            ORDER BY s.help_requested_at ASC, s.task_id ASC, s.student_id ASC
            "
        );
        let rows = sqlx::query(&sql)
            .bind(teacher)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let message_sql = format!(
            r"
            SELECT m.task_id, m.student_id, m.author, m.body, m.sent_at
            FROM help_messages m
            JOIN task_submissions s
                ON s.task_id = m.task_id AND s.student_id = m.student_id
            JOIN tasks t ON t.id = s.task_id
            WHERE t.teacher_id = ?1
              AND s.needs_help = 1
              AND s.status IN {OPEN_STATUSES}
            ORDER BY m.id ASC
            "
        );
        let message_rows = sqlx::query(&message_sql)
            .bind(teacher)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut threads: HashMap<SubmissionKey, Vec<HelpMessage>> = HashMap::new();
        for row in &message_rows {
            let (key, message) = map_message_row(row)?;
            threads.entry(key).or_default().push(message);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = map_submission_row(row)?;
            record.help_messages = threads.remove(&record.key).unwrap_or_default();
            let task = map_task_row(row)?;
            let display_name: Option<String> = row.try_get("display_name").map_err(ser)?;
            let student = match display_name {
                Some(display_name) => StudentRecord {
                    id: record.key.student_id,
                    display_name,
                    email: row.try_get("email").map_err(ser)?,
                },
                None => StudentRecord::unknown(record.key.student_id),
            };
            let requested_at = record.help_requested_at;
            out.push(HelpRequestRecord {
                submission: to_submission(record)?,
                task,
                student,
                requested_at,
            });
        }
        Ok(out)
    }
}
