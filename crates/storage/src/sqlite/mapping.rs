use classroom_core::model::{
    Answers, FieldDefinition, HelpMessage, Role, StudentId, SubmissionKey, SubmissionStatus, Task,
    TaskId, TeacherId,
};
use sqlx::Row;

use crate::repository::{StorageError, SubmissionRecord};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn task_id_from_i64(v: i64) -> Result<TaskId, StorageError> {
    Ok(TaskId::new(i64_to_u64("task_id", v)?))
}

pub(crate) fn student_id_from_i64(v: i64) -> Result<StudentId, StorageError> {
    Ok(StudentId::new(i64_to_u64("student_id", v)?))
}

pub(crate) fn teacher_id_from_i64(v: i64) -> Result<TeacherId, StorageError> {
    Ok(TeacherId::new(i64_to_u64("teacher_id", v)?))
}

/// Bind-ready `(task_id, student_id)` pair.
pub(crate) fn key_to_i64(key: SubmissionKey) -> Result<(i64, i64), StorageError> {
    Ok((
        id_to_i64("task_id", key.task_id.value())?,
        id_to_i64("student_id", key.student_id.value())?,
    ))
}

pub(crate) fn parse_status(s: &str) -> Result<SubmissionStatus, StorageError> {
    SubmissionStatus::parse(s)
        .ok_or_else(|| StorageError::Serialization(format!("invalid status: {s}")))
}

pub(crate) fn parse_role(s: &str) -> Result<Role, StorageError> {
    Role::parse(s).ok_or_else(|| StorageError::Serialization(format!("invalid author: {s}")))
}

pub(crate) fn answers_to_json(answers: &Answers) -> Result<String, StorageError> {
    serde_json::to_string(answers).map_err(ser)
}

/// Maps a task row. Expects the id column to be selected as `task_id`.
pub(crate) fn map_task_row(row: &sqlx::sqlite::SqliteRow) -> Result<Task, StorageError> {
    let fields_json: String = row.try_get("fields_json").map_err(ser)?;
    let fields: Vec<FieldDefinition> = serde_json::from_str(&fields_json).map_err(ser)?;
    let resources_json: String = row.try_get("resources_json").map_err(ser)?;
    let resources: Vec<String> = serde_json::from_str(&resources_json).map_err(ser)?;

    Task::from_persisted(
        task_id_from_i64(row.try_get::<i64, _>("task_id").map_err(ser)?)?,
        teacher_id_from_i64(row.try_get::<i64, _>("teacher_id").map_err(ser)?)?,
        row.try_get("title").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("subject").map_err(ser)?,
        fields,
        row.try_get("due_at").map_err(ser)?,
        resources,
    )
    .map_err(ser)
}

/// Maps the submission columns of a row. The help thread is loaded separately.
pub(crate) fn map_submission_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SubmissionRecord, StorageError> {
    let key = SubmissionKey::new(
        task_id_from_i64(row.try_get::<i64, _>("task_id").map_err(ser)?)?,
        student_id_from_i64(row.try_get::<i64, _>("student_id").map_err(ser)?)?,
    );
    let answers_json: String = row.try_get("answers_json").map_err(ser)?;
    let answers: Answers = serde_json::from_str(&answers_json).map_err(ser)?;
    let status_str: String = row.try_get("status").map_err(ser)?;
    let progress_i64: i64 = row.try_get("progress").map_err(ser)?;
    let progress = u8::try_from(progress_i64)
        .map_err(|_| StorageError::Serialization(format!("invalid progress: {progress_i64}")))?;

    Ok(SubmissionRecord {
        key,
        answers,
        status: parse_status(&status_str)?,
        needs_help: row.try_get("needs_help").map_err(ser)?,
        has_unread_help: row.try_get("has_unread_help").map_err(ser)?,
        progress,
        last_saved: row.try_get("last_saved").map_err(ser)?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
        help_requested_at: row.try_get("help_requested_at").map_err(ser)?,
        help_messages: Vec::new(),
    })
}

pub(crate) fn map_message_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(SubmissionKey, HelpMessage), StorageError> {
    let key = SubmissionKey::new(
        task_id_from_i64(row.try_get::<i64, _>("task_id").map_err(ser)?)?,
        student_id_from_i64(row.try_get::<i64, _>("student_id").map_err(ser)?)?,
    );
    let author: String = row.try_get("author").map_err(ser)?;
    Ok((
        key,
        HelpMessage {
            author: parse_role(&author)?,
            text: row.try_get("body").map_err(ser)?,
            sent_at: row.try_get("sent_at").map_err(ser)?,
        },
    ))
}
