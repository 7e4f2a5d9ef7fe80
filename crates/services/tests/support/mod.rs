#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classroom_core::model::{
    FieldDefinition, FieldKind, HelpMessage, StudentId, SubmissionKey, Task, TaskDraft, TaskId,
    TaskSubmission, TeacherId,
};
use storage::repository::{
    HelpRequestRecord, InMemoryRepository, StorageError, SubmissionRepository, TaskRepository,
};

/// Wraps the in-memory store to count, slow down or fail calls.
#[derive(Default)]
pub struct CountingRepository {
    pub inner: InMemoryRepository,
    pub answer_writes: AtomicUsize,
    pub help_queries: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fail_writes: AtomicBool,
    /// Fail writes with an error that retrying cannot fix.
    pub reject_writes: AtomicBool,
    pub fail_queries: AtomicBool,
    pub write_delay: Duration,
    /// Appended to every help query result, as a broken backend might.
    pub extra_rows: Mutex<Vec<HelpRequestRecord>>,
}

impl CountingRepository {
    pub fn new(inner: InMemoryRepository) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ..Self::default()
        })
    }

    pub fn slow(inner: InMemoryRepository, write_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            write_delay,
            ..Self::default()
        })
    }

    pub fn writes(&self) -> usize {
        self.answer_writes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.help_queries.load(Ordering::SeqCst)
    }
}

fn unavailable() -> StorageError {
    StorageError::Connection("store unavailable".into())
}

#[async_trait]
impl SubmissionRepository for CountingRepository {
    async fn get_submission(
        &self,
        key: SubmissionKey,
    ) -> Result<Option<TaskSubmission>, StorageError> {
        self.inner.get_submission(key).await
    }

    async fn save_answers(&self, submission: &TaskSubmission) -> Result<(), StorageError> {
        self.answer_writes.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(unavailable())
        } else if self.reject_writes.load(Ordering::SeqCst) {
            Err(StorageError::Serialization("answers do not encode".into()))
        } else {
            self.inner.save_answers(submission).await
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn save_status(&self, submission: &TaskSubmission) -> Result<(), StorageError> {
        self.inner.save_status(submission).await
    }

    async fn set_needs_help(
        &self,
        key: SubmissionKey,
        needs_help: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner.set_needs_help(key, needs_help, at).await
    }

    async fn append_help_message(
        &self,
        key: SubmissionKey,
        message: &HelpMessage,
    ) -> Result<(), StorageError> {
        self.inner.append_help_message(key, message).await
    }

    async fn set_unread_help(
        &self,
        key: SubmissionKey,
        has_unread_help: bool,
    ) -> Result<bool, StorageError> {
        self.inner.set_unread_help(key, has_unread_help).await
    }

    async fn help_requests_for_teacher(
        &self,
        teacher_id: TeacherId,
    ) -> Result<Vec<HelpRequestRecord>, StorageError> {
        self.help_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut rows = self.inner.help_requests_for_teacher(teacher_id).await?;
        rows.extend(self.extra_rows.lock().unwrap().iter().cloned());
        Ok(rows)
    }
}

/// Two required short-text fields `a` and `b` plus optional `notes`.
pub fn two_field_task(id: u64, teacher: u64) -> Task {
    TaskDraft::new(TeacherId::new(teacher), format!("Task {id}"))
        .with_field(FieldDefinition::new("a", FieldKind::ShortText, "A").required())
        .with_field(FieldDefinition::new("b", FieldKind::ShortText, "B").required())
        .with_field(FieldDefinition::new("notes", FieldKind::LongText, "Notes"))
        .validate(TaskId::new(id))
        .unwrap()
}

pub async fn store_with_tasks(tasks: &[Task]) -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    for task in tasks {
        repo.upsert_task(task).await.unwrap();
    }
    repo
}

pub fn key(task: u64, student: u64) -> SubmissionKey {
    SubmissionKey::new(TaskId::new(task), StudentId::new(student))
}
