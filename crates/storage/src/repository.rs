use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classroom_core::model::{
    Answers, HelpMessage, StudentId, SubmissionError, SubmissionKey, SubmissionStatus, Task,
    TaskId, TaskSubmission, TeacherId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A guarded write found the row in a state that forbids it, e.g. an
    /// answer write against a submitted record.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Roster entry for a student, merged into help-queue rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub id: StudentId,
    pub display_name: String,
    pub email: Option<String>,
}

impl StudentRecord {
    #[must_use]
    pub fn new(id: StudentId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email: None,
        }
    }

    /// Stand-in for a submission whose student is missing from the roster.
    #[must_use]
    pub fn unknown(id: StudentId) -> Self {
        Self::new(id, format!("Student {id}"))
    }
}

/// Persisted shape of a submission.
///
/// Mirrors `TaskSubmission` plus storage-only bookkeeping, so adapters can
/// round-trip rows without reaching into the domain type.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub key: SubmissionKey,
    pub answers: Answers,
    pub status: SubmissionStatus,
    pub needs_help: bool,
    pub has_unread_help: bool,
    pub progress: u8,
    pub last_saved: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub help_requested_at: Option<DateTime<Utc>>,
    pub help_messages: Vec<HelpMessage>,
}

impl SubmissionRecord {
    #[must_use]
    pub fn empty(key: SubmissionKey) -> Self {
        Self::from_submission(&TaskSubmission::new(key))
    }

    #[must_use]
    pub fn from_submission(submission: &TaskSubmission) -> Self {
        Self {
            key: submission.key(),
            answers: submission.answers().clone(),
            status: submission.status(),
            needs_help: submission.needs_help(),
            has_unread_help: submission.has_unread_help(),
            progress: submission.progress(),
            last_saved: submission.last_saved(),
            submitted_at: submission.submitted_at(),
            help_requested_at: None,
            help_messages: submission.help_messages().to_vec(),
        }
    }

    /// Convert the record back into a domain `TaskSubmission`.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError` if the row breaks a submission invariant.
    pub fn into_submission(self) -> Result<TaskSubmission, SubmissionError> {
        TaskSubmission::from_persisted(
            self.key,
            self.answers,
            self.status,
            self.needs_help,
            self.has_unread_help,
            self.progress,
            self.last_saved,
            self.submitted_at,
            self.help_messages,
        )
    }
}

/// One row of a teacher's help queue: the flagged submission joined with its
/// task and student.
#[derive(Debug, Clone, PartialEq)]
pub struct HelpRequestRecord {
    pub submission: TaskSubmission,
    pub task: Task,
    pub student: StudentRecord,
    pub requested_at: Option<DateTime<Utc>>,
}

/// Task definitions. Read-only to the engine apart from seeding.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist or update a task.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the task cannot be stored.
    async fn upsert_task(&self, task: &Task) -> Result<(), StorageError>;

    /// Fetch a task by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError>;

    /// List tasks owned by a teacher, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_tasks_for_teacher(&self, teacher_id: TeacherId)
    -> Result<Vec<Task>, StorageError>;
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Persist or update a roster entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the student cannot be stored.
    async fn upsert_student(&self, student: &StudentRecord) -> Result<(), StorageError>;
}

/// The submission store. Every method is a single-record write or a read.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Fetch a submission with its help thread.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or mapping failures.
    async fn get_submission(
        &self,
        key: SubmissionKey,
    ) -> Result<Option<TaskSubmission>, StorageError>;

    /// Upsert the answer columns (answers, progress, status, `last_saved`).
    ///
    /// Help flags, messages and `submitted_at` are never written here.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored row (or `submission`
    /// itself) is already submitted or completed.
    async fn save_answers(&self, submission: &TaskSubmission) -> Result<(), StorageError>;

    /// Persist a transition into `submitted` or `completed`, together with
    /// the progress recomputed by the transition.
    ///
    /// `submitted_at` is only written if the row has none yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored status does not allow
    /// the transition.
    async fn save_status(&self, submission: &TaskSubmission) -> Result<(), StorageError>;

    /// Set the help flag. Returns `true` if the stored value changed.
    ///
    /// Raising help on a submission that was never saved creates the row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn set_needs_help(
        &self,
        key: SubmissionKey,
        needs_help: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Append to the help thread and mark it unread, creating the row if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn append_help_message(
        &self,
        key: SubmissionKey,
        message: &HelpMessage,
    ) -> Result<(), StorageError>;

    /// Set the unread flag. Returns `true` if the stored value changed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn set_unread_help(
        &self,
        key: SubmissionKey,
        has_unread_help: bool,
    ) -> Result<bool, StorageError>;

    /// Submissions flagged for help on tasks owned by `teacher_id`, excluding
    /// submitted and completed work, oldest request first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or mapping failures.
    async fn help_requests_for_teacher(
        &self,
        teacher_id: TeacherId,
    ) -> Result<Vec<HelpRequestRecord>, StorageError>;
}

/// Simple in-memory repository implementation for testing and previews.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
    students: Arc<Mutex<HashMap<StudentId, StudentRecord>>>,
    submissions: Arc<Mutex<HashMap<SubmissionKey, SubmissionRecord>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::Connection(e.to_string()))
}

fn to_submission(record: SubmissionRecord) -> Result<TaskSubmission, StorageError> {
    record
        .into_submission()
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored submission rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn submission_count(&self) -> Result<usize, StorageError> {
        Ok(lock(&self.submissions)?.len())
    }
}

#[async_trait]
impl TaskRepository for InMemoryRepository {
    async fn upsert_task(&self, task: &Task) -> Result<(), StorageError> {
        lock(&self.tasks)?.insert(task.id(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        Ok(lock(&self.tasks)?.get(&id).cloned())
    }

    async fn list_tasks_for_teacher(
        &self,
        teacher_id: TeacherId,
    ) -> Result<Vec<Task>, StorageError> {
        let guard = lock(&self.tasks)?;
        let mut tasks: Vec<Task> = guard
            .values()
            .filter(|t| t.is_owned_by(teacher_id))
            .cloned()
            .collect();
        tasks.sort_by_key(Task::id);
        Ok(tasks)
    }
}

#[async_trait]
impl StudentRepository for InMemoryRepository {
    async fn upsert_student(&self, student: &StudentRecord) -> Result<(), StorageError> {
        lock(&self.students)?.insert(student.id, student.clone());
        Ok(())
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryRepository {
    async fn get_submission(
        &self,
        key: SubmissionKey,
    ) -> Result<Option<TaskSubmission>, StorageError> {
        let record = lock(&self.submissions)?.get(&key).cloned();
        record.map(to_submission).transpose()
    }

    async fn save_answers(&self, submission: &TaskSubmission) -> Result<(), StorageError> {
        if submission.status().is_terminal() {
            return Err(StorageError::Conflict);
        }
        let mut guard = lock(&self.submissions)?;
        let row = guard
            .entry(submission.key())
            .or_insert_with(|| SubmissionRecord::empty(submission.key()));
        if row.status.is_terminal() {
            return Err(StorageError::Conflict);
        }
        row.answers = submission.answers().clone();
        row.status = submission.status();
        row.progress = submission.progress();
        row.last_saved = submission.last_saved();
        Ok(())
    }

    async fn save_status(&self, submission: &TaskSubmission) -> Result<(), StorageError> {
        let target = submission.status();
        if !status_transition_allowed(SubmissionStatus::NotStarted, target) {
            return Err(StorageError::Conflict);
        }
        let mut guard = lock(&self.submissions)?;
        let Some(row) = guard.get_mut(&submission.key()) else {
            guard.insert(
                submission.key(),
                SubmissionRecord::from_submission(submission),
            );
            return Ok(());
        };
        if !status_transition_allowed(row.status, target) {
            return Err(StorageError::Conflict);
        }
        row.status = target;
        row.progress = submission.progress();
        if row.submitted_at.is_none() {
            row.submitted_at = submission.submitted_at();
        }
        Ok(())
    }

    async fn set_needs_help(
        &self,
        key: SubmissionKey,
        needs_help: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut guard = lock(&self.submissions)?;
        if !needs_help && !guard.contains_key(&key) {
            return Ok(false);
        }
        let row = guard
            .entry(key)
            .or_insert_with(|| SubmissionRecord::empty(key));
        if row.needs_help == needs_help {
            return Ok(false);
        }
        row.needs_help = needs_help;
        row.help_requested_at = needs_help.then_some(at);
        Ok(true)
    }

    async fn append_help_message(
        &self,
        key: SubmissionKey,
        message: &HelpMessage,
    ) -> Result<(), StorageError> {
        let mut guard = lock(&self.submissions)?;
        let row = guard
            .entry(key)
            .or_insert_with(|| SubmissionRecord::empty(key));
        row.help_messages.push(message.clone());
        row.has_unread_help = true;
        Ok(())
    }

    async fn set_unread_help(
        &self,
        key: SubmissionKey,
        has_unread_help: bool,
    ) -> Result<bool, StorageError> {
        let mut guard = lock(&self.submissions)?;
        match guard.get_mut(&key) {
            Some(row) if row.has_unread_help != has_unread_help => {
                row.has_unread_help = has_unread_help;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn help_requests_for_teacher(
        &self,
        teacher_id: TeacherId,
    ) -> Result<Vec<HelpRequestRecord>, StorageError> {
        let tasks = lock(&self.tasks)?.clone();
        let students = lock(&self.students)?.clone();
        let rows: Vec<SubmissionRecord> = lock(&self.submissions)?
            .values()
            .filter(|row| row.needs_help && !row.status.is_terminal())
            .cloned()
            .collect();

        let mut out = Vec::new();
        for row in rows {
            let Some(task) = tasks.get(&row.key.task_id) else {
                continue;
            };
            if !task.is_owned_by(teacher_id) {
                continue;
            }
            let student = students
                .get(&row.key.student_id)
                .cloned()
                .unwrap_or_else(|| StudentRecord::unknown(row.key.student_id));
            let requested_at = row.help_requested_at;
            out.push(HelpRequestRecord {
                submission: to_submission(row)?,
                task: task.clone(),
                student,
                requested_at,
            });
        }
        out.sort_by_key(|r| (r.requested_at, r.submission.key()));
        Ok(out)
    }
}

/// Which stored statuses may move to `target` through `save_status`.
#[must_use]
pub fn status_transition_allowed(current: SubmissionStatus, target: SubmissionStatus) -> bool {
    match target {
        SubmissionStatus::Submitted => !current.is_terminal(),
        SubmissionStatus::Completed => current != SubmissionStatus::Completed,
        SubmissionStatus::NotStarted | SubmissionStatus::InProgress => false,
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub tasks: Arc<dyn TaskRepository>,
    pub students: Arc<dyn StudentRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(&InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_in_memory(repo: &InMemoryRepository) -> Self {
        let tasks: Arc<dyn TaskRepository> = Arc::new(repo.clone());
        let students: Arc<dyn StudentRepository> = Arc::new(repo.clone());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(repo.clone());
        Self {
            tasks,
            students,
            submissions,
        }
    }
}
