//! Debounced answer persistence.
//!
//! [`AutosaveCoordinator::open`] hands out one [`AutosaveSession`] per open
//! task view. Each session owns a worker task with a single pending slot
//! (edits merged per field) and runs at most one write at a time; the shared
//! [`WriteGates`] extend that to every session and service writing the same
//! submission.

mod session;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use classroom_core::model::{StudentId, SubmissionKey, TaskId, TaskSubmission, Viewer};
use storage::repository::{SubmissionRepository, TaskRepository};

use crate::Clock;
use crate::error::AutosaveError;
use crate::gate::WriteGates;
use crate::notify::{Notifier, TracingNotifier};

pub use session::{AutosaveSession, SaveState};

/// Placeholder student for preview sessions. Preview keys never reach storage.
const PREVIEW_STUDENT: StudentId = StudentId::new(0);

#[derive(Clone)]
pub struct AutosaveCoordinator {
    clock: Clock,
    debounce: Duration,
    tasks: Arc<dyn TaskRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    notifier: Arc<dyn Notifier>,
    gates: Arc<WriteGates>,
}

impl AutosaveCoordinator {
    #[must_use]
    pub fn new(
        clock: Clock,
        debounce: Duration,
        tasks: Arc<dyn TaskRepository>,
        submissions: Arc<dyn SubmissionRepository>,
    ) -> Self {
        Self {
            clock,
            debounce,
            tasks,
            submissions,
            notifier: Arc::new(TracingNotifier),
            gates: Arc::new(WriteGates::new()),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share write gates with other writers of the same store.
    #[must_use]
    pub fn with_gates(mut self, gates: Arc<WriteGates>) -> Self {
        self.gates = gates;
        self
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Open an editing session for `viewer` on `task_id`.
    ///
    /// Students get their stored submission, or a fresh `not-started` one that
    /// is persisted on the first write. Preview viewers get an in-memory
    /// session that never touches the submission store.
    ///
    /// # Errors
    ///
    /// Returns `AutosaveError::TaskNotFound` for unknown tasks,
    /// `AutosaveError::Forbidden` for teachers, and
    /// `AutosaveError::Storage` if loading fails.
    pub async fn open(
        &self,
        viewer: &Viewer,
        task_id: TaskId,
    ) -> Result<AutosaveSession, AutosaveError> {
        let task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or(AutosaveError::TaskNotFound)?;

        let (record, preview) = match viewer {
            Viewer::Student(student_id) => {
                let key = SubmissionKey::new(task_id, *student_id);
                let record = self
                    .submissions
                    .get_submission(key)
                    .await?
                    .unwrap_or_else(|| TaskSubmission::new(key));
                (record, false)
            }
            Viewer::Preview => (
                TaskSubmission::new(SubmissionKey::new(task_id, PREVIEW_STUDENT)),
                true,
            ),
            Viewer::Teacher(_) => return Err(AutosaveError::Forbidden),
        };

        let worker = worker::Worker {
            key: record.key(),
            task: Arc::new(task),
            preview,
            debounce: self.debounce,
            clock: self.clock.clone(),
            submissions: Arc::clone(&self.submissions),
            notifier: Arc::clone(&self.notifier),
            gates: Arc::clone(&self.gates),
        };
        Ok(AutosaveSession::start(worker, record))
    }
}
