use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use classroom_core::model::{
    AnswerValue, Answers, FieldId, SubmissionKey, SubmissionStatus, Task, TaskSubmission,
};
use classroom_core::progress::{self, ProgressReport};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker::{Command, Worker};
use crate::error::AutosaveError;

/// Where a session's edits stand relative to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    /// Nothing unsaved.
    Idle,
    /// Edits are waiting for the debounce window to close.
    Pending,
    Saving,
    Saved { at: DateTime<Utc>, progress: u8 },
    /// The last write failed; the edits stay queued for the next window.
    Failed { error: String },
    ReadOnly { status: SubmissionStatus },
}

/// State shared between a session handle and its worker.
#[derive(Debug)]
pub(super) struct Buffer {
    /// Last persisted record (the in-memory record for previews).
    pub record: TaskSubmission,
    /// `record` answers plus every edit not yet persisted.
    pub answers: Answers,
    /// Edits waiting for the next write, latest value per field.
    pub pending: Answers,
    /// Set once a write found the submission submitted or completed.
    pub read_only: Option<SubmissionStatus>,
}

impl Buffer {
    pub fn read_only_status(&self) -> Option<SubmissionStatus> {
        self.read_only
            .or_else(|| self.record.is_read_only().then(|| self.record.status()))
    }
}

pub(super) fn lock(buffer: &Mutex<Buffer>) -> MutexGuard<'_, Buffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one open task view.
///
/// Call [`AutosaveSession::close`] when the view goes away so pending edits
/// are flushed. Dropping the handle instead cancels the worker and discards
/// anything not yet written.
pub struct AutosaveSession {
    key: SubmissionKey,
    preview: bool,
    task: Arc<Task>,
    buffer: Arc<Mutex<Buffer>>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SaveState>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AutosaveSession {
    pub(super) fn start(worker: Worker, record: TaskSubmission) -> Self {
        let buffer = Arc::new(Mutex::new(Buffer {
            answers: record.answers().clone(),
            record,
            pending: Answers::new(),
            read_only: None,
        }));
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SaveState::Idle);
        let cancel = CancellationToken::new();

        let key = worker.key;
        let preview = worker.preview;
        let task = Arc::clone(&worker.task);
        let handle = tokio::spawn(worker.run(Arc::clone(&buffer), state_tx, rx, cancel.clone()));

        Self {
            key,
            preview,
            task,
            buffer,
            commands,
            state,
            cancel,
            worker: Some(handle),
        }
    }

    #[must_use]
    pub fn key(&self) -> SubmissionKey {
        self.key
    }

    #[must_use]
    pub fn is_preview(&self) -> bool {
        self.preview
    }

    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Record an answer change. The write happens when the current debounce
    /// window closes, or on [`AutosaveSession::save_now`].
    ///
    /// Returns progress including this edit, before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns `AutosaveError::ReadOnly` once the submission is submitted or
    /// completed, and `AutosaveError::Closed` if the worker has stopped.
    pub fn edit(
        &self,
        field: impl Into<FieldId>,
        value: AnswerValue,
    ) -> Result<ProgressReport, AutosaveError> {
        let report = {
            let mut buffer = lock(&self.buffer);
            if let Some(status) = buffer.read_only_status() {
                return Err(AutosaveError::ReadOnly { status });
            }
            let field = field.into();
            buffer.answers.insert(field.clone(), value.clone());
            buffer.pending.insert(field, value);
            progress::calculate(self.task.fields(), &buffer.answers, true)
        };
        self.commands
            .send(Command::Edited)
            .map_err(|_| AutosaveError::Closed)?;
        Ok(report)
    }

    /// Persist pending edits now instead of waiting for the window.
    ///
    /// Returns `None` when there was nothing to write.
    ///
    /// # Errors
    ///
    /// Returns `AutosaveError::ReadOnly` if the submission was finished in the
    /// meantime, `AutosaveError::Storage` if the write failed (the edits stay
    /// queued), and `AutosaveError::Closed` if the worker has stopped.
    pub async fn save_now(&self) -> Result<Option<ProgressReport>, AutosaveError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .map_err(|_| AutosaveError::Closed)?;
        response.await.map_err(|_| AutosaveError::Closed)?
    }

    /// Flush pending edits and stop the worker.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any. The worker is stopped either way.
    pub async fn close(mut self) -> Result<(), AutosaveError> {
        let flushed = self.save_now().await;
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                tracing::error!(key = %self.key, error = %err, "autosave worker ended abnormally");
            }
        }
        if let Err(err) = &flushed {
            let unsaved = lock(&self.buffer).pending.len();
            tracing::warn!(
                task_id = %self.key.task_id,
                student_id = %self.key.student_id,
                unsaved,
                error = %err,
                "closing autosave session without saving"
            );
        }
        flushed.map(|_| ())
    }

    #[must_use]
    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    /// Watch save state changes, e.g. to drive a "Saved" indicator.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.state.clone()
    }

    /// The last persisted record (the in-memory record for previews).
    #[must_use]
    pub fn submission(&self) -> TaskSubmission {
        lock(&self.buffer).record.clone()
    }

    /// Current answers including unsaved edits.
    #[must_use]
    pub fn answers(&self) -> Answers {
        lock(&self.buffer).answers.clone()
    }

    /// Progress of the current answers including unsaved edits.
    #[must_use]
    pub fn progress(&self) -> ProgressReport {
        let buffer = lock(&self.buffer);
        let touched = buffer.record.is_touched() || !buffer.pending.is_empty();
        progress::calculate(self.task.fields(), &buffer.answers, touched)
    }

    #[must_use]
    pub fn has_unsaved_edits(&self) -> bool {
        !lock(&self.buffer).pending.is_empty()
    }
}

impl Drop for AutosaveSession {
    fn drop(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let discarded = lock(&self.buffer).pending.len();
        if discarded > 0 {
            tracing::warn!(
                task_id = %self.key.task_id,
                student_id = %self.key.student_id,
                discarded,
                "autosave session dropped with unsaved edits"
            );
        }
    }
}
