use std::future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use classroom_core::model::{Answers, SubmissionKey, SubmissionStatus, Task, TaskSubmission};
use classroom_core::progress::ProgressReport;
use storage::repository::{StorageError, SubmissionRepository};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::session::{Buffer, SaveState, lock};
use crate::Clock;
use crate::error::AutosaveError;
use crate::gate::WriteGates;
use crate::notify::{Notice, Notifier};

pub(super) type FlushReply = oneshot::Sender<Result<Option<ProgressReport>, AutosaveError>>;

pub(super) enum Command {
    /// The pending slot gained an edit; opens a window if none is open.
    Edited,
    Flush(FlushReply),
}

pub(super) struct Worker {
    pub key: SubmissionKey,
    pub task: Arc<Task>,
    pub preview: bool,
    pub debounce: Duration,
    pub clock: Clock,
    pub submissions: Arc<dyn SubmissionRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub gates: Arc<WriteGates>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

impl Worker {
    pub(super) async fn run(
        self,
        buffer: Arc<Mutex<Buffer>>,
        state: watch::Sender<SaveState>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        // The window is fixed: it opens at the first unsaved edit and is not
        // pushed back by later ones.
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = wait_until(deadline) => {
                    deadline = None;
                    let result = self.persist(&buffer, &state, false).await;
                    if matches!(&result, Err(err) if err.is_transient()) {
                        deadline = Some(Instant::now() + self.debounce);
                    }
                }
                command = commands.recv() => match command {
                    None => break,
                    Some(Command::Edited) => {
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.debounce);
                            state.send_replace(SaveState::Pending);
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        deadline = None;
                        let result = self.persist(&buffer, &state, true).await;
                        if matches!(&result, Err(err) if err.is_transient()) {
                            deadline = Some(Instant::now() + self.debounce);
                        }
                        let _ = reply.send(result);
                    }
                },
            }
        }
    }

    /// Move the pending slot into one write.
    async fn persist(
        &self,
        buffer: &Mutex<Buffer>,
        state: &watch::Sender<SaveState>,
        explicit: bool,
    ) -> Result<Option<ProgressReport>, AutosaveError> {
        let edits = {
            let mut buf = lock(buffer);
            if let Some(status) = buf.read_only_status() {
                buf.pending.clear();
                return Err(AutosaveError::ReadOnly { status });
            }
            std::mem::take(&mut buf.pending)
        };
        if edits.is_empty() {
            return Ok(None);
        }
        state.send_replace(SaveState::Saving);

        let outcome = if self.preview {
            self.record_in_memory(buffer, &edits)
        } else {
            self.write(&edits).await
        };

        match outcome {
            Ok((record, report)) => {
                let saved_at = record.last_saved();
                {
                    let mut buf = lock(buffer);
                    let mut answers = record.answers().clone();
                    answers.extend(buf.pending.clone());
                    buf.answers = answers;
                    buf.record = record;
                }
                tracing::debug!(
                    task_id = %self.key.task_id,
                    student_id = %self.key.student_id,
                    preview = self.preview,
                    fields = edits.len(),
                    progress = report.percent,
                    "autosaved answers"
                );
                if let Some(at) = saved_at {
                    state.send_replace(SaveState::Saved {
                        at,
                        progress: report.percent,
                    });
                }
                if explicit {
                    self.notifier.notify(Notice::info(Some(self.key), "Saved"));
                }
                Ok(Some(report))
            }
            Err(AutosaveError::ReadOnly { status }) => {
                {
                    let mut buf = lock(buffer);
                    buf.read_only = Some(status);
                    buf.pending.clear();
                    buf.answers = buf.record.answers().clone();
                }
                tracing::warn!(
                    task_id = %self.key.task_id,
                    student_id = %self.key.student_id,
                    %status,
                    discarded = edits.len(),
                    "rejected answer write on finished submission"
                );
                state.send_replace(SaveState::ReadOnly { status });
                self.notifier.notify(Notice::error(
                    Some(self.key),
                    format!("This work is {status} and can no longer be edited"),
                ));
                Err(AutosaveError::ReadOnly { status })
            }
            Err(err) => {
                {
                    // Newer edits already in the slot win over the failed batch.
                    let mut buf = lock(buffer);
                    for (field, value) in edits {
                        buf.pending.entry(field).or_insert(value);
                    }
                }
                let retry = err.is_transient();
                tracing::warn!(
                    task_id = %self.key.task_id,
                    student_id = %self.key.student_id,
                    error = %err,
                    retry,
                    "autosave failed"
                );
                state.send_replace(SaveState::Failed {
                    error: err.to_string(),
                });
                let notice = if retry {
                    Notice::warning(
                        Some(self.key),
                        "Could not save your answers; retrying shortly",
                    )
                } else {
                    Notice::error(
                        Some(self.key),
                        format!("Could not save your answers: {err}"),
                    )
                };
                self.notifier.notify(notice);
                Err(err)
            }
        }
    }

    fn record_in_memory(
        &self,
        buffer: &Mutex<Buffer>,
        edits: &Answers,
    ) -> Result<(TaskSubmission, ProgressReport), AutosaveError> {
        let mut record = lock(buffer).record.clone();
        let report = record.record_answers(&self.task, edits.clone(), self.clock.now())?;
        Ok((record, report))
    }

    /// Read-modify-write under the key's gate. Progress is computed on the
    /// record that is written, so the stored percentage always matches the
    /// stored answers.
    async fn write(
        &self,
        edits: &Answers,
    ) -> Result<(TaskSubmission, ProgressReport), AutosaveError> {
        let _gate = self.gates.acquire(self.key).await;

        let mut record = self
            .submissions
            .get_submission(self.key)
            .await?
            .unwrap_or_else(|| TaskSubmission::new(self.key));
        if record.is_read_only() {
            return Err(AutosaveError::ReadOnly {
                status: record.status(),
            });
        }

        let report = record.record_answers(&self.task, edits.clone(), self.clock.now())?;
        match self.submissions.save_answers(&record).await {
            Ok(()) => Ok((record, report)),
            Err(StorageError::Conflict) => {
                let status = self
                    .submissions
                    .get_submission(self.key)
                    .await
                    .ok()
                    .flatten()
                    .map_or(SubmissionStatus::Submitted, |stored| stored.status());
                Err(AutosaveError::ReadOnly { status })
            }
            Err(err) => Err(err.into()),
        }
    }
}
