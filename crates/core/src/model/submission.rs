use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::answer::Answers;
use crate::model::ids::SubmissionKey;
use crate::model::task::Task;
use crate::model::viewer::Role;
use crate::progress::{self, ProgressReport};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("submission is {status} and can no longer be edited")]
    ReadOnly { status: SubmissionStatus },

    #[error("submission belongs to task {actual}, not {expected}")]
    TaskMismatch {
        expected: crate::model::TaskId,
        actual: crate::model::TaskId,
    },

    #[error("help message cannot be empty")]
    EmptyMessage,

    #[error("help message exceeds {max} characters")]
    MessageTooLong { max: usize },

    #[error("progress must be within 0..=100, got {0}")]
    InvalidProgress(u8),

    #[error("{status} submission is missing submitted_at")]
    MissingSubmittedAt { status: SubmissionStatus },
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionStatus {
    NotStarted,
    InProgress,
    Submitted,
    Completed,
}

impl SubmissionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::NotStarted => "not-started",
            SubmissionStatus::InProgress => "in-progress",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not-started" => Some(SubmissionStatus::NotStarted),
            "in-progress" => Some(SubmissionStatus::InProgress),
            "submitted" => Some(SubmissionStatus::Submitted),
            "completed" => Some(SubmissionStatus::Completed),
            _ => None,
        }
    }

    /// `submitted` and `completed` freeze the answers.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Submitted | SubmissionStatus::Completed
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── HELP THREAD ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpMessage {
    pub author: Role,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

//
// ─── SUBMISSION ────────────────────────────────────────────────────────────────
//

/// One student's work on one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSubmission {
    key: SubmissionKey,
    answers: Answers,
    status: SubmissionStatus,
    needs_help: bool,
    has_unread_help: bool,
    progress: u8,
    last_saved: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    help_messages: Vec<HelpMessage>,
}

impl TaskSubmission {
    /// The implicit record a student gets when first opening a task.
    #[must_use]
    pub fn new(key: SubmissionKey) -> Self {
        Self {
            key,
            answers: Answers::new(),
            status: SubmissionStatus::NotStarted,
            needs_help: false,
            has_unread_help: false,
            progress: 0,
            last_saved: None,
            submitted_at: None,
            help_messages: Vec::new(),
        }
    }

    /// Rehydrate a submission from storage.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError` if the stored progress is out of range or a
    /// terminal record lacks `submitted_at`.
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn from_persisted(
        key: SubmissionKey,
        answers: Answers,
        status: SubmissionStatus,
        needs_help: bool,
        has_unread_help: bool,
        progress: u8,
        last_saved: Option<DateTime<Utc>>,
        submitted_at: Option<DateTime<Utc>>,
        help_messages: Vec<HelpMessage>,
    ) -> Result<Self, SubmissionError> {
        if progress > 100 {
            return Err(SubmissionError::InvalidProgress(progress));
        }
        if status.is_terminal() && submitted_at.is_none() {
            return Err(SubmissionError::MissingSubmittedAt { status });
        }
        Ok(Self {
            key,
            answers,
            status,
            needs_help,
            has_unread_help,
            progress,
            last_saved,
            submitted_at,
            help_messages,
        })
    }

    #[must_use]
    pub fn key(&self) -> SubmissionKey {
        self.key
    }

    #[must_use]
    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    #[must_use]
    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    #[must_use]
    pub fn needs_help(&self) -> bool {
        self.needs_help
    }

    #[must_use]
    pub fn has_unread_help(&self) -> bool {
        self.has_unread_help
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.last_saved
    }

    #[must_use]
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    #[must_use]
    pub fn help_messages(&self) -> &[HelpMessage] {
        &self.help_messages
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when this record belongs in a teacher's help queue.
    #[must_use]
    pub fn is_requesting_help(&self) -> bool {
        self.needs_help && !self.status.is_terminal()
    }

    /// Whether anything has been recorded against this submission yet.
    #[must_use]
    pub fn is_touched(&self) -> bool {
        self.status != SubmissionStatus::NotStarted || !self.answers.is_empty()
    }

    /// Progress `answers` would have under `task`'s current schema.
    #[must_use]
    pub fn progress_report(&self, task: &Task) -> ProgressReport {
        progress::calculate(task.fields(), &self.answers, self.is_touched())
    }

    /// Merge `edits` into the answers, recompute progress and stamp
    /// `last_saved`. This is the only way answers change.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::ReadOnly` once the submission is submitted or
    /// completed, and `TaskMismatch` if `task` is not this submission's task.
    pub fn record_answers(
        &mut self,
        task: &Task,
        edits: Answers,
        saved_at: DateTime<Utc>,
    ) -> Result<ProgressReport, SubmissionError> {
        if self.status.is_terminal() {
            return Err(SubmissionError::ReadOnly {
                status: self.status,
            });
        }
        self.check_task(task)?;

        self.answers.extend(edits);
        if self.status == SubmissionStatus::NotStarted {
            self.status = SubmissionStatus::InProgress;
        }
        let report = self.refresh_progress(task);
        self.last_saved = Some(saved_at);
        Ok(report)
    }

    /// Hand the work in. `submitted_at` is set here and never again.
    ///
    /// Leaving `not-started` touches the record, so progress is recomputed
    /// against `task` (a task without required fields reaches 100 here).
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::ReadOnly` if already submitted or completed,
    /// and `TaskMismatch` if `task` is not this submission's task.
    pub fn submit(
        &mut self,
        task: &Task,
        at: DateTime<Utc>,
    ) -> Result<ProgressReport, SubmissionError> {
        if self.status.is_terminal() {
            return Err(SubmissionError::ReadOnly {
                status: self.status,
            });
        }
        self.check_task(task)?;
        self.status = SubmissionStatus::Submitted;
        self.submitted_at.get_or_insert(at);
        Ok(self.refresh_progress(task))
    }

    /// Teacher sign-off. Work that was never handed in gets `submitted_at`
    /// stamped now so the terminal invariant holds.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::ReadOnly` if already completed, and
    /// `TaskMismatch` if `task` is not this submission's task.
    pub fn complete(
        &mut self,
        task: &Task,
        at: DateTime<Utc>,
    ) -> Result<ProgressReport, SubmissionError> {
        if self.status == SubmissionStatus::Completed {
            return Err(SubmissionError::ReadOnly {
                status: self.status,
            });
        }
        self.check_task(task)?;
        self.status = SubmissionStatus::Completed;
        self.submitted_at.get_or_insert(at);
        Ok(self.refresh_progress(task))
    }

    fn check_task(&self, task: &Task) -> Result<(), SubmissionError> {
        if task.id() == self.key.task_id {
            Ok(())
        } else {
            Err(SubmissionError::TaskMismatch {
                expected: self.key.task_id,
                actual: task.id(),
            })
        }
    }

    /// Stored progress always mirrors the calculator for the current state.
    fn refresh_progress(&mut self, task: &Task) -> ProgressReport {
        let report = self.progress_report(task);
        self.progress = report.percent;
        report
    }

    /// Returns `true` if the flag changed.
    pub fn raise_help(&mut self) -> bool {
        !std::mem::replace(&mut self.needs_help, true)
    }

    /// Returns `true` if the flag changed.
    pub fn clear_help(&mut self) -> bool {
        std::mem::replace(&mut self.needs_help, false)
    }

    /// Append to the help thread and flag it unread for the other side.
    ///
    /// Messages are accepted in any status; the thread stays open after
    /// submission.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::EmptyMessage` for blank text and
    /// `MessageTooLong` when the text exceeds `max_len` characters.
    pub fn append_message(
        &mut self,
        author: Role,
        text: &str,
        sent_at: DateTime<Utc>,
        max_len: usize,
    ) -> Result<&HelpMessage, SubmissionError> {
        let message = validate_message(author, text, sent_at, max_len)?;
        Ok(self.push_message(message))
    }

    /// Append an already validated message (see [`validate_message`]).
    pub fn push_message(&mut self, message: HelpMessage) -> &HelpMessage {
        self.has_unread_help = true;
        self.help_messages.push(message);
        &self.help_messages[self.help_messages.len() - 1]
    }

    /// Role expected to read the latest message, if it is still unread.
    #[must_use]
    pub fn unread_recipient(&self) -> Option<Role> {
        if !self.has_unread_help {
            return None;
        }
        self.help_messages.last().map(|m| m.author.counterpart())
    }

    /// Clear the unread flag if `viewer` is its recipient. Returns `true` if
    /// the flag changed.
    pub fn mark_read(&mut self, viewer: Role) -> bool {
        if self.unread_recipient() == Some(viewer) {
            self.has_unread_help = false;
            true
        } else {
            false
        }
    }
}

/// Build a help message after trimming and length checks.
///
/// # Errors
///
/// Returns `SubmissionError::EmptyMessage` or `MessageTooLong`.
pub fn validate_message(
    author: Role,
    text: &str,
    sent_at: DateTime<Utc>,
    max_len: usize,
) -> Result<HelpMessage, SubmissionError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SubmissionError::EmptyMessage);
    }
    if text.chars().count() > max_len {
        return Err(SubmissionError::MessageTooLong { max: max_len });
    }
    Ok(HelpMessage {
        author,
        text: text.to_owned(),
        sent_at,
    })
}
