//! User-facing notices for save and help actions.
//!
//! The engine only reports what happened; presentation belongs to whoever
//! implements [`Notifier`].

use std::sync::{Mutex, PoisonError};

use classroom_core::model::SubmissionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub key: Option<SubmissionKey>,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn info(key: Option<SubmissionKey>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            key,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(key: Option<SubmissionKey>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            key,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(key: Option<SubmissionKey>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            key,
            message: message.into(),
        }
    }
}

/// Sink for notices. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Forwards notices to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        let key = notice.key.map(|k| k.to_string());
        match notice.level {
            NoticeLevel::Info => tracing::info!(key = ?key, "{}", notice.message),
            NoticeLevel::Warning => tracing::warn!(key = ?key, "{}", notice.message),
            NoticeLevel::Error => tracing::error!(key = ?key, "{}", notice.message),
        }
    }
}

/// Buffers notices until drained, for callers that render them later.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<Notice> {
        let mut guard = self.notices.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard)
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}
