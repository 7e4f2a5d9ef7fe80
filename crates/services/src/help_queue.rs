//! The teacher's view of submissions currently asking for help.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use classroom_core::model::{StudentId, SubmissionStatus, TaskId, TeacherId, Viewer};
use serde::Serialize;
use storage::repository::{HelpRequestRecord, SubmissionRepository};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::Clock;
use crate::error::HelpQueueError;
use crate::help::HelpEvent;
use crate::notify::{Notice, Notifier, TracingNotifier};

/// One flagged submission joined with its task and student.
pub type HelpRequest = HelpRequestRecord;

/// Flat, serializable summary of a [`HelpRequest`] for list rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelpQueueRow {
    pub task_id: TaskId,
    pub task_title: String,
    pub student_id: StudentId,
    pub student_name: String,
    pub status: SubmissionStatus,
    pub progress: u8,
    pub has_unread_help: bool,
    pub requested_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}

impl From<&HelpRequest> for HelpQueueRow {
    fn from(request: &HelpRequest) -> Self {
        let submission = &request.submission;
        Self {
            task_id: request.task.id(),
            task_title: request.task.title().to_owned(),
            student_id: request.student.id,
            student_name: request.student.display_name.clone(),
            status: submission.status(),
            progress: submission.progress(),
            has_unread_help: submission.has_unread_help(),
            requested_at: request.requested_at,
            last_message: submission.help_messages().last().map(|m| m.text.clone()),
        }
    }
}

/// What a running poller last published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelpQueueSnapshot {
    pub requests: Vec<HelpRequest>,
    /// Time of the last successful fetch.
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Error of the last fetch if it failed; `requests` is then the previous list.
    pub last_error: Option<String>,
    pub refreshes: u64,
}

impl HelpQueueSnapshot {
    #[must_use]
    pub fn rows(&self) -> Vec<HelpQueueRow> {
        self.requests.iter().map(HelpQueueRow::from).collect()
    }
}

#[derive(Clone)]
pub struct HelpQueueService {
    clock: Clock,
    submissions: Arc<dyn SubmissionRepository>,
    notifier: Arc<dyn Notifier>,
}

impl HelpQueueService {
    #[must_use]
    pub fn new(clock: Clock, submissions: Arc<dyn SubmissionRepository>) -> Self {
        Self {
            clock,
            submissions,
            notifier: Arc::new(TracingNotifier),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Current help requests on tasks owned by the viewing teacher, oldest
    /// request first. Submitted and completed work is never included.
    ///
    /// # Errors
    ///
    /// Returns `HelpQueueError::Forbidden` for anyone but a teacher and
    /// `HelpQueueError::Storage` if the query fails.
    pub async fn help_requests(&self, viewer: &Viewer) -> Result<Vec<HelpRequest>, HelpQueueError> {
        let teacher_id = teacher_of(viewer)?;
        fetch(self.submissions.as_ref(), teacher_id).await
    }

    /// Start polling the viewer's help queue every `interval`.
    ///
    /// The first fetch happens immediately. When `events` is given, a help
    /// event on one of the teacher's tasks triggers an early refresh. The
    /// poller runs until [`HelpQueueWatch::stop`] or until the watch is dropped.
    ///
    /// # Errors
    ///
    /// Returns `HelpQueueError::Forbidden` for anyone but a teacher.
    pub fn watch(
        &self,
        viewer: &Viewer,
        interval: Duration,
        events: Option<broadcast::Receiver<HelpEvent>>,
    ) -> Result<HelpQueueWatch, HelpQueueError> {
        let teacher_id = teacher_of(viewer)?;
        let (tx, rx) = watch::channel(HelpQueueSnapshot::default());
        let cancel = CancellationToken::new();
        let poller = Poller {
            teacher_id,
            interval,
            clock: self.clock.clone(),
            submissions: Arc::clone(&self.submissions),
            notifier: Arc::clone(&self.notifier),
        };
        let handle = tokio::spawn(poller.run(tx, events, cancel.clone()));
        tracing::debug!(%teacher_id, ?interval, "help queue polling started");

        Ok(HelpQueueWatch {
            teacher_id,
            snapshots: rx,
            cancel,
            handle: Some(handle),
        })
    }
}

fn teacher_of(viewer: &Viewer) -> Result<TeacherId, HelpQueueError> {
    viewer.teacher_id().ok_or(HelpQueueError::Forbidden)
}

/// A row on another teacher's task fails the whole fetch; nothing partial is
/// handed out.
async fn fetch(
    submissions: &dyn SubmissionRepository,
    teacher_id: TeacherId,
) -> Result<Vec<HelpRequest>, HelpQueueError> {
    let mut requests = submissions.help_requests_for_teacher(teacher_id).await?;
    if let Some(foreign) = requests.iter().find(|r| !r.task.is_owned_by(teacher_id)) {
        tracing::error!(
            %teacher_id,
            task_id = %foreign.task.id(),
            owner = %foreign.task.teacher_id(),
            "help queue returned a row outside the teacher's tasks"
        );
        return Err(HelpQueueError::Forbidden);
    }
    requests.retain(|r| r.submission.is_requesting_help());
    Ok(requests)
}

/// Handle to a running help-queue poller.
pub struct HelpQueueWatch {
    teacher_id: TeacherId,
    snapshots: watch::Receiver<HelpQueueSnapshot>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HelpQueueWatch {
    #[must_use]
    pub fn teacher_id(&self) -> TeacherId {
        self.teacher_id
    }

    #[must_use]
    pub fn snapshot(&self) -> HelpQueueSnapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HelpQueueSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the next published snapshot. `None` once the poller stopped.
    pub async fn changed(&mut self) -> Option<HelpQueueSnapshot> {
        self.snapshots.changed().await.ok()?;
        Some(self.snapshots.borrow_and_update().clone())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the poller and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(teacher_id = %self.teacher_id, error = %err, "help queue poller ended abnormally");
            }
        }
    }
}

impl Drop for HelpQueueWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Wake {
    Refresh,
    Ignore,
    EventsClosed,
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<HelpEvent>>,
    teacher_id: TeacherId,
) -> Wake {
    let Some(rx) = events.as_mut() else {
        return future::pending().await;
    };
    match rx.recv().await {
        Ok(event) if event.teacher_id() == teacher_id => Wake::Refresh,
        Ok(_) => Wake::Ignore,
        // Missed events may have been ours.
        Err(RecvError::Lagged(_)) => Wake::Refresh,
        Err(RecvError::Closed) => Wake::EventsClosed,
    }
}

struct Poller {
    teacher_id: TeacherId,
    interval: Duration,
    clock: Clock,
    submissions: Arc<dyn SubmissionRepository>,
    notifier: Arc<dyn Notifier>,
}

impl Poller {
    async fn run(
        self,
        tx: watch::Sender<HelpQueueSnapshot>,
        mut events: Option<broadcast::Receiver<HelpEvent>>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                wake = next_event(&mut events, self.teacher_id) => match wake {
                    Wake::Refresh => ticker.reset(),
                    Wake::Ignore => continue,
                    Wake::EventsClosed => {
                        events = None;
                        continue;
                    }
                },
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.refresh(&tx) => {}
            }
        }
        tracing::debug!(teacher_id = %self.teacher_id, "help queue polling stopped");
    }

    async fn refresh(&self, tx: &watch::Sender<HelpQueueSnapshot>) {
        match fetch(self.submissions.as_ref(), self.teacher_id).await {
            Ok(requests) => {
                let now = self.clock.now();
                tx.send_modify(|snapshot| {
                    snapshot.requests = requests;
                    snapshot.refreshed_at = Some(now);
                    snapshot.last_error = None;
                    snapshot.refreshes += 1;
                });
            }
            Err(err) => {
                tracing::warn!(
                    teacher_id = %self.teacher_id,
                    error = %err,
                    "help queue refresh failed; keeping previous list"
                );
                self.notifier.notify(Notice::warning(
                    None,
                    "Could not refresh help requests; retrying",
                ));
                tx.send_modify(|snapshot| snapshot.last_error = Some(err.to_string()));
            }
        }
    }
}
