use std::sync::Arc;

use classroom_core::model::{
    HelpMessage, Role, SubmissionKey, Task, TeacherId, Viewer, validate_message,
};
use storage::repository::{SubmissionRepository, TaskRepository};
use tokio::sync::broadcast;

use crate::Clock;
use crate::error::HelpError;
use crate::notify::{Notice, Notifier, TracingNotifier};

const EVENT_CAPACITY: usize = 64;

/// A state change on the help channel, published after it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelpEvent {
    Raised {
        key: SubmissionKey,
        teacher_id: TeacherId,
    },
    Cleared {
        key: SubmissionKey,
        teacher_id: TeacherId,
        by: Role,
    },
    MessagePosted {
        key: SubmissionKey,
        teacher_id: TeacherId,
        author: Role,
    },
    Read {
        key: SubmissionKey,
        teacher_id: TeacherId,
        reader: Role,
    },
}

impl HelpEvent {
    #[must_use]
    pub fn key(&self) -> SubmissionKey {
        match self {
            HelpEvent::Raised { key, .. }
            | HelpEvent::Cleared { key, .. }
            | HelpEvent::MessagePosted { key, .. }
            | HelpEvent::Read { key, .. } => *key,
        }
    }

    /// Owner of the task the event belongs to.
    #[must_use]
    pub fn teacher_id(&self) -> TeacherId {
        match self {
            HelpEvent::Raised { teacher_id, .. }
            | HelpEvent::Cleared { teacher_id, .. }
            | HelpEvent::MessagePosted { teacher_id, .. }
            | HelpEvent::Read { teacher_id, .. } => *teacher_id,
        }
    }
}

/// Help flag and message thread between a student and the task's teacher.
#[derive(Clone)]
pub struct HelpService {
    clock: Clock,
    max_message_len: usize,
    tasks: Arc<dyn TaskRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<HelpEvent>,
}

impl HelpService {
    #[must_use]
    pub fn new(
        clock: Clock,
        max_message_len: usize,
        tasks: Arc<dyn TaskRepository>,
        submissions: Arc<dyn SubmissionRepository>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clock,
            max_message_len,
            tasks,
            submissions,
            notifier: Arc::new(TracingNotifier),
            events,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Receive every help event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HelpEvent> {
        self.events.subscribe()
    }

    /// Raise the help flag on the student's own submission.
    ///
    /// Returns `false` when the flag was already raised; nothing is written,
    /// logged or published in that case.
    ///
    /// # Errors
    ///
    /// Returns `HelpError::Forbidden` unless the viewer is the submitting
    /// student, and `HelpError::Finished` for submitted or completed work.
    pub async fn request_help(
        &self,
        viewer: &Viewer,
        key: SubmissionKey,
    ) -> Result<bool, HelpError> {
        let (task, role) = self.authorize(viewer, key).await?;
        if role != Role::Student {
            return Err(HelpError::Forbidden);
        }
        if let Some(current) = self.submissions.get_submission(key).await? {
            if current.is_read_only() {
                return Err(HelpError::Finished {
                    status: current.status(),
                });
            }
            if current.needs_help() {
                return Ok(false);
            }
        }

        let changed = self
            .submissions
            .set_needs_help(key, true, self.clock.now())
            .await?;
        if changed {
            tracing::info!(
                task_id = %key.task_id,
                student_id = %key.student_id,
                teacher_id = %task.teacher_id(),
                "help requested"
            );
            self.publish(HelpEvent::Raised {
                key,
                teacher_id: task.teacher_id(),
            });
            self.notifier
                .notify(Notice::info(Some(key), "Your teacher has been notified"));
        }
        Ok(changed)
    }

    /// Clear the help flag. Allowed for the student and the owning teacher.
    ///
    /// # Errors
    ///
    /// Returns `HelpError::Forbidden` for anyone else.
    pub async fn clear_help(&self, viewer: &Viewer, key: SubmissionKey) -> Result<bool, HelpError> {
        let (task, role) = self.authorize(viewer, key).await?;
        let changed = self
            .submissions
            .set_needs_help(key, false, self.clock.now())
            .await?;
        if changed {
            tracing::info!(
                task_id = %key.task_id,
                student_id = %key.student_id,
                by = %role,
                "help request cleared"
            );
            self.publish(HelpEvent::Cleared {
                key,
                teacher_id: task.teacher_id(),
                by: role,
            });
        }
        Ok(changed)
    }

    /// Append a message to the thread. The help flag is left alone.
    ///
    /// # Errors
    ///
    /// Returns `HelpError::Message` for blank or oversized text and
    /// `HelpError::Forbidden` for viewers outside the thread.
    pub async fn post_message(
        &self,
        viewer: &Viewer,
        key: SubmissionKey,
        text: &str,
    ) -> Result<HelpMessage, HelpError> {
        let (task, author) = self.authorize(viewer, key).await?;
        let message = validate_message(author, text, self.clock.now(), self.max_message_len)?;
        self.submissions.append_help_message(key, &message).await?;

        tracing::info!(
            task_id = %key.task_id,
            student_id = %key.student_id,
            %author,
            chars = message.text.chars().count(),
            "help message posted"
        );
        self.publish(HelpEvent::MessagePosted {
            key,
            teacher_id: task.teacher_id(),
            author,
        });
        self.notifier.notify(Notice::info(Some(key), "Message sent"));
        Ok(message)
    }

    /// Clear the unread flag if the viewer is the recipient of the latest
    /// message. The flag is shared by both sides of the thread.
    ///
    /// # Errors
    ///
    /// Returns `HelpError::Forbidden` for viewers outside the thread.
    pub async fn mark_read(&self, viewer: &Viewer, key: SubmissionKey) -> Result<bool, HelpError> {
        let (task, role) = self.authorize(viewer, key).await?;
        let Some(submission) = self.submissions.get_submission(key).await? else {
            return Ok(false);
        };
        if submission.unread_recipient() != Some(role) {
            return Ok(false);
        }

        let changed = self.submissions.set_unread_help(key, false).await?;
        if changed {
            tracing::debug!(
                task_id = %key.task_id,
                student_id = %key.student_id,
                reader = %role,
                "help thread read"
            );
            self.publish(HelpEvent::Read {
                key,
                teacher_id: task.teacher_id(),
                reader: role,
            });
        }
        Ok(changed)
    }

    /// Messages in the order they were posted.
    ///
    /// # Errors
    ///
    /// Returns `HelpError::Forbidden` for viewers outside the thread.
    pub async fn thread(
        &self,
        viewer: &Viewer,
        key: SubmissionKey,
    ) -> Result<Vec<HelpMessage>, HelpError> {
        self.authorize(viewer, key).await?;
        Ok(self
            .submissions
            .get_submission(key)
            .await?
            .map(|s| s.help_messages().to_vec())
            .unwrap_or_default())
    }

    async fn authorize(
        &self,
        viewer: &Viewer,
        key: SubmissionKey,
    ) -> Result<(Task, Role), HelpError> {
        if viewer.is_preview() {
            return Err(HelpError::Preview);
        }
        let task = self
            .tasks
            .get_task(key.task_id)
            .await?
            .ok_or(HelpError::NotFound)?;
        let role = match viewer {
            Viewer::Student(id) if *id == key.student_id => Role::Student,
            Viewer::Teacher(id) if task.is_owned_by(*id) => Role::Teacher,
            _ => return Err(HelpError::Forbidden),
        };
        Ok((task, role))
    }

    fn publish(&self, event: HelpEvent) {
        // No subscribers is fine; polling still picks the change up.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classroom_core::model::{
        FieldDefinition, FieldKind, StudentId, SubmissionError, TaskDraft, TaskId,
    };
    use classroom_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    use crate::notify::{CollectingNotifier, NoticeLevel};

    async fn setup() -> (HelpService, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        let task = TaskDraft::new(TeacherId::new(1), "Essay")
            .with_field(FieldDefinition::new("a", FieldKind::LongText, "A").required())
            .validate(TaskId::new(1))
            .unwrap();
        repo.upsert_task(&task).await.unwrap();
        let service = HelpService::new(
            Clock::fixed(fixed_now()),
            20,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        (service, repo)
    }

    fn key() -> SubmissionKey {
        SubmissionKey::new(TaskId::new(1), StudentId::new(5))
    }

    const STUDENT: Viewer = Viewer::Student(StudentId::new(5));
    const TEACHER: Viewer = Viewer::Teacher(TeacherId::new(1));

    #[tokio::test]
    async fn second_request_is_a_no_op() {
        let (service, repo) = setup().await;
        let mut events = service.subscribe();

        assert!(service.request_help(&STUDENT, key()).await.unwrap());
        assert!(!service.request_help(&STUDENT, key()).await.unwrap());

        let stored = repo.get_submission(key()).await.unwrap().unwrap();
        assert!(stored.needs_help());
        assert!(matches!(events.try_recv(), Ok(HelpEvent::Raised { .. })));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_students_and_teachers_are_rejected() {
        let (service, _) = setup().await;
        let intruder = Viewer::Student(StudentId::new(6));
        let other_teacher = Viewer::Teacher(TeacherId::new(2));

        assert!(matches!(
            service.request_help(&intruder, key()).await,
            Err(HelpError::Forbidden)
        ));
        assert!(matches!(
            service.clear_help(&other_teacher, key()).await,
            Err(HelpError::Forbidden)
        ));
        assert!(matches!(
            service.request_help(&TEACHER, key()).await,
            Err(HelpError::Forbidden)
        ));
        assert!(matches!(
            service.post_message(&Viewer::Preview, key(), "hi").await,
            Err(HelpError::Preview)
        ));
    }

    #[tokio::test]
    async fn messages_do_not_touch_the_flag_and_unread_follows_the_recipient() {
        let (service, repo) = setup().await;

        service.post_message(&STUDENT, key(), "  I'm stuck ").await.unwrap();
        let stored = repo.get_submission(key()).await.unwrap().unwrap();
        assert!(!stored.needs_help());
        assert_eq!(stored.help_messages()[0].text, "I'm stuck");

        // The author reading their own message leaves it unread for the teacher.
        assert!(!service.mark_read(&STUDENT, key()).await.unwrap());
        assert!(service.mark_read(&TEACHER, key()).await.unwrap());

        service.post_message(&TEACHER, key(), "Look at slide 4").await.unwrap();
        assert!(!service.mark_read(&TEACHER, key()).await.unwrap());
        assert!(service.mark_read(&STUDENT, key()).await.unwrap());

        let thread = service.thread(&TEACHER, key()).await.unwrap();
        let authors: Vec<_> = thread.iter().map(|m| m.author).collect();
        assert_eq!(authors, vec![Role::Student, Role::Teacher]);
    }

    #[tokio::test]
    async fn message_limits_are_enforced() {
        let (service, _) = setup().await;
        assert!(matches!(
            service.post_message(&STUDENT, key(), "   ").await,
            Err(HelpError::Message(SubmissionError::EmptyMessage))
        ));
        assert!(matches!(
            service.post_message(&STUDENT, key(), &"x".repeat(21)).await,
            Err(HelpError::Message(SubmissionError::MessageTooLong { max: 20 }))
        ));
    }

    #[tokio::test]
    async fn students_are_told_when_help_is_requested() {
        let (service, _) = setup().await;
        let notices = Arc::new(CollectingNotifier::new());
        let service = service.with_notifier(notices.clone());

        service.request_help(&STUDENT, key()).await.unwrap();
        service.request_help(&STUDENT, key()).await.unwrap();
        service.post_message(&STUDENT, key(), "where is q2?").await.unwrap();

        let notices = notices.take();
        let messages: Vec<_> = notices.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["Your teacher has been notified", "Message sent"]);
        assert!(notices.iter().all(|n| n.level == NoticeLevel::Info));
        assert!(notices.iter().all(|n| n.key == Some(key())));
    }

    #[tokio::test]
    async fn teacher_can_clear_and_finished_work_cannot_raise() {
        let (service, repo) = setup().await;
        service.request_help(&STUDENT, key()).await.unwrap();
        assert!(service.clear_help(&TEACHER, key()).await.unwrap());
        assert!(!service.clear_help(&TEACHER, key()).await.unwrap());

        let task = repo.get_task(TaskId::new(1)).await.unwrap().unwrap();
        let mut done = repo.get_submission(key()).await.unwrap().unwrap();
        done.submit(&task, fixed_now()).unwrap();
        repo.save_status(&done).await.unwrap();
        assert!(matches!(
            service.request_help(&STUDENT, key()).await,
            Err(HelpError::Finished { .. })
        ));
    }
}
