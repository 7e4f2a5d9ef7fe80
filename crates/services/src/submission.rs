use std::sync::Arc;

use classroom_core::model::{SubmissionError, SubmissionKey, Task, TaskId, TaskSubmission, Viewer};
use classroom_core::progress::ProgressReport;
use storage::repository::{StorageError, SubmissionRepository, TaskRepository};

use crate::Clock;
use crate::error::SubmissionServiceError;
use crate::gate::WriteGates;

/// A submission together with the task it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionView {
    pub task: Task,
    pub submission: TaskSubmission,
    pub progress: ProgressReport,
}

impl SubmissionView {
    fn new(task: Task, submission: TaskSubmission) -> Self {
        let progress = submission.progress_report(&task);
        Self {
            task,
            submission,
            progress,
        }
    }
}

/// Submission lifecycle outside of answer editing: opening, handing in and
/// teacher sign-off.
#[derive(Clone)]
pub struct SubmissionService {
    clock: Clock,
    tasks: Arc<dyn TaskRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    gates: Arc<WriteGates>,
}

impl SubmissionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        tasks: Arc<dyn TaskRepository>,
        submissions: Arc<dyn SubmissionRepository>,
    ) -> Self {
        Self {
            clock,
            tasks,
            submissions,
            gates: Arc::new(WriteGates::new()),
        }
    }

    #[must_use]
    pub fn with_gates(mut self, gates: Arc<WriteGates>) -> Self {
        self.gates = gates;
        self
    }

    /// The student's submission for `task_id`, or a fresh `not-started` one.
    /// Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionServiceError::Forbidden` unless the viewer is a
    /// student.
    pub async fn open(
        &self,
        viewer: &Viewer,
        task_id: TaskId,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let student_id = viewer
            .student_id()
            .ok_or(SubmissionServiceError::Forbidden)?;
        let task = self.task(task_id).await?;
        let key = SubmissionKey::new(task_id, student_id);
        let submission = self
            .submissions
            .get_submission(key)
            .await?
            .unwrap_or_else(|| TaskSubmission::new(key));
        Ok(SubmissionView::new(task, submission))
    }

    /// Load a submission for its student or the task's teacher.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionServiceError::Forbidden` for anyone else.
    pub async fn load(
        &self,
        viewer: &Viewer,
        key: SubmissionKey,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let task = self.task(key.task_id).await?;
        let allowed = match viewer {
            Viewer::Student(id) => *id == key.student_id,
            Viewer::Teacher(id) => task.is_owned_by(*id),
            Viewer::Preview => false,
        };
        if !allowed {
            return Err(SubmissionServiceError::Forbidden);
        }
        let submission = self
            .submissions
            .get_submission(key)
            .await?
            .unwrap_or_else(|| TaskSubmission::new(key));
        Ok(SubmissionView::new(task, submission))
    }

    /// Hand in the student's work. Answers become read-only.
    ///
    /// Progress below 100 does not block submission. Close any autosave
    /// session first so its pending edits are included.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionServiceError::Submission` with
    /// `SubmissionError::ReadOnly` if the work was already handed in.
    pub async fn submit(
        &self,
        viewer: &Viewer,
        task_id: TaskId,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let student_id = viewer
            .student_id()
            .ok_or(SubmissionServiceError::Forbidden)?;
        let task = self.task(task_id).await?;
        let key = SubmissionKey::new(task_id, student_id);

        let submission = {
            let _gate = self.gates.acquire(key).await;
            let mut submission = self
                .submissions
                .get_submission(key)
                .await?
                .unwrap_or_else(|| TaskSubmission::new(key));
            submission.submit(&task, self.clock.now())?;
            self.save_status(&submission).await?;
            submission
        };

        tracing::info!(
            task_id = %key.task_id,
            student_id = %key.student_id,
            progress = submission.progress(),
            "submission handed in"
        );
        Ok(SubmissionView::new(task, submission))
    }

    /// Teacher sign-off. Work that was never submitted is stamped as
    /// submitted now.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionServiceError::Forbidden` unless the viewer owns the
    /// task.
    pub async fn complete(
        &self,
        viewer: &Viewer,
        key: SubmissionKey,
    ) -> Result<SubmissionView, SubmissionServiceError> {
        let task = self.task(key.task_id).await?;
        let owner = viewer.teacher_id().is_some_and(|id| task.is_owned_by(id));
        if !owner {
            return Err(SubmissionServiceError::Forbidden);
        }

        let submission = {
            let _gate = self.gates.acquire(key).await;
            let mut submission = self
                .submissions
                .get_submission(key)
                .await?
                .unwrap_or_else(|| TaskSubmission::new(key));
            submission.complete(&task, self.clock.now())?;
            self.save_status(&submission).await?;
            submission
        };

        tracing::info!(
            task_id = %key.task_id,
            student_id = %key.student_id,
            teacher_id = %task.teacher_id(),
            "submission completed"
        );
        Ok(SubmissionView::new(task, submission))
    }

    async fn task(&self, task_id: TaskId) -> Result<Task, SubmissionServiceError> {
        self.tasks
            .get_task(task_id)
            .await?
            .ok_or(SubmissionServiceError::TaskNotFound)
    }

    async fn save_status(
        &self,
        submission: &TaskSubmission,
    ) -> Result<(), SubmissionServiceError> {
        match self.submissions.save_status(submission).await {
            Ok(()) => Ok(()),
            // Someone else finished it between our read and write.
            Err(StorageError::Conflict) => Err(SubmissionError::ReadOnly {
                status: submission.status(),
            }
            .into()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classroom_core::model::{
        AnswerValue, Answers, FieldDefinition, FieldKind, StudentId, SubmissionStatus, TaskDraft,
        TeacherId,
    };
    use classroom_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    async fn setup() -> (SubmissionService, InMemoryRepository, Task) {
        let repo = InMemoryRepository::new();
        let task = TaskDraft::new(TeacherId::new(1), "Lab report")
            .with_field(FieldDefinition::new("a", FieldKind::ShortText, "A").required())
            .with_field(FieldDefinition::new("b", FieldKind::ShortText, "B").required())
            .validate(TaskId::new(3))
            .unwrap();
        repo.upsert_task(&task).await.unwrap();
        let service = SubmissionService::new(
            Clock::fixed(fixed_now()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        (service, repo, task)
    }

    const STUDENT: Viewer = Viewer::Student(StudentId::new(9));

    fn key() -> SubmissionKey {
        SubmissionKey::new(TaskId::new(3), StudentId::new(9))
    }

    #[tokio::test]
    async fn open_does_not_create_a_row() {
        let (service, repo, _) = setup().await;
        let view = service.open(&STUDENT, TaskId::new(3)).await.unwrap();
        assert_eq!(view.submission.status(), SubmissionStatus::NotStarted);
        assert_eq!(view.progress.percent, 0);
        assert_eq!(repo.submission_count().unwrap(), 0);
        assert!(matches!(
            service.open(&Viewer::Teacher(TeacherId::new(1)), TaskId::new(3)).await,
            Err(SubmissionServiceError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn submit_keeps_answers_and_stamps_once() {
        let (service, repo, task) = setup().await;
        let mut draft = TaskSubmission::new(key());
        draft
            .record_answers(
                &task,
                Answers::from([("a".into(), AnswerValue::text("x"))]),
                fixed_now(),
            )
            .unwrap();
        repo.save_answers(&draft).await.unwrap();

        let view = service.submit(&STUDENT, TaskId::new(3)).await.unwrap();
        assert_eq!(view.submission.status(), SubmissionStatus::Submitted);
        assert_eq!(view.progress.percent, 50);

        assert!(matches!(
            service.submit(&STUDENT, TaskId::new(3)).await,
            Err(SubmissionServiceError::Submission(SubmissionError::ReadOnly { .. }))
        ));

        let teacher = Viewer::Teacher(TeacherId::new(1));
        let done = service.complete(&teacher, key()).await.unwrap();
        assert_eq!(done.submission.status(), SubmissionStatus::Completed);
        assert_eq!(done.submission.submitted_at(), Some(fixed_now()));
    }

    #[tokio::test]
    async fn only_the_owner_completes_and_loads() {
        let (service, _, _) = setup().await;
        let stranger = Viewer::Teacher(TeacherId::new(2));
        assert!(matches!(
            service.complete(&stranger, key()).await,
            Err(SubmissionServiceError::Forbidden)
        ));
        assert!(matches!(
            service.load(&Viewer::Student(StudentId::new(10)), key()).await,
            Err(SubmissionServiceError::Forbidden)
        ));

        let owner = Viewer::Teacher(TeacherId::new(1));
        let done = service.complete(&owner, key()).await.unwrap();
        assert_eq!(done.submission.submitted_at(), Some(fixed_now()));
        let loaded = service.load(&STUDENT, key()).await.unwrap();
        assert_eq!(loaded.submission.status(), SubmissionStatus::Completed);
    }

    #[tokio::test]
    async fn stored_progress_follows_status_changes_on_optional_only_tasks() {
        let (service, repo, _) = setup().await;
        let reflection = TaskDraft::new(TeacherId::new(1), "Reflection")
            .with_field(FieldDefinition::new("notes", FieldKind::LongText, "Notes"))
            .validate(TaskId::new(4))
            .unwrap();
        repo.upsert_task(&reflection).await.unwrap();

        let view = service.submit(&STUDENT, TaskId::new(4)).await.unwrap();
        assert_eq!(view.progress.percent, 100);
        assert_eq!(view.submission.progress(), 100);
        let stored = repo
            .get_submission(view.submission.key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.progress(), stored.progress_report(&reflection).percent);

        let other = SubmissionKey::new(TaskId::new(4), StudentId::new(10));
        let owner = Viewer::Teacher(TeacherId::new(1));
        let done = service.complete(&owner, other).await.unwrap();
        assert_eq!(done.submission.progress(), done.progress.percent);
        let stored = repo.get_submission(other).await.unwrap().unwrap();
        assert_eq!(stored.progress(), 100);
    }
}
