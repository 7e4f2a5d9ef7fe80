use chrono::Duration;
use classroom_core::model::{
    AnswerValue, Answers, FieldDefinition, FieldId, FieldKind, Role, StudentId, SubmissionKey,
    SubmissionStatus, Task, TaskDraft, TaskId, TaskSubmission, TeacherId, validate_message,
};
use classroom_core::time::fixed_now;
use storage::repository::{
    StorageError, StudentRecord, StudentRepository, SubmissionRepository, TaskRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn build_task(id: u64, teacher: u64) -> Task {
    let mut draft = TaskDraft::new(TeacherId::new(teacher), format!("Worksheet {id}"));
    draft.resources = vec!["https://example.org/fractions".into()];
    draft
        .with_field(FieldDefinition::new("a", FieldKind::ShortText, "A").required())
        .with_field(FieldDefinition::new("b", FieldKind::Number, "B").required())
        .with_field(FieldDefinition::new("notes", FieldKind::LongText, "Notes"))
        .validate(TaskId::new(id))
        .unwrap()
}

fn key(task: u64, student: u64) -> SubmissionKey {
    SubmissionKey::new(TaskId::new(task), StudentId::new(student))
}

fn answered(task: &Task, student: u64, edits: Answers) -> TaskSubmission {
    let mut sub = TaskSubmission::new(key(task.id().value(), student));
    sub.record_answers(task, edits, fixed_now()).unwrap();
    sub
}

#[tokio::test]
async fn task_round_trips_with_fields_and_resources() {
    let repo = connect("memdb_task_roundtrip").await;
    let task = build_task(1, 7);
    repo.upsert_task(&task).await.unwrap();

    let fetched = repo.get_task(task.id()).await.unwrap().expect("task");
    assert_eq!(fetched, task);
    assert_eq!(fetched.resources()[0].as_str(), "https://example.org/fractions");

    let listed = repo.list_tasks_for_teacher(TeacherId::new(7)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(repo.list_tasks_for_teacher(TeacherId::new(8)).await.unwrap().is_empty());
}

#[tokio::test]
async fn answers_persist_progress_without_touching_help_flags() {
    let repo = connect("memdb_answers").await;
    let task = build_task(1, 1);
    repo.upsert_task(&task).await.unwrap();

    assert!(repo.set_needs_help(key(1, 2), true, fixed_now()).await.unwrap());

    let edits = Answers::from([("a".into(), AnswerValue::text("half"))]);
    repo.save_answers(&answered(&task, 2, edits)).await.unwrap();

    let stored = repo.get_submission(key(1, 2)).await.unwrap().expect("row");
    assert_eq!(stored.progress(), 50);
    assert_eq!(stored.status(), SubmissionStatus::InProgress);
    assert_eq!(stored.last_saved(), Some(fixed_now()));
    assert!(stored.needs_help());
    assert_eq!(
        stored.answers().get(&FieldId::new("a")),
        Some(&AnswerValue::text("half"))
    );
}

#[tokio::test]
async fn submitted_rows_reject_answer_writes() {
    let repo = connect("memdb_submitted").await;
    let task = build_task(1, 1);
    repo.upsert_task(&task).await.unwrap();

    let edits = Answers::from([
        ("a".into(), AnswerValue::text("x")),
        ("b".into(), AnswerValue::Number(2.0)),
    ]);
    let mut sub = answered(&task, 3, edits);
    repo.save_answers(&sub).await.unwrap();
    sub.submit(&task, fixed_now()).unwrap();
    repo.save_status(&sub).await.unwrap();

    let late = answered(&task, 3, Answers::from([("a".into(), AnswerValue::text("y"))]));
    assert!(matches!(
        repo.save_answers(&late).await,
        Err(StorageError::Conflict)
    ));
    assert!(matches!(
        repo.save_status(&sub).await,
        Err(StorageError::Conflict)
    ));

    let mut graded = repo.get_submission(key(1, 3)).await.unwrap().expect("row");
    graded.complete(&task, fixed_now() + Duration::hours(2)).unwrap();
    repo.save_status(&graded).await.unwrap();

    let stored = repo.get_submission(key(1, 3)).await.unwrap().expect("row");
    assert_eq!(stored.status(), SubmissionStatus::Completed);
    assert_eq!(stored.submitted_at(), Some(fixed_now()));
    assert_eq!(
        stored.answers().get(&FieldId::new("a")),
        Some(&AnswerValue::text("x"))
    );
}

#[tokio::test]
async fn status_writes_store_recomputed_progress() {
    let repo = connect("memdb_status_progress").await;
    let reflection = TaskDraft::new(TeacherId::new(1), "Reflection")
        .with_field(FieldDefinition::new("notes", FieldKind::LongText, "Notes"))
        .validate(TaskId::new(2))
        .unwrap();
    repo.upsert_task(&reflection).await.unwrap();

    let mut sub = TaskSubmission::new(key(2, 3));
    sub.submit(&reflection, fixed_now()).unwrap();
    repo.save_status(&sub).await.unwrap();

    let stored = repo.get_submission(key(2, 3)).await.unwrap().expect("row");
    assert_eq!(stored.progress(), 100);
    assert_eq!(stored.progress(), stored.progress_report(&reflection).percent);

    // An existing row takes the new progress through the upsert branch too.
    let mut graded = TaskSubmission::new(key(2, 4));
    repo.set_needs_help(key(2, 4), true, fixed_now()).await.unwrap();
    graded.complete(&reflection, fixed_now()).unwrap();
    repo.save_status(&graded).await.unwrap();
    let stored = repo.get_submission(key(2, 4)).await.unwrap().expect("row");
    assert_eq!(stored.status(), SubmissionStatus::Completed);
    assert_eq!(stored.progress(), 100);
}

#[tokio::test]
async fn help_thread_keeps_order_and_unread_flag() {
    let repo = connect("memdb_thread").await;
    repo.upsert_task(&build_task(1, 1)).await.unwrap();

    let first = validate_message(Role::Student, "stuck on b", fixed_now(), 100).unwrap();
    let reply = validate_message(
        Role::Teacher,
        "try drawing it",
        fixed_now() + Duration::minutes(1),
        100,
    )
    .unwrap();
    repo.append_help_message(key(1, 4), &first).await.unwrap();
    repo.append_help_message(key(1, 4), &reply).await.unwrap();

    let stored = repo.get_submission(key(1, 4)).await.unwrap().expect("row");
    assert_eq!(stored.help_messages(), &[first, reply]);
    assert!(stored.has_unread_help());
    assert_eq!(stored.unread_recipient(), Some(Role::Student));

    assert!(repo.set_unread_help(key(1, 4), false).await.unwrap());
    assert!(!repo.set_unread_help(key(1, 4), false).await.unwrap());
}

#[tokio::test]
async fn help_queue_is_scoped_ordered_and_skips_finished_work() {
    let repo = connect("memdb_queue").await;
    let task = build_task(1, 10);
    repo.upsert_task(&task).await.unwrap();
    repo.upsert_task(&build_task(2, 20)).await.unwrap();
    repo.upsert_student(&StudentRecord::new(StudentId::new(5), "Ada"))
        .await
        .unwrap();

    let later = fixed_now() + Duration::minutes(5);
    repo.set_needs_help(key(1, 6), true, later).await.unwrap();
    repo.set_needs_help(key(1, 5), true, fixed_now()).await.unwrap();
    repo.set_needs_help(key(2, 5), true, fixed_now()).await.unwrap();

    let msg = validate_message(Role::Student, "help", fixed_now(), 100).unwrap();
    repo.append_help_message(key(1, 5), &msg).await.unwrap();

    let mut done = TaskSubmission::new(key(1, 7));
    done.submit(&task, fixed_now()).unwrap();
    repo.save_status(&done).await.unwrap();
    repo.set_needs_help(key(1, 7), true, fixed_now()).await.unwrap();

    let rows = repo
        .help_requests_for_teacher(TeacherId::new(10))
        .await
        .unwrap();
    let keys: Vec<_> = rows.iter().map(|r| r.submission.key()).collect();
    assert_eq!(keys, vec![key(1, 5), key(1, 6)]);
    assert_eq!(rows[0].student.display_name, "Ada");
    assert_eq!(rows[0].submission.help_messages().len(), 1);
    assert_eq!(rows[0].task, task);
    assert_eq!(rows[1].student, StudentRecord::unknown(StudentId::new(6)));
    assert_eq!(rows[1].requested_at, Some(later));

    assert!(repo.set_needs_help(key(1, 5), false, later).await.unwrap());
    let rows = repo
        .help_requests_for_teacher(TeacherId::new(10))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
    assert!(repo.get_task(TaskId::new(99)).await.unwrap().is_none());
    assert!(repo.get_submission(key(99, 1)).await.unwrap().is_none());
}
