mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use classroom_core::model::{StudentId, TaskId, TaskSubmission, TeacherId, Viewer};
use classroom_core::time::fixed_now;
use services::{Clock, HelpQueueError, HelpQueueService, HelpService};
use storage::repository::{StudentRecord, StudentRepository, SubmissionRepository};
use support::{CountingRepository, key, store_with_tasks, two_field_task};
use tokio::time::{Instant, sleep};

const POLL: Duration = Duration::from_secs(15);
const TEACHER: Viewer = Viewer::Teacher(TeacherId::new(1));

fn queue(counting: &Arc<CountingRepository>) -> HelpQueueService {
    HelpQueueService::new(
        Clock::fixed(fixed_now()),
        Arc::clone(counting) as Arc<dyn SubmissionRepository>,
    )
}

#[tokio::test]
async fn only_the_teachers_own_open_requests_are_listed() {
    let repo = store_with_tasks(&[two_field_task(1, 1), two_field_task(2, 2)]).await;
    repo.upsert_student(&StudentRecord::new(StudentId::new(3), "Ada"))
        .await
        .unwrap();
    repo.set_needs_help(key(1, 3), true, fixed_now()).await.unwrap();
    repo.set_needs_help(key(2, 3), true, fixed_now()).await.unwrap();

    let mut finished = TaskSubmission::new(key(1, 4));
    finished.submit(&two_field_task(1, 1), fixed_now()).unwrap();
    repo.save_status(&finished).await.unwrap();
    repo.set_needs_help(key(1, 4), true, fixed_now()).await.unwrap();

    let counting = CountingRepository::new(repo);
    let requests = queue(&counting).help_requests(&TEACHER).await.unwrap();

    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].submission.key(), key(1, 3));
    assert_eq!(requests[0].task.id(), TaskId::new(1));
    assert_eq!(requests[0].student.display_name, "Ada");
}

#[tokio::test(start_paused = true)]
async fn rows_from_another_teachers_task_fail_the_whole_query() {
    let repo = store_with_tasks(&[two_field_task(1, 1), two_field_task(2, 2)]).await;
    repo.set_needs_help(key(1, 3), true, fixed_now()).await.unwrap();
    repo.set_needs_help(key(2, 3), true, fixed_now()).await.unwrap();
    let foreign = repo
        .help_requests_for_teacher(TeacherId::new(2))
        .await
        .unwrap();

    let counting = CountingRepository::new(repo);
    let service = queue(&counting);
    let mut watch = service.watch(&TEACHER, POLL, None).unwrap();
    let first = watch.changed().await.expect("initial refresh");
    assert_eq!(first.requests.len(), 1);

    counting.extra_rows.lock().unwrap().extend(foreign);
    assert!(matches!(
        service.help_requests(&TEACHER).await,
        Err(HelpQueueError::Forbidden)
    ));

    let refused = watch.changed().await.expect("next tick");
    assert_eq!(refused.requests, first.requests);
    assert!(refused.last_error.is_some());
    watch.stop().await;
}

#[tokio::test]
async fn non_teachers_are_denied_outright() {
    let repo = store_with_tasks(&[two_field_task(1, 1)]).await;
    repo.set_needs_help(key(1, 3), true, fixed_now()).await.unwrap();
    let counting = CountingRepository::new(repo);
    let service = queue(&counting);

    for viewer in [Viewer::Student(StudentId::new(3)), Viewer::Preview] {
        assert!(matches!(
            service.help_requests(&viewer).await,
            Err(HelpQueueError::Forbidden)
        ));
        assert!(matches!(
            service.watch(&viewer, POLL, None),
            Err(HelpQueueError::Forbidden)
        ));
    }
    assert_eq!(counting.queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_the_previous_list() {
    let repo = store_with_tasks(&[two_field_task(1, 1)]).await;
    repo.set_needs_help(key(1, 3), true, fixed_now()).await.unwrap();
    let counting = CountingRepository::new(repo);
    let mut watch = queue(&counting).watch(&TEACHER, POLL, None).unwrap();

    let first = watch.changed().await.expect("initial refresh");
    assert_eq!(first.requests.len(), 1);
    assert!(first.last_error.is_none());

    counting.fail_queries.store(true, Ordering::SeqCst);
    let failed = watch.changed().await.expect("second refresh");
    assert_eq!(failed.requests, first.requests);
    assert!(failed.last_error.is_some());
    assert_eq!(failed.refreshes, 1);

    counting.fail_queries.store(false, Ordering::SeqCst);
    let recovered = watch.changed().await.expect("third refresh");
    assert!(recovered.last_error.is_none());
    assert_eq!(recovered.refreshes, 2);
    watch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn help_events_refresh_before_the_next_tick() {
    let repo = store_with_tasks(&[two_field_task(1, 1)]).await;
    let counting = CountingRepository::new(repo.clone());
    let help = HelpService::new(
        Clock::fixed(fixed_now()),
        2000,
        Arc::new(repo.clone()),
        Arc::clone(&counting) as Arc<dyn SubmissionRepository>,
    );
    let mut watch = queue(&counting)
        .watch(&TEACHER, POLL, Some(help.subscribe()))
        .unwrap();
    assert!(watch.changed().await.expect("initial").requests.is_empty());

    let started = Instant::now();
    help.request_help(&Viewer::Student(StudentId::new(3)), key(1, 3))
        .await
        .unwrap();
    let snapshot = watch.changed().await.expect("event refresh");

    assert_eq!(snapshot.requests.len(), 1);
    assert!(started.elapsed() < POLL);
    assert_eq!(snapshot.rows()[0].student_name, "Student 3");
}

#[tokio::test(start_paused = true)]
async fn stopping_or_dropping_the_watch_ends_polling() {
    let repo = store_with_tasks(&[two_field_task(1, 1)]).await;
    let counting = CountingRepository::new(repo);
    let service = queue(&counting);

    let mut watch = service.watch(&TEACHER, POLL, None).unwrap();
    watch.changed().await.expect("initial");
    assert!(watch.is_running());
    watch.stop().await;
    let after_stop = counting.queries();
    sleep(POLL * 4).await;
    assert_eq!(counting.queries(), after_stop);

    let mut dropped = service.watch(&TEACHER, POLL, None).unwrap();
    dropped.changed().await.expect("initial");
    drop(dropped);
    let after_drop = counting.queries();
    sleep(POLL * 4).await;
    assert_eq!(counting.queries(), after_drop);
}
