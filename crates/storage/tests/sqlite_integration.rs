use chrono::Duration;
use course_core::model::{LearnerId, LearnerRecord, MessageRef, Phase};
use course_core::policy::ProgressionPolicy;
use course_core::time::fixed_now;
use storage::repository::{MistakeEntry, MistakeLog, ProgressStore, StorageError};
use storage::sqlite::SqliteRepository;

fn build_record(id: u64) -> LearnerRecord {
    LearnerRecord::new(
        LearnerId::new(id),
        format!("Learner {id}"),
        "colorist",
        fixed_now(),
    )
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_record_fields() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let policy = ProgressionPolicy::standard();
    let mut record = build_record(1);
    record.apply_lesson_delivered(fixed_now(), &policy);
    record.attach_pending_message(MessageRef::new("chat:1/99"));
    repo.insert(&record).await.unwrap();

    let loaded = repo.load(record.id()).await.expect("load");
    assert_eq!(loaded, record);
    assert_eq!(loaded.pending_message().unwrap().as_str(), "chat:1/99");
    assert_eq!(
        loaded.next_question_at(),
        Some(fixed_now() + Duration::hours(1))
    );
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_exam_snapshot() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_exam?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let policy = ProgressionPolicy::standard();
    let mut record = build_record(2);
    repo.insert(&record).await.unwrap();

    // drive the record into an exam so the JSON column is exercised
    record.apply_question_delivered();
    repo.compare_and_save(Phase::Idle, &record).await.unwrap();
    record.set_version(1);

    record.apply_correct(fixed_now(), &policy);
    record.begin_exam(vec![3, 9, 17]);
    record.apply_exam_answer(true, fixed_now(), &policy);
    repo.compare_and_save(Phase::AwaitingQuestion, &record)
        .await
        .unwrap();

    let loaded = repo.load(record.id()).await.expect("load");
    assert_eq!(loaded.phase(), Phase::AwaitingExamAnswer);
    let exam = loaded.exam().expect("exam state");
    assert_eq!(exam.questions(), &[3, 9, 17]);
    assert_eq!(exam.index(), 1);
    assert_eq!(exam.score(), 1);
}

#[tokio::test]
async fn compare_and_save_is_first_writer_wins() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_cas?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let record = build_record(3);
    repo.insert(&record).await.unwrap();

    // two copies read at the same version, both try to advance
    let mut sweep_copy = repo.load(record.id()).await.unwrap();
    let mut answer_copy = repo.load(record.id()).await.unwrap();

    sweep_copy.apply_question_delivered();
    let v = repo
        .compare_and_save(Phase::Idle, &sweep_copy)
        .await
        .expect("first write wins");
    assert_eq!(v, 1);

    answer_copy.apply_question_delivered();
    let err = repo
        .compare_and_save(Phase::Idle, &answer_copy)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    // only one advance happened
    let loaded = repo.load(record.id()).await.unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.phase(), Phase::AwaitingQuestion);
}

#[tokio::test]
async fn load_due_skips_future_and_finished_records() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_due?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let now = fixed_now();

    let due = LearnerRecord::new(LearnerId::new(1), "Due", "s", now - Duration::minutes(5));
    let future = LearnerRecord::new(LearnerId::new(2), "Future", "s", now + Duration::hours(1));
    let mut finished = LearnerRecord::new(LearnerId::new(3), "Done", "s", now);
    finished.finish();
    let mut waiting = LearnerRecord::new(LearnerId::new(4), "Asked", "s", now);
    waiting.apply_question_delivered();

    for r in [&due, &future, &finished, &waiting] {
        repo.insert(r).await.unwrap();
    }

    let found = repo.load_due(now, 16).await.expect("load_due");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), LearnerId::new(1));

    assert_eq!(repo.count_active().await.unwrap(), 3);
}

#[tokio::test]
async fn load_due_orders_by_earliest_timer_and_limits() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_order?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let now = fixed_now();
    for (id, minutes_ago) in [(1_u64, 5_i64), (2, 50), (3, 20)] {
        let r = LearnerRecord::new(
            LearnerId::new(id),
            format!("L{id}"),
            "s",
            now - Duration::minutes(minutes_ago),
        );
        repo.insert(&r).await.unwrap();
    }

    let found = repo.load_due(now, 2).await.expect("load_due");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id(), LearnerId::new(2));
    assert_eq!(found[1].id(), LearnerId::new(3));
}

#[tokio::test]
async fn mistakes_append_and_scan_per_learner() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_mistakes?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let record = build_record(9);
    repo.insert(&record).await.unwrap();

    let entry = MistakeEntry {
        id: None,
        learner_id: record.id(),
        lesson: 2,
        question: "Which pigment is primary?".into(),
        submitted: "orange".into(),
        expected: "yellow".into(),
        recorded_at: fixed_now(),
    };
    let first = repo.record_mistake(&entry).await.expect("append");
    let second = repo.record_mistake(&entry).await.expect("append");
    assert!(second > first);

    let listed = repo.mistakes_for(record.id()).await.expect("scan");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].expected, "yellow");

    let other = repo.mistakes_for(LearnerId::new(999)).await.expect("scan");
    assert!(other.is_empty());
}

#[tokio::test]
async fn duplicate_insert_reports_conflict() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_dup?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let record = build_record(5);
    repo.insert(&record).await.unwrap();
    let err = repo.insert(&record).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
}
