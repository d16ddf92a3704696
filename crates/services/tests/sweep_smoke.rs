use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use course_core::catalog::{Lesson, LessonCatalog};
use course_core::model::{LearnerId, LearnerRecord, MessageRef, Phase};
use course_core::time::{fixed_clock, fixed_now};
use services::{
    NotificationGateway, NotifyError, ProgressionEngine, RecordingGateway, SweepConfig,
    SweepScheduler,
};
use storage::repository::InMemoryRepository;
use storage::ProgressStore;
use tokio::sync::watch;

fn catalog(lessons: u32) -> Arc<LessonCatalog> {
    let lessons = (1..=lessons)
        .map(|n| {
            Lesson::new(
                n,
                format!("Lesson {n}"),
                format!("Content {n}"),
                format!("Question {n}?"),
                vec![format!("A{n}"), format!("B{n}")],
                format!("A{n}"),
            )
        })
        .collect();
    Arc::new(LessonCatalog::from_lessons(lessons).unwrap())
}

fn scheduler(
    repo: &InMemoryRepository,
    gateway: Arc<dyn NotificationGateway>,
) -> SweepScheduler {
    let clock = fixed_clock();
    let engine = Arc::new(ProgressionEngine::new(
        clock,
        catalog(10),
        Arc::new(repo.clone()),
        gateway,
        Arc::new(repo.clone()),
    ));
    SweepScheduler::new(engine, Arc::new(repo.clone()), clock)
}

#[tokio::test]
async fn tick_delivers_every_due_learner() {
    let repo = InMemoryRepository::new();
    let gateway = RecordingGateway::new();
    let now = fixed_now();

    for id in 1..=3 {
        let record = LearnerRecord::new(LearnerId::new(id), format!("L{id}"), "s", now);
        repo.insert(&record).await.unwrap();
    }

    let sweep = scheduler(&repo, Arc::new(gateway.clone()));
    let report = sweep.tick_once().await.unwrap();

    assert_eq!(report.examined, 3);
    assert_eq!(report.applied, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(gateway.sent_count(), 3);

    for id in 1..=3 {
        let stored = repo.load(LearnerId::new(id)).await.unwrap();
        assert_eq!(stored.phase(), Phase::Idle);
        assert!(stored.next_question_at().is_some());
    }
}

#[tokio::test]
async fn empty_tick_reports_nothing_examined() {
    let repo = InMemoryRepository::new();
    let sweep = scheduler(&repo, Arc::new(RecordingGateway::new()));

    let report = sweep.tick_once().await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(report.applied, 0);
}

/// Delegates to a recording gateway but refuses delivery to one learner.
#[derive(Clone)]
struct FlakyGateway {
    inner: RecordingGateway,
    refuse: LearnerId,
}

#[async_trait]
impl NotificationGateway for FlakyGateway {
    async fn send_lesson(
        &self,
        learner: LearnerId,
        lesson: u32,
        content: &str,
    ) -> Result<MessageRef, NotifyError> {
        if learner == self.refuse {
            return Err(NotifyError::Rejected("unreachable learner".into()));
        }
        self.inner.send_lesson(learner, lesson, content).await
    }

    async fn send_question(
        &self,
        learner: LearnerId,
        lesson: u32,
        question: &str,
        options: &[String],
    ) -> Result<(), NotifyError> {
        if learner == self.refuse {
            return Err(NotifyError::Rejected("unreachable learner".into()));
        }
        self.inner.send_question(learner, lesson, question, options).await
    }

    async fn send_notice(&self, learner: LearnerId, text: &str) -> Result<(), NotifyError> {
        if learner == self.refuse {
            return Err(NotifyError::Rejected("unreachable learner".into()));
        }
        self.inner.send_notice(learner, text).await
    }

    async fn withdraw(&self, learner: LearnerId, message: &MessageRef) -> Result<(), NotifyError> {
        self.inner.withdraw(learner, message).await
    }
}

#[tokio::test]
async fn one_failing_learner_does_not_stall_the_rest() {
    let repo = InMemoryRepository::new();
    let recording = RecordingGateway::new();
    let gateway = FlakyGateway {
        inner: recording.clone(),
        refuse: LearnerId::new(2),
    };
    let now = fixed_now();

    for id in 1..=3 {
        let record = LearnerRecord::new(LearnerId::new(id), format!("L{id}"), "s", now);
        repo.insert(&record).await.unwrap();
    }

    let sweep = scheduler(&repo, Arc::new(gateway));
    let report = sweep.tick_once().await.unwrap();

    assert_eq!(report.examined, 3);
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 1);

    // the failed learner is still due and gets retried on the next tick,
    // while the delivered ones are not re-examined
    let report = sweep.tick_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(report.failed, 1);

    let stuck = repo.load(LearnerId::new(2)).await.unwrap();
    assert_eq!(stuck.next_lesson_at(), Some(now));
    assert_eq!(recording.sent_count(), 2);
}

#[tokio::test]
async fn run_stops_on_shutdown_signal() {
    let repo = InMemoryRepository::new();
    let sweep = scheduler(&repo, Arc::new(RecordingGateway::new())).with_config(SweepConfig {
        period: StdDuration::from_millis(5),
        ..SweepConfig::default()
    });

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { sweep.run(rx).await });

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .expect("sweep should stop on shutdown")
        .unwrap();
}
