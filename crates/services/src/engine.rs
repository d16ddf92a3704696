use std::sync::Arc;

use course_core::catalog::LessonCatalog;
use course_core::model::{LearnerId, LearnerRecord, Phase};
use course_core::policy::ProgressionPolicy;
use course_core::progression::{DueKind, ExamProgress};
use course_core::time::Clock;
use storage::repository::{MistakeEntry, MistakeLog, ProgressStore, StorageError};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::exam::sample_exam_questions;
use crate::notify::NotificationGateway;

//
// ─── OUTCOMES ──────────────────────────────────────────────────────────────────
//

/// Discriminated result of an engine operation.
///
/// Stale events, lost races, and delivery failures are ordinary outcomes
/// here, not errors: callers (and tests) assert on them, and only
/// infrastructure failures surface as `EngineError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The transition was persisted (and any delivery made).
    Applied(Applied),
    /// Nothing happened, on purpose.
    Ignored(IgnoreReason),
    /// The claim was rolled back because delivery failed; the sweep will
    /// retry on its next tick.
    Failed(FailedDelivery),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    LessonSent {
        lesson: u32,
    },
    QuestionSent {
        lesson: u32,
    },
    /// The learner moved past the last catalog entry.
    CourseFinished,
    AnswerCorrect {
        completed_lesson: u32,
        points_awarded: u32,
        bonus: bool,
        exam_started: bool,
    },
    AnswerWrong {
        lesson: u32,
    },
    ExamAdvanced {
        correct: bool,
        next_question: u32,
    },
    ExamFinished {
        score: u32,
        total: u32,
    },
    /// `on_start` re-sent the pending question.
    PendingResent,
    /// `on_start` described the current wait state.
    WaitDescribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The record is not in the phase this operation acts on: a stale or
    /// duplicate event, dropped without side effects.
    StalePhase(Phase),
    /// Neither wake-up timer has elapsed.
    NotDue,
    /// A concurrent writer got there first; the freshest state wins.
    Conflict,
    /// No record exists for this learner.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedDelivery {
    Lesson,
    Question,
    ExamQuestion,
    Notice,
}

const COMPLETION_NOTICE: &str =
    "You have completed every lesson in the course. Congratulations!";

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// The per-learner progression state machine.
///
/// The four public operations are the only code paths that mutate a learner
/// record. Each one reads the record fresh from the store, computes the next
/// state with the pure transition rules, claims the transition with a
/// compare-and-set write, and only then delivers. A lost claim means a
/// concurrent sweep tick or answer event already advanced the record, so the
/// operation backs off silently; a delivery failure after a claim is
/// compensated by restoring the prior state so the sweep retries it.
pub struct ProgressionEngine {
    clock: Clock,
    policy: ProgressionPolicy,
    catalog: Arc<LessonCatalog>,
    store: Arc<dyn ProgressStore>,
    gateway: Arc<dyn NotificationGateway>,
    mistakes: Arc<dyn MistakeLog>,
}

impl ProgressionEngine {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<LessonCatalog>,
        store: Arc<dyn ProgressStore>,
        gateway: Arc<dyn NotificationGateway>,
        mistakes: Arc<dyn MistakeLog>,
    ) -> Self {
        Self {
            clock,
            policy: ProgressionPolicy::standard(),
            catalog,
            store,
            gateway,
            mistakes,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ProgressionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ProgressionPolicy {
        &self.policy
    }

    /// Deliver whatever is due for this learner: the pending quiz question
    /// (which always wins), the next lesson, or the completion transition
    /// once the catalog is exhausted.
    ///
    /// A record outside `Idle`, or with no elapsed timer, is left alone.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` only for infrastructure failures; no in-memory
    /// or stored state is mutated in that case.
    pub async fn deliver_due(&self, id: LearnerId) -> Result<EngineOutcome, EngineError> {
        let record = match self.store.load(id).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => {
                return Ok(EngineOutcome::Ignored(IgnoreReason::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        let now = self.clock.now();
        if record.phase() != Phase::Idle {
            return Ok(EngineOutcome::Ignored(IgnoreReason::StalePhase(
                record.phase(),
            )));
        }
        let Some(due) = record.due_transition(now) else {
            return Ok(EngineOutcome::Ignored(IgnoreReason::NotDue));
        };

        match due {
            DueKind::Question => self.deliver_question(record).await,
            DueKind::Lesson => self.deliver_lesson(record).await,
        }
    }

    async fn deliver_question(
        &self,
        mut record: LearnerRecord,
    ) -> Result<EngineOutcome, EngineError> {
        let lesson_number = record.current_lesson();
        let lesson = self
            .catalog
            .get(lesson_number)
            .ok_or(EngineError::MissingLesson {
                lesson: lesson_number,
            })?;

        let prior = record.clone();
        let outstanding = record.pending_message().cloned();
        record.apply_question_delivered();

        if !self.claim(Phase::Idle, &mut record).await? {
            return Ok(EngineOutcome::Ignored(IgnoreReason::Conflict));
        }

        if let Some(message) = outstanding {
            if let Err(err) = self.gateway.withdraw(record.id(), &message).await {
                debug!(learner = %record.id(), error = %err, "could not withdraw lesson message");
            }
        }

        if let Err(err) = self
            .gateway
            .send_question(record.id(), lesson_number, lesson.question(), lesson.options())
            .await
        {
            warn!(learner = %record.id(), lesson = lesson_number, error = %err, "question delivery failed");
            self.restore(prior, &record).await;
            return Ok(EngineOutcome::Failed(FailedDelivery::Question));
        }

        info!(learner = %record.id(), lesson = lesson_number, "question delivered");
        Ok(EngineOutcome::Applied(Applied::QuestionSent {
            lesson: lesson_number,
        }))
    }

    async fn deliver_lesson(
        &self,
        mut record: LearnerRecord,
    ) -> Result<EngineOutcome, EngineError> {
        if record.current_lesson() > self.catalog.last_number() {
            record.finish();
            if !self.claim(Phase::Idle, &mut record).await? {
                return Ok(EngineOutcome::Ignored(IgnoreReason::Conflict));
            }
            if let Err(err) = self.gateway.send_notice(record.id(), COMPLETION_NOTICE).await {
                warn!(learner = %record.id(), error = %err, "completion notice failed");
            }
            info!(learner = %record.id(), "course finished");
            return Ok(EngineOutcome::Applied(Applied::CourseFinished));
        }

        let lesson_number = record.current_lesson();
        let lesson = self
            .catalog
            .get(lesson_number)
            .ok_or(EngineError::MissingLesson {
                lesson: lesson_number,
            })?;

        let now = self.clock.now();
        let prior = record.clone();
        record.apply_lesson_delivered(now, &self.policy);

        if !self.claim(Phase::Idle, &mut record).await? {
            return Ok(EngineOutcome::Ignored(IgnoreReason::Conflict));
        }

        match self
            .gateway
            .send_lesson(record.id(), lesson_number, lesson.content())
            .await
        {
            Ok(message) => {
                // A second write records the transport handle. Losing it to a
                // concurrent writer only costs the later withdrawal.
                record.attach_pending_message(message);
                match self.store.compare_and_save(Phase::Idle, &record).await {
                    Ok(version) => record.set_version(version),
                    Err(StorageError::Conflict) => {
                        debug!(learner = %record.id(), "message handle lost to a concurrent write");
                    }
                    Err(e) => return Err(e.into()),
                }
                info!(learner = %record.id(), lesson = lesson_number, "lesson delivered");
                Ok(EngineOutcome::Applied(Applied::LessonSent {
                    lesson: lesson_number,
                }))
            }
            Err(err) => {
                warn!(learner = %record.id(), lesson = lesson_number, error = %err, "lesson delivery failed");
                self.restore(prior, &record).await;
                Ok(EngineOutcome::Failed(FailedDelivery::Lesson))
            }
        }
    }

    /// Grade an inbound answer to the current lesson's quiz question.
    ///
    /// Answers arriving in any other phase (duplicates, stale submissions,
    /// answers racing a sweep) are ignored without side effects; that check
    /// is the primary defense against double-processing.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` only for infrastructure failures.
    pub async fn grade(
        &self,
        id: LearnerId,
        submitted: &str,
    ) -> Result<EngineOutcome, EngineError> {
        let mut record = match self.store.load(id).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => {
                return Ok(EngineOutcome::Ignored(IgnoreReason::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        if record.phase() != Phase::AwaitingQuestion {
            return Ok(EngineOutcome::Ignored(IgnoreReason::StalePhase(
                record.phase(),
            )));
        }

        let now = self.clock.now();
        let lesson_number = record.current_lesson();
        let lesson = self
            .catalog
            .get(lesson_number)
            .ok_or(EngineError::MissingLesson {
                lesson: lesson_number,
            })?;

        if lesson.accepts(submitted) {
            let outcome = record.apply_correct(now, &self.policy);

            let mut first_question = None;
            if outcome.exam_due {
                let window = self.exam_window(record.current_lesson());
                let questions =
                    sample_exam_questions(window, self.policy.exam_sample_size, &mut rand::rng());
                if questions.is_empty() {
                    record.schedule_next_lesson(now, &self.policy);
                } else {
                    first_question = questions.first().copied();
                    record.begin_exam(questions);
                }
            }

            if !self.claim(Phase::AwaitingQuestion, &mut record).await? {
                return Ok(EngineOutcome::Ignored(IgnoreReason::Conflict));
            }

            let exam_started = first_question.is_some();
            if let Some(question) = first_question {
                // The grade already stands; a failed send here is recovered
                // by `on_start`, which re-sends the pending exam question.
                self.send_exam_question(&record, question).await;
            }

            info!(
                learner = %id,
                lesson = lesson_number,
                points = outcome.points_awarded,
                exam_started,
                "correct answer"
            );
            Ok(EngineOutcome::Applied(Applied::AnswerCorrect {
                completed_lesson: lesson_number,
                points_awarded: outcome.points_awarded,
                bonus: outcome.bonus,
                exam_started,
            }))
        } else {
            record.apply_wrong(now, &self.policy);

            if !self.claim(Phase::AwaitingQuestion, &mut record).await? {
                return Ok(EngineOutcome::Ignored(IgnoreReason::Conflict));
            }

            let entry = MistakeEntry {
                id: None,
                learner_id: id,
                lesson: lesson_number,
                question: lesson.question().to_owned(),
                submitted: submitted.trim().to_owned(),
                expected: lesson.answer().to_owned(),
                recorded_at: now,
            };
            if let Err(err) = self.mistakes.record_mistake(&entry).await {
                warn!(learner = %id, error = %err, "mistake entry was not recorded");
            }

            info!(learner = %id, lesson = lesson_number, "wrong answer");
            Ok(EngineOutcome::Applied(Applied::AnswerWrong {
                lesson: lesson_number,
            }))
        }
    }

    /// Grade an inbound answer to the current exam question.
    ///
    /// Exam questions are not time-gated: the next one goes out as soon as
    /// the previous answer lands. On the final answer the score is reported
    /// and the lesson flow resumes after the short delay.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` only for infrastructure failures.
    pub async fn grade_exam(
        &self,
        id: LearnerId,
        submitted: &str,
    ) -> Result<EngineOutcome, EngineError> {
        let mut record = match self.store.load(id).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => {
                return Ok(EngineOutcome::Ignored(IgnoreReason::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        if record.phase() != Phase::AwaitingExamAnswer {
            return Ok(EngineOutcome::Ignored(IgnoreReason::StalePhase(
                record.phase(),
            )));
        }
        let Some(current) = record.exam().and_then(|e| e.current_question()) else {
            return Ok(EngineOutcome::Ignored(IgnoreReason::StalePhase(
                record.phase(),
            )));
        };

        let lesson = self
            .catalog
            .get(current)
            .ok_or(EngineError::MissingLesson { lesson: current })?;
        let correct = lesson.accepts(submitted);

        let now = self.clock.now();
        let Some(progress) = record.apply_exam_answer(correct, now, &self.policy) else {
            return Ok(EngineOutcome::Ignored(IgnoreReason::StalePhase(
                record.phase(),
            )));
        };

        if !self.claim(Phase::AwaitingExamAnswer, &mut record).await? {
            return Ok(EngineOutcome::Ignored(IgnoreReason::Conflict));
        }

        match progress {
            ExamProgress::Next { question } => {
                self.send_exam_question(&record, question).await;
                Ok(EngineOutcome::Applied(Applied::ExamAdvanced {
                    correct,
                    next_question: question,
                }))
            }
            ExamProgress::Completed { score, total } => {
                let text = format!(
                    "Exam finished: {score} of {total} correct. The course resumes shortly."
                );
                if let Err(err) = self.gateway.send_notice(id, &text).await {
                    warn!(learner = %id, error = %err, "exam score notice failed");
                }
                info!(learner = %id, score, total, "exam finished");
                Ok(EngineOutcome::Applied(Applied::ExamFinished { score, total }))
            }
        }
    }

    /// Handle a learner re-engaging with the bot.
    ///
    /// Idempotent: re-sends the pending lesson or exam question, or
    /// describes the wait state, without touching the record or its timers.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` only for infrastructure failures.
    pub async fn on_start(&self, id: LearnerId) -> Result<EngineOutcome, EngineError> {
        let record = match self.store.load(id).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => {
                return Ok(EngineOutcome::Ignored(IgnoreReason::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        match record.phase() {
            Phase::AwaitingQuestion => {
                let lesson_number = record.current_lesson();
                let lesson =
                    self.catalog
                        .get(lesson_number)
                        .ok_or(EngineError::MissingLesson {
                            lesson: lesson_number,
                        })?;
                match self
                    .gateway
                    .send_question(id, lesson_number, lesson.question(), lesson.options())
                    .await
                {
                    Ok(()) => Ok(EngineOutcome::Applied(Applied::PendingResent)),
                    Err(err) => {
                        warn!(learner = %id, error = %err, "question re-send failed");
                        Ok(EngineOutcome::Failed(FailedDelivery::Question))
                    }
                }
            }
            Phase::AwaitingExamAnswer => {
                let Some(question) = record.exam().and_then(|e| e.current_question()) else {
                    return Ok(EngineOutcome::Ignored(IgnoreReason::StalePhase(
                        record.phase(),
                    )));
                };
                if self.send_exam_question(&record, question).await {
                    Ok(EngineOutcome::Applied(Applied::PendingResent))
                } else {
                    Ok(EngineOutcome::Failed(FailedDelivery::ExamQuestion))
                }
            }
            Phase::Idle => {
                let text = if record.next_question_at().is_some() {
                    "Today's lesson is out; its quiz question is on the way."
                } else if record.next_lesson_at().is_some() {
                    "You are between lessons; the next one arrives on schedule."
                } else {
                    "Nothing is pending right now."
                };
                match self.gateway.send_notice(id, text).await {
                    Ok(()) => Ok(EngineOutcome::Applied(Applied::WaitDescribed)),
                    Err(err) => {
                        warn!(learner = %id, error = %err, "wait-state notice failed");
                        Ok(EngineOutcome::Failed(FailedDelivery::Notice))
                    }
                }
            }
            Phase::Finished => match self.gateway.send_notice(id, COMPLETION_NOTICE).await {
                Ok(()) => Ok(EngineOutcome::Applied(Applied::WaitDescribed)),
                Err(err) => {
                    warn!(learner = %id, error = %err, "completion notice failed");
                    Ok(EngineOutcome::Failed(FailedDelivery::Notice))
                }
            },
        }
    }

    /// The lessons the exam covers: the `exam_interval` lessons completed
    /// just before `current_lesson`.
    fn exam_window(&self, current_lesson: u32) -> Vec<u32> {
        let to = current_lesson.saturating_sub(1);
        let from = current_lesson.saturating_sub(self.policy.exam_interval);
        self.catalog.window(from, to)
    }

    async fn send_exam_question(&self, record: &LearnerRecord, question_lesson: u32) -> bool {
        let Some(lesson) = self.catalog.get(question_lesson) else {
            warn!(lesson = question_lesson, "exam question missing from catalog");
            return false;
        };
        match self
            .gateway
            .send_question(record.id(), question_lesson, lesson.question(), lesson.options())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    learner = %record.id(),
                    lesson = question_lesson,
                    error = %err,
                    "exam question delivery failed"
                );
                false
            }
        }
    }

    /// Compare-and-set the computed state. `false` means a concurrent
    /// writer won; the record's version is refreshed on success.
    async fn claim(
        &self,
        expected: Phase,
        record: &mut LearnerRecord,
    ) -> Result<bool, EngineError> {
        match self.store.compare_and_save(expected, record).await {
            Ok(version) => {
                record.set_version(version);
                Ok(true)
            }
            Err(StorageError::Conflict) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort rollback after a post-claim delivery failure. Keyed on
    /// the claimed phase and version, so it cannot clobber a newer write.
    async fn restore(&self, mut prior: LearnerRecord, claimed: &LearnerRecord) {
        prior.set_version(claimed.version());
        if let Err(err) = self.store.compare_and_save(claimed.phase(), &prior).await {
            warn!(
                learner = %prior.id(),
                error = %err,
                "could not roll back after failed delivery"
            );
        }
    }
}
