use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LearnerId, MessageRef};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LearnerError {
    #[error("current lesson must be at least 1")]
    LessonOutOfRange,

    #[error("both wake-up timers are set")]
    ConflictingTimers,

    #[error("finished record still has a pending timer")]
    TimerAfterFinish,

    #[error("exam state present outside the exam phase")]
    UnexpectedExamState,

    #[error("exam state missing in the exam phase")]
    MissingExamState,

    #[error("exam index {index} out of range for {total} questions")]
    InvalidExamState { index: usize, total: usize },
}

//
// ─── PHASE ─────────────────────────────────────────────────────────────────────
//

/// The single discriminant governing which operation may legally act on a
/// record. Exactly one value holds at any instant; it doubles as the
/// optimistic-write guard at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting on a timer; the sweep owns the next transition.
    Idle,
    /// A quiz question is out; an answer event owns the next transition.
    AwaitingQuestion,
    /// A sampled exam is in progress.
    AwaitingExamAnswer,
    /// The learner has moved past the last catalog entry. Terminal.
    Finished,
}

impl Phase {
    /// Storage representation, stable across schema versions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AwaitingQuestion => "awaiting_question",
            Phase::AwaitingExamAnswer => "awaiting_exam_answer",
            Phase::Finished => "finished",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished)
    }
}

//
// ─── EXAM STATE ────────────────────────────────────────────────────────────────
//

/// Snapshot of an in-progress exam: the sampled question order, the cursor,
/// and the running score. Present only while `phase = AwaitingExamAnswer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamState {
    questions: Vec<u32>,
    index: usize,
    score: u32,
}

impl ExamState {
    #[must_use]
    pub fn new(questions: Vec<u32>) -> Self {
        Self {
            questions,
            index: 0,
            score: 0,
        }
    }

    /// Validates a snapshot rehydrated from storage.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError::InvalidExamState` if the cursor is past the
    /// question list.
    pub fn validate(&self) -> Result<(), LearnerError> {
        if self.index > self.questions.len() {
            return Err(LearnerError::InvalidExamState {
                index: self.index,
                total: self.questions.len(),
            });
        }
        Ok(())
    }

    /// Lesson number of the question the learner is currently answering.
    #[must_use]
    pub fn current_question(&self) -> Option<u32> {
        self.questions.get(self.index).copied()
    }

    #[must_use]
    pub fn questions(&self) -> &[u32] {
        &self.questions
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        u32::try_from(self.questions.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.index >= self.questions.len()
    }

    pub(crate) fn record_answer(&mut self, correct: bool) {
        if correct {
            self.score = self.score.saturating_add(1);
        }
        self.index = self.index.saturating_add(1);
    }
}

//
// ─── LEARNER RECORD ────────────────────────────────────────────────────────────
//

/// Durable per-learner state, owned exclusively by the progression engine.
///
/// The two wake-up timers are mutually exclusive: at most one of
/// `next_lesson_at` / `next_question_at` is set, representing the single
/// pending wake-up for this learner. All mutation goes through the
/// transition methods in [`crate::progression`]; constructors validate the
/// invariants on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerRecord {
    pub(crate) id: LearnerId,
    pub(crate) name: String,
    pub(crate) role: String,
    pub(crate) current_lesson: u32,
    pub(crate) points: u32,
    pub(crate) streak: u32,
    pub(crate) correct_count: u32,
    pub(crate) wrong_count: u32,
    pub(crate) phase: Phase,
    pub(crate) next_lesson_at: Option<DateTime<Utc>>,
    pub(crate) next_question_at: Option<DateTime<Utc>>,
    pub(crate) exam: Option<ExamState>,
    pub(crate) last_exam_lesson: u32,
    pub(crate) pending_message: Option<MessageRef>,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
}

impl LearnerRecord {
    /// Creates the onboarded state: lesson 1, idle, first lesson due now.
    #[must_use]
    pub fn new(
        id: LearnerId,
        name: impl Into<String>,
        role: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            role: role.into(),
            current_lesson: 1,
            points: 0,
            streak: 0,
            correct_count: 0,
            wrong_count: 0,
            phase: Phase::Idle,
            next_lesson_at: Some(now),
            next_question_at: None,
            exam: None,
            last_exam_lesson: 0,
            pending_message: None,
            version: 0,
            created_at: now,
        }
    }

    /// Rehydrate a record from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError` if the stored row violates the record
    /// invariants: lesson counter below 1, both timers set, timers on a
    /// finished record, or exam state inconsistent with the phase.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: LearnerId,
        name: String,
        role: String,
        current_lesson: u32,
        points: u32,
        streak: u32,
        correct_count: u32,
        wrong_count: u32,
        phase: Phase,
        next_lesson_at: Option<DateTime<Utc>>,
        next_question_at: Option<DateTime<Utc>>,
        exam: Option<ExamState>,
        last_exam_lesson: u32,
        pending_message: Option<MessageRef>,
        version: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, LearnerError> {
        if current_lesson == 0 {
            return Err(LearnerError::LessonOutOfRange);
        }
        if next_lesson_at.is_some() && next_question_at.is_some() {
            return Err(LearnerError::ConflictingTimers);
        }
        if phase.is_terminal() && (next_lesson_at.is_some() || next_question_at.is_some()) {
            return Err(LearnerError::TimerAfterFinish);
        }
        match (phase, &exam) {
            (Phase::AwaitingExamAnswer, None) => return Err(LearnerError::MissingExamState),
            (Phase::AwaitingExamAnswer, Some(state)) => state.validate()?,
            (_, Some(_)) => return Err(LearnerError::UnexpectedExamState),
            (_, None) => {}
        }

        Ok(Self {
            id,
            name,
            role,
            current_lesson,
            points,
            streak,
            correct_count,
            wrong_count,
            phase,
            next_lesson_at,
            next_question_at,
            exam,
            last_exam_lesson,
            pending_message,
            version,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> LearnerId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    #[must_use]
    pub fn current_lesson(&self) -> u32 {
        self.current_lesson
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn wrong_count(&self) -> u32 {
        self.wrong_count
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn next_lesson_at(&self) -> Option<DateTime<Utc>> {
        self.next_lesson_at
    }

    #[must_use]
    pub fn next_question_at(&self) -> Option<DateTime<Utc>> {
        self.next_question_at
    }

    #[must_use]
    pub fn exam(&self) -> Option<&ExamState> {
        self.exam.as_ref()
    }

    #[must_use]
    pub fn last_exam_lesson(&self) -> u32 {
        self.last_exam_lesson
    }

    #[must_use]
    pub fn pending_message(&self) -> Option<&MessageRef> {
        self.pending_message.as_ref()
    }

    /// Storage revision of the copy this record was read from. Bumped by the
    /// store on every successful compare-and-set.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // Timer invariant is maintained here: setting one side always clears the
    // other, so no transition can leave both wake-ups armed.

    pub(crate) fn set_lesson_timer(&mut self, at: DateTime<Utc>) {
        self.next_lesson_at = Some(at);
        self.next_question_at = None;
    }

    pub(crate) fn set_question_timer(&mut self, at: DateTime<Utc>) {
        self.next_question_at = Some(at);
        self.next_lesson_at = None;
    }

    pub(crate) fn clear_timers(&mut self) {
        self.next_lesson_at = None;
        self.next_question_at = None;
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
