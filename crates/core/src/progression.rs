use chrono::{DateTime, Utc};

use crate::model::{ExamState, LearnerRecord, MessageRef, Phase};
use crate::policy::ProgressionPolicy;

//
// ─── TRANSITION OUTCOMES ───────────────────────────────────────────────────────
//

/// Which delivery a record is due for. Question delivery always takes
/// precedence over lesson delivery, so callers get a deterministic answer
/// even against a record that violates the timer invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueKind {
    Question,
    Lesson,
}

/// Result of applying a correct answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectOutcome {
    /// Points granted for this answer, bonus included.
    pub points_awarded: u32,
    /// Whether the streak bonus fired (and the streak reset).
    pub bonus: bool,
    /// Whether an exam boundary was crossed; the caller must start the exam
    /// (or schedule the next lesson if it cannot).
    pub exam_due: bool,
}

/// Result of applying one exam answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamProgress {
    /// More questions remain; this is the next one to send.
    Next { question: u32 },
    /// The exam is over; the record is back to `Idle` with the resume timer
    /// armed.
    Completed { score: u32, total: u32 },
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

/// The pure transition rules of the progression state machine.
///
/// These methods only compute and mutate in memory; persistence, delivery,
/// and conflict handling live in the services layer. Keeping them here makes
/// every grading and scheduling rule unit-testable without I/O.
impl LearnerRecord {
    /// What, if anything, is due for this record at `now`.
    ///
    /// Returns `None` outside `Idle`; dueness is only meaningful when the
    /// sweep owns the next transition.
    #[must_use]
    pub fn due_transition(&self, now: DateTime<Utc>) -> Option<DueKind> {
        if self.phase != Phase::Idle {
            return None;
        }
        if self.next_question_at.is_some_and(|at| at <= now) {
            return Some(DueKind::Question);
        }
        if self.next_lesson_at.is_some_and(|at| at <= now) {
            return Some(DueKind::Lesson);
        }
        None
    }

    /// A lesson was delivered: arm the question timer.
    ///
    /// The phase stays `Idle`; the learner is not expected to act until the
    /// question arrives.
    pub fn apply_lesson_delivered(&mut self, now: DateTime<Utc>, policy: &ProgressionPolicy) {
        self.set_question_timer(now + policy.lesson_to_question);
    }

    /// Remember the transport handle of the outstanding lesson message so it
    /// can be withdrawn when the question is shown.
    pub fn attach_pending_message(&mut self, message: MessageRef) {
        self.pending_message = Some(message);
    }

    /// The quiz question was delivered: hand the next transition to the
    /// learner's answer.
    pub fn apply_question_delivered(&mut self) {
        self.phase = Phase::AwaitingQuestion;
        self.pending_message = None;
        self.clear_timers();
    }

    /// Apply a correct answer: counters, streak, points, lesson advance,
    /// exam-boundary check.
    ///
    /// When no exam is due the next lesson is scheduled; when one is due the
    /// timers are left clear and the caller starts the exam.
    pub fn apply_correct(
        &mut self,
        now: DateTime<Utc>,
        policy: &ProgressionPolicy,
    ) -> CorrectOutcome {
        self.correct_count = self.correct_count.saturating_add(1);
        self.streak = self.streak.saturating_add(1);
        self.points = self.points.saturating_add(1);

        let mut points_awarded = 1;
        let mut bonus = false;
        if self.streak >= policy.streak_bonus_threshold {
            self.points = self.points.saturating_add(policy.streak_bonus_points);
            points_awarded += policy.streak_bonus_points;
            self.streak = 0;
            bonus = true;
        }

        self.current_lesson = self.current_lesson.saturating_add(1);
        self.phase = Phase::Idle;

        let exam_due = self.exam_is_due(policy);
        if exam_due {
            self.clear_timers();
        } else {
            self.set_lesson_timer(now + policy.correct_to_next_lesson);
        }

        CorrectOutcome {
            points_awarded,
            bonus,
            exam_due,
        }
    }

    /// Apply a wrong answer: counters, streak reset, floored point
    /// deduction, retry of the same lesson after the short delay.
    pub fn apply_wrong(&mut self, now: DateTime<Utc>, policy: &ProgressionPolicy) {
        self.wrong_count = self.wrong_count.saturating_add(1);
        self.streak = 0;
        self.points = self.points.saturating_sub(1);
        self.phase = Phase::Idle;
        self.set_lesson_timer(now + policy.wrong_retry);
    }

    /// Schedule the next lesson after the standard delay. Fallback for a
    /// crossed exam boundary whose sampling window turned out empty.
    pub fn schedule_next_lesson(&mut self, now: DateTime<Utc>, policy: &ProgressionPolicy) {
        self.phase = Phase::Idle;
        self.set_lesson_timer(now + policy.correct_to_next_lesson);
    }

    /// Whether the record just crossed an exam boundary that has not run yet.
    ///
    /// Fires when exactly `exam_interval` lessons were completed since the
    /// last boundary: the lesson counter is one past a multiple of the
    /// interval and the boundary is newer than the last recorded exam.
    #[must_use]
    pub fn exam_is_due(&self, policy: &ProgressionPolicy) -> bool {
        if self.phase == Phase::AwaitingExamAnswer || policy.exam_interval == 0 {
            return false;
        }
        self.current_lesson > 1
            && self.current_lesson % policy.exam_interval == 1
            && self.last_exam_lesson < self.current_lesson - 1
    }

    /// Enter the exam with the sampled question order.
    pub fn begin_exam(&mut self, questions: Vec<u32>) {
        self.exam = Some(ExamState::new(questions));
        self.phase = Phase::AwaitingExamAnswer;
        self.clear_timers();
    }

    /// Apply one exam answer and advance the cursor.
    ///
    /// On the final answer the boundary is recorded in `last_exam_lesson`,
    /// the exam state is dropped, and the resume timer is armed. Returns
    /// `None` when no exam is in progress (stale event).
    pub fn apply_exam_answer(
        &mut self,
        correct: bool,
        now: DateTime<Utc>,
        policy: &ProgressionPolicy,
    ) -> Option<ExamProgress> {
        let state = self.exam.as_mut()?;
        state.record_answer(correct);

        if state.is_complete() {
            let score = state.score();
            let total = state.total();
            self.last_exam_lesson = self.current_lesson.saturating_sub(1);
            self.exam = None;
            self.phase = Phase::Idle;
            self.set_lesson_timer(now + policy.exam_resume);
            Some(ExamProgress::Completed { score, total })
        } else {
            state
                .current_question()
                .map(|question| ExamProgress::Next { question })
        }
    }

    /// Terminal transition: the learner moved past the last catalog entry.
    pub fn finish(&mut self) {
        self.phase = Phase::Finished;
        self.exam = None;
        self.pending_message = None;
        self.clear_timers();
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
