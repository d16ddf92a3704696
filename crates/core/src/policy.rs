use chrono::Duration;

/// Timing and scoring knobs for the progression engine.
///
/// Collected in one place so the delays scattered through the flow stay
/// consistent between the engine, the sweep, and the tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionPolicy {
    /// Delay between delivering a lesson and delivering its quiz question.
    pub lesson_to_question: Duration,
    /// Delay before the next lesson after a correct answer.
    pub correct_to_next_lesson: Duration,
    /// Delay before repeating the same lesson after a wrong answer.
    pub wrong_retry: Duration,
    /// Delay before resuming the lesson flow after a completed exam.
    pub exam_resume: Duration,
    /// Consecutive correct answers that earn the bonus and reset the streak.
    pub streak_bonus_threshold: u32,
    /// Extra points granted when the streak threshold is reached.
    pub streak_bonus_points: u32,
    /// An exam is interposed after every this many completed lessons.
    pub exam_interval: u32,
    /// Number of questions sampled into each exam.
    pub exam_sample_size: usize,
}

impl ProgressionPolicy {
    /// The standard course pacing: question an hour after the lesson, next
    /// lesson a day after a correct answer, retry in half an hour, exam of
    /// ten questions every twenty-five lessons.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            lesson_to_question: Duration::hours(1),
            correct_to_next_lesson: Duration::hours(24),
            wrong_retry: Duration::minutes(30),
            exam_resume: Duration::minutes(10),
            streak_bonus_threshold: 3,
            streak_bonus_points: 1,
            exam_interval: 25,
            exam_sample_size: 10,
        }
    }
}

impl Default for ProgressionPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_matches_course_pacing() {
        let policy = ProgressionPolicy::standard();
        assert_eq!(policy.lesson_to_question, Duration::hours(1));
        assert_eq!(policy.correct_to_next_lesson, Duration::hours(24));
        assert_eq!(policy.wrong_retry, Duration::minutes(30));
        assert_eq!(policy.streak_bonus_threshold, 3);
        assert_eq!(policy.exam_interval, 25);
        assert_eq!(policy.exam_sample_size, 10);
    }
}
