mod ids;
mod learner;

pub use ids::{LearnerId, MessageRef, ParseIdError};
pub use learner::{ExamState, LearnerError, LearnerRecord, Phase};
