use course_core::model::{ExamState, LearnerId, LearnerRecord, MessageRef, Phase};
use sqlx::Row;

use crate::repository::{MistakeEntry, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn learner_id_from_i64(v: i64) -> Result<LearnerId, StorageError> {
    Ok(LearnerId::new(i64_to_u64("learner_id", v)?))
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn parse_phase(s: &str) -> Result<Phase, StorageError> {
    match s {
        "idle" => Ok(Phase::Idle),
        "awaiting_question" => Ok(Phase::AwaitingQuestion),
        "awaiting_exam_answer" => Ok(Phase::AwaitingExamAnswer),
        "finished" => Ok(Phase::Finished),
        _ => Err(StorageError::Serialization(format!("invalid phase: {s}"))),
    }
}

/// Encodes the exam snapshot for the `exam_state` JSON column.
pub(crate) fn exam_to_json(exam: Option<&ExamState>) -> Result<Option<String>, StorageError> {
    exam.map(|state| serde_json::to_string(state).map_err(ser))
        .transpose()
}

pub(crate) fn exam_from_json(raw: Option<String>) -> Result<Option<ExamState>, StorageError> {
    raw.map(|s| serde_json::from_str(&s).map_err(ser))
        .transpose()
}

pub(crate) fn map_learner_row(row: &sqlx::sqlite::SqliteRow) -> Result<LearnerRecord, StorageError> {
    let phase_str: String = row.try_get("phase").map_err(ser)?;
    let phase = parse_phase(phase_str.as_str())?;

    let exam = exam_from_json(row.try_get::<Option<String>, _>("exam_state").map_err(ser)?)?;

    let pending_message = row
        .try_get::<Option<String>, _>("pending_message_ref")
        .map_err(ser)?
        .map(MessageRef::new);

    LearnerRecord::from_persisted(
        learner_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        row.try_get("name").map_err(ser)?,
        row.try_get("role").map_err(ser)?,
        i64_to_u32("current_lesson", row.try_get::<i64, _>("current_lesson").map_err(ser)?)?,
        i64_to_u32("points", row.try_get::<i64, _>("points").map_err(ser)?)?,
        i64_to_u32("streak", row.try_get::<i64, _>("streak").map_err(ser)?)?,
        i64_to_u32("correct_count", row.try_get::<i64, _>("correct_count").map_err(ser)?)?,
        i64_to_u32("wrong_count", row.try_get::<i64, _>("wrong_count").map_err(ser)?)?,
        phase,
        row.try_get("next_lesson_at").map_err(ser)?,
        row.try_get("next_question_at").map_err(ser)?,
        exam,
        i64_to_u32("last_exam_lesson", row.try_get::<i64, _>("last_exam_lesson").map_err(ser)?)?,
        pending_message,
        i64_to_u64("version", row.try_get::<i64, _>("version").map_err(ser)?)?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_mistake_row(row: &sqlx::sqlite::SqliteRow) -> Result<MistakeEntry, StorageError> {
    Ok(MistakeEntry {
        id: Some(row.try_get("id").map_err(ser)?),
        learner_id: learner_id_from_i64(row.try_get::<i64, _>("learner_id").map_err(ser)?)?,
        lesson: i64_to_u32("lesson", row.try_get::<i64, _>("lesson").map_err(ser)?)?,
        question: row.try_get("question").map_err(ser)?,
        submitted: row.try_get("submitted").map_err(ser)?,
        expected: row.try_get("expected").map_err(ser)?,
        recorded_at: row.try_get("recorded_at").map_err(ser)?,
    })
}
