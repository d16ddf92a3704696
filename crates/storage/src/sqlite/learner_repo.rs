use chrono::{DateTime, Utc};
use course_core::model::{LearnerId, LearnerRecord, Phase};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{exam_to_json, id_to_i64, map_learner_row},
};
use crate::repository::{ProgressStore, StorageError};

#[async_trait::async_trait]
impl ProgressStore for SqliteRepository {
    async fn insert(&self, record: &LearnerRecord) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO learners (
                id, name, role, current_lesson, points, streak,
                correct_count, wrong_count, phase, next_lesson_at,
                next_question_at, exam_state, last_exam_lesson,
                pending_message_ref, version, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ",
        )
        .bind(id_to_i64("learner_id", record.id().value())?)
        .bind(record.name().to_owned())
        .bind(record.role().to_owned())
        .bind(i64::from(record.current_lesson()))
        .bind(i64::from(record.points()))
        .bind(i64::from(record.streak()))
        .bind(i64::from(record.correct_count()))
        .bind(i64::from(record.wrong_count()))
        .bind(record.phase().as_str())
        .bind(record.next_lesson_at())
        .bind(record.next_question_at())
        .bind(exam_to_json(record.exam())?)
        .bind(i64::from(record.last_exam_lesson()))
        .bind(record.pending_message().map(|m| m.as_str().to_owned()))
        .bind(id_to_i64("version", record.version())?)
        .bind(record.created_at())
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::Conflict)
            }
            Err(e) => Err(StorageError::Connection(e.to_string())),
        }
    }

    async fn load(&self, id: LearnerId) -> Result<LearnerRecord, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                id, name, role, current_lesson, points, streak,
                correct_count, wrong_count, phase, next_lesson_at,
                next_question_at, exam_state, last_exam_lesson,
                pending_message_ref, version, created_at
            FROM learners
            WHERE id = ?1
            ",
        )
        .bind(id_to_i64("learner_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        match row {
            Some(row) => map_learner_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn compare_and_save(
        &self,
        expected_phase: Phase,
        record: &LearnerRecord,
    ) -> Result<u64, StorageError> {
        // The WHERE clause is the whole concurrency story: the row must still
        // carry the phase and revision this record was computed from, or the
        // write loses and the caller backs off.
        let res = sqlx::query(
            r"
            UPDATE learners SET
                name = ?1,
                role = ?2,
                current_lesson = ?3,
                points = ?4,
                streak = ?5,
                correct_count = ?6,
                wrong_count = ?7,
                phase = ?8,
                next_lesson_at = ?9,
                next_question_at = ?10,
                exam_state = ?11,
                last_exam_lesson = ?12,
                pending_message_ref = ?13,
                version = version + 1
            WHERE id = ?14 AND phase = ?15 AND version = ?16
            ",
        )
        .bind(record.name().to_owned())
        .bind(record.role().to_owned())
        .bind(i64::from(record.current_lesson()))
        .bind(i64::from(record.points()))
        .bind(i64::from(record.streak()))
        .bind(i64::from(record.correct_count()))
        .bind(i64::from(record.wrong_count()))
        .bind(record.phase().as_str())
        .bind(record.next_lesson_at())
        .bind(record.next_question_at())
        .bind(exam_to_json(record.exam())?)
        .bind(i64::from(record.last_exam_lesson()))
        .bind(record.pending_message().map(|m| m.as_str().to_owned()))
        .bind(id_to_i64("learner_id", record.id().value())?)
        .bind(expected_phase.as_str())
        .bind(id_to_i64("version", record.version())?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(record.version() + 1)
    }

    async fn load_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LearnerRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, name, role, current_lesson, points, streak,
                correct_count, wrong_count, phase, next_lesson_at,
                next_question_at, exam_state, last_exam_lesson,
                pending_message_ref, version, created_at
            FROM learners
            WHERE phase = 'idle'
              AND (
                    (next_question_at IS NOT NULL AND next_question_at <= ?1)
                 OR (next_lesson_at IS NOT NULL AND next_lesson_at <= ?1)
              )
            ORDER BY COALESCE(next_question_at, next_lesson_at) ASC
            LIMIT ?2
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(map_learner_row(&row)?);
        }
        Ok(records)
    }

    async fn count_active(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM learners WHERE phase != 'finished'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        u64::try_from(n).map_err(|_| StorageError::Serialization("negative count".into()))
    }
}
