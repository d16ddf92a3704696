use course_core::model::LearnerId;

use super::{
    SqliteRepository,
    mapping::{id_to_i64, map_mistake_row},
};
use crate::repository::{MistakeEntry, MistakeLog, StorageError};

#[async_trait::async_trait]
impl MistakeLog for SqliteRepository {
    async fn record_mistake(&self, entry: &MistakeEntry) -> Result<i64, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO mistakes (
                    learner_id, lesson, question, submitted, expected, recorded_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_to_i64("learner_id", entry.learner_id.value())?)
        .bind(i64::from(entry.lesson))
        .bind(entry.question.clone())
        .bind(entry.submitted.clone())
        .bind(entry.expected.clone())
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(res.last_insert_rowid())
    }

    async fn mistakes_for(&self, id: LearnerId) -> Result<Vec<MistakeEntry>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, learner_id, lesson, question, submitted, expected, recorded_at
                FROM mistakes
                WHERE learner_id = ?1
                ORDER BY recorded_at ASC, id ASC
            ",
        )
        .bind(id_to_i64("learner_id", id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_mistake_row(&row)?);
        }
        Ok(out)
    }
}
