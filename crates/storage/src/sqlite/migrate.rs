use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema (learner records, the mistake audit log, and
/// indexes for the due-record sweep).
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS learners (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    role TEXT NOT NULL,
                    current_lesson INTEGER NOT NULL CHECK (current_lesson >= 1),
                    points INTEGER NOT NULL CHECK (points >= 0),
                    streak INTEGER NOT NULL CHECK (streak >= 0),
                    correct_count INTEGER NOT NULL CHECK (correct_count >= 0),
                    wrong_count INTEGER NOT NULL CHECK (wrong_count >= 0),
                    phase TEXT NOT NULL,
                    next_lesson_at TEXT,
                    next_question_at TEXT,
                    exam_state TEXT,
                    last_exam_lesson INTEGER NOT NULL CHECK (last_exam_lesson >= 0),
                    pending_message_ref TEXT,
                    version INTEGER NOT NULL CHECK (version >= 0),
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS mistakes (
                    id INTEGER PRIMARY KEY,
                    learner_id INTEGER NOT NULL,
                    lesson INTEGER NOT NULL CHECK (lesson >= 1),
                    question TEXT NOT NULL,
                    submitted TEXT NOT NULL,
                    expected TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_learners_phase_lesson_due
                    ON learners (phase, next_lesson_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_learners_phase_question_due
                    ON learners (phase, next_question_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_mistakes_learner_recorded
                    ON mistakes (learner_id, recorded_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
