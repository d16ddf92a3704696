use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{LearnerId, LearnerRecord, Phase};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One entry of the append-only mistake audit log.
///
/// Not part of the learner record: recorded on every wrong quiz answer for
/// later review, with no ordering guarantees across learners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MistakeEntry {
    pub id: Option<i64>,
    pub learner_id: LearnerId,
    pub lesson: u32,
    pub question: String,
    pub submitted: String,
    pub expected: String,
    pub recorded_at: DateTime<Utc>,
}

/// Durable store for learner records.
///
/// `compare_and_save` is the only write path for existing records: it
/// succeeds only when the stored row still carries the expected phase and
/// the version the record was read at, so a concurrent sweep tick and a
/// concurrent answer event can never both win.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Create the record for a newly onboarded learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the learner already exists.
    async fn insert(&self, record: &LearnerRecord) -> Result<(), StorageError>;

    /// Fetch a learner record by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn load(&self, id: LearnerId) -> Result<LearnerRecord, StorageError>;

    /// Conditionally persist an updated record.
    ///
    /// Returns the new revision on success.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when the stored phase or version no
    /// longer matches the copy the record was computed from.
    async fn compare_and_save(
        &self,
        expected_phase: Phase,
        record: &LearnerRecord,
    ) -> Result<u64, StorageError>;

    /// Records with an elapsed wake-up timer, idle and not finished, oldest
    /// due first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the scan fails.
    async fn load_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LearnerRecord>, StorageError>;

    /// Number of records still in the course (not finished).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the count fails.
    async fn count_active(&self) -> Result<u64, StorageError>;
}

/// Append-only audit log of wrong answers.
#[async_trait]
pub trait MistakeLog: Send + Sync {
    /// Append one mistake entry; returns the assigned row ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the append fails.
    async fn record_mistake(&self, entry: &MistakeEntry) -> Result<i64, StorageError>;

    /// All mistakes recorded for a learner, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the scan fails.
    async fn mistakes_for(&self, id: LearnerId) -> Result<Vec<MistakeEntry>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    learners: Arc<Mutex<HashMap<LearnerId, LearnerRecord>>>,
    mistakes: Arc<Mutex<Vec<MistakeEntry>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryRepository {
    async fn insert(&self, record: &LearnerRecord) -> Result<(), StorageError> {
        let mut guard = self
            .learners
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard.contains_key(&record.id()) {
            return Err(StorageError::Conflict);
        }
        guard.insert(record.id(), record.clone());
        Ok(())
    }

    async fn load(&self, id: LearnerId) -> Result<LearnerRecord, StorageError> {
        let guard = self
            .learners
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn compare_and_save(
        &self,
        expected_phase: Phase,
        record: &LearnerRecord,
    ) -> Result<u64, StorageError> {
        let mut guard = self
            .learners
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let stored = guard.get(&record.id()).ok_or(StorageError::NotFound)?;
        if stored.phase() != expected_phase || stored.version() != record.version() {
            return Err(StorageError::Conflict);
        }

        let new_version = record.version() + 1;
        let mut updated = record.clone();
        updated.set_version(new_version);
        guard.insert(record.id(), updated);
        Ok(new_version)
    }

    async fn load_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LearnerRecord>, StorageError> {
        let guard = self
            .learners
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut due: Vec<LearnerRecord> = guard
            .values()
            .filter(|r| r.due_transition(now).is_some())
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_question_at().or(r.next_lesson_at()));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn count_active(&self) -> Result<u64, StorageError> {
        let guard = self
            .learners
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.values().filter(|r| !r.phase().is_terminal()).count() as u64)
    }
}

#[async_trait]
impl MistakeLog for InMemoryRepository {
    async fn record_mistake(&self, entry: &MistakeEntry) -> Result<i64, StorageError> {
        let mut guard = self
            .mistakes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let id = guard.len() as i64 + 1;
        let mut stored = entry.clone();
        stored.id = Some(id);
        guard.push(stored);
        Ok(id)
    }

    async fn mistakes_for(&self, id: LearnerId) -> Result<Vec<MistakeEntry>, StorageError> {
        let guard = self
            .mistakes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .filter(|m| m.learner_id == id)
            .cloned()
            .collect())
    }
}

/// Aggregates the learner store and the mistake log behind trait objects
/// for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub learners: Arc<dyn ProgressStore>,
    pub mistakes: Arc<dyn MistakeLog>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let learners: Arc<dyn ProgressStore> = Arc::new(repo.clone());
        let mistakes: Arc<dyn MistakeLog> = Arc::new(repo);
        Self { learners, mistakes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use course_core::time::fixed_now;

    fn record(id: u64) -> LearnerRecord {
        LearnerRecord::new(LearnerId::new(id), format!("Learner {id}"), "student", fixed_now())
    }

    #[tokio::test]
    async fn insert_then_load_round_trips() {
        let repo = InMemoryRepository::new();
        let r = record(1);
        repo.insert(&r).await.unwrap();

        let loaded = repo.load(r.id()).await.unwrap();
        assert_eq!(loaded, r);
    }

    #[tokio::test]
    async fn insert_twice_conflicts() {
        let repo = InMemoryRepository::new();
        let r = record(1);
        repo.insert(&r).await.unwrap();
        assert!(matches!(
            repo.insert(&r).await,
            Err(StorageError::Conflict)
        ));
    }

    #[tokio::test]
    async fn compare_and_save_bumps_version() {
        let repo = InMemoryRepository::new();
        let mut r = record(1);
        repo.insert(&r).await.unwrap();

        r.apply_question_delivered();
        let v = repo
            .compare_and_save(Phase::Idle, &r)
            .await
            .unwrap();
        assert_eq!(v, 1);

        let loaded = repo.load(r.id()).await.unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.phase(), Phase::AwaitingQuestion);
    }

    #[tokio::test]
    async fn compare_and_save_rejects_stale_version() {
        let repo = InMemoryRepository::new();
        let mut first = record(1);
        repo.insert(&first).await.unwrap();
        let mut second = first.clone();

        first.apply_question_delivered();
        repo.compare_and_save(Phase::Idle, &first).await.unwrap();

        // the second writer still holds version 0 of a now version-1 row
        second.apply_question_delivered();
        assert!(matches!(
            repo.compare_and_save(Phase::Idle, &second).await,
            Err(StorageError::Conflict)
        ));
    }

    #[tokio::test]
    async fn compare_and_save_rejects_unexpected_phase() {
        let repo = InMemoryRepository::new();
        let mut r = record(1);
        repo.insert(&r).await.unwrap();

        r.apply_question_delivered();
        assert!(matches!(
            repo.compare_and_save(Phase::AwaitingQuestion, &r).await,
            Err(StorageError::Conflict)
        ));
    }

    #[tokio::test]
    async fn load_due_filters_and_orders() {
        let repo = InMemoryRepository::new();
        let now = fixed_now();

        let later = LearnerRecord::new(LearnerId::new(1), "A", "s", now + Duration::hours(2));
        let sooner = LearnerRecord::new(LearnerId::new(2), "B", "s", now - Duration::hours(1));
        let mut finished = LearnerRecord::new(LearnerId::new(3), "C", "s", now);
        finished.finish();

        repo.insert(&later).await.unwrap();
        repo.insert(&sooner).await.unwrap();
        repo.insert(&finished).await.unwrap();

        let due = repo.load_due(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id(), LearnerId::new(2));

        let due = repo.load_due(now + Duration::hours(3), 10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id(), LearnerId::new(2));
        assert_eq!(due[1].id(), LearnerId::new(1));
    }

    #[tokio::test]
    async fn count_active_excludes_finished() {
        let repo = InMemoryRepository::new();
        let r = record(1);
        let mut done = record(2);
        done.finish();
        repo.insert(&r).await.unwrap();
        repo.insert(&done).await.unwrap();

        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mistake_log_appends_per_learner() {
        let repo = InMemoryRepository::new();
        let entry = MistakeEntry {
            id: None,
            learner_id: LearnerId::new(1),
            lesson: 4,
            question: "Which color complements orange?".into(),
            submitted: "green".into(),
            expected: "blue".into(),
            recorded_at: fixed_now(),
        };

        let id = repo.record_mistake(&entry).await.unwrap();
        assert_eq!(id, 1);

        let listed = repo.mistakes_for(LearnerId::new(1)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].submitted, "green");

        assert!(repo.mistakes_for(LearnerId::new(2)).await.unwrap().is_empty());
    }
}
