pub mod memory;
pub mod seed;
pub mod sqlite;

use async_trait::async_trait;
use fairway_core::{CourseId, GolfCourse, HoleScore, Round, RoundId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("a round is already active")]
    RoundAlreadyActive,
    #[error("round {0} not found")]
    RoundNotFound(RoundId),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Persistence for courses, rounds and hole scores.
///
/// Implementations enforce that at most one round is active at a time.
#[async_trait]
pub trait RoundStore: Send + Sync + 'static {
    /// Prepares the store and seeds the default course when none exist.
    async fn init(&self) -> Result<(), StoreError>;

    async fn list_courses(&self) -> Result<Vec<GolfCourse>, StoreError>;

    async fn get_course(&self, id: CourseId) -> Result<Option<GolfCourse>, StoreError>;

    async fn upsert_course(&self, course: GolfCourse) -> Result<(), StoreError>;

    async fn get_active_round(&self) -> Result<Option<Round>, StoreError>;

    async fn get_round(&self, id: RoundId) -> Result<Option<Round>, StoreError>;

    /// Fails with [`StoreError::RoundAlreadyActive`] if a round is active.
    async fn create_round(
        &self,
        course_id: CourseId,
        course_name: &str,
    ) -> Result<RoundId, StoreError>;

    /// Inserts or replaces the score for `score.hole_number` and refreshes
    /// the round's totals.
    async fn upsert_score(&self, round_id: RoundId, score: HoleScore) -> Result<(), StoreError>;

    async fn close_round(&self, round_id: RoundId) -> Result<(), StoreError>;

    /// Most recently started closed rounds first.
    async fn list_completed_rounds(&self, limit: usize) -> Result<Vec<Round>, StoreError>;
}
