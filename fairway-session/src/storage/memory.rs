use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fairway_core::{CourseId, GolfCourse, HoleScore, Round, RoundId};
use ulid::Ulid;

use crate::storage::{RoundStore, StoreError, seed};

/// In memory round store.
/// Used by tests and when no database is configured; nothing survives a
/// restart.
#[derive(Clone, Default)]
pub struct MemoryRoundStore {
    courses: Arc<Mutex<Vec<GolfCourse>>>,
    rounds: Arc<Mutex<HashMap<RoundId, Round>>>,
}

impl MemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn courses(&self) -> Result<MutexGuard<'_, Vec<GolfCourse>>, StoreError> {
        self.courses
            .lock()
            .map_err(|_| StoreError::Internal("courses mutex poisoned".into()))
    }

    fn rounds(&self) -> Result<MutexGuard<'_, HashMap<RoundId, Round>>, StoreError> {
        self.rounds
            .lock()
            .map_err(|_| StoreError::Internal("rounds mutex poisoned".into()))
    }
}

#[async_trait]
impl RoundStore for MemoryRoundStore {
    async fn init(&self) -> Result<(), StoreError> {
        let mut courses = self.courses()?;
        if courses.is_empty() {
            courses.push(seed::default_course());
        }
        Ok(())
    }

    async fn list_courses(&self) -> Result<Vec<GolfCourse>, StoreError> {
        Ok(self.courses()?.clone())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<GolfCourse>, StoreError> {
        Ok(self.courses()?.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert_course(&self, course: GolfCourse) -> Result<(), StoreError> {
        let mut courses = self.courses()?;
        match courses.iter_mut().find(|c| c.id == course.id) {
            Some(existing) => *existing = course,
            None => courses.push(course),
        }
        Ok(())
    }

    async fn get_active_round(&self) -> Result<Option<Round>, StoreError> {
        Ok(self.rounds()?.values().find(|r| r.active).cloned())
    }

    async fn get_round(&self, id: RoundId) -> Result<Option<Round>, StoreError> {
        Ok(self.rounds()?.get(&id).cloned())
    }

    async fn create_round(
        &self,
        course_id: CourseId,
        course_name: &str,
    ) -> Result<RoundId, StoreError> {
        let mut rounds = self.rounds()?;
        if rounds.values().any(|r| r.active) {
            return Err(StoreError::RoundAlreadyActive);
        }

        let id = RoundId(Ulid::new());
        rounds.insert(id, Round::new(id, course_id, course_name));
        Ok(id)
    }

    async fn upsert_score(&self, round_id: RoundId, score: HoleScore) -> Result<(), StoreError> {
        let mut rounds = self.rounds()?;
        let round = rounds
            .get_mut(&round_id)
            .ok_or(StoreError::RoundNotFound(round_id))?;
        round.upsert_score(score);
        Ok(())
    }

    async fn close_round(&self, round_id: RoundId) -> Result<(), StoreError> {
        let mut rounds = self.rounds()?;
        let round = rounds
            .get_mut(&round_id)
            .ok_or(StoreError::RoundNotFound(round_id))?;
        if round.active {
            round.active = false;
            round.ended_at = Some(jiff::Timestamp::now());
        }
        Ok(())
    }

    async fn list_completed_rounds(&self, limit: usize) -> Result<Vec<Round>, StoreError> {
        let rounds = self.rounds()?;
        let mut completed: Vec<Round> = rounds.values().filter(|r| !r.active).cloned().collect();
        completed.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        completed.truncate(limit);
        Ok(completed)
    }
}
