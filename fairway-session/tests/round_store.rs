use std::time::Duration;

use fairway_core::{CourseId, HoleScore, RoundId};
use fairway_session::storage::memory::MemoryRoundStore;
use fairway_session::storage::sqlite::SqliteRoundStore;
use fairway_session::storage::{RoundStore, StoreError, seed};
use tempfile::NamedTempFile;
use ulid::Ulid;

fn score(hole_number: u8, par: u8, strokes: u8) -> HoleScore {
    HoleScore {
        hole_number,
        par,
        strokes,
        putts: Some(2),
    }
}

async fn sqlite_store() -> Result<(SqliteRoundStore, NamedTempFile), StoreError> {
    let file = NamedTempFile::new().map_err(|e| StoreError::Internal(e.to_string()))?;
    let store = SqliteRoundStore::new(file.path()).await?;
    store.init().await?;
    Ok((store, file))
}

async fn memory_store() -> Result<MemoryRoundStore, StoreError> {
    let store = MemoryRoundStore::new();
    store.init().await?;
    Ok(store)
}

async fn seeds_default_course<S: RoundStore>(store: &S) -> Result<(), StoreError> {
    let courses = store.list_courses().await?;
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].id, seed::default_course_id());
    assert_eq!(courses[0].holes.len(), 18);
    assert_eq!(courses[0].total_par(), 72);

    let course = store.get_course(seed::default_course_id()).await?;
    assert_eq!(course.as_ref(), courses.first());

    assert!(store.get_course(CourseId(Ulid::new())).await?.is_none());
    Ok(())
}

async fn score_upsert_replaces<S: RoundStore>(store: &S) -> Result<(), StoreError> {
    let round_id = store
        .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
        .await?;

    store.upsert_score(round_id, score(1, 4, 6)).await?;
    store.upsert_score(round_id, score(2, 3, 3)).await?;
    store.upsert_score(round_id, score(1, 4, 5)).await?;

    let round = store.get_round(round_id).await?.expect("round exists");
    assert_eq!(round.scores.len(), 2);
    assert_eq!(round.scores[0].strokes, 5);
    assert_eq!(round.total_strokes, 8);
    assert_eq!(round.total_par, 7);
    assert_eq!(round.score_to_par(), 1);
    Ok(())
}

async fn single_active_round<S: RoundStore>(store: &S) -> Result<(), StoreError> {
    let first = store
        .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
        .await?;

    let second = store
        .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
        .await;
    assert!(matches!(second, Err(StoreError::RoundAlreadyActive)));

    let active = store.get_active_round().await?.expect("active round");
    assert_eq!(active.id, first);

    store.close_round(first).await?;
    assert!(store.get_active_round().await?.is_none());

    // closing twice keeps the first end time
    let ended_at = store.get_round(first).await?.and_then(|r| r.ended_at);
    store.close_round(first).await?;
    assert_eq!(store.get_round(first).await?.and_then(|r| r.ended_at), ended_at);

    store
        .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
        .await?;
    Ok(())
}

async fn completed_rounds_newest_first<S: RoundStore>(store: &S) -> Result<(), StoreError> {
    let mut closed = Vec::new();
    for _ in 0..3 {
        let id = store
            .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
            .await?;
        store.close_round(id).await?;
        closed.push(id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store
        .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
        .await?;

    let completed = store.list_completed_rounds(10).await?;
    let ids: Vec<RoundId> = completed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![closed[2], closed[1], closed[0]]);
    assert!(completed.iter().all(|r| !r.active && r.ended_at.is_some()));

    assert_eq!(store.list_completed_rounds(2).await?.len(), 2);
    Ok(())
}

async fn unknown_round<S: RoundStore>(store: &S) -> Result<(), StoreError> {
    let missing = RoundId(Ulid::new());

    assert!(matches!(
        store.upsert_score(missing, score(1, 4, 4)).await,
        Err(StoreError::RoundNotFound(id)) if id == missing
    ));
    assert!(matches!(
        store.close_round(missing).await,
        Err(StoreError::RoundNotFound(_))
    ));
    assert!(store.get_round(missing).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn memory_seeds_default_course() -> Result<(), StoreError> {
    seeds_default_course(&memory_store().await?).await
}

#[tokio::test]
async fn memory_score_upsert_replaces() -> Result<(), StoreError> {
    score_upsert_replaces(&memory_store().await?).await
}

#[tokio::test]
async fn memory_single_active_round() -> Result<(), StoreError> {
    single_active_round(&memory_store().await?).await
}

#[tokio::test]
async fn memory_completed_rounds_newest_first() -> Result<(), StoreError> {
    completed_rounds_newest_first(&memory_store().await?).await
}

#[tokio::test]
async fn memory_unknown_round() -> Result<(), StoreError> {
    unknown_round(&memory_store().await?).await
}

#[tokio::test]
async fn sqlite_seeds_default_course() -> Result<(), StoreError> {
    let (store, _file) = sqlite_store().await?;
    seeds_default_course(&store).await
}

#[tokio::test]
async fn sqlite_score_upsert_replaces() -> Result<(), StoreError> {
    let (store, _file) = sqlite_store().await?;
    score_upsert_replaces(&store).await
}

#[tokio::test]
async fn sqlite_single_active_round() -> Result<(), StoreError> {
    let (store, _file) = sqlite_store().await?;
    single_active_round(&store).await
}

#[tokio::test]
async fn sqlite_completed_rounds_newest_first() -> Result<(), StoreError> {
    let (store, _file) = sqlite_store().await?;
    completed_rounds_newest_first(&store).await
}

#[tokio::test]
async fn sqlite_unknown_round() -> Result<(), StoreError> {
    let (store, _file) = sqlite_store().await?;
    unknown_round(&store).await
}

#[tokio::test]
async fn sqlite_active_round_survives_reopen() -> Result<(), StoreError> {
    let file = NamedTempFile::new().map_err(|e| StoreError::Internal(e.to_string()))?;

    let round_id = {
        let store = SqliteRoundStore::new(file.path()).await?;
        store.init().await?;
        let id = store
            .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
            .await?;
        store.upsert_score(id, score(1, 4, 4)).await?;
        id
    };

    let store = SqliteRoundStore::new(file.path()).await?;
    store.init().await?;

    let active = store.get_active_round().await?.expect("active round");
    assert_eq!(active.id, round_id);
    assert_eq!(active.total_strokes, 4);
    assert!(matches!(
        store
            .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
            .await,
        Err(StoreError::RoundAlreadyActive)
    ));
    Ok(())
}
