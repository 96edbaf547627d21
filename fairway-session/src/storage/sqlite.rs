use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use fairway_core::{Coordinate, CourseId, GolfCourse, GolfHole, HoleScore, Round, RoundId};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};
use ulid::Ulid;

use crate::storage::{RoundStore, StoreError, seed};

const ROUND_COLUMNS: &str =
    "id, course_id, course_name, started_at, ended_at, active, total_strokes, total_par";

#[derive(Clone)]
pub struct SqliteRoundStore {
    pool: SqlitePool,
}

impl SqliteRoundStore {
    /// Opens (creating if needed) the database at `path`. Schema migrations
    /// run in [`RoundStore::init`].
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_scores(&self, round_id: &str) -> Result<Vec<HoleScore>, StoreError> {
        let rows = sqlx::query(
            "SELECT hole_number, par, strokes, putts FROM hole_scores WHERE round_id = ? ORDER BY hole_number",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(score_from_row).collect()
    }

    async fn round_from_row(&self, row: &SqliteRow) -> Result<Round, StoreError> {
        let id: String = row.try_get("id")?;
        let scores = self.load_scores(&id).await?;

        let ended_at: Option<i64> = row.try_get("ended_at")?;

        Ok(Round {
            id: RoundId(parse_ulid(&id)?),
            course_id: CourseId(parse_ulid(&row.try_get::<String, _>("course_id")?)?),
            course_name: row.try_get::<String, _>("course_name")?.into(),
            started_at: parse_timestamp(row.try_get("started_at")?)?,
            ended_at: ended_at.map(parse_timestamp).transpose()?,
            active: row.try_get::<i64, _>("active")? != 0,
            scores,
            total_strokes: to_u32(row.try_get("total_strokes")?)?,
            total_par: to_u32(row.try_get("total_par")?)?,
        })
    }

    async fn insert_course(
        tx: &mut Transaction<'_, Sqlite>,
        course: &GolfCourse,
    ) -> Result<(), StoreError> {
        let id = course.id.0.to_string();

        sqlx::query(
            r#"
            INSERT INTO courses (id, name, latitude, longitude)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                latitude = excluded.latitude,
                longitude = excluded.longitude
            "#,
        )
        .bind(&id)
        .bind(course.name.as_ref())
        .bind(course.location.latitude)
        .bind(course.location.longitude)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM holes WHERE course_id = ?")
            .bind(&id)
            .execute(&mut **tx)
            .await?;

        for hole in course.holes.iter() {
            sqlx::query(
                "INSERT INTO holes (course_id, number, par, latitude, longitude, distance_meters) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(i64::from(hole.number))
            .bind(i64::from(hole.par))
            .bind(hole.location.latitude)
            .bind(hole.location.longitude)
            .bind(i64::from(hole.distance_meters))
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    async fn holes_by_course(&self) -> Result<HashMap<String, Vec<GolfHole>>, StoreError> {
        let rows = sqlx::query(
            "SELECT course_id, number, par, latitude, longitude, distance_meters FROM holes ORDER BY course_id, number",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut holes: HashMap<String, Vec<GolfHole>> = HashMap::new();
        for row in &rows {
            let course_id: String = row.try_get("course_id")?;
            holes.entry(course_id).or_default().push(hole_from_row(row)?);
        }
        Ok(holes)
    }
}

#[async_trait]
impl RoundStore for SqliteRoundStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.run_migrations().await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM courses")
            .fetch_one(&self.pool)
            .await?;

        if count == 0 {
            let course = seed::default_course();
            info!(course = %course.name, "Seeding default course");
            self.upsert_course(course).await?;
        }

        Ok(())
    }

    async fn list_courses(&self) -> Result<Vec<GolfCourse>, StoreError> {
        let rows = sqlx::query("SELECT id, name, latitude, longitude FROM courses ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut holes = self.holes_by_course().await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let course_holes = holes.remove(&id).unwrap_or_default();
                course_from_row(row, &id, course_holes)
            })
            .collect()
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<GolfCourse>, StoreError> {
        let id_str = id.0.to_string();

        let Some(row) =
            sqlx::query("SELECT id, name, latitude, longitude FROM courses WHERE id = ?")
                .bind(&id_str)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let hole_rows = sqlx::query(
            "SELECT number, par, latitude, longitude, distance_meters FROM holes WHERE course_id = ? ORDER BY number",
        )
        .bind(&id_str)
        .fetch_all(&self.pool)
        .await?;

        let holes = hole_rows
            .iter()
            .map(hole_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        course_from_row(&row, &id_str, holes).map(Some)
    }

    async fn upsert_course(&self, course: GolfCourse) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_course(&mut tx, &course).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_active_round(&self) -> Result<Option<Round>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE active = 1 LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.round_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn get_round(&self, id: RoundId) -> Result<Option<Round>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.round_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn create_round(
        &self,
        course_id: CourseId,
        course_name: &str,
    ) -> Result<RoundId, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (active,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rounds WHERE active = 1")
            .fetch_one(&mut *tx)
            .await?;
        if active > 0 {
            return Err(StoreError::RoundAlreadyActive);
        }

        let id = RoundId(Ulid::new());
        sqlx::query(
            r#"
            INSERT INTO rounds (id, course_id, course_name, started_at, active, total_strokes, total_par)
            VALUES (?, ?, ?, ?, 1, 0, 0)
            "#,
        )
        .bind(id.0.to_string())
        .bind(course_id.0.to_string())
        .bind(course_name)
        .bind(jiff::Timestamp::now().as_millisecond())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::RoundAlreadyActive,
            other => other.into(),
        })?;

        tx.commit().await?;

        debug!(round_id = %id, "Created round");
        Ok(id)
    }

    async fn upsert_score(&self, round_id: RoundId, score: HoleScore) -> Result<(), StoreError> {
        let id = round_id.0.to_string();
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM rounds WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::RoundNotFound(round_id));
        }

        sqlx::query(
            r#"
            INSERT INTO hole_scores (round_id, hole_number, par, strokes, putts)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(round_id, hole_number) DO UPDATE SET
                par = excluded.par,
                strokes = excluded.strokes,
                putts = excluded.putts
            "#,
        )
        .bind(&id)
        .bind(i64::from(score.hole_number))
        .bind(i64::from(score.par))
        .bind(i64::from(score.strokes))
        .bind(score.putts.map(i64::from))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE rounds SET
                total_strokes = (SELECT COALESCE(SUM(strokes), 0) FROM hole_scores WHERE round_id = ?),
                total_par = (SELECT COALESCE(SUM(par), 0) FROM hole_scores WHERE round_id = ?)
            WHERE id = ?
            "#,
        )
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn close_round(&self, round_id: RoundId) -> Result<(), StoreError> {
        let id = round_id.0.to_string();

        let closed =
            sqlx::query("UPDATE rounds SET active = 0, ended_at = ? WHERE id = ? AND active = 1")
                .bind(jiff::Timestamp::now().as_millisecond())
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if closed == 0 && self.get_round(round_id).await?.is_none() {
            return Err(StoreError::RoundNotFound(round_id));
        }

        Ok(())
    }

    async fn list_completed_rounds(&self, limit: usize) -> Result<Vec<Round>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE active = 0 ORDER BY started_at DESC LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut rounds = Vec::with_capacity(rows.len());
        for row in &rows {
            rounds.push(self.round_from_row(row).await?);
        }
        Ok(rounds)
    }
}

fn parse_ulid(s: &str) -> Result<Ulid, StoreError> {
    Ulid::from_str(s).map_err(|_| StoreError::Corrupt(format!("invalid ulid {s:?}")))
}

fn parse_timestamp(millis: i64) -> Result<jiff::Timestamp, StoreError> {
    jiff::Timestamp::from_millisecond(millis)
        .map_err(|_| StoreError::Corrupt(format!("invalid timestamp {millis}")))
}

fn to_u8(value: i64) -> Result<u8, StoreError> {
    u8::try_from(value).map_err(|_| StoreError::Corrupt(format!("value {value} out of range")))
}

fn to_u32(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("value {value} out of range")))
}

fn score_from_row(row: &SqliteRow) -> Result<HoleScore, StoreError> {
    let putts: Option<i64> = row.try_get("putts")?;
    Ok(HoleScore {
        hole_number: to_u8(row.try_get("hole_number")?)?,
        par: to_u8(row.try_get("par")?)?,
        strokes: to_u8(row.try_get("strokes")?)?,
        putts: putts.map(to_u8).transpose()?,
    })
}

fn hole_from_row(row: &SqliteRow) -> Result<GolfHole, StoreError> {
    Ok(GolfHole {
        number: to_u8(row.try_get("number")?)?,
        par: to_u8(row.try_get("par")?)?,
        location: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
        distance_meters: to_u32(row.try_get("distance_meters")?)?,
    })
}

fn course_from_row(
    row: &SqliteRow,
    id: &str,
    holes: Vec<GolfHole>,
) -> Result<GolfCourse, StoreError> {
    Ok(GolfCourse {
        id: CourseId(parse_ulid(id)?),
        name: row.try_get::<String, _>("name")?.into(),
        location: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
        holes: holes.into_boxed_slice(),
    })
}

#[cfg(test)]
mod tests {
    use super::SqliteRoundStore;
    use crate::storage::{RoundStore, StoreError, seed};
    use fairway_core::HoleScore;
    use tempfile::NamedTempFile;

    fn score(hole_number: u8, par: u8, strokes: u8) -> HoleScore {
        HoleScore {
            hole_number,
            par,
            strokes,
            putts: Some(2),
        }
    }

    #[tokio::test]
    async fn sqlite_seeds_default_course_once() -> Result<(), StoreError> {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteRoundStore::new(temp_file.path()).await?;

        store.init().await?;
        store.init().await?;

        let courses = store.list_courses().await?;
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0], seed::default_course());

        let course = store.get_course(seed::default_course_id()).await?;
        assert_eq!(course, Some(seed::default_course()));

        Ok(())
    }

    #[tokio::test]
    async fn sqlite_score_totals_survive_reopen() -> Result<(), StoreError> {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path();

        let round_id = {
            let store = SqliteRoundStore::new(db_path).await?;
            store.init().await?;
            let id = store
                .create_round(seed::default_course_id(), seed::DEFAULT_COURSE_NAME)
                .await?;
            store.upsert_score(id, score(1, 4, 5)).await?;
            store.upsert_score(id, score(2, 5, 5)).await?;
            id
        };

        {
            let store = SqliteRoundStore::new(db_path).await?;
            store.init().await?;
            let round = store.get_active_round().await?.expect("active round");
            assert_eq!(round.id, round_id);
            assert_eq!(round.scores.len(), 2);
            assert_eq!(round.total_strokes, 10);
            assert_eq!(round.total_par, 9);
            assert_eq!(round.scores[0].putts, Some(2));
        }

        Ok(())
    }
}
