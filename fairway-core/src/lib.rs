pub mod geo;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

type BoxStr = Box<str>;
type BoxList<T> = Box<[T]>;

/// Identifier a BLE peripheral advertises itself under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub BoxStr);

/// Identifier of a tracked ball. Equals the device id when the ball is
/// backed by a paired peripheral, otherwise a generated ULID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BallId(pub BoxStr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Percentage(pub u8);

impl BallId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().into())
    }
}

impl From<&DeviceId> for BallId {
    fn from(id: &DeviceId) -> Self {
        Self(id.0.clone())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for BallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        geo::distance_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        geo::bearing_degrees(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Shift by the given number of degrees on each axis.
    pub fn offset(&self, d_lat: f64, d_lon: f64) -> Self {
        Self::new(self.latitude + d_lat, self.longitude + d_lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedBall {
    pub id: BallId,
    pub name: BoxStr,
    /// Peripheral backing this ball, absent for synthesized balls.
    pub device_id: Option<DeviceId>,
    pub location: Coordinate,
    pub battery: Option<Percentage>,
    pub rssi: Option<i16>,
    pub connected: bool,
    pub last_seen: jiff::Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub name: Option<BoxStr>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerLocation {
    pub coordinate: Coordinate,
    /// Accuracy radius in meters, when the source reports one.
    pub accuracy: Option<f64>,
    pub timestamp: jiff::Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GolfCourse {
    pub id: CourseId,
    pub name: BoxStr,
    pub location: Coordinate,
    pub holes: BoxList<GolfHole>,
}

impl GolfCourse {
    pub fn hole(&self, number: u8) -> Option<&GolfHole> {
        self.holes.iter().find(|h| h.number == number)
    }

    pub fn total_par(&self) -> u32 {
        self.holes.iter().map(|h| u32::from(h.par)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GolfHole {
    /// 1-based, contiguous within a course.
    pub number: u8,
    pub par: u8,
    pub location: Coordinate,
    pub distance_meters: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub course_id: CourseId,
    pub course_name: BoxStr,
    pub started_at: jiff::Timestamp,
    pub ended_at: Option<jiff::Timestamp>,
    pub active: bool,
    /// Ordered by hole number, at most one entry per hole.
    pub scores: Vec<HoleScore>,
    pub total_strokes: u32,
    pub total_par: u32,
}

impl Round {
    pub fn new(id: RoundId, course_id: CourseId, course_name: impl Into<BoxStr>) -> Self {
        Self {
            id,
            course_id,
            course_name: course_name.into(),
            started_at: jiff::Timestamp::now(),
            ended_at: None,
            active: true,
            scores: Vec::new(),
            total_strokes: 0,
            total_par: 0,
        }
    }

    /// Insert or replace the score for `score.hole_number`, then refold totals.
    pub fn upsert_score(&mut self, score: HoleScore) {
        match self
            .scores
            .binary_search_by_key(&score.hole_number, |s| s.hole_number)
        {
            Ok(idx) => self.scores[idx] = score,
            Err(idx) => self.scores.insert(idx, score),
        }
        self.recompute_totals();
    }

    pub fn recompute_totals(&mut self) {
        self.total_strokes = self.scores.iter().map(|s| u32::from(s.strokes)).sum();
        self.total_par = self.scores.iter().map(|s| u32::from(s.par)).sum();
    }

    /// Hole the player is presumed to be on: one past the number of recorded scores.
    pub fn current_hole_number(&self) -> usize {
        self.scores.len() + 1
    }

    pub fn score_to_par(&self) -> i64 {
        i64::from(self.total_strokes) - i64::from(self.total_par)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoleScore {
    pub hole_number: u8,
    pub par: u8,
    pub strokes: u8,
    pub putts: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementTarget {
    Ball(BallId),
    Hole(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMeasurement {
    pub target: MeasurementTarget,
    pub label: BoxStr,
    pub from: Coordinate,
    pub to: Coordinate,
    pub distance_meters: f64,
    pub bearing_degrees: f64,
}

impl DistanceMeasurement {
    pub fn between(
        target: MeasurementTarget,
        label: impl Into<BoxStr>,
        from: Coordinate,
        to: Coordinate,
    ) -> Self {
        Self {
            target,
            label: label.into(),
            from,
            to,
            distance_meters: from.distance_to(&to),
            bearing_degrees: from.bearing_to(&to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(hole_number: u8, par: u8, strokes: u8) -> HoleScore {
        HoleScore {
            hole_number,
            par,
            strokes,
            putts: None,
        }
    }

    #[test]
    fn upsert_replaces_existing_hole() {
        let mut round = Round::new(RoundId(Ulid::new()), CourseId(Ulid::new()), "Test");
        round.upsert_score(score(1, 4, 6));
        round.upsert_score(score(2, 3, 3));
        round.upsert_score(score(1, 4, 4));

        assert_eq!(round.scores.len(), 2);
        assert_eq!(round.total_strokes, 7);
        assert_eq!(round.total_par, 7);
        assert_eq!(round.score_to_par(), 0);
        assert_eq!(round.current_hole_number(), 3);
    }

    #[test]
    fn scores_stay_ordered_by_hole() {
        let mut round = Round::new(RoundId(Ulid::new()), CourseId(Ulid::new()), "Test");
        round.upsert_score(score(3, 4, 5));
        round.upsert_score(score(1, 4, 5));
        round.upsert_score(score(2, 5, 5));

        let holes: Vec<u8> = round.scores.iter().map(|s| s.hole_number).collect();
        assert_eq!(holes, vec![1, 2, 3]);
    }

    #[test]
    fn ball_id_from_device() {
        let device = DeviceId("AA:BB:CC".into());
        assert_eq!(BallId::from(&device).0.as_ref(), "AA:BB:CC");
        assert_ne!(BallId::generate(), BallId::generate());
    }
}
