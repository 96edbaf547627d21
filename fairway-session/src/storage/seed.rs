//! Course shipped with a fresh store.

use fairway_core::{CourseId, GolfCourse, GolfHole};
use ulid::Ulid;

use crate::config::DEFAULT_REFERENCE;

pub const DEFAULT_COURSE_NAME: &str = "Cypress Bluff Links";

const PARS: [u8; 18] = [4, 5, 3, 4, 4, 3, 5, 4, 4, 4, 4, 3, 5, 4, 4, 3, 4, 5];

/// Stable id so every fresh store seeds the same course.
pub fn default_course_id() -> CourseId {
    CourseId(Ulid::from_parts(0, 1))
}

/// An 18-hole, par 72 course laid out in a loop around the default reference.
pub fn default_course() -> GolfCourse {
    let holes = PARS
        .iter()
        .enumerate()
        .map(|(i, &par)| {
            let angle = (i as f64 / PARS.len() as f64) * std::f64::consts::TAU;
            GolfHole {
                number: i as u8 + 1,
                par,
                location: DEFAULT_REFERENCE.offset(0.004 * angle.sin(), 0.005 * angle.cos()),
                distance_meters: match par {
                    3 => 150,
                    4 => 360,
                    _ => 480,
                },
            }
        })
        .collect();

    GolfCourse {
        id: default_course_id(),
        name: DEFAULT_COURSE_NAME.into(),
        location: DEFAULT_REFERENCE,
        holes,
    }
}
