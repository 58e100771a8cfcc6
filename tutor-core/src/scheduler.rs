//! Spaced-repetition review scheduling (SM-2 family)
//!
//! `schedule` is pure: it maps a card, a recall grade and the review instant to the
//! card's next state without touching storage.
//!
//! Ease factor update: `ef' = max(ef + 0.1 - q * (0.08 + q * 0.02), 1.3)` where
//! `q = 5 - grade`. A grade below 3 resets progress to one repetition-free day; a
//! passing grade grows the interval 1 -> 6 -> `round(interval * ef')`, capped at
//! [`MAX_INTERVAL_DAYS`].

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::types::{Flashcard, MAX_GRADE};

/// Floor the ease factor never drops below
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Lowest grade that counts as a successful recall
pub const PASSING_GRADE: u8 = 3;

/// Interval after the second consecutive successful review
const SECOND_INTERVAL_DAYS: u32 = 6;

/// Longest interval a card can be scheduled out, about a century
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// Recall quality from 0 (blackout) to 5 (perfect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grade(u8);

impl Grade {
    pub fn new(grade: u8) -> Result<Self> {
        if grade > MAX_GRADE {
            return Err(Error::Validation(format!(
                "grade must be between 0 and {MAX_GRADE}, got {grade}"
            )));
        }
        Ok(Self(grade))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_passing(&self) -> bool {
        self.0 >= PASSING_GRADE
    }
}

impl TryFrom<u8> for Grade {
    type Error = Error;

    fn try_from(grade: u8) -> Result<Self> {
        Self::new(grade)
    }
}

/// Ease factor after a review with the given grade
pub fn next_ease_factor(ease_factor: f64, grade: Grade) -> f64 {
    let q = f64::from(MAX_GRADE - grade.value());
    (ease_factor + (0.1 - q * (0.08 + q * 0.02))).max(MIN_EASE_FACTOR)
}

/// Compute the card's state after being reviewed at `now`
///
/// `difficulty` records how hard the latest recall was (`5 - grade`); the ease factor
/// is carried separately as a float.
pub fn schedule(card: &Flashcard, grade: Grade, now: DateTime<Utc>) -> Flashcard {
    let ease_factor = next_ease_factor(card.ease_factor, grade);

    let (repetitions, interval_days) = if grade.is_passing() {
        let repetitions = card.repetitions.saturating_add(1);
        let interval_days = match repetitions {
            1 => 1,
            2 => SECOND_INTERVAL_DAYS,
            // a card stored with a zero interval still moves at least a day forward
            _ => ((f64::from(card.interval_days) * ease_factor).round() as u32).max(1),
        };
        (repetitions, interval_days.min(MAX_INTERVAL_DAYS))
    } else {
        (0, 1)
    };

    Flashcard {
        difficulty: MAX_GRADE - grade.value(),
        ease_factor,
        interval_days,
        next_review_at: now
            .checked_add_signed(Duration::days(i64::from(interval_days)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        repetitions,
        ..card.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_EASE_FACTOR;

    fn card() -> Flashcard {
        Flashcard {
            id: 1,
            front: "perro".to_string(),
            back: "dog".to_string(),
            difficulty: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0,
            next_review_at: DateTime::<Utc>::UNIX_EPOCH,
            repetitions: 0,
        }
    }

    fn grade(g: u8) -> Grade {
        Grade::new(g).unwrap()
    }

    #[test]
    fn test_first_perfect_review() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let next = schedule(&card(), grade(5), now);

        assert_eq!(next.repetitions, 1);
        assert_eq!(next.interval_days, 1);
        assert_eq!(next.next_review_at, now + Duration::days(1));
        assert!((next.ease_factor - 2.6).abs() < 1e-9);
        assert_eq!(next.difficulty, 0);
        assert_eq!(next.front, "perro");
    }

    #[test]
    fn test_interval_progression() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let first = schedule(&card(), grade(4), now);
        let second = schedule(&first, grade(4), now);
        let third = schedule(&second, grade(4), now);

        assert_eq!(first.interval_days, 1);
        assert_eq!(second.interval_days, 6);
        // grade 4 leaves the ease factor at 2.5
        assert_eq!(third.interval_days, 15);
        assert_eq!(third.repetitions, 3);
    }

    #[test]
    fn test_failure_resets_regardless_of_prior_state() {
        let mature = Flashcard {
            repetitions: 7,
            interval_days: 120,
            ease_factor: 2.9,
            ..card()
        };
        let now = DateTime::<Utc>::UNIX_EPOCH;

        for g in 0..PASSING_GRADE {
            let next = schedule(&mature, grade(g), now);
            assert_eq!(next.repetitions, 0, "grade {g}");
            assert_eq!(next.interval_days, 1, "grade {g}");
            assert_eq!(next.next_review_at, now + Duration::days(1));
            assert_eq!(next.difficulty, 5 - g);
        }
    }

    #[test]
    fn test_ease_factor_floor() {
        let mut ef = DEFAULT_EASE_FACTOR;
        for _ in 0..50 {
            ef = next_ease_factor(ef, grade(0));
            assert!(ef >= MIN_EASE_FACTOR);
        }
        assert_eq!(ef, MIN_EASE_FACTOR);
    }

    #[test]
    fn test_successful_reviews_never_shrink_interval() {
        // every sequence of six passing grades, starting from a fresh card
        let passing = [3u8, 4, 5];
        for mut code in 0..passing.len().pow(6) {
            let mut current = card();
            let mut previous = 0;
            for _ in 0..6 {
                let g = passing[code % passing.len()];
                code /= passing.len();

                current = schedule(&current, grade(g), DateTime::<Utc>::UNIX_EPOCH);
                assert!(current.interval_days >= previous);
                assert!(current.ease_factor >= MIN_EASE_FACTOR);
                previous = current.interval_days;
            }
        }
    }

    #[test]
    fn test_long_perfect_streak_is_capped() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut current = card();
        let mut previous = 0;
        for _ in 0..60 {
            current = schedule(&current, grade(5), now);
            assert!(current.interval_days >= previous);
            assert!(current.interval_days <= MAX_INTERVAL_DAYS);
            previous = current.interval_days;
        }
        assert_eq!(current.interval_days, MAX_INTERVAL_DAYS);
        assert_eq!(
            current.next_review_at,
            now + Duration::days(i64::from(MAX_INTERVAL_DAYS))
        );

        let extreme = Flashcard {
            repetitions: 9,
            interval_days: u32::MAX,
            ..card()
        };
        let next = schedule(&extreme, grade(5), DateTime::<Utc>::MAX_UTC);
        assert_eq!(next.interval_days, MAX_INTERVAL_DAYS);
        assert_eq!(next.next_review_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_grade_out_of_range() {
        assert!(Grade::new(6).is_err());
        assert!(Grade::try_from(5).is_ok());
        assert!(!grade(2).is_passing());
        assert!(grade(3).is_passing());
    }
}
