//! Flashcard store with spaced-repetition review
//!
//! Due cards are read with a range query on the `next_review_at` index. Recording a
//! review is a read-modify-write inside one `flashcards` transaction and fails with
//! `NotFound` when the card does not exist.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction, params};
use tracing::{debug, info};

use crate::database::{Database, Table, millis_column, to_millis};
use crate::error::{Error, Result};
use crate::scheduler::{Grade, MIN_EASE_FACTOR, schedule};
use crate::types::{Flashcard, FlashcardId, MAX_GRADE, NewFlashcard, now};

const KIND: &str = "flashcard";

const SELECT_COLUMNS: &str = "SELECT id, front, back, difficulty, ease_factor, interval_days,
                                     next_review_at, repetitions
                              FROM flashcards";

const DUE_FILTER: &str = "WHERE next_review_at <= ?1 ORDER BY next_review_at ASC, id ASC";

#[derive(Clone)]
pub struct FlashcardStore {
    db: Database,
}

fn row_to_flashcard(row: &Row<'_>) -> rusqlite::Result<Flashcard> {
    Ok(Flashcard {
        id: row.get(0)?,
        front: row.get(1)?,
        back: row.get(2)?,
        difficulty: row.get(3)?,
        ease_factor: row.get(4)?,
        interval_days: row.get(5)?,
        next_review_at: millis_column(row, 6)?,
        repetitions: row.get(7)?,
    })
}

fn fetch(tx: &Transaction<'_>, id: FlashcardId) -> Result<Flashcard> {
    tx.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        row_to_flashcard,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(KIND, id))
}

fn validate(card: &NewFlashcard) -> Result<()> {
    if card.difficulty > MAX_GRADE {
        return Err(Error::Validation(format!(
            "difficulty must be between 0 and {MAX_GRADE}, got {}",
            card.difficulty
        )));
    }
    if !card.ease_factor.is_finite() || card.ease_factor < MIN_EASE_FACTOR {
        return Err(Error::Validation(format!(
            "ease factor must be at least {MIN_EASE_FACTOR}, got {}",
            card.ease_factor
        )));
    }
    Ok(())
}

impl FlashcardStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a card and return its assigned id
    pub async fn save(&self, card: NewFlashcard) -> Result<FlashcardId> {
        validate(&card)?;

        let id = self
            .db
            .transact(Table::Flashcards, move |tx| {
                tx.execute(
                    "INSERT INTO flashcards (front, back, difficulty, ease_factor, interval_days,
                                             next_review_at, repetitions)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        card.front,
                        card.back,
                        card.difficulty,
                        card.ease_factor,
                        card.interval_days,
                        to_millis(card.next_review_at),
                        card.repetitions,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await?;

        debug!("Saved flashcard {}", id);
        Ok(id)
    }

    pub async fn get(&self, id: FlashcardId) -> Result<Flashcard> {
        self.db
            .transact(Table::Flashcards, move |tx| fetch(tx, id))
            .await
    }

    pub async fn delete(&self, id: FlashcardId) -> Result<()> {
        self.db
            .transact(Table::Flashcards, move |tx| {
                match tx.execute("DELETE FROM flashcards WHERE id = ?1", params![id])? {
                    0 => Err(Error::not_found(KIND, id)),
                    _ => Ok(()),
                }
            })
            .await?;

        info!("Deleted flashcard {}", id);
        Ok(())
    }

    /// Every card, soonest review first
    pub async fn list_all(&self) -> Result<Vec<Flashcard>> {
        self.db
            .transact(Table::Flashcards, |tx| {
                let mut stmt = tx.prepare(&format!(
                    "{SELECT_COLUMNS} ORDER BY next_review_at ASC, id ASC"
                ))?;
                let cards = stmt
                    .query_map([], row_to_flashcard)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(cards)
            })
            .await
    }

    /// Cards whose next review is at or before `now`, soonest first
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Flashcard>> {
        let cutoff = to_millis(now);

        self.db
            .transact(Table::Flashcards, move |tx| {
                let mut stmt = tx.prepare(&format!("{SELECT_COLUMNS} {DUE_FILTER}"))?;
                let cards = stmt
                    .query_map(params![cutoff], row_to_flashcard)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(cards)
            })
            .await
    }

    /// Record a review graded 0-5 at the current time
    pub async fn record_review(&self, id: FlashcardId, grade: u8) -> Result<Flashcard> {
        self.record_review_at(id, grade, now()).await
    }

    /// Record a review graded 0-5 at `now` and persist the rescheduled card
    pub async fn record_review_at(
        &self,
        id: FlashcardId,
        grade: u8,
        now: DateTime<Utc>,
    ) -> Result<Flashcard> {
        let grade = Grade::new(grade)?;

        let updated = self
            .db
            .transact(Table::Flashcards, move |tx| {
                let card = fetch(tx, id)?;
                let next = schedule(&card, grade, now);
                tx.execute(
                    "UPDATE flashcards
                     SET difficulty = ?1, ease_factor = ?2, interval_days = ?3,
                         next_review_at = ?4, repetitions = ?5
                     WHERE id = ?6",
                    params![
                        next.difficulty,
                        next.ease_factor,
                        next.interval_days,
                        to_millis(next.next_review_at),
                        next.repetitions,
                        id,
                    ],
                )?;
                Ok(next)
            })
            .await?;

        info!(
            "Reviewed flashcard {} with grade {}: next in {} day(s)",
            id,
            grade.value(),
            updated.interval_days
        );
        Ok(updated)
    }
}
