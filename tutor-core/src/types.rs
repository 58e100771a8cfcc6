//! Core types persisted by the tutor: conversations, notes, flashcards and preferences

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Current time at the millisecond precision timestamps are persisted with
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Store-assigned identifier for conversations
pub type ConversationId = i64;

/// Store-assigned identifier for notes
pub type NoteId = i64;

/// Store-assigned identifier for flashcards
pub type FlashcardId = i64;

/// Who produced a turn in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Base64 data URL of an attached image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// A conversation that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConversation {
    pub owner_id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
}

impl NewConversation {
    pub fn new(owner_id: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            owner_id: owner_id.into(),
            turns,
            created_at: now(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(3);
        self
    }

    pub(crate) fn with_id(self, id: ConversationId) -> Conversation {
        Conversation {
            id,
            owner_id: self.owner_id,
            turns: self.turns,
            created_at: self.created_at,
            title: self.title,
        }
    }
}

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
}

impl Conversation {
    /// Case-insensitive substring match over turn texts and title
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.turns
            .iter()
            .any(|turn| turn.text.to_lowercase().contains(&needle))
            || self
                .title
                .as_ref()
                .is_some_and(|title| title.to_lowercase().contains(&needle))
    }
}

/// Kind of vocabulary note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    Word,
    Phrase,
    Grammar,
    Other,
}

impl NoteCategory {
    pub fn all() -> &'static [NoteCategory] {
        &[
            NoteCategory::Word,
            NoteCategory::Phrase,
            NoteCategory::Grammar,
            NoteCategory::Other,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::Phrase => "phrase",
            Self::Grammar => "grammar",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for NoteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "word" => Ok(Self::Word),
            "phrase" => Ok(Self::Phrase),
            "grammar" => Ok(Self::Grammar),
            "other" => Ok(Self::Other),
            other => Err(Error::Validation(format!("unknown note category: {other}"))),
        }
    }
}

/// A note that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub text: String,
    pub translation: Option<String>,
    pub category: NoteCategory,
    pub created_at: DateTime<Utc>,
}

impl NewNote {
    pub fn new(text: impl Into<String>, category: NoteCategory) -> Self {
        Self {
            text: text.into(),
            translation: None,
            category,
            created_at: now(),
        }
    }

    pub fn with_translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = Some(translation.into());
        self
    }
}

/// A stored note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub text: String,
    pub translation: Option<String>,
    pub category: NoteCategory,
    pub created_at: DateTime<Utc>,
}

/// Ease factor every new card starts with
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Upper bound of the difficulty and grade scales
pub const MAX_GRADE: u8 = 5;

/// A flashcard that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlashcard {
    pub front: String,
    pub back: String,
    /// 0 (easy) to 5 (hard)
    pub difficulty: u8,
    pub ease_factor: f64,
    pub interval_days: u32,
    pub next_review_at: DateTime<Utc>,
    pub repetitions: u32,
}

impl NewFlashcard {
    /// A card due immediately with no review history
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
            difficulty: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0,
            next_review_at: now(),
            repetitions: 0,
        }
    }

    pub fn due_at(mut self, next_review_at: DateTime<Utc>) -> Self {
        self.next_review_at = next_review_at.trunc_subsecs(3);
        self
    }
}

/// A stored flashcard with its spaced-repetition state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: FlashcardId,
    pub front: String,
    pub back: String,
    pub difficulty: u8,
    pub ease_factor: f64,
    pub interval_days: u32,
    pub next_review_at: DateTime<Utc>,
    pub repetitions: u32,
}

impl Flashcard {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}

/// Presentation theme preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
    /// Follow the operating system preference
    Auto,
}

/// Spanish dialect used for speech synthesis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Spain,
    Mexico,
    #[default]
    Neutral,
}

/// Language the learner reads explanations in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLanguage {
    En,
    Fr,
    De,
    Pt,
    It,
    Zh,
    Ja,
    Ar,
    #[default]
    Auto,
}
