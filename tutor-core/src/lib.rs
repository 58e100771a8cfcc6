//! Tutor Core - local state and playback for a Spanish conversation tutor
//!
//! Conversations, notes and flashcards live in one versioned SQLite database with
//! spaced-repetition review scheduling. Preferences persist as a key-value blob that
//! tolerates older and newer builds. Replies are spoken through an exclusive speech
//! engine with a dialect-aware voice choice.

pub mod attachments;
pub mod chat;
pub mod config;
pub mod conversations;
pub mod database;
pub mod error;
pub mod flashcards;
pub mod kv;
pub mod migrations;
pub mod notes;
pub mod scheduler;
pub mod settings;
pub mod speech;
pub mod theme;
pub mod types;
pub mod voices;

pub use error::{Error, Result};
pub use types::*;

/// Re-export the main components for convenience
pub use chat::{ChatProvider, ChatSession, HttpChatProvider, IdTokenSource};
pub use config::TutorConfig;
pub use conversations::{BlobConversationStore, ConversationStore, SqliteConversationStore};
pub use database::{Database, DatabaseManager};
pub use flashcards::FlashcardStore;
pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
pub use notes::NoteStore;
pub use scheduler::{Grade, schedule};
pub use settings::{Settings, SettingsPatch, SettingsStore};
pub use speech::{PlaybackController, PlaybackState, SpeechEngine};
pub use theme::{ThemeController, SystemPreference};
pub use voices::{Voice, select_voice};
