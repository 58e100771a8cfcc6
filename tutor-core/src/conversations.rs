//! Conversation store: chat transcripts per owner
//!
//! Two backends implement [`ConversationStore`]: the table-backed
//! [`SqliteConversationStore`] used by default, and [`BlobConversationStore`], which
//! keeps each owner's whole history as one JSON blob and rewrites it on every change.

use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Transaction, params};
use tracing::{debug, info};

use crate::database::{Database, Table, millis_column, to_millis};
use crate::error::{Error, Result};
use crate::kv::KeyValueStore;
use crate::types::{Conversation, ConversationId, NewConversation, Turn};

const KIND: &str = "conversation";

/// Typed CRUD and query surface over stored conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Store a new conversation and return its assigned id
    async fn save(&self, conversation: NewConversation) -> Result<ConversationId>;

    async fn get(&self, id: ConversationId) -> Result<Conversation>;

    /// The `limit` most recently created conversations of `owner_id`, newest first
    async fn list(&self, owner_id: &str, limit: usize) -> Result<Vec<Conversation>>;

    async fn delete(&self, id: ConversationId) -> Result<()>;

    /// Conversations of `owner_id` whose title or any turn contains `query`,
    /// ignoring case, newest first
    async fn search(&self, query: &str, owner_id: &str) -> Result<Vec<Conversation>>;

    /// Append turns to an existing conversation in one write; either all are
    /// stored or none are
    async fn append_turns(&self, id: ConversationId, turns: Vec<Turn>) -> Result<Conversation>;

    /// Append a turn to an existing conversation
    async fn append_turn(&self, id: ConversationId, turn: Turn) -> Result<Conversation> {
        self.append_turns(id, vec![turn]).await
    }

    async fn set_title(&self, id: ConversationId, title: &str) -> Result<Conversation>;
}

/// Conversations stored as rows of the `conversations` table
#[derive(Clone)]
pub struct SqliteConversationStore {
    db: Database,
}

impl SqliteConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, owner_id, turns, title, created_at FROM conversations";

type ConversationRow = (ConversationId, String, String, Option<String>, DateTime<Utc>);

fn query_conversations(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Conversation>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, millis_column(row, 4)?))
        })?
        .collect::<std::result::Result<Vec<ConversationRow>, _>>()?;

    rows.into_iter().map(row_to_conversation).collect()
}

fn row_to_conversation(row: ConversationRow) -> Result<Conversation> {
    let (id, owner_id, turns, title, created_at) = row;
    Ok(Conversation {
        id,
        owner_id,
        turns: serde_json::from_str(&turns)?,
        created_at,
        title,
    })
}

fn fetch(tx: &Transaction<'_>, id: ConversationId) -> Result<Conversation> {
    let row: Option<ConversationRow> = tx
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, millis_column(row, 4)?)),
        )
        .optional()?;

    row.map(row_to_conversation)
        .unwrap_or_else(|| Err(Error::not_found(KIND, id)))
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn save(&self, conversation: NewConversation) -> Result<ConversationId> {
        let turns = serde_json::to_string(&conversation.turns)?;

        let id = self
            .db
            .transact(Table::Conversations, move |tx| {
                tx.execute(
                    "INSERT INTO conversations (owner_id, turns, title, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        conversation.owner_id,
                        turns,
                        conversation.title,
                        to_millis(conversation.created_at),
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await?;

        debug!("Saved conversation {}", id);
        Ok(id)
    }

    async fn get(&self, id: ConversationId) -> Result<Conversation> {
        self.db
            .transact(Table::Conversations, move |tx| fetch(tx, id))
            .await
    }

    async fn list(&self, owner_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let owner_id = owner_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // sort before truncating so the limit keeps the newest rows
        self.db
            .transact(Table::Conversations, move |tx| {
                query_conversations(
                    tx,
                    &format!(
                        "{SELECT_COLUMNS} WHERE owner_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT ?2"
                    ),
                    params![owner_id, limit],
                )
            })
            .await
    }

    async fn delete(&self, id: ConversationId) -> Result<()> {
        self.db
            .transact(Table::Conversations, move |tx| {
                match tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])? {
                    0 => Err(Error::not_found(KIND, id)),
                    _ => Ok(()),
                }
            })
            .await?;

        info!("Deleted conversation {}", id);
        Ok(())
    }

    async fn search(&self, query: &str, owner_id: &str) -> Result<Vec<Conversation>> {
        let owner_id = owner_id.to_string();

        let owned = self
            .db
            .transact(Table::Conversations, move |tx| {
                query_conversations(
                    tx,
                    &format!(
                        "{SELECT_COLUMNS} WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC"
                    ),
                    params![owner_id],
                )
            })
            .await?;

        Ok(owned.into_iter().filter(|c| c.matches(query)).collect())
    }

    async fn append_turns(&self, id: ConversationId, turns: Vec<Turn>) -> Result<Conversation> {
        self.db
            .transact(Table::Conversations, move |tx| {
                let mut conversation = fetch(tx, id)?;
                conversation.turns.extend(turns);
                tx.execute(
                    "UPDATE conversations SET turns = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&conversation.turns)?, id],
                )?;
                Ok(conversation)
            })
            .await
    }

    async fn set_title(&self, id: ConversationId, title: &str) -> Result<Conversation> {
        let title = title.to_string();

        self.db
            .transact(Table::Conversations, move |tx| {
                let mut conversation = fetch(tx, id)?;
                tx.execute(
                    "UPDATE conversations SET title = ?1 WHERE id = ?2",
                    params![title, id],
                )?;
                conversation.title = Some(title);
                Ok(conversation)
            })
            .await
    }
}

const HISTORY_PREFIX: &str = "chat_history_";
const SEQUENCE_KEY: &str = "conversation_seq";

/// Conversations kept as one JSON array per owner in a key-value store
///
/// Every change loads and rewrites the owner's whole history. There is no
/// transaction beyond the store's own last-write-wins, so this backend suits small
/// single-user histories.
pub struct BlobConversationStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: tokio::sync::Mutex<()>,
}

impl BlobConversationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn key(owner_id: &str) -> String {
        format!("{HISTORY_PREFIX}{owner_id}")
    }

    fn load(&self, key: &str) -> Result<Vec<Conversation>> {
        match self.kv.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn store(&self, key: &str, history: &[Conversation]) -> Result<()> {
        self.kv.set(key, &serde_json::to_string(history)?)
    }

    fn next_id(&self) -> Result<ConversationId> {
        let current = match self.kv.get(SEQUENCE_KEY)? {
            Some(raw) => raw
                .parse::<ConversationId>()
                .map_err(|e| Error::Validation(format!("corrupt conversation sequence: {e}")))?,
            None => 0,
        };
        let next = current + 1;
        self.kv.set(SEQUENCE_KEY, &next.to_string())?;
        Ok(next)
    }

    /// Locate the owner blob holding `id`
    fn locate(&self, id: ConversationId) -> Result<(String, Vec<Conversation>, usize)> {
        for key in self.kv.keys(HISTORY_PREFIX)? {
            let history = self.load(&key)?;
            if let Some(pos) = history.iter().position(|c| c.id == id) {
                return Ok((key, history, pos));
            }
        }
        Err(Error::not_found(KIND, id))
    }

    fn update(
        &self,
        id: ConversationId,
        apply: impl FnOnce(&mut Conversation),
    ) -> Result<Conversation> {
        let (key, mut history, pos) = self.locate(id)?;
        apply(&mut history[pos]);
        let updated = history[pos].clone();
        self.store(&key, &history)?;
        Ok(updated)
    }

    /// Erase an owner's whole history
    pub async fn clear(&self, owner_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.kv.remove(&Self::key(owner_id))?;
        info!("Cleared chat history for {}", owner_id);
        Ok(())
    }

    fn newest_first(mut history: Vec<Conversation>) -> Vec<Conversation> {
        history.sort_by_key(|c| Reverse((c.created_at, c.id)));
        history
    }
}

#[async_trait]
impl ConversationStore for BlobConversationStore {
    async fn save(&self, conversation: NewConversation) -> Result<ConversationId> {
        let _guard = self.write_lock.lock().await;
        let key = Self::key(&conversation.owner_id);
        let mut history = self.load(&key)?;
        let id = self.next_id()?;
        history.push(conversation.with_id(id));
        self.store(&key, &history)?;
        debug!("Saved conversation {} to history blob", id);
        Ok(id)
    }

    async fn get(&self, id: ConversationId) -> Result<Conversation> {
        let (_, history, pos) = self.locate(id)?;
        Ok(history[pos].clone())
    }

    async fn list(&self, owner_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let mut history = Self::newest_first(self.load(&Self::key(owner_id))?);
        history.truncate(limit);
        Ok(history)
    }

    async fn delete(&self, id: ConversationId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (key, mut history, pos) = self.locate(id)?;
        history.remove(pos);
        self.store(&key, &history)?;
        info!("Deleted conversation {} from history blob", id);
        Ok(())
    }

    async fn search(&self, query: &str, owner_id: &str) -> Result<Vec<Conversation>> {
        let history = Self::newest_first(self.load(&Self::key(owner_id))?);
        Ok(history.into_iter().filter(|c| c.matches(query)).collect())
    }

    async fn append_turns(&self, id: ConversationId, turns: Vec<Turn>) -> Result<Conversation> {
        let _guard = self.write_lock.lock().await;
        self.update(id, |c| c.turns.extend(turns))
    }

    async fn set_title(&self, id: ConversationId, title: &str) -> Result<Conversation> {
        let _guard = self.write_lock.lock().await;
        self.update(id, |c| c.title = Some(title.to_string()))
    }
}
