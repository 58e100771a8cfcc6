//! Note store: vocabulary, phrase and grammar notes

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{OptionalExtension, Row, ToSql, params};
use tracing::{debug, info};

use crate::database::{Database, Table, millis_column, to_millis};
use crate::error::{Error, Result};
use crate::types::{NewNote, Note, NoteCategory, NoteId};

const KIND: &str = "note";

const SELECT_COLUMNS: &str = "SELECT id, text, translation, category, created_at FROM notes";

#[derive(Clone)]
pub struct NoteStore {
    db: Database,
}

impl ToSql for NoteCategory {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NoteCategory {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(e.to_string().into()))
    }
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        text: row.get(1)?,
        translation: row.get(2)?,
        category: row.get(3)?,
        created_at: millis_column(row, 4)?,
    })
}

impl NoteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a note and return its assigned id
    pub async fn save(&self, note: NewNote) -> Result<NoteId> {
        let id = self
            .db
            .transact(Table::Notes, move |tx| {
                tx.execute(
                    "INSERT INTO notes (text, translation, category, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        note.text,
                        note.translation,
                        note.category,
                        to_millis(note.created_at),
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await?;

        debug!("Saved note {}", id);
        Ok(id)
    }

    pub async fn get(&self, id: NoteId) -> Result<Note> {
        self.db
            .transact(Table::Notes, move |tx| {
                let row = tx
                    .query_row(
                        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                        params![id],
                        row_to_note,
                    )
                    .optional()?;
                row.ok_or_else(|| Error::not_found(KIND, id))
            })
            .await
    }

    pub async fn delete(&self, id: NoteId) -> Result<()> {
        self.db
            .transact(Table::Notes, move |tx| {
                match tx.execute("DELETE FROM notes WHERE id = ?1", params![id])? {
                    0 => Err(Error::not_found(KIND, id)),
                    _ => Ok(()),
                }
            })
            .await?;

        info!("Deleted note {}", id);
        Ok(())
    }

    /// Notes of one category, newest first, read through the category index
    pub async fn list_by_category(&self, category: NoteCategory) -> Result<Vec<Note>> {
        self.query(
            format!("{SELECT_COLUMNS} WHERE category = ?1 ORDER BY created_at DESC, id DESC"),
            Some(category),
        )
        .await
    }

    /// Every note, newest first
    pub async fn list_all(&self) -> Result<Vec<Note>> {
        self.query(
            format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"),
            None,
        )
        .await
    }

    async fn query(&self, sql: String, category: Option<NoteCategory>) -> Result<Vec<Note>> {
        self.db
            .transact(Table::Notes, move |tx| {
                let mut stmt = tx.prepare(&sql)?;
                let notes = match category {
                    Some(category) => stmt
                        .query_map(params![category], row_to_note)?
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                    None => stmt
                        .query_map([], row_to_note)?
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                };
                Ok(notes)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    fn store() -> NoteStore {
        NoteStore::new(DatabaseManager::in_memory().open().unwrap())
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = store();
        let note = NewNote::new("el perro", NoteCategory::Word).with_translation("the dog");

        let id = store.save(note.clone()).await.unwrap();
        let stored = store.get(id).await.unwrap();

        assert_eq!(stored.text, "el perro");
        assert_eq!(stored.translation.as_deref(), Some("the dog"));
        assert_eq!(stored.category, NoteCategory::Word);
        assert_eq!(stored.created_at, note.created_at);
    }

    #[tokio::test]
    async fn test_list_by_category_is_exact_for_every_category() {
        let store = store();
        let samples = [
            ("perro", NoteCategory::Word),
            ("gato", NoteCategory::Word),
            ("¿Qué tal?", NoteCategory::Phrase),
            ("ser vs estar", NoteCategory::Grammar),
            ("ñ", NoteCategory::Other),
        ];
        for (text, category) in samples {
            store.save(NewNote::new(text, category)).await.unwrap();
        }

        for &category in NoteCategory::all() {
            let listed = store.list_by_category(category).await.unwrap();
            let expected = samples.iter().filter(|(_, c)| *c == category).count();
            assert_eq!(listed.len(), expected, "{category}");
            assert!(listed.iter().all(|n| n.category == category));
        }

        assert_eq!(store.list_all().await.unwrap().len(), samples.len());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let keep = store
            .save(NewNote::new("hola", NoteCategory::Word))
            .await
            .unwrap();
        let gone = store
            .save(NewNote::new("adiós", NoteCategory::Word))
            .await
            .unwrap();

        store.delete(gone).await.unwrap();

        let ids: Vec<NoteId> = store.list_all().await.unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![keep]);
        assert!(store.delete(gone).await.unwrap_err().is_not_found());
        assert!(store.get(gone).await.unwrap_err().is_not_found());
    }
}
