//! SQLite-backed document store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::de::DeserializeOwned;

use crate::{
    message::FailedMessage,
    record::{BatchRecord, OperationRecord, RECORD_FORMAT_VERSION, RecordEnvelope, Versioned},
    types::{MessageId, MessageStatus, Version},
    uow::{Command, UnitOfWork},
};

use super::{DocumentStore, GroupView, StoreError, StoreResult};

/// SQLite implementation of [`crate::store::DocumentStore`].
///
/// Every commit runs in one SQLite transaction, so the index queries are
/// never stale against this backend.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stores messages in one commit.
    pub fn insert_messages(&self, messages: impl IntoIterator<Item = FailedMessage>) -> StoreResult<()> {
        let mut uow = UnitOfWork::new();
        for message in messages {
            uow.stage(Command::PutMessage { message });
        }
        self.commit(uow)
    }

    /// Ids of all stored batch records, sorted.
    pub fn batch_ids(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM batches ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn group_view(&self, group_id: &str, status: MessageStatus) -> StoreResult<Option<GroupView>> {
        let conn = self.lock()?;
        let (title, count): (Option<String>, i64) = conn.query_row(
            "SELECT MAX(g.group_title), COUNT(*)
             FROM failure_group_members g
             JOIN failed_messages m ON m.id = g.message_id
             WHERE g.group_id = ?1 AND m.status = ?2",
            params![group_id, status.code()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(GroupView {
            id: group_id.to_string(),
            title: title.unwrap_or_default(),
            count: count as usize,
        }))
    }

    fn page_group_message_ids(
        &self,
        group_id: &str,
        status: MessageStatus,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<MessageId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT g.message_id
             FROM failure_group_members g
             JOIN failed_messages m ON m.id = g.message_id
             WHERE g.group_id = ?1 AND m.status = ?2 AND g.message_id > ?3
             ORDER BY g.message_id ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![group_id, status.code(), after.unwrap_or(""), limit as i64],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn load_message(&self, id: &str) -> StoreResult<Option<FailedMessage>> {
        let conn = self.lock()?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT status, payload FROM failed_messages WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((code, payload)) = row else {
            return Ok(None);
        };

        let mut message: FailedMessage = serde_json::from_slice(&payload)?;
        // The status column is authoritative; patches do not rewrite the payload.
        message.status = MessageStatus::from_code(code)
            .ok_or_else(|| StoreError::Message(format!("unknown status code {code} on {id}")))?;
        Ok(Some(message))
    }

    fn load_operation(&self, id: &str) -> StoreResult<Option<Versioned<OperationRecord>>> {
        let conn = self.lock()?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT version, payload FROM operations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((version, payload)) = row else {
            return Ok(None);
        };
        Ok(Some(Versioned {
            value: decode_record(&payload)?,
            version: version as Version,
        }))
    }

    fn list_operations(&self) -> StoreResult<Vec<Versioned<OperationRecord>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT version, payload FROM operations ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            let version: i64 = row.get(0)?;
            let payload: Vec<u8> = row.get(1)?;
            Ok((version, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (version, payload) = row?;
            out.push(Versioned {
                value: decode_record(&payload)?,
                version: version as Version,
            });
        }
        Ok(out)
    }

    fn load_batch(&self, id: &str) -> StoreResult<Option<BatchRecord>> {
        let conn = self.lock()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM batches WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        payload.map(|p| decode_record(&p)).transpose()
    }

    fn commit(&self, uow: UnitOfWork) -> StoreResult<()> {
        if uow.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for cmd in uow.into_commands() {
            apply_command(&tx, cmd)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn apply_command(tx: &Transaction<'_>, cmd: Command) -> StoreResult<()> {
    match cmd {
        Command::PutMessage { message } => {
            let payload = serde_json::to_vec(&message)?;
            tx.execute(
                "INSERT INTO failed_messages(id, status, payload) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status, payload = excluded.payload",
                params![message.id, message.status.code(), payload],
            )?;
            tx.execute(
                "DELETE FROM failure_group_members WHERE message_id = ?1",
                params![message.id],
            )?;
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO failure_group_members(message_id, group_id, group_title)
                 VALUES (?1, ?2, ?3)",
            )?;
            for group in &message.failure_groups {
                stmt.execute(params![message.id, group.id, group.title])?;
            }
        }
        Command::PatchMessages { ids, patch } => {
            let Some(status) = patch.status else {
                return Ok(());
            };
            let mut stmt = tx.prepare_cached("UPDATE failed_messages SET status = ?1 WHERE id = ?2")?;
            for id in &ids {
                stmt.execute(params![status.code(), id])?;
            }
        }
        Command::PutOperation {
            record,
            expected_version,
        } => {
            let payload = serde_json::to_vec(&RecordEnvelope::new(&record))?;
            let changed = match expected_version {
                None => tx.execute(
                    "INSERT INTO operations(id, version, payload) VALUES (?1, 1, ?2)
                     ON CONFLICT(id) DO NOTHING",
                    params![record.id, payload],
                )?,
                Some(version) => tx.execute(
                    "UPDATE operations SET version = version + 1, payload = ?1
                     WHERE id = ?2 AND version = ?3",
                    params![payload, record.id, version as i64],
                )?,
            };
            if changed == 0 {
                return Err(StoreError::Conflict {
                    document_id: record.id,
                });
            }
        }
        Command::DeleteOperation {
            id,
            expected_version,
        } => {
            let changed = tx.execute(
                "DELETE FROM operations WHERE id = ?1 AND version = ?2",
                params![id, expected_version as i64],
            )?;
            if changed == 0 {
                return Err(StoreError::Conflict { document_id: id });
            }
        }
        Command::PutBatch { batch } => {
            let payload = serde_json::to_vec(&RecordEnvelope::new(&batch))?;
            tx.execute(
                "INSERT OR REPLACE INTO batches(id, operation_id, batch_index, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![batch.id, batch.operation_id, batch.batch_index as i64, payload],
            )?;
        }
        Command::DeleteBatch { id } => {
            tx.execute("DELETE FROM batches WHERE id = ?1", params![id])?;
        }
    }
    Ok(())
}

fn decode_record<T: DeserializeOwned>(payload: &[u8]) -> StoreResult<T> {
    let env: RecordEnvelope<T> = serde_json::from_slice(payload)?;
    if env.format_version != RECORD_FORMAT_VERSION {
        return Err(StoreError::Message(format!(
            "unsupported record format version: {}",
            env.format_version
        )));
    }
    Ok(env.record)
}
