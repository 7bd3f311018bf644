//! Durable local queue of pending mutations.
//!
//! Writes attempted while offline (or opportunistically, write-then-sync) are
//! buffered here and drained by the sync coordinator. The store owns every
//! record; callers only enqueue and never read records back for display.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use crate::ids::local_id;

/// The kinds of write-intent the app defers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
  JournalWrite,
  HabitCompletion,
}

impl WriteKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::JournalWrite => "journal_write",
      Self::HabitCompletion => "habit_completion",
    }
  }

  fn parse(s: &str) -> Result<Self> {
    match s {
      "journal_write" => Ok(Self::JournalWrite),
      "habit_completion" => Ok(Self::HabitCompletion),
      other => Err(eyre!("Unknown outbox record kind: {}", other)),
    }
  }
}

impl fmt::Display for WriteKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A single buffered mutation.
///
/// Records are never mutated after creation except the `synced` flag, which
/// flips false→true exactly once and never back.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
  pub id: String,
  pub kind: WriteKind,
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub synced: bool,
}

/// Schema for the outbox table. The version is fixed; a bump recreates the
/// store rather than migrating it.
const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_outbox_kind ON outbox(kind);
CREATE INDEX IF NOT EXISTS idx_outbox_created ON outbox(created_at);
CREATE INDEX IF NOT EXISTS idx_outbox_synced ON outbox(synced);
"#;

/// SQLite-backed outbox store.
pub struct Outbox {
  conn: Mutex<Connection>,
}

impl Outbox {
  /// Open or create the outbox at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create outbox directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open outbox database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// In-memory outbox, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory outbox: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(OUTBOX_SCHEMA)
      .map_err(|e| eyre!("Failed to run outbox migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Buffer a mutation locally and return its id. Never touches the network.
  pub fn enqueue(&self, kind: WriteKind, payload: serde_json::Value) -> Result<String> {
    let record = OutboxRecord {
      id: local_id(),
      kind,
      payload,
      created_at: Utc::now(),
      synced: false,
    };
    self.insert(&record)?;
    Ok(record.id)
  }

  fn insert(&self, record: &OutboxRecord) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload = serde_json::to_string(&record.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO outbox (id, kind, payload, created_at, synced)
         VALUES (?, ?, ?, ?, ?)",
        params![
          record.id,
          record.kind.as_str(),
          payload,
          rfc3339(record.created_at),
          record.synced,
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue record: {}", e))?;

    Ok(())
  }

  /// Snapshot of pending records, oldest first, optionally filtered by kind.
  ///
  /// This is a snapshot, not a live cursor: a record enqueued while a drain
  /// iterates the result waits for the next trigger.
  pub fn list_unsynced(&self, kind: Option<WriteKind>) -> Result<Vec<OutboxRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = match kind {
      Some(_) => {
        "SELECT id, kind, payload, created_at, synced FROM outbox
         WHERE synced = 0 AND kind = ?1 ORDER BY created_at"
      }
      None => {
        "SELECT id, kind, payload, created_at, synced FROM outbox
         WHERE synced = 0 ORDER BY created_at"
      }
    };

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    let rows: Vec<RawRecord> = match kind {
      Some(k) => stmt
        .query_map(params![k.as_str()], raw_record)
        .map_err(|e| eyre!("Failed to query outbox: {}", e))?
        .collect::<rusqlite::Result<_>>(),
      None => stmt
        .query_map([], raw_record)
        .map_err(|e| eyre!("Failed to query outbox: {}", e))?
        .collect::<rusqlite::Result<_>>(),
    }
    .map_err(|e| eyre!("Failed to read outbox row: {}", e))?;

    rows.into_iter().map(parse_record).collect()
  }

  /// Flip a record to synced. Idempotent: marking an already-synced record,
  /// or an unknown id, is a no-op.
  pub fn mark_synced(&self, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("UPDATE outbox SET synced = 1 WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to mark record synced: {}", e))?;

    Ok(())
  }

  /// Purge synced records created before `cutoff`, returning how many were
  /// deleted. Unsynced records are never purged regardless of age.
  pub fn sweep_synced_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute(
        "DELETE FROM outbox WHERE synced = 1 AND created_at < ?",
        params![rfc3339(cutoff)],
      )
      .map_err(|e| eyre!("Failed to sweep synced records: {}", e))?;

    Ok(deleted)
  }
}

type RawRecord = (String, String, String, String, bool);

fn raw_record(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

fn parse_record((id, kind, payload, created_at, synced): RawRecord) -> Result<OutboxRecord> {
  Ok(OutboxRecord {
    kind: WriteKind::parse(&kind)?,
    payload: serde_json::from_str(&payload)
      .map_err(|e| eyre!("Failed to deserialize payload for {}: {}", id, e))?,
    created_at: DateTime::parse_from_rfc3339(&created_at)
      .map_err(|e| eyre!("Failed to parse created_at for {}: {}", id, e))?
      .with_timezone(&Utc),
    id,
    synced,
  })
}

/// UTC timestamps in a fixed millisecond format so string comparison in SQL
/// matches chronological order.
fn rfc3339(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use serde_json::json;

  #[test]
  fn test_enqueue_then_list_roundtrip() {
    let outbox = Outbox::open_in_memory().unwrap();

    let id = outbox
      .enqueue(WriteKind::HabitCompletion, json!({"habit_id": "water", "count": 3}))
      .unwrap();

    let pending = outbox.list_unsynced(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].kind, WriteKind::HabitCompletion);
    assert_eq!(pending[0].payload["habit_id"], "water");
    assert!(!pending[0].synced);
  }

  #[test]
  fn test_list_unsynced_filters_by_kind() {
    let outbox = Outbox::open_in_memory().unwrap();
    outbox.enqueue(WriteKind::JournalWrite, json!({"text": "dear diary"})).unwrap();
    let habit_id = outbox
      .enqueue(WriteKind::HabitCompletion, json!({"habit_id": "run"}))
      .unwrap();

    let habits = outbox.list_unsynced(Some(WriteKind::HabitCompletion)).unwrap();
    assert_eq!(habits.len(), 1);
    assert_eq!(habits[0].id, habit_id);

    assert_eq!(outbox.list_unsynced(None).unwrap().len(), 2);
  }

  #[test]
  fn test_mark_synced_is_idempotent_and_monotonic() {
    let outbox = Outbox::open_in_memory().unwrap();
    let id = outbox.enqueue(WriteKind::JournalWrite, json!({"text": "x"})).unwrap();

    outbox.mark_synced(&id).unwrap();
    assert!(outbox.list_unsynced(None).unwrap().is_empty());

    // Marking again, or marking an unknown id, changes nothing
    outbox.mark_synced(&id).unwrap();
    outbox.mark_synced("no-such-id").unwrap();
    assert!(outbox.list_unsynced(None).unwrap().is_empty());
  }

  #[test]
  fn test_snapshot_is_oldest_first() {
    let outbox = Outbox::open_in_memory().unwrap();

    let old = OutboxRecord {
      id: "old".to_string(),
      kind: WriteKind::JournalWrite,
      payload: json!({}),
      created_at: Utc::now() - Duration::hours(1),
      synced: false,
    };
    outbox.insert(&old).unwrap();
    let newer = outbox.enqueue(WriteKind::JournalWrite, json!({})).unwrap();

    let pending = outbox.list_unsynced(None).unwrap();
    assert_eq!(pending[0].id, "old");
    assert_eq!(pending[1].id, newer);
  }

  #[test]
  fn test_sweep_purges_only_old_synced_records() {
    let outbox = Outbox::open_in_memory().unwrap();
    let now = Utc::now();

    let old_synced = OutboxRecord {
      id: "old-synced".to_string(),
      kind: WriteKind::JournalWrite,
      payload: json!({}),
      created_at: now - Duration::days(10),
      synced: true,
    };
    let old_pending = OutboxRecord {
      id: "old-pending".to_string(),
      kind: WriteKind::JournalWrite,
      payload: json!({}),
      created_at: now - Duration::days(30),
      synced: false,
    };
    let fresh_synced = OutboxRecord {
      id: "fresh-synced".to_string(),
      kind: WriteKind::HabitCompletion,
      payload: json!({}),
      created_at: now - Duration::days(1),
      synced: true,
    };
    for record in [&old_synced, &old_pending, &fresh_synced] {
      outbox.insert(record).unwrap();
    }

    let swept = outbox.sweep_synced_before(now - Duration::days(7)).unwrap();
    assert_eq!(swept, 1);

    // The ancient unsynced record survives; only the old synced one is gone
    let pending = outbox.list_unsynced(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "old-pending");
  }
}
