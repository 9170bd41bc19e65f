use std::fmt;
use std::str::FromStr;

use rusqlite::params;
use time::OffsetDateTime;
use uuid::Uuid;

use super::StorageHandle;
use crate::error::QueueError;
use crate::inventory::{ItemDraft, RowId};

/// Locally generated identifier of a queued change. Unrelated to item ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeId(Uuid);

impl ChangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChangeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// A write the user asked for, before it has been queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRequest {
    Add { item: ItemDraft },
    Update { target: RowId, item: ItemDraft },
    Delete { target: RowId },
}

impl ChangeRequest {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeRequest::Add { .. } => ChangeKind::Add,
            ChangeRequest::Update { .. } => ChangeKind::Update,
            ChangeRequest::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn target(&self) -> Option<RowId> {
        match self {
            ChangeRequest::Add { .. } => None,
            ChangeRequest::Update { target, .. } | ChangeRequest::Delete { target } => {
                Some(*target)
            }
        }
    }

    pub fn draft(&self) -> Option<&ItemDraft> {
        match self {
            ChangeRequest::Add { item } | ChangeRequest::Update { item, .. } => Some(item),
            ChangeRequest::Delete { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), QueueError> {
        match self {
            ChangeRequest::Add { item } if !item.has_name() => Err(QueueError::MissingName),
            ChangeRequest::Add { .. } => Ok(()),
            ChangeRequest::Update { target, .. } | ChangeRequest::Delete { target }
                if !target.is_assigned() =>
            {
                Err(QueueError::UnassignedTarget(*target))
            }
            _ => Ok(()),
        }
    }
}

/// A queued, not yet confirmed write. Only `retry_count` changes after the
/// record is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub id: ChangeId,
    pub request: ChangeRequest,
    pub created_at: OffsetDateTime,
    pub retry_count: u32,
}

impl PendingChange {
    pub fn kind(&self) -> ChangeKind {
        self.request.kind()
    }
}

/// Durable FIFO of pending writes, stored in the local database so it
/// survives restarts. Storage failures are returned, never swallowed.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    storage: StorageHandle,
}

impl PendingQueue {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    pub fn enqueue(&self, request: ChangeRequest) -> Result<ChangeId, QueueError> {
        request.validate()?;
        let id = ChangeId::new();
        let payload = request.draft().map(serde_json::to_string).transpose()?;
        let conn = self.storage.open_raw()?;
        conn.execute(
            "INSERT INTO pending_changes (change_id, kind, target_id, payload, created_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                id.to_string(),
                request.kind().as_ref(),
                request.target().map(RowId::get),
                payload,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;
        tracing::debug!(change = %id, kind = %request.kind(), "queued change");
        Ok(id)
    }

    /// Every queued change, oldest first. Rows that no longer decode are
    /// moved to `rejected_changes` so the rest of the queue stays usable.
    pub fn dequeue_all(&self) -> Result<Vec<PendingChange>, QueueError> {
        let mut conn = self.storage.open_raw()?;
        let rows = {
            let mut stmt = conn.prepare(
                "SELECT seq, change_id, kind, target_id, payload, created_at, retry_count
                 FROM pending_changes
                 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RawChange {
                        seq: row.get(0)?,
                        change_id: row.get(1)?,
                        kind: row.get(2)?,
                        target_id: row.get(3)?,
                        payload: row.get(4)?,
                        created_at: row.get(5)?,
                        retry_count: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut pending = Vec::with_capacity(rows.len());
        for raw in rows {
            let seq = raw.seq;
            let change_id = raw.change_id.clone();
            match raw.decode() {
                Ok(change) => pending.push(change),
                Err(err) => {
                    tracing::error!(change = %change_id, error = %err, "unreadable queued change, moving it aside");
                    quarantine(&mut conn, seq, &err.to_string())?;
                }
            }
        }
        Ok(pending)
    }

    /// Number of changes moved aside because they could not be decoded.
    pub fn rejected_len(&self) -> Result<usize, QueueError> {
        let conn = self.storage.open_raw()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM rejected_changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn remove(&self, id: ChangeId) -> Result<bool, QueueError> {
        let conn = self.storage.open_raw()?;
        let removed = conn.execute(
            "DELETE FROM pending_changes WHERE change_id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Bump the retry counter of a change and return the new value.
    pub fn record_failure(&self, id: ChangeId) -> Result<u32, QueueError> {
        let mut conn = self.storage.open_raw()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE pending_changes SET retry_count = retry_count + 1 WHERE change_id = ?1",
            params![id.to_string()],
        )?;
        let retries: u32 = tx.query_row(
            "SELECT retry_count FROM pending_changes WHERE change_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(retries)
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        let conn = self.storage.open_raw()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        self.len().map(|len| len == 0)
    }

    pub fn has_pending(&self) -> Result<bool, QueueError> {
        self.is_empty().map(|empty| !empty)
    }
}

fn quarantine(conn: &mut rusqlite::Connection, seq: i64, reason: &str) -> Result<(), QueueError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO rejected_changes
             (seq, change_id, kind, target_id, payload, created_at, retry_count, reason, rejected_at)
         SELECT seq, change_id, kind, target_id, payload, created_at, retry_count, ?2, ?3
         FROM pending_changes WHERE seq = ?1",
        params![seq, reason, OffsetDateTime::now_utc().unix_timestamp()],
    )?;
    tx.execute("DELETE FROM pending_changes WHERE seq = ?1", params![seq])?;
    tx.commit()?;
    Ok(())
}

struct RawChange {
    seq: i64,
    change_id: String,
    kind: String,
    target_id: Option<u32>,
    payload: Option<String>,
    created_at: i64,
    retry_count: u32,
}

impl RawChange {
    fn decode(self) -> Result<PendingChange, QueueError> {
        let id = self.change_id.parse::<ChangeId>().map_err(|err| {
            QueueError::Storage(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            ))
        })?;
        let kind: ChangeKind = self
            .kind
            .parse()
            .map_err(|_| QueueError::UnknownKind(self.kind.clone()))?;
        let target = RowId::new(self.target_id.unwrap_or_default());
        let item = match self.payload.as_deref() {
            Some(payload) => serde_json::from_str::<ItemDraft>(payload)?,
            None => ItemDraft::default(),
        };
        let request = match kind {
            ChangeKind::Add => ChangeRequest::Add { item },
            ChangeKind::Update => ChangeRequest::Update { target, item },
            ChangeKind::Delete => ChangeRequest::Delete { target },
        };
        let created_at = OffsetDateTime::from_unix_timestamp(self.created_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Ok(PendingChange {
            id,
            request,
            created_at,
            retry_count: self.retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::init_storage;
    use assert_matches::assert_matches;

    fn named(name: &str) -> ItemDraft {
        ItemDraft {
            name: Some(name.into()),
            ..ItemDraft::default()
        }
    }

    #[test]
    fn changes_come_back_in_enqueue_order() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        let add = queue.enqueue(ChangeRequest::Add { item: named("Honey") })?;
        let update = queue.enqueue(ChangeRequest::Update {
            target: RowId::new(9),
            item: ItemDraft {
                quantity: Some("2 jars".into()),
                ..ItemDraft::default()
            },
        })?;
        let delete = queue.enqueue(ChangeRequest::Delete {
            target: RowId::new(9),
        })?;

        let pending = queue.dequeue_all()?;
        let ids: Vec<_> = pending.iter().map(|change| change.id).collect();
        assert_eq!(ids, vec![add, update, delete]);
        let kinds: Vec<_> = pending.iter().map(PendingChange::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Add, ChangeKind::Update, ChangeKind::Delete]);
        assert_eq!(pending[0].request, ChangeRequest::Add { item: named("Honey") });
        assert_eq!(pending[2].request.target(), Some(RowId::new(9)));
        assert!(pending.iter().all(|change| change.retry_count == 0));
        Ok(())
    }

    #[test]
    fn queue_survives_reopening_the_store() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let id = PendingQueue::new(storage.clone()).enqueue(ChangeRequest::Delete {
            target: RowId::new(4),
        })?;

        let reopened = PendingQueue::new(storage);
        assert!(reopened.has_pending()?);
        assert_eq!(reopened.dequeue_all()?[0].id, id);
        Ok(())
    }

    #[test]
    fn remove_and_retry_counter() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        let first = queue.enqueue(ChangeRequest::Add { item: named("Tea") })?;
        let second = queue.enqueue(ChangeRequest::Add { item: named("Coffee") })?;

        assert_eq!(queue.record_failure(first)?, 1);
        assert_eq!(queue.record_failure(first)?, 2);
        assert!(queue.remove(second)?);
        assert!(!queue.remove(second)?);

        let pending = queue.dequeue_all()?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 2);
        assert!(queue.remove(first)?);
        assert!(!queue.has_pending()?);
        Ok(())
    }

    #[test]
    fn rejects_requests_that_cannot_be_replayed() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        assert_matches!(
            queue.enqueue(ChangeRequest::Update {
                target: RowId::UNASSIGNED,
                item: named("Oil"),
            }),
            Err(QueueError::UnassignedTarget(_))
        );
        assert_matches!(
            queue.enqueue(ChangeRequest::Delete {
                target: RowId::UNASSIGNED
            }),
            Err(QueueError::UnassignedTarget(_))
        );
        assert_matches!(
            queue.enqueue(ChangeRequest::Add { item: named("  ") }),
            Err(QueueError::MissingName)
        );
        assert_eq!(queue.len()?, 0);
        Ok(())
    }

    #[test]
    fn unreadable_rows_are_moved_aside() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage.clone());
        storage.with_connection(|conn| {
            conn.execute(
                "INSERT INTO pending_changes (change_id, kind, target_id, payload, created_at)
                 VALUES (?1, 'update', 3, '{bad', 0)",
                params![ChangeId::new().to_string()],
            )?;
            Ok(())
        })?;
        let delete = queue.enqueue(ChangeRequest::Delete {
            target: RowId::new(4),
        })?;

        let pending = queue.dequeue_all()?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, delete);
        assert_eq!(queue.len()?, 1);
        assert_eq!(queue.rejected_len()?, 1);

        assert_eq!(queue.dequeue_all()?.len(), 1);
        assert_eq!(queue.rejected_len()?, 1);
        Ok(())
    }

    #[test]
    fn storage_failures_surface_as_queue_errors() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.with_connection(|conn| {
            conn.execute_batch("DROP TABLE pending_changes")?;
            Ok(())
        })?;
        let queue = PendingQueue::new(storage);
        assert_matches!(
            queue.enqueue(ChangeRequest::Add { item: named("Salt") }),
            Err(QueueError::Storage(_))
        );
        assert_matches!(queue.dequeue_all(), Err(QueueError::Storage(_)));
        Ok(())
    }
}
