//! Categorization queue repository.
//!
//! Delivery from the ingestion pipeline is at-least-once; the partial
//! unique index on unprocessed rows plus `INSERT OR IGNORE` collapses
//! duplicate notifications for the same receipt. Entries that exhaust
//! their attempts move to the dead-letter table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// One pending queue row.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub receipt_id: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: String,
}

/// One dead-lettered row.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub id: i64,
    pub receipt_id: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failed_at: String,
}

fn entry_from_row(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    Ok(QueueEntry {
        id: row.get("id")?,
        receipt_id: row.get("receipt_id")?,
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        enqueued_at: row.get("enqueued_at")?,
    })
}

/// Enqueues a receipt for categorization. Returns false when an
/// unprocessed entry for the same receipt already exists (duplicate
/// notification, dropped).
pub fn enqueue(db: &Database, receipt_id: &str, enqueued_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO receipt_queue (receipt_id, enqueued_at) VALUES (?1, ?2)",
            params![receipt_id, enqueued_at],
        )?;
        Ok(changed > 0)
    })
}

/// Returns up to `limit` unprocessed entries in enqueue order.
pub fn claim_batch(db: &Database, limit: u32) -> Result<Vec<QueueEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM receipt_queue WHERE processed = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows: Vec<QueueEntry> = stmt
            .query_map(params![limit], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks an entry as processed, releasing its slot in the dedup index.
pub fn mark_processed(db: &Database, queue_id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE receipt_queue SET processed = 1 WHERE id = ?1",
            params![queue_id],
        )?;
        Ok(())
    })
}

/// Records a failed attempt and returns the new attempt count.
pub fn record_failure(db: &Database, queue_id: i64, error: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE receipt_queue SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
            params![queue_id, error],
        )?;
        let attempts: u32 = conn.query_row(
            "SELECT attempts FROM receipt_queue WHERE id = ?1",
            params![queue_id],
            |r| r.get(0),
        )?;
        Ok(attempts)
    })
}

/// Moves an exhausted entry to the dead-letter table and marks it
/// processed, in one transactional batch.
pub fn move_to_dlq(db: &Database, queue_id: i64, failed_at: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute_batch("BEGIN")?;
        let result = (|| {
            conn.execute(
                "INSERT INTO receipt_queue_dlq (receipt_id, attempts, last_error, failed_at)
                 SELECT receipt_id, attempts, last_error, ?2 FROM receipt_queue WHERE id = ?1",
                params![queue_id, failed_at],
            )?;
            conn.execute(
                "UPDATE receipt_queue SET processed = 1 WHERE id = ?1",
                params![queue_id],
            )?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    })
}

/// Counts unprocessed queue entries.
pub fn pending_count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM receipt_queue WHERE processed = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Lists dead-lettered entries, most recent first.
pub fn list_dlq(db: &Database) -> Result<Vec<DlqEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM receipt_queue_dlq ORDER BY failed_at DESC, id DESC")?;
        let rows: Vec<DlqEntry> = stmt
            .query_map([], |row| {
                Ok(DlqEntry {
                    id: row.get("id")?,
                    receipt_id: row.get("receipt_id")?,
                    attempts: row.get("attempts")?,
                    last_error: row.get("last_error")?,
                    failed_at: row.get("failed_at")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_enqueue_dedups_pending() {
        let db = test_db();
        assert!(enqueue(&db, "r1", "2026-02-10T00:00:00Z").unwrap());
        assert!(!enqueue(&db, "r1", "2026-02-10T00:00:01Z").unwrap());
        assert_eq!(pending_count(&db).unwrap(), 1);

        // After processing, the receipt may be enqueued again.
        let batch = claim_batch(&db, 10).unwrap();
        mark_processed(&db, batch[0].id).unwrap();
        assert!(enqueue(&db, "r1", "2026-02-10T00:01:00Z").unwrap());
    }

    #[test]
    fn test_claim_batch_in_enqueue_order() {
        let db = test_db();
        enqueue(&db, "r1", "2026-02-10T00:00:00Z").unwrap();
        enqueue(&db, "r2", "2026-02-10T00:00:01Z").unwrap();
        enqueue(&db, "r3", "2026-02-10T00:00:02Z").unwrap();

        let batch = claim_batch(&db, 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].receipt_id, "r1");
        assert_eq!(batch[1].receipt_id, "r2");
    }

    #[test]
    fn test_record_failure_increments_attempts() {
        let db = test_db();
        enqueue(&db, "r1", "2026-02-10T00:00:00Z").unwrap();
        let entry = &claim_batch(&db, 1).unwrap()[0];

        assert_eq!(record_failure(&db, entry.id, "timeout").unwrap(), 1);
        assert_eq!(record_failure(&db, entry.id, "timeout").unwrap(), 2);

        let entry = &claim_batch(&db, 1).unwrap()[0];
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_move_to_dlq() {
        let db = test_db();
        enqueue(&db, "r1", "2026-02-10T00:00:00Z").unwrap();
        let entry = &claim_batch(&db, 1).unwrap()[0];
        record_failure(&db, entry.id, "upstream_error").unwrap();

        move_to_dlq(&db, entry.id, "2026-02-10T00:05:00Z").unwrap();

        assert_eq!(pending_count(&db).unwrap(), 0);
        let dlq = list_dlq(&db).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].receipt_id, "r1");
        assert_eq!(dlq[0].attempts, 1);
        assert_eq!(dlq[0].last_error.as_deref(), Some("upstream_error"));
    }
}
