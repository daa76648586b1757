//! Receipt repository. Rows map directly to the domain `Receipt`; enum and
//! JSON columns that fail to parse surface as conversion errors rather
//! than silently defaulting.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::receipt::{LineItem, Method, Receipt, ReceiptStatus};
use crate::taxonomy::CategoryId;

fn from_row(row: &Row<'_>) -> Result<Receipt, rusqlite::Error> {
    let status_raw: String = row.get("status")?;
    let status = ReceiptStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("Unknown receipt status '{}'", status_raw).into(),
        )
    })?;

    let items_raw: String = row.get("line_items")?;
    let line_items: Vec<LineItem> = serde_json::from_str(&items_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let category_id = row
        .get::<_, Option<String>>("category_id")?
        .map(|id| {
            CategoryId::from_id(&id).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("Unknown category id '{}'", id).into(),
                )
            })
        })
        .transpose()?;

    let category_method = row
        .get::<_, Option<String>>("category_method")?
        .map(|m| {
            Method::parse(&m).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("Unknown category method '{}'", m).into(),
                )
            })
        })
        .transpose()?;

    Ok(Receipt {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        merchant: row.get("merchant")?,
        total: row.get("total")?,
        subtotal: row.get("subtotal")?,
        tax: row.get("tax")?,
        receipt_date: row.get("receipt_date")?,
        raw_text: row.get("raw_text")?,
        line_items,
        status,
        category_id,
        category_confidence: row.get("category_confidence")?,
        category_method,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Inserts a new receipt row.
pub fn insert(db: &Database, receipt: &Receipt) -> Result<(), DatabaseError> {
    let line_items = serde_json::to_string(&receipt.line_items).map_err(|e| {
        DatabaseError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
    })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO receipts (id, owner_id, merchant, total, subtotal, tax, receipt_date,
             raw_text, line_items, status, category, category_id, category_confidence,
             category_method, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                receipt.id,
                receipt.owner_id,
                receipt.merchant,
                receipt.total,
                receipt.subtotal,
                receipt.tax,
                receipt.receipt_date,
                receipt.raw_text,
                line_items,
                receipt.status.as_str(),
                receipt.category_id.map(|c| c.name()),
                receipt.category_id.map(|c| c.as_str()),
                receipt.category_confidence,
                receipt.category_method.map(|m| m.as_str()),
                receipt.created_at,
                receipt.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a receipt by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Receipt>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM receipts WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Updates only the status and updated_at of a receipt.
pub fn update_status(
    db: &Database,
    id: &str,
    status: ReceiptStatus,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE receipts SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), updated_at],
        )?;
        Ok(())
    })
}

/// Assigns a category and transitions the receipt to `categorized`, in one
/// statement and only while the receipt is still `ocr_done`. Returns false
/// when the guard misses, meaning a concurrent call won the assignment (or
/// the receipt moved state some other way); the caller re-reads the row to
/// report the winner. Category fields and status always change together.
pub fn assign_category(
    db: &Database,
    id: &str,
    category: CategoryId,
    confidence: f64,
    method: Method,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE receipts
             SET category = ?2, category_id = ?3, category_confidence = ?4,
                 category_method = ?5, status = 'categorized', updated_at = ?6
             WHERE id = ?1 AND status = 'ocr_done'",
            params![
                id,
                category.name(),
                category.as_str(),
                confidence,
                method.as_str(),
                updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Counts receipts with the given status.
pub fn count_by_status(db: &Database, status: ReceiptStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_receipt(merchant: &str) -> Receipt {
        Receipt::extracted(
            "user-1",
            merchant,
            42.5,
            40.0,
            2.5,
            Some("2026-02-10".to_string()),
            Some("SHELL 4411 FUEL 40.00 TAX 2.50".to_string()),
            vec![LineItem {
                description: "Unleaded fuel".to_string(),
                amount: 40.0,
                quantity: Some(1.0),
            }],
        )
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let receipt = sample_receipt("Shell Gas Station");
        insert(&db, &receipt).unwrap();

        let found = find_by_id(&db, &receipt.id).unwrap().unwrap();
        assert_eq!(found.merchant, "Shell Gas Station");
        assert_eq!(found.status, ReceiptStatus::OcrDone);
        assert_eq!(found.line_items.len(), 1);
        assert_eq!(found.line_items[0].description, "Unleaded fuel");
        assert!(found.category_id.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_update_status() {
        let db = test_db();
        let receipt = sample_receipt("Shell");
        insert(&db, &receipt).unwrap();

        update_status(&db, &receipt.id, ReceiptStatus::Failed, "2026-02-10T01:00:00Z").unwrap();

        let found = find_by_id(&db, &receipt.id).unwrap().unwrap();
        assert_eq!(found.status, ReceiptStatus::Failed);
    }

    #[test]
    fn test_assign_category_guarded_by_status() {
        let db = test_db();
        let receipt = sample_receipt("Shell");
        insert(&db, &receipt).unwrap();

        let won = assign_category(
            &db,
            &receipt.id,
            CategoryId::CarTruck,
            0.95,
            Method::Rule,
            "2026-02-10T01:00:00Z",
        )
        .unwrap();
        assert!(won);

        let found = find_by_id(&db, &receipt.id).unwrap().unwrap();
        assert_eq!(found.status, ReceiptStatus::Categorized);
        assert_eq!(found.category_id, Some(CategoryId::CarTruck));
        assert_eq!(found.category_confidence, Some(0.95));
        assert_eq!(found.category_method, Some(Method::Rule));

        // Second assignment loses the guard; the first result stands.
        let won = assign_category(
            &db,
            &receipt.id,
            CategoryId::Meals,
            0.7,
            Method::Model,
            "2026-02-10T02:00:00Z",
        )
        .unwrap();
        assert!(!won);

        let found = find_by_id(&db, &receipt.id).unwrap().unwrap();
        assert_eq!(found.category_id, Some(CategoryId::CarTruck));
    }

    #[test]
    fn test_count_by_status() {
        let db = test_db();
        insert(&db, &sample_receipt("A")).unwrap();
        insert(&db, &sample_receipt("B")).unwrap();

        assert_eq!(count_by_status(&db, ReceiptStatus::OcrDone).unwrap(), 2);
        assert_eq!(count_by_status(&db, ReceiptStatus::Categorized).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_line_items_rejected() {
        let db = test_db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO receipts (id, owner_id, merchant, total, subtotal, tax, line_items,
                 status, created_at, updated_at)
                 VALUES ('bad', 'u1', 'X', 0, 0, 0, 'not json', 'ocr_done', '2026-01-01', '2026-01-01')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(find_by_id(&db, "bad").is_err());
    }
}
