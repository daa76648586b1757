//! Prediction repository. Predictions are an append-only audit log of
//! stage attempts; there is no update or delete.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::receipt::{Method, Prediction};
use crate::taxonomy::CategoryId;

fn from_row(row: &Row<'_>) -> Result<Prediction, rusqlite::Error> {
    let method_raw: String = row.get("method")?;
    let method = Method::parse(&method_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("Unknown prediction method '{}'", method_raw).into(),
        )
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

    Ok(Prediction {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        method,
        category_id,
        confidence: row.get("confidence")?,
        details: row.get("details")?,
        created_at: row.get("created_at")?,
    })
}

/// Appends a prediction record.
pub fn insert(db: &Database, prediction: &Prediction) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO predictions (id, subject_id, method, category_id, confidence, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                prediction.id,
                prediction.subject_id,
                prediction.method.as_str(),
                prediction.category_id.map(|c| c.as_str()),
                prediction.confidence,
                prediction.details,
                prediction.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Lists predictions for one receipt in insertion order.
pub fn list_by_subject(db: &Database, subject_id: &str) -> Result<Vec<Prediction>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM predictions WHERE subject_id = ?1 ORDER BY created_at, id",
        )?;
        let rows: Vec<Prediction> = stmt
            .query_map(params![subject_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts predictions for one receipt.
pub fn count_by_subject(db: &Database, subject_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE subject_id = ?1",
            params![subject_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::receipt_repo;
    use crate::receipt::Receipt;

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let receipt = Receipt {
            id: "r1".to_string(),
            ..Receipt::extracted("user-1", "Shell", 10.0, 9.0, 1.0, None, None, vec![])
        };
        receipt_repo::insert(&db, &receipt).unwrap();
        db
    }

    #[test]
    fn test_insert_and_list() {
        let db = test_db();
        let p1 = Prediction::new(
            "r1",
            Method::Rule,
            Some(CategoryId::CarTruck),
            Some(0.95),
            "matched vendor 'shell'".to_string(),
        );
        let p2 = Prediction::new("r1", Method::Model, None, None, "timeout".to_string());
        insert(&db, &p1).unwrap();
        insert(&db, &p2).unwrap();

        let predictions = list_by_subject(&db, "r1").unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].method, Method::Rule);
        assert_eq!(predictions[0].category_id, Some(CategoryId::CarTruck));
        assert_eq!(predictions[1].method, Method::Model);
        assert!(predictions[1].category_id.is_none());
        assert_eq!(predictions[1].details, "timeout");
    }

    #[test]
    fn test_list_empty_for_unknown_subject() {
        let db = test_db();
        assert!(list_by_subject(&db, "other").unwrap().is_empty());
    }

    #[test]
    fn test_count_by_subject() {
        let db = test_db();
        assert_eq!(count_by_subject(&db, "r1").unwrap(), 0);

        insert(
            &db,
            &Prediction::new("r1", Method::Heuristic, Some(CategoryId::Meals), Some(0.8), String::new()),
        )
        .unwrap();
        assert_eq!(count_by_subject(&db, "r1").unwrap(), 1);
    }
}
