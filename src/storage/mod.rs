//! Listing persistence.
//!
//! The reconciliation loop only depends on [`ListingStore`]; [`SqliteStore`]
//! is the on-disk implementation.

use crate::models::ListingRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/listings.db";

/// Key-value style persistence keyed by listing id
pub trait ListingStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<ListingRecord>>;

    /// Insert or overwrite by id. An existing row keeps its `first_seen`.
    fn upsert(&self, record: &ListingRecord) -> Result<()>;

    /// Delete every row whose id is not in `ids`. An empty `ids` deletes nothing.
    fn delete_where_id_not_in(&self, ids: &[String]) -> Result<usize>;

    fn list_all(&self) -> Result<Vec<ListingRecord>>;

    fn clear_all(&self) -> Result<usize>;
}

/// SQLite-backed listing store
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open {}", self.db_path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                make TEXT NOT NULL,
                model TEXT NOT NULL,
                title TEXT NOT NULL,
                price INTEGER NOT NULL,
                year INTEGER NOT NULL,
                kilometers INTEGER NOT NULL,
                location TEXT NOT NULL,
                url TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                description TEXT
            );
        "#,
        )
        .context("Failed to create listings table")?;
        Ok(())
    }
}

fn parse_datetime(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_listing(row: &Row<'_>) -> rusqlite::Result<ListingRecord> {
    Ok(ListingRecord {
        id: row.get("id")?,
        make: row.get("make")?,
        model: row.get("model")?,
        title: row.get("title")?,
        price: row.get("price")?,
        year: row.get("year")?,
        kilometers: row.get("kilometers")?,
        location: row.get("location")?,
        url: row.get("url")?,
        first_seen: parse_datetime(&row.get::<_, String>("first_seen")?)?,
        last_seen: parse_datetime(&row.get::<_, String>("last_seen")?)?,
        description: row.get("description")?,
    })
}

impl ListingStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<ListingRecord>> {
        let conn = self.connect()?;
        let listing = conn
            .query_row("SELECT * FROM listings WHERE id = ?1", params![id], row_to_listing)
            .optional()
            .with_context(|| format!("Failed to load listing {}", id))?;
        Ok(listing)
    }

    fn upsert(&self, record: &ListingRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO listings (id, make, model, title, price, year, kilometers,
                                  location, url, first_seen, last_seen, description)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                make = excluded.make,
                model = excluded.model,
                title = excluded.title,
                price = excluded.price,
                year = excluded.year,
                kilometers = excluded.kilometers,
                location = excluded.location,
                url = excluded.url,
                last_seen = excluded.last_seen,
                description = COALESCE(excluded.description, listings.description)
            "#,
            params![
                record.id,
                record.make,
                record.model,
                record.title,
                record.price,
                record.year,
                record.kilometers,
                record.location,
                record.url,
                record.first_seen.to_rfc3339(),
                record.last_seen.to_rfc3339(),
                record.description,
            ],
        )
        .with_context(|| format!("Failed to save listing {}", record.id))?;
        Ok(())
    }

    fn delete_where_id_not_in(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute_batch("CREATE TEMP TABLE IF NOT EXISTS seen_ids (id TEXT PRIMARY KEY); DELETE FROM seen_ids;")?;
        {
            let mut insert = tx.prepare("INSERT OR IGNORE INTO seen_ids (id) VALUES (?1)")?;
            for id in ids {
                insert.execute(params![id])?;
            }
        }
        let removed = tx
            .execute("DELETE FROM listings WHERE id NOT IN (SELECT id FROM seen_ids)", [])
            .context("Failed to remove stale listings")?;
        tx.execute_batch("DROP TABLE seen_ids;")?;
        tx.commit()?;
        Ok(removed)
    }

    fn list_all(&self) -> Result<Vec<ListingRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM listings ORDER BY first_seen")?;
        let listings = stmt
            .query_map([], row_to_listing)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read listings")?;
        Ok(listings)
    }

    fn clear_all(&self) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn
            .execute("DELETE FROM listings", [])
            .context("Failed to clear listings")?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_listing;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = SqliteStore::new(&dir.path().join("nested/listings.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (_dir, store) = store();
        let listing = sample_listing("abc");
        store.upsert(&listing).unwrap();

        let loaded = store.get("abc").unwrap().unwrap();
        assert_eq!(loaded.title, listing.title);
        assert_eq!(loaded.price, listing.price);
        assert_eq!(loaded.first_seen.timestamp(), listing.first_seen.timestamp());
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn upsert_never_rewrites_first_seen() {
        let (_dir, store) = store();
        let original = sample_listing("abc");
        store.upsert(&original).unwrap();

        let mut again = sample_listing("abc");
        again.first_seen = original.first_seen + ChronoDuration::days(3);
        again.last_seen = again.first_seen;
        again.price = 1;
        store.upsert(&again).unwrap();

        let loaded = store.get("abc").unwrap().unwrap();
        assert_eq!(loaded.first_seen.timestamp(), original.first_seen.timestamp());
        assert_eq!(loaded.last_seen.timestamp(), again.last_seen.timestamp());
        assert_eq!(loaded.price, 1);
    }

    #[test]
    fn deletes_only_unobserved_ids() {
        let (_dir, store) = store();
        for id in ["A", "B", "C"] {
            store.upsert(&sample_listing(id)).unwrap();
        }

        let removed = store
            .delete_where_id_not_in(&["A".to_string(), "C".to_string()])
            .unwrap();
        assert_eq!(removed, 1);

        let ids: Vec<String> = store.list_all().unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"A".to_string()) && ids.contains(&"C".to_string()));
    }

    #[test]
    fn empty_id_set_deletes_nothing() {
        let (_dir, store) = store();
        store.upsert(&sample_listing("A")).unwrap();
        assert_eq!(store.delete_where_id_not_in(&[]).unwrap(), 0);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn clear_all_reports_count() {
        let (_dir, store) = store();
        store.upsert(&sample_listing("A")).unwrap();
        store.upsert(&sample_listing("B")).unwrap();
        assert_eq!(store.clear_all().unwrap(), 2);
        assert!(store.list_all().unwrap().is_empty());
    }
}
