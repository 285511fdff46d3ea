//! CRUD operations for [`Capsule`] records.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Capsule;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new capsule.
    pub fn create_capsule(&self, capsule: &Capsule) -> Result<()> {
        self.conn().execute(
            "INSERT INTO capsules
                 (id, owner_uid, title, description, open_at, image_urls,
                  participants, is_opened, notify_sent, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                capsule.id.to_string(),
                capsule.owner_uid,
                capsule.title,
                capsule.description,
                to_stored_ts(&capsule.open_at),
                serde_json::to_string(&capsule.image_urls)?,
                serde_json::to_string(&capsule.participants)?,
                capsule.is_opened,
                capsule.notify_sent,
                to_stored_ts(&capsule.created_at),
                to_stored_ts(&capsule.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single capsule by UUID.
    pub fn get_capsule(&self, id: Uuid) -> Result<Capsule> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM capsules WHERE id = ?1"),
                params![id.to_string()],
                row_to_capsule,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all capsules owned by `owner_uid`, most recent first.
    ///
    /// Capsules where the uid is only a participant are not returned.
    pub fn list_capsules_for_owner(&self, owner_uid: &str) -> Result<Vec<Capsule>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM capsules
             WHERE owner_uid = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![owner_uid], row_to_capsule)?;

        let mut capsules = Vec::new();
        for row in rows {
            capsules.push(row?);
        }
        Ok(capsules)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Write back every mutable column of an existing capsule.
    ///
    /// `id`, `owner_uid` and `created_at` are deliberately not part of the
    /// SET clause, so the row keeps its identity even if the caller mangled
    /// those fields in memory.
    pub fn replace_capsule(&self, capsule: &Capsule) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE capsules SET
                 title = ?2, description = ?3, open_at = ?4, image_urls = ?5,
                 participants = ?6, is_opened = ?7, notify_sent = ?8,
                 updated_at = ?9
             WHERE id = ?1",
            params![
                capsule.id.to_string(),
                capsule.title,
                capsule.description,
                to_stored_ts(&capsule.open_at),
                serde_json::to_string(&capsule.image_urls)?,
                serde_json::to_string(&capsule.participants)?,
                capsule.is_opened,
                capsule.notify_sent,
                to_stored_ts(&capsule.updated_at),
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Hard-delete a capsule by UUID.  Returns `true` if a row was deleted.
    pub fn delete_capsule(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM capsules WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const COLUMNS: &str = "id, owner_uid, title, description, open_at, image_urls, \
                       participants, is_opened, notify_sent, created_at, updated_at";

/// Fixed-width RFC 3339 so lexicographic column order matches chronological
/// order in `ORDER BY created_at DESC`.
fn to_stored_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stored_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Map a `rusqlite::Row` to a [`Capsule`].
fn row_to_capsule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Capsule> {
    let id_str: String = row.get(0)?;
    let owner_uid: String = row.get(1)?;
    let title: String = row.get(2)?;
    let description: String = row.get(3)?;
    let open_at_str: String = row.get(4)?;
    let image_urls_str: String = row.get(5)?;
    let participants_str: String = row.get(6)?;
    let is_opened: bool = row.get(7)?;
    let notify_sent: bool = row.get(8)?;
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Capsule {
        id,
        owner_uid,
        title,
        description,
        open_at: parse_stored_ts(4, &open_at_str)?,
        image_urls: parse_json_column(5, &image_urls_str)?,
        participants: parse_json_column(6, &participants_str)?,
        is_opened,
        notify_sent,
        created_at: parse_stored_ts(9, &created_str)?,
        updated_at: parse_stored_ts(10, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    // Whole-second base so in-memory values survive the microsecond-precision
    // storage round trip unchanged.
    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap()
    }

    fn sample_capsule(owner: &str, created_at: DateTime<Utc>) -> Capsule {
        Capsule {
            id: Uuid::new_v4(),
            owner_uid: owner.to_string(),
            title: "Trip".to_string(),
            description: "Photos from the trip".to_string(),
            open_at: created_at + Duration::days(365),
            image_urls: vec!["http://localhost:8080/media/a.jpg".to_string()],
            participants: vec!["bob@example.com".to_string()],
            is_opened: false,
            notify_sent: false,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let (db, _dir) = test_db();
        let capsule = sample_capsule("alice", base_time());

        db.create_capsule(&capsule).unwrap();
        let fetched = db.get_capsule(capsule.id).unwrap();

        assert_eq!(fetched.id, capsule.id);
        assert_eq!(fetched.owner_uid, "alice");
        assert_eq!(fetched.image_urls, capsule.image_urls);
        assert_eq!(fetched.participants, capsule.participants);
        assert!(!fetched.is_opened);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (db, _dir) = test_db();
        assert!(matches!(
            db.get_capsule(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_scopes_to_owner_and_orders_desc() {
        let (db, _dir) = test_db();
        let base = base_time();

        let older = sample_capsule("alice", base - Duration::seconds(10));
        let newer = sample_capsule("alice", base);
        let other = sample_capsule("carol", base);

        db.create_capsule(&older).unwrap();
        db.create_capsule(&newer).unwrap();
        db.create_capsule(&other).unwrap();

        let listed = db.list_capsules_for_owner("alice").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[test]
    fn list_excludes_participant_only_capsules() {
        let (db, _dir) = test_db();
        let mut capsule = sample_capsule("alice", base_time());
        capsule.participants = vec!["bob".to_string()];
        db.create_capsule(&capsule).unwrap();

        assert!(db.list_capsules_for_owner("bob").unwrap().is_empty());
    }

    #[test]
    fn replace_updates_mutable_fields() {
        let (db, _dir) = test_db();
        let mut capsule = sample_capsule("alice", base_time());
        db.create_capsule(&capsule).unwrap();

        capsule.title = "Trip 2030".to_string();
        capsule
            .image_urls
            .push("http://localhost:8080/media/b.jpg".to_string());
        capsule.updated_at = base_time() + Duration::seconds(1);
        db.replace_capsule(&capsule).unwrap();

        let fetched = db.get_capsule(capsule.id).unwrap();
        assert_eq!(fetched.title, "Trip 2030");
        assert_eq!(fetched.image_urls.len(), 2);
        assert_eq!(fetched.owner_uid, "alice");
        assert_eq!(fetched.created_at, capsule.created_at);
    }

    #[test]
    fn replace_missing_is_not_found() {
        let (db, _dir) = test_db();
        let capsule = sample_capsule("alice", base_time());
        assert!(matches!(
            db.replace_capsule(&capsule),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_reports_whether_row_existed() {
        let (db, _dir) = test_db();
        let capsule = sample_capsule("alice", base_time());
        db.create_capsule(&capsule).unwrap();

        assert!(db.delete_capsule(capsule.id).unwrap());
        assert!(!db.delete_capsule(capsule.id).unwrap());
        assert!(matches!(
            db.get_capsule(capsule.id),
            Err(StoreError::NotFound)
        ));
    }
}
