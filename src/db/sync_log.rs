use chrono::{DateTime, Utc};
use rusqlite::{ffi, params};

use super::*;

impl SyncDb {
    // =========================================================================
    // Sync log (append-only dedup ledger)
    // =========================================================================

    /// Whether an external record has already been imported.
    pub fn log_exists(&self, service: &str, source_id: &str) -> Result<bool, DbError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_log WHERE source_service = ?1 AND source_id = ?2)",
            params![service, source_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Record that an external record produced a domain entity.
    ///
    /// Writing the same `(service, source_id)` twice is not an error: the
    /// unique constraint violation is reported as [`LogOutcome::AlreadyLogged`].
    pub fn log_import(
        &self,
        service: &str,
        source_id: &str,
        entity_type: EntityKind,
        entity_id: &str,
        metadata: Option<&SyncLogMetadata>,
        imported_at: DateTime<Utc>,
    ) -> Result<LogOutcome, DbError> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        let result = self.conn.execute(
            "INSERT INTO sync_log
                (source_service, source_id, entity_type, entity_id, imported_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                service,
                source_id,
                entity_type.as_str(),
                entity_id,
                to_ts(&imported_at),
                metadata_json,
            ],
        );
        match result {
            Ok(_) => Ok(LogOutcome::Logged),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(LogOutcome::AlreadyLogged)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a ledger entry by its natural key.
    pub fn get_log_entry(
        &self,
        service: &str,
        source_id: &str,
    ) -> Result<Option<SyncLogEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_service, source_id, entity_type, entity_id, imported_at, metadata
             FROM sync_log WHERE source_service = ?1 AND source_id = ?2",
        )?;
        let mut rows = stmt.query_map(params![service, source_id], |row| {
            let entity_type: String = row.get(3)?;
            let imported_at: String = row.get(5)?;
            let metadata: Option<String> = row.get(6)?;
            Ok(SyncLogEntry {
                id: row.get(0)?,
                source_service: row.get(1)?,
                source_id: row.get(2)?,
                entity_type: parse_enum(3, &entity_type)?,
                entity_id: row.get(4)?,
                imported_at: parse_ts(5, &imported_at)?,
                // Unreadable metadata never blocks the dedup check itself.
                metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Number of ledger entries for a service.
    pub fn count_log_entries(&self, service: &str) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_log WHERE source_service = ?1",
            params![service],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
