use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::*;

impl SyncDb {
    // =========================================================================
    // Sync state (one row per external service)
    // =========================================================================

    fn map_sync_state_row(row: &rusqlite::Row) -> rusqlite::Result<SyncState> {
        let status: String = row.get(3)?;
        Ok(SyncState {
            service: row.get(0)?,
            last_sync_time: parse_opt_ts(1, row.get(1)?)?,
            last_sync_token: row.get(2)?,
            status: parse_enum(3, &status)?,
            error_message: row.get(4)?,
        })
    }

    /// Look up the sync state for a service. `None` if the service never ran.
    pub fn get_sync_state(&self, service: &str) -> Result<Option<SyncState>, DbError> {
        let state = self
            .conn
            .query_row(
                "SELECT service, last_sync_time, last_sync_token, status, error_message
                 FROM sync_state WHERE service = ?1",
                params![service],
                Self::map_sync_state_row,
            )
            .optional()?;
        Ok(state)
    }

    /// Upsert the status of a service. The cursor is left untouched.
    pub fn set_status(
        &self,
        service: &str,
        status: SyncStatus,
        error_message: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO sync_state (service, status, error_message)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(service) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            params![service, status.as_str(), error_message],
        )?;
        Ok(())
    }

    /// Store a new cursor after a successful run. Also resets status to idle,
    /// clears the last error, and stamps the sync time.
    pub fn set_cursor(&self, service: &str, token: &str, synced_at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO sync_state (service, last_sync_time, last_sync_token, status, error_message)
             VALUES (?1, ?2, ?3, 'idle', NULL)
             ON CONFLICT(service) DO UPDATE SET
                last_sync_time = excluded.last_sync_time,
                last_sync_token = excluded.last_sync_token,
                status = 'idle',
                error_message = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            params![service, to_ts(&synced_at), token],
        )?;
        Ok(())
    }

    /// Forget a service's cursor so the next fetch falls back to a time window.
    pub fn clear_cursor(&self, service: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE sync_state
             SET last_sync_token = '', updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE service = ?1",
            params![service],
        )?;
        Ok(())
    }

    /// Manual unstick: status back to idle, error cleared, cursor kept.
    /// Returns false if the service has no state row yet.
    pub fn reset_sync_state(&self, service: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE sync_state
             SET status = 'idle', error_message = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE service = ?1",
            params![service],
        )?;
        Ok(changed > 0)
    }

    /// All known sync states, ordered by service name.
    pub fn list_sync_states(&self) -> Result<Vec<SyncState>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT service, last_sync_time, last_sync_token, status, error_message
             FROM sync_state ORDER BY service",
        )?;
        let rows = stmt.query_map([], Self::map_sync_state_row)?;
        let mut states = Vec::new();
        for row in rows {
            states.push(row?);
        }
        Ok(states)
    }
}
