use rusqlite::params;

use super::*;

impl SyncDb {
    // =========================================================================
    // Interaction log (append-only)
    // =========================================================================

    pub fn insert_interaction(&self, interaction: &InteractionLog) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO interaction_log (id, contact_id, interaction_type, timestamp, notes, sentiment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                interaction.id,
                interaction.contact_id,
                interaction.interaction_type.as_str(),
                to_ts(&interaction.timestamp),
                interaction.notes,
                interaction.sentiment,
            ],
        )?;
        Ok(())
    }

    /// Interactions for a contact, newest first.
    pub fn get_interactions_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<InteractionLog>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, contact_id, interaction_type, timestamp, notes, sentiment
             FROM interaction_log
             WHERE contact_id = ?1
             ORDER BY timestamp DESC, id",
        )?;
        let rows = stmt.query_map(params![contact_id], |row| {
            let kind: String = row.get(2)?;
            let timestamp: String = row.get(3)?;
            Ok(InteractionLog {
                id: row.get(0)?,
                contact_id: row.get(1)?,
                interaction_type: parse_enum(2, &kind)?,
                timestamp: parse_ts(3, &timestamp)?,
                notes: row.get(4)?,
                sentiment: row.get(5)?,
            })
        })?;
        let mut interactions = Vec::new();
        for row in rows {
            interactions.push(row?);
        }
        Ok(interactions)
    }

    pub fn count_interactions(&self, interaction_type: Option<InteractionType>) -> Result<i64, DbError> {
        let count = match interaction_type {
            Some(kind) => self.conn.query_row(
                "SELECT COUNT(*) FROM interaction_log WHERE interaction_type = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM interaction_log", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}
