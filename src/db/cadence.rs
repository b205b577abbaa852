use rusqlite::{params, OptionalExtension};

use super::*;

impl SyncDb {
    // =========================================================================
    // Contact cadence (one row per contact, upsert)
    // =========================================================================

    fn map_cadence_row(row: &rusqlite::Row) -> rusqlite::Result<ContactCadence> {
        let strength: String = row.get(2)?;
        Ok(ContactCadence {
            contact_id: row.get(0)?,
            cadence_days: row.get(1)?,
            relationship_strength: parse_enum(2, &strength)?,
            priority_score: row.get(3)?,
            last_interaction_date: parse_opt_ts(4, row.get(4)?)?,
            next_followup_date: parse_opt_ts(5, row.get(5)?)?,
        })
    }

    pub fn get_cadence(&self, contact_id: &str) -> Result<Option<ContactCadence>, DbError> {
        let cadence = self
            .conn
            .query_row(
                "SELECT contact_id, cadence_days, relationship_strength, priority_score,
                        last_interaction_date, next_followup_date
                 FROM contact_cadence WHERE contact_id = ?1",
                params![contact_id],
                Self::map_cadence_row,
            )
            .optional()?;
        Ok(cadence)
    }

    pub fn upsert_cadence(&self, cadence: &ContactCadence) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO contact_cadence (
                contact_id, cadence_days, relationship_strength, priority_score,
                last_interaction_date, next_followup_date
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(contact_id) DO UPDATE SET
                cadence_days = excluded.cadence_days,
                relationship_strength = excluded.relationship_strength,
                priority_score = excluded.priority_score,
                last_interaction_date = excluded.last_interaction_date,
                next_followup_date = excluded.next_followup_date",
            params![
                cadence.contact_id,
                cadence.cadence_days,
                cadence.relationship_strength.as_str(),
                cadence.priority_score,
                cadence.last_interaction_date.as_ref().map(to_ts),
                cadence.next_followup_date.as_ref().map(to_ts),
            ],
        )?;
        Ok(())
    }

    pub fn list_cadences(&self) -> Result<Vec<ContactCadence>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, cadence_days, relationship_strength, priority_score,
                    last_interaction_date, next_followup_date
             FROM contact_cadence ORDER BY contact_id",
        )?;
        let rows = stmt.query_map([], Self::map_cadence_row)?;
        let mut cadences = Vec::new();
        for row in rows {
            cadences.push(row?);
        }
        Ok(cadences)
    }

    /// Contacts ordered by follow-up priority: highest score first, then the
    /// earliest next follow-up date. Contacts never interacted with sort last.
    pub fn get_followups(&self, limit: usize) -> Result<Vec<FollowupRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, c.email, c.company_id, c.last_contacted_at, c.created_at, c.updated_at,
                    cc.contact_id, cc.cadence_days, cc.relationship_strength, cc.priority_score,
                    cc.last_interaction_date, cc.next_followup_date
             FROM contact_cadence cc
             JOIN contacts c ON c.id = cc.contact_id
             ORDER BY cc.priority_score DESC,
                      cc.next_followup_date IS NULL,
                      cc.next_followup_date ASC,
                      c.name COLLATE NOCASE
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let contact = Self::map_contact_row(row)?;
            let strength: String = row.get(9)?;
            let cadence = ContactCadence {
                contact_id: row.get(7)?,
                cadence_days: row.get(8)?,
                relationship_strength: parse_enum(9, &strength)?,
                priority_score: row.get(10)?,
                last_interaction_date: parse_opt_ts(11, row.get(11)?)?,
                next_followup_date: parse_opt_ts(12, row.get(12)?)?,
            };
            Ok(FollowupRow { contact, cadence })
        })?;
        let mut followups = Vec::new();
        for row in rows {
            followups.push(row?);
        }
        Ok(followups)
    }
}
