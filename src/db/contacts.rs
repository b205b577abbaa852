use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::*;

const CONTACT_COLUMNS: &str =
    "id, name, email, company_id, last_contacted_at, created_at, updated_at";

impl SyncDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    pub(crate) fn map_contact_row(row: &rusqlite::Row) -> rusqlite::Result<DbContact> {
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(DbContact {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            company_id: row.get(3)?,
            last_contacted_at: parse_opt_ts(4, row.get(4)?)?,
            created_at: parse_ts(5, &created_at)?,
            updated_at: parse_ts(6, &updated_at)?,
        })
    }

    pub fn get_contact(&self, id: &str) -> Result<Option<DbContact>, DbError> {
        let contact = self
            .conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS),
                params![id],
                Self::map_contact_row,
            )
            .optional()?;
        Ok(contact)
    }

    /// All contacts whose name matches exactly, ignoring case. Oldest first.
    pub fn find_contacts_by_name(&self, name: &str) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM contacts
             WHERE name = ?1 COLLATE NOCASE
             ORDER BY created_at, id",
            CONTACT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![name.trim()], Self::map_contact_row)?;
        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Look up a contact by email (case-insensitive). Oldest match wins.
    pub fn find_contact_by_email(&self, email: &str) -> Result<Option<DbContact>, DbError> {
        let contact = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM contacts
                     WHERE email = ?1 COLLATE NOCASE
                     ORDER BY created_at, id LIMIT 1",
                    CONTACT_COLUMNS
                ),
                params![email.trim()],
                Self::map_contact_row,
            )
            .optional()?;
        Ok(contact)
    }

    pub fn insert_contact(&self, contact: &DbContact) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO contacts (id, name, email, company_id, last_contacted_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                contact.id,
                contact.name,
                contact.email,
                contact.company_id,
                contact.last_contacted_at.as_ref().map(to_ts),
                to_ts(&contact.created_at),
                to_ts(&contact.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Move `last_contacted_at` forward. Older timestamps never rewind it.
    pub fn touch_last_contacted(&self, contact_id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        let ts = to_ts(&at);
        self.conn.execute(
            "UPDATE contacts
             SET last_contacted_at = ?2, updated_at = ?2
             WHERE id = ?1 AND (last_contacted_at IS NULL OR last_contacted_at < ?2)",
            params![contact_id, ts],
        )?;
        Ok(())
    }

    /// Delete a contact. Cadence and interactions cascade.
    pub fn delete_contact(&self, contact_id: &str) -> Result<bool, DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM contacts WHERE id = ?1", params![contact_id])?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Companies
    // =========================================================================

    fn map_company_row(row: &rusqlite::Row) -> rusqlite::Result<DbCompany> {
        let created_at: String = row.get(3)?;
        Ok(DbCompany {
            id: row.get(0)?,
            name: row.get(1)?,
            domain: row.get(2)?,
            created_at: parse_ts(3, &created_at)?,
        })
    }

    pub fn get_company(&self, id: &str) -> Result<Option<DbCompany>, DbError> {
        let company = self
            .conn
            .query_row(
                "SELECT id, name, domain, created_at FROM companies WHERE id = ?1",
                params![id],
                Self::map_company_row,
            )
            .optional()?;
        Ok(company)
    }

    /// Case-insensitive exact name match. Oldest match wins.
    pub fn find_company_by_name(&self, name: &str) -> Result<Option<DbCompany>, DbError> {
        let company = self
            .conn
            .query_row(
                "SELECT id, name, domain, created_at FROM companies
                 WHERE name = ?1 COLLATE NOCASE
                 ORDER BY created_at, id LIMIT 1",
                params![name.trim()],
                Self::map_company_row,
            )
            .optional()?;
        Ok(company)
    }

    pub fn insert_company(&self, company: &DbCompany) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO companies (id, name, domain, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                company.id,
                company.name,
                company.domain,
                to_ts(&company.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn count_contacts(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count)
    }
}
