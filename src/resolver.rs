//! Find-or-create for contacts and companies seen in provider data.
//!
//! This is the only path by which imported records mint domain entities.
//! Existing rows are never updated from provider data.
//!
//! Matching order for contacts:
//! 1. Email (case-insensitive) when one is given.
//! 2. Exact name (case-insensitive), skipping candidates whose stored email
//!    differs from the given one. Two people sharing a display name but not
//!    an address stay distinct.
//! 3. Otherwise create.

use chrono::{DateTime, Utc};

use crate::db::{DbCompany, DbContact, DbError, SyncDb};

/// Consumer mail domains never treated as an employer.
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "msn.com",
    "yahoo.com",
    "ymail.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "fastmail.com",
    "gmx.com",
    "gmx.de",
    "hey.com",
    "zoho.com",
    "yandex.com",
];

/// Second-level labels that sit under a country code (`acme.co.uk`).
const COUNTRY_SECOND_LEVEL: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

pub struct EntityResolver<'a> {
    db: &'a SyncDb,
    now: DateTime<Utc>,
}

impl<'a> EntityResolver<'a> {
    pub fn new(db: &'a SyncDb, now: DateTime<Utc>) -> Self {
        Self { db, now }
    }

    pub fn resolve_contact(&self, name: &str, email: Option<&str>) -> Result<DbContact, DbError> {
        self.resolve_contact_in_company(name, email, None)
    }

    /// Like [`resolve_contact`](Self::resolve_contact), but a newly created
    /// contact is attached to `company_name` (resolved or created). Existing
    /// contacts keep whatever company they already have.
    pub fn resolve_contact_in_company(
        &self,
        name: &str,
        email: Option<&str>,
        company_name: Option<&str>,
    ) -> Result<DbContact, DbError> {
        let company_name = company_name.map(str::trim).filter(|c| !c.is_empty());
        self.resolve_or_create(name, email, |resolver| match company_name {
            Some(company) => resolver.resolve_company(company).map(Some),
            None => Ok(None),
        })
    }

    /// Resolve the person behind a mail address. A newly created contact gets
    /// the company inferred from the address's domain, unless it is free mail.
    pub fn resolve_contact_from_address(
        &self,
        name: Option<&str>,
        email: &str,
    ) -> Result<DbContact, DbError> {
        self.resolve_or_create(name.unwrap_or_default(), Some(email), |resolver| {
            resolver.resolve_company_for_email(email)
        })
    }

    /// Shared find-or-create. `company` runs only when a contact is created.
    fn resolve_or_create<F>(
        &self,
        name: &str,
        email: Option<&str>,
        company: F,
    ) -> Result<DbContact, DbError>
    where
        F: FnOnce(&Self) -> Result<Option<DbCompany>, DbError>,
    {
        let email = normalize_email(email);
        let name = match (name.trim(), email.as_deref()) {
            ("", Some(addr)) => display_name_from_email(addr),
            ("", None) => {
                return Err(DbError::InvalidValue {
                    column: "name",
                    value: String::new(),
                })
            }
            (n, _) => n.to_string(),
        };

        if let Some(existing) = self.find_contact(&name, email.as_deref())? {
            return Ok(existing);
        }

        let contact = DbContact {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            email,
            company_id: company(self)?.map(|c| c.id),
            last_contacted_at: None,
            created_at: self.now,
            updated_at: self.now,
        };
        self.db.insert_contact(&contact)?;
        log::debug!(
            "resolver: created contact '{}' <{}>",
            contact.name,
            contact.email.as_deref().unwrap_or("-")
        );
        Ok(contact)
    }

    fn find_contact(&self, name: &str, email: Option<&str>) -> Result<Option<DbContact>, DbError> {
        if let Some(addr) = email {
            if let Some(found) = self.db.find_contact_by_email(addr)? {
                return Ok(Some(found));
            }
        }
        let candidates = self.db.find_contacts_by_name(name)?;
        Ok(candidates.into_iter().find(|c| match (email, c.email.as_deref()) {
            (Some(given), Some(stored)) => given.eq_ignore_ascii_case(stored),
            _ => true,
        }))
    }

    pub fn resolve_company(&self, name: &str) -> Result<DbCompany, DbError> {
        self.resolve_company_with_domain(name, None)
    }

    /// Company for a work email address. `None` for free-mail domains.
    pub fn resolve_company_for_email(&self, email: &str) -> Result<Option<DbCompany>, DbError> {
        let Some(domain) = company_domain(email) else {
            return Ok(None);
        };
        let Some(name) = company_name_from_domain(&domain) else {
            return Ok(None);
        };
        self.resolve_company_with_domain(&name, Some(&domain)).map(Some)
    }

    fn resolve_company_with_domain(
        &self,
        name: &str,
        domain: Option<&str>,
    ) -> Result<DbCompany, DbError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidValue {
                column: "company name",
                value: String::new(),
            });
        }
        if let Some(existing) = self.db.find_company_by_name(name)? {
            return Ok(existing);
        }
        let company = DbCompany {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            domain: domain.map(|d| d.to_string()),
            created_at: self.now,
        };
        self.db.insert_company(&company)?;
        log::debug!("resolver: created company '{}'", company.name);
        Ok(company)
    }
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| e.contains('@'))
}

/// The mail domain if it looks like an employer's, else `None`.
pub fn company_domain(email: &str) -> Option<String> {
    let domain = email.trim().rsplit_once('@')?.1.trim().to_lowercase();
    if domain.is_empty() || !domain.contains('.') {
        return None;
    }
    if FREE_MAIL_DOMAINS.contains(&domain.as_str()) {
        return None;
    }
    Some(domain)
}

/// `acme-robotics.com` → `Acme Robotics`, `eng.widgets.co.uk` → `Widgets`.
pub fn company_name_from_domain(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let n = labels.len();
    if n < 2 {
        return None;
    }
    let label = if n >= 3 && labels[n - 1].len() == 2 && COUNTRY_SECOND_LEVEL.contains(&labels[n - 2])
    {
        labels[n - 3]
    } else {
        labels[n - 2]
    };
    let name = title_case(label);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// `sarah.chen+work@acme.com` → `Sarah Chen`.
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let local = local.split('+').next().unwrap_or(local);
    let name = title_case(local);
    if name.is_empty() {
        email.trim().to_string()
    } else {
        name
    }
}

fn title_case(raw: &str) -> String {
    raw.split(|c: char| c == '.' || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
