//! Follow-up cadence scoring.
//!
//! The scoring functions are pure: given a cadence row and "now" they return
//! the derived priority and next follow-up date. The store-facing helpers
//! below apply them whenever an interaction is recorded or a cadence changes.

use chrono::{DateTime, Duration, Utc};

use crate::db::{
    ContactCadence, DbError, InteractionLog, InteractionType, RelationshipStrength, SyncDb,
};
use crate::error::SyncError;

/// Overdue days count double before the strength multiplier is applied.
const OVERDUE_WEIGHT: f64 = 2.0;

/// Whole days elapsed since the last interaction, or `None` if there was none.
pub fn days_since_last_interaction(cadence: &ContactCadence, now: DateTime<Utc>) -> Option<i64> {
    cadence
        .last_interaction_date
        .map(|last| (now - last).num_days())
}

/// `max(0, days_since - cadence_days) * 2 * multiplier`.
///
/// A contact on cadence or ahead of it scores 0, as does a contact with no
/// recorded interaction.
pub fn compute_priority_score(cadence: &ContactCadence, now: DateTime<Utc>) -> f64 {
    let Some(days_since) = days_since_last_interaction(cadence, now) else {
        return 0.0;
    };
    let overdue = (days_since - cadence.cadence_days).max(0);
    overdue as f64 * OVERDUE_WEIGHT * cadence.relationship_strength.multiplier()
}

/// `last_interaction_date + cadence_days`.
pub fn update_next_followup(cadence: &ContactCadence) -> Option<DateTime<Utc>> {
    cadence
        .last_interaction_date
        .map(|last| last + Duration::days(cadence.cadence_days))
}

/// Recompute the derived fields in place. Idempotent for a fixed `now`.
pub fn recompute(cadence: &mut ContactCadence, now: DateTime<Utc>) {
    cadence.priority_score = compute_priority_score(cadence, now);
    cadence.next_followup_date = update_next_followup(cadence);
}

/// Fold a new interaction into a cadence.
///
/// `last_interaction_date` only moves forward: a backfilled older interaction
/// never rewinds the schedule.
pub fn apply_interaction(cadence: &mut ContactCadence, at: DateTime<Utc>, now: DateTime<Utc>) {
    match cadence.last_interaction_date {
        Some(last) if last >= at => {}
        _ => cadence.last_interaction_date = Some(at),
    }
    recompute(cadence, now);
}

/// Append an interaction and update the contact's `last_contacted_at` and cadence.
///
/// The cadence row is created with defaults on the contact's first interaction.
/// Callers wanting atomicity wrap this in [`SyncDb::with_transaction`].
pub fn record_interaction(
    db: &SyncDb,
    contact_id: &str,
    interaction_type: InteractionType,
    at: DateTime<Utc>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ContactCadence, DbError> {
    db.insert_interaction(&InteractionLog {
        id: uuid::Uuid::new_v4().to_string(),
        contact_id: contact_id.to_string(),
        interaction_type,
        timestamp: at,
        notes: notes.map(|n| n.to_string()),
        sentiment: None,
    })?;
    db.touch_last_contacted(contact_id, at)?;

    let mut cadence = db
        .get_cadence(contact_id)?
        .unwrap_or_else(|| ContactCadence::with_defaults(contact_id));
    apply_interaction(&mut cadence, at, now);
    db.upsert_cadence(&cadence)?;
    Ok(cadence)
}

/// Explicitly set a contact's cadence and/or relationship strength.
///
/// Fields left as `None` keep their current value (or the default for a new row).
pub fn set_cadence(
    db: &SyncDb,
    contact_id: &str,
    cadence_days: Option<i64>,
    strength: Option<RelationshipStrength>,
    now: DateTime<Utc>,
) -> Result<ContactCadence, SyncError> {
    if let Some(days) = cadence_days {
        if days <= 0 {
            return Err(SyncError::InvalidCadence(format!(
                "cadence must be at least 1 day, got {}",
                days
            )));
        }
    }
    if db.get_contact(contact_id)?.is_none() {
        return Err(SyncError::ContactNotFound(contact_id.to_string()));
    }

    let mut cadence = db
        .get_cadence(contact_id)?
        .unwrap_or_else(|| ContactCadence::with_defaults(contact_id));
    if let Some(days) = cadence_days {
        cadence.cadence_days = days;
    }
    if let Some(strength) = strength {
        cadence.relationship_strength = strength;
    }
    recompute(&mut cadence, now);
    db.upsert_cadence(&cadence)?;
    log::info!(
        "cadence: {} set to every {} days ({})",
        contact_id,
        cadence.cadence_days,
        cadence.relationship_strength
    );
    Ok(cadence)
}

/// Recompute every stored cadence against `now`. Scores drift with time, so
/// the daemon runs this after each cycle. Returns the number of rows changed.
pub fn refresh_all(db: &SyncDb, now: DateTime<Utc>) -> Result<usize, DbError> {
    let cadences = db.list_cadences()?;
    db.with_transaction(|tx| {
        let mut changed = 0;
        for mut cadence in cadences {
            let before = (cadence.priority_score, cadence.next_followup_date);
            recompute(&mut cadence, now);
            if before != (cadence.priority_score, cadence.next_followup_date) {
                tx.upsert_cadence(&cadence)?;
                changed += 1;
            }
        }
        Ok(changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::DbContact;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn cadence(days: i64, strength: RelationshipStrength, last: Option<DateTime<Utc>>) -> ContactCadence {
        ContactCadence {
            contact_id: "c1".to_string(),
            cadence_days: days,
            relationship_strength: strength,
            priority_score: 0.0,
            last_interaction_date: last,
            next_followup_date: None,
        }
    }

    fn seed_contact(db: &SyncDb, id: &str) {
        let now = Utc::now();
        db.insert_contact(&DbContact {
            id: id.to_string(),
            name: "Margaret Hamilton".to_string(),
            email: None,
            company_id: None,
            last_contacted_at: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    }

    #[test]
    fn test_overdue_strong_contact() {
        let now = ts("2026-06-15T12:00:00Z");
        let c = cadence(30, RelationshipStrength::Strong, Some(now - Duration::days(45)));
        assert_eq!(compute_priority_score(&c, now), 60.0);
    }

    #[test]
    fn test_under_cadence_scores_zero() {
        let now = ts("2026-06-15T12:00:00Z");
        let c = cadence(30, RelationshipStrength::Strong, Some(now - Duration::days(20)));
        assert_eq!(compute_priority_score(&c, now), 0.0);

        let exact = cadence(30, RelationshipStrength::Strong, Some(now - Duration::days(30)));
        assert_eq!(compute_priority_score(&exact, now), 0.0);
    }

    #[test]
    fn test_partial_days_are_truncated() {
        let now = ts("2026-06-15T12:00:00Z");
        let c = cadence(
            10,
            RelationshipStrength::Weak,
            Some(now - Duration::days(12) - Duration::hours(23)),
        );
        assert_eq!(compute_priority_score(&c, now), 4.0);
    }

    #[test]
    fn test_no_interaction_scores_zero() {
        let c = cadence(30, RelationshipStrength::Medium, None);
        assert_eq!(compute_priority_score(&c, Utc::now()), 0.0);
        assert_eq!(update_next_followup(&c), None);
    }

    #[test]
    fn test_next_followup_is_last_plus_cadence() {
        let last = ts("2026-01-01T09:00:00Z");
        let c = cadence(14, RelationshipStrength::Medium, Some(last));
        assert_eq!(update_next_followup(&c), Some(ts("2026-01-15T09:00:00Z")));
    }

    #[test]
    fn test_apply_interaction_never_rewinds() {
        let now = ts("2026-06-15T12:00:00Z");
        let recent = now - Duration::days(2);
        let mut c = cadence(30, RelationshipStrength::Medium, Some(recent));
        apply_interaction(&mut c, now - Duration::days(90), now);
        assert_eq!(c.last_interaction_date, Some(recent));
        assert_eq!(c.priority_score, 0.0);

        apply_interaction(&mut c, now - Duration::days(1), now);
        assert_eq!(c.last_interaction_date, Some(now - Duration::days(1)));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let now = ts("2026-06-15T12:00:00Z");
        let mut c = cadence(7, RelationshipStrength::Medium, Some(now - Duration::days(10)));
        recompute(&mut c, now);
        let first = c.clone();
        recompute(&mut c, now);
        assert_eq!(c, first);
        assert_eq!(c.priority_score, 9.0);
    }

    #[test]
    fn test_record_interaction_creates_cadence_lazily() {
        let db = test_db();
        seed_contact(&db, "c1");
        let now = ts("2026-06-15T12:00:00Z");
        let at = now - Duration::days(40);

        let stored = record_interaction(&db, "c1", InteractionType::Meeting, at, Some("1:1"), now)
            .unwrap();
        assert_eq!(stored.cadence_days, 30);
        assert_eq!(stored.relationship_strength, RelationshipStrength::Medium);
        assert_eq!(stored.priority_score, 30.0);
        assert_eq!(db.get_cadence("c1").unwrap().unwrap(), stored);

        let contact = db.get_contact("c1").unwrap().unwrap();
        assert_eq!(contact.last_contacted_at, Some(at));
        assert_eq!(db.get_interactions_for_contact("c1").unwrap().len(), 1);
    }

    #[test]
    fn test_set_cadence_validates_and_recomputes() {
        let db = test_db();
        seed_contact(&db, "c1");
        let now = ts("2026-06-15T12:00:00Z");
        record_interaction(
            &db,
            "c1",
            InteractionType::Email,
            now - Duration::days(45),
            None,
            now,
        )
        .unwrap();

        let err = set_cadence(&db, "c1", Some(0), None, now).unwrap_err();
        assert!(matches!(err, SyncError::InvalidCadence(_)));

        let updated = set_cadence(&db, "c1", None, Some(RelationshipStrength::Strong), now).unwrap();
        assert_eq!(updated.cadence_days, 30);
        assert_eq!(updated.priority_score, 60.0);

        let missing = set_cadence(&db, "nobody", Some(10), None, now).unwrap_err();
        assert!(matches!(missing, SyncError::ContactNotFound(_)));
    }

    #[test]
    fn test_refresh_all_tracks_time() {
        let db = test_db();
        seed_contact(&db, "c1");
        let then = ts("2026-06-01T12:00:00Z");
        record_interaction(&db, "c1", InteractionType::Call, then, None, then).unwrap();
        assert_eq!(db.get_cadence("c1").unwrap().unwrap().priority_score, 0.0);

        let later = then + Duration::days(40);
        assert_eq!(refresh_all(&db, later).unwrap(), 1);
        assert_eq!(db.get_cadence("c1").unwrap().unwrap().priority_score, 30.0);
        // Nothing moved, nothing written.
        assert_eq!(refresh_all(&db, later).unwrap(), 0);
    }
}
