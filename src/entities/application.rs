// 📝 Rental Application - an applicant's request to rent a listed property
//
// Accepting an application puts the property under offer through the
// normal status transition path.

use crate::db::{insert_event, parse_document, Event};
use crate::entities::property::{get_property, transition};
use crate::error::{DomainError, DomainResult};
use crate::status::PropertyStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub property_id: String,
    pub applicant_id: String,

    /// Free text from the applicant
    #[serde(default)]
    pub message: String,

    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

fn application_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Application> {
    let document: String = row.get(0)?;
    parse_document(0, &document)
}

fn save_application(conn: &Connection, application: &Application) -> DomainResult<()> {
    let document = serde_json::to_string(application)?;

    conn.execute(
        "INSERT INTO applications (id, property_id, applicant_id, status, document, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            document = excluded.document",
        params![
            application.id,
            application.property_id,
            application.applicant_id,
            application.status.as_str(),
            document,
            application.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

fn record(conn: &Connection, event_type: &str, application: &Application, actor: &str) -> DomainResult<()> {
    insert_event(
        conn,
        &Event::new(
            event_type,
            "application",
            &application.id,
            serde_json::json!({
                "property_id": application.property_id,
                "status": application.status,
            }),
            actor,
        ),
    )
}

/// Apply for a listed property. One pending application per applicant and property.
pub fn submit_application(
    conn: &Connection,
    property_id: &str,
    applicant_id: &str,
    message: &str,
) -> DomainResult<Application> {
    let tx = conn.unchecked_transaction()?;
    let property = get_property(&tx, property_id)?;
    if property.status != PropertyStatus::Listed {
        return Err(DomainError::Conflict(format!(
            "property is not accepting applications (status: {})",
            property.status
        )));
    }

    let pending: i64 = tx.query_row(
        "SELECT COUNT(*) FROM applications
         WHERE property_id = ?1 AND applicant_id = ?2 AND status = 'pending'",
        params![property_id, applicant_id],
        |row| row.get(0),
    )?;
    if pending > 0 {
        return Err(DomainError::Conflict(
            "an application for this property is already pending".to_string(),
        ));
    }

    let application = Application {
        id: uuid::Uuid::new_v4().to_string(),
        property_id: property_id.to_string(),
        applicant_id: applicant_id.to_string(),
        message: message.trim().to_string(),
        status: ApplicationStatus::Pending,
        created_at: Utc::now(),
        decided_at: None,
    };

    save_application(&tx, &application)?;
    record(&tx, "application_submitted", &application, applicant_id)?;
    tx.commit()?;

    tracing::info!(application_id = %application.id, property_id, applicant_id, "application submitted");
    Ok(application)
}

pub fn get_application(conn: &Connection, id: &str) -> DomainResult<Application> {
    conn.query_row(
        "SELECT document FROM applications WHERE id = ?1",
        [id],
        application_from_row,
    )
    .optional()?
    .ok_or_else(|| DomainError::not_found("application", id))
}

pub fn list_applications_for_property(
    conn: &Connection,
    property_id: &str,
) -> DomainResult<Vec<Application>> {
    let mut stmt = conn.prepare(
        "SELECT document FROM applications WHERE property_id = ?1 ORDER BY created_at DESC",
    )?;

    let applications = stmt
        .query_map([property_id], application_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(applications)
}

pub fn list_applications_by_applicant(
    conn: &Connection,
    applicant_id: &str,
) -> DomainResult<Vec<Application>> {
    let mut stmt = conn.prepare(
        "SELECT document FROM applications WHERE applicant_id = ?1 ORDER BY created_at DESC",
    )?;

    let applications = stmt
        .query_map([applicant_id], application_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(applications)
}

/// Accept or reject a pending application.
///
/// Accepting moves the property `listed -> under_offer`; if the table refuses
/// that move the application stays pending.
pub fn decide_application(
    conn: &Connection,
    id: &str,
    accept: bool,
    actor: &str,
) -> DomainResult<Application> {
    // Property status and application status change together or not at all
    let tx = conn.unchecked_transaction()?;
    let mut application = get_application(&tx, id)?;

    if application.status != ApplicationStatus::Pending {
        return Err(DomainError::Conflict(format!(
            "application already {}",
            application.status.as_str()
        )));
    }

    if accept {
        transition(&tx, &application.property_id, PropertyStatus::UnderOffer, actor)?;
        application.status = ApplicationStatus::Accepted;
    } else {
        application.status = ApplicationStatus::Rejected;
    }
    application.decided_at = Some(Utc::now());

    save_application(&tx, &application)?;
    record(&tx, "application_decided", &application, actor)?;
    tx.commit()?;

    tracing::info!(application_id = id, status = application.status.as_str(), actor, "application decided");
    Ok(application)
}

/// Applicant withdraws their own pending application
pub fn withdraw_application(
    conn: &Connection,
    id: &str,
    applicant_id: &str,
) -> DomainResult<Application> {
    let tx = conn.unchecked_transaction()?;
    let mut application = get_application(&tx, id)?;

    if application.applicant_id != applicant_id {
        return Err(DomainError::Forbidden(
            "only the applicant can withdraw an application".to_string(),
        ));
    }
    if application.status != ApplicationStatus::Pending {
        return Err(DomainError::Conflict(format!(
            "application already {}",
            application.status.as_str()
        )));
    }

    application.status = ApplicationStatus::Withdrawn;
    application.decided_at = Some(Utc::now());

    save_application(&tx, &application)?;
    record(&tx, "application_withdrawn", &application, applicant_id)?;
    tx.commit()?;

    Ok(application)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::create_user;
    use crate::db::tests::{fail_event_writes, test_conn};
    use crate::entities::property::{change_status, insert_property, NewProperty};

    struct Fixture {
        conn: Connection,
        landlord_id: String,
        applicant_id: String,
        property_id: String,
    }

    fn fixture(listed: bool) -> Fixture {
        let conn = test_conn();
        let landlord_id = create_user(&conn, "l@example.com", "Lena", Some(Role::Landlord))
            .unwrap()
            .id;
        let applicant_id = create_user(&conn, "a@example.com", "Ari", Some(Role::Applicant))
            .unwrap()
            .id;

        let property = insert_property(
            &conn,
            &landlord_id,
            NewProperty {
                title: "Flat".to_string(),
                address: "2 Mill Lane".to_string(),
                rent_pence: 90_000,
                bedrooms: 1,
                description: String::new(),
            },
            &landlord_id,
        )
        .unwrap();

        if listed {
            change_status(&conn, &property.id, PropertyStatus::Listed, &landlord_id).unwrap();
        }

        Fixture {
            conn,
            landlord_id,
            applicant_id,
            property_id: property.id,
        }
    }

    #[test]
    fn test_cannot_apply_to_draft() {
        let f = fixture(false);
        let err = submit_application(&f.conn, &f.property_id, &f.applicant_id, "hi").unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn test_single_pending_application() {
        let f = fixture(true);

        submit_application(&f.conn, &f.property_id, &f.applicant_id, "hi").unwrap();
        let err = submit_application(&f.conn, &f.property_id, &f.applicant_id, "again").unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        assert_eq!(
            list_applications_by_applicant(&f.conn, &f.applicant_id).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_accept_puts_property_under_offer() {
        let f = fixture(true);
        let application = submit_application(&f.conn, &f.property_id, &f.applicant_id, "hi").unwrap();

        let decided = decide_application(&f.conn, &application.id, true, &f.landlord_id).unwrap();
        assert_eq!(decided.status, ApplicationStatus::Accepted);
        assert!(decided.decided_at.is_some());

        let property = get_property(&f.conn, &f.property_id).unwrap();
        assert_eq!(property.status, PropertyStatus::UnderOffer);

        // Already decided
        assert!(decide_application(&f.conn, &application.id, false, &f.landlord_id).is_err());
    }

    #[test]
    fn test_second_accept_is_refused_by_transition_table() {
        let f = fixture(true);
        let other = create_user(&f.conn, "b@example.com", "Bea", Some(Role::Applicant))
            .unwrap()
            .id;

        let first = submit_application(&f.conn, &f.property_id, &f.applicant_id, "").unwrap();
        let second = submit_application(&f.conn, &f.property_id, &other, "").unwrap();

        decide_application(&f.conn, &first.id, true, &f.landlord_id).unwrap();
        let err = decide_application(&f.conn, &second.id, true, &f.landlord_id).unwrap_err();

        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));
        assert_eq!(
            get_application(&f.conn, &second.id).unwrap().status,
            ApplicationStatus::Pending
        );
    }

    #[test]
    fn test_reject_leaves_property_listed() {
        let f = fixture(true);
        let application = submit_application(&f.conn, &f.property_id, &f.applicant_id, "").unwrap();

        decide_application(&f.conn, &application.id, false, &f.landlord_id).unwrap();

        assert_eq!(
            get_property(&f.conn, &f.property_id).unwrap().status,
            PropertyStatus::Listed
        );
        assert_eq!(
            list_applications_for_property(&f.conn, &f.property_id).unwrap()[0].status,
            ApplicationStatus::Rejected
        );
    }

    #[test]
    fn test_withdraw() {
        let f = fixture(true);
        let application = submit_application(&f.conn, &f.property_id, &f.applicant_id, "").unwrap();

        assert!(matches!(
            withdraw_application(&f.conn, &application.id, &f.landlord_id),
            Err(DomainError::Forbidden(_))
        ));

        let withdrawn = withdraw_application(&f.conn, &application.id, &f.applicant_id).unwrap();
        assert_eq!(withdrawn.status, ApplicationStatus::Withdrawn);

        // A fresh application is allowed once nothing is pending
        submit_application(&f.conn, &f.property_id, &f.applicant_id, "").unwrap();
    }

    #[test]
    fn test_failed_event_write_keeps_applications_unchanged() {
        let f = fixture(true);
        let application = submit_application(&f.conn, &f.property_id, &f.applicant_id, "").unwrap();

        fail_event_writes(&f.conn);

        // Withdrawal is rolled back
        assert!(withdraw_application(&f.conn, &application.id, &f.applicant_id).is_err());
        assert_eq!(
            get_application(&f.conn, &application.id).unwrap().status,
            ApplicationStatus::Pending
        );

        // Acceptance is rolled back together with the property status
        assert!(decide_application(&f.conn, &application.id, true, &f.landlord_id).is_err());
        assert_eq!(
            get_property(&f.conn, &f.property_id).unwrap().status,
            PropertyStatus::Listed
        );

        // A new submission leaves no row behind
        let other = create_user(&f.conn, "c@example.com", "Cal", Some(Role::Applicant))
            .unwrap()
            .id;
        assert!(submit_application(&f.conn, &f.property_id, &other, "").is_err());
        assert!(list_applications_by_applicant(&f.conn, &other).unwrap().is_empty());
    }
}
