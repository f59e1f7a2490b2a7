// 🏠 Property Entity - listing document + lifecycle status
//
// The whole property is stored as a JSON document; landlord_id, status and
// version are duplicated into indexed columns for lookups.
// Every status change goes through the transition table.

use crate::db::{insert_event, parse_document, Event};
use crate::error::{DomainError, DomainResult};
use crate::status::{can_transition, PropertyStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ============================================================================
// PROPERTY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Stable identity (UUID)
    pub id: String,

    /// Owning landlord's user id
    pub landlord_id: String,

    pub title: String,
    pub address: String,

    /// Monthly rent in pence
    pub rent_pence: i64,

    pub bedrooms: u32,

    #[serde(default)]
    pub description: String,

    pub status: PropertyStatus,

    /// Blob hashes of attached images, in upload order
    #[serde(default)]
    pub images: Vec<String>,

    /// Incremented on every persisted change
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Landlord-supplied fields for a new listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProperty {
    pub title: String,
    pub address: String,
    pub rent_pence: i64,
    pub bedrooms: u32,
    #[serde(default)]
    pub description: String,
}

impl NewProperty {
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::Validation("title is required".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(DomainError::Validation("address is required".to_string()));
        }
        if self.rent_pence <= 0 {
            return Err(DomainError::Validation("rent must be positive".to_string()));
        }
        Ok(())
    }
}

impl Property {
    /// New draft property, version 1
    pub fn new(landlord_id: &str, fields: NewProperty) -> Self {
        let now = Utc::now();

        Property {
            id: uuid::Uuid::new_v4().to_string(),
            landlord_id: landlord_id.to_string(),
            title: fields.title.trim().to_string(),
            address: fields.address.trim().to_string(),
            rent_pence: fields.rent_pence,
            bedrooms: fields.bedrooms,
            description: fields.description.trim().to_string(),
            status: PropertyStatus::Draft,
            images: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rent formatted as pounds, e.g. "£1,250.00"
    pub fn rent_display(&self) -> String {
        let pounds = self.rent_pence / 100;
        let pence = self.rent_pence % 100;

        let digits = pounds.to_string();
        let mut grouped = String::new();
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        format!("£{}.{:02}", grouped, pence)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.landlord_id == user_id
    }
}

// ============================================================================
// DATA ACCESS
// ============================================================================

fn property_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Property> {
    let document: String = row.get(0)?;
    parse_document(0, &document)
}

/// Write the full document, overwriting whatever is stored under its id
fn save_property(conn: &Connection, property: &Property) -> DomainResult<()> {
    let document = serde_json::to_string(property)?;

    conn.execute(
        "INSERT INTO properties (id, landlord_id, status, version, document, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            landlord_id = excluded.landlord_id,
            status = excluded.status,
            version = excluded.version,
            document = excluded.document,
            updated_at = excluded.updated_at",
        params![
            property.id,
            property.landlord_id,
            property.status.as_str(),
            property.version,
            document,
            property.updated_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

pub fn insert_property(
    conn: &Connection,
    landlord_id: &str,
    fields: NewProperty,
    actor: &str,
) -> DomainResult<Property> {
    let tx = conn.unchecked_transaction()?;
    let property = create_draft(&tx, landlord_id, fields, actor)?;
    tx.commit()?;

    tracing::info!(property_id = %property.id, landlord_id, "property created");
    Ok(property)
}

/// Document and `property_created` event, inside the caller's transaction
pub(crate) fn create_draft(
    conn: &Connection,
    landlord_id: &str,
    fields: NewProperty,
    actor: &str,
) -> DomainResult<Property> {
    fields.validate()?;

    let property = Property::new(landlord_id, fields);
    save_property(conn, &property)?;

    insert_event(
        conn,
        &Event::new(
            "property_created",
            "property",
            &property.id,
            serde_json::json!({
                "title": property.title,
                "landlord_id": property.landlord_id,
            }),
            actor,
        ),
    )?;

    Ok(property)
}

pub fn get_property(conn: &Connection, id: &str) -> DomainResult<Property> {
    conn.query_row(
        "SELECT document FROM properties WHERE id = ?1",
        [id],
        property_from_row,
    )
    .optional()?
    .ok_or_else(|| DomainError::not_found("property", id))
}

fn query_properties(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> DomainResult<Vec<Property>> {
    let mut stmt = conn.prepare(sql)?;

    let properties = stmt
        .query_map(params, property_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(properties)
}

pub fn list_properties(conn: &Connection) -> DomainResult<Vec<Property>> {
    query_properties(
        conn,
        "SELECT document FROM properties ORDER BY updated_at DESC",
        [],
    )
}

pub fn list_properties_by_landlord(
    conn: &Connection,
    landlord_id: &str,
) -> DomainResult<Vec<Property>> {
    query_properties(
        conn,
        "SELECT document FROM properties WHERE landlord_id = ?1 ORDER BY updated_at DESC",
        [landlord_id],
    )
}

pub fn list_properties_by_status(
    conn: &Connection,
    status: PropertyStatus,
) -> DomainResult<Vec<Property>> {
    query_properties(
        conn,
        "SELECT document FROM properties WHERE status = ?1 ORDER BY updated_at DESC",
        [status.as_str()],
    )
}

/// Move a property to `to` if the transition table allows it.
///
/// Rejected transitions leave the stored document untouched. The document
/// and its `property_status_changed` event are written together or not at all.
pub fn change_status(
    conn: &Connection,
    id: &str,
    to: PropertyStatus,
    actor: &str,
) -> DomainResult<Property> {
    let tx = conn.unchecked_transaction()?;
    let property = transition(&tx, id, to, actor)?;
    tx.commit()?;

    tracing::info!(property_id = id, to = %property.status, actor, "property status changed");
    Ok(property)
}

/// Status change inside the caller's transaction
pub(crate) fn transition(
    conn: &Connection,
    id: &str,
    to: PropertyStatus,
    actor: &str,
) -> DomainResult<Property> {
    let mut property = get_property(conn, id)?;
    let from = property.status;

    if !can_transition(from, to) {
        tracing::warn!(property_id = id, %from, %to, actor, "rejected status transition");
        return Err(DomainError::InvalidStatusTransition { from, to });
    }

    property.status = to;
    property.version += 1;
    property.updated_at = Utc::now();
    save_property(conn, &property)?;

    insert_event(
        conn,
        &Event::new(
            "property_status_changed",
            "property",
            id,
            serde_json::json!({
                "from": from,
                "to": to,
                "version": property.version,
            }),
            actor,
        ),
    )?;

    Ok(property)
}

/// Attach an image blob. Attaching the same blob twice is a no-op.
pub fn add_image(conn: &Connection, id: &str, hash: &str, actor: &str) -> DomainResult<Property> {
    let tx = conn.unchecked_transaction()?;
    let mut property = get_property(&tx, id)?;

    if property.images.iter().any(|h| h == hash) {
        return Ok(property);
    }

    property.images.push(hash.to_string());
    property.version += 1;
    property.updated_at = Utc::now();
    save_property(&tx, &property)?;

    insert_event(
        &tx,
        &Event::new(
            "property_image_added",
            "property",
            id,
            serde_json::json!({ "hash": hash }),
            actor,
        ),
    )?;

    tx.commit()?;
    Ok(property)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::tests::{fail_event_writes, test_conn};
    use crate::db::{create_user, get_events_for_entity};

    fn new_fields(title: &str) -> NewProperty {
        NewProperty {
            title: title.to_string(),
            address: "1 High Street, Bristol".to_string(),
            rent_pence: 125_000,
            bedrooms: 2,
            description: "Bright flat".to_string(),
        }
    }

    fn landlord(conn: &Connection) -> String {
        create_user(conn, "landlord@example.com", "Lena", Some(Role::Landlord))
            .unwrap()
            .id
    }

    #[test]
    fn test_new_property_is_draft() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);

        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        assert_eq!(property.status, PropertyStatus::Draft);
        assert_eq!(property.version, 1);

        let stored = get_property(&conn, &property.id).unwrap();
        assert_eq!(stored, property);

        let events = get_events_for_entity(&conn, "property", &property.id).unwrap();
        assert_eq!(events[0].event_type, "property_created");
    }

    #[test]
    fn test_validation() {
        let mut fields = new_fields("Flat");
        fields.rent_pence = 0;
        assert!(matches!(fields.validate(), Err(DomainError::Validation(_))));

        let mut fields = new_fields("  ");
        assert!(fields.validate().is_err());
        fields.title = "Flat".to_string();
        fields.address = String::new();
        assert!(fields.validate().is_err());
    }

    #[test]
    fn test_legal_transition_bumps_version_and_logs() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        let listed = change_status(&conn, &property.id, PropertyStatus::Listed, &landlord_id).unwrap();
        assert_eq!(listed.status, PropertyStatus::Listed);
        assert_eq!(listed.version, 2);

        let events = get_events_for_entity(&conn, "property", &property.id).unwrap();
        assert_eq!(events[0].event_type, "property_status_changed");
        assert_eq!(events[0].data["from"], "draft");
        assert_eq!(events[0].data["to"], "listed");
    }

    #[test]
    fn test_illegal_transition_leaves_document_untouched() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        let err = change_status(&conn, &property.id, PropertyStatus::Let, &landlord_id).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStatusTransition {
                from: PropertyStatus::Draft,
                to: PropertyStatus::Let
            }
        ));

        assert_eq!(get_property(&conn, &property.id).unwrap(), property);
        assert_eq!(get_events_for_entity(&conn, "property", &property.id).unwrap().len(), 1);
    }

    #[test]
    fn test_full_lifecycle_until_terminal() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        for to in [
            PropertyStatus::Listed,
            PropertyStatus::UnderOffer,
            PropertyStatus::OfferMade,
            PropertyStatus::Let,
            PropertyStatus::Ended,
        ] {
            change_status(&conn, &property.id, to, &landlord_id).unwrap();
        }

        // Terminal: nothing is accepted any more
        for to in PropertyStatus::ALL {
            assert!(change_status(&conn, &property.id, to, &landlord_id).is_err());
        }
        assert_eq!(get_property(&conn, &property.id).unwrap().version, 6);
    }

    #[test]
    fn test_missing_property() {
        let conn = test_conn();
        assert!(matches!(
            change_status(&conn, "nope", PropertyStatus::Listed, "someone"),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[test]
    fn test_listing_queries() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let other = create_user(&conn, "other@example.com", "Otto", Some(Role::Landlord))
            .unwrap()
            .id;

        let a = insert_property(&conn, &landlord_id, new_fields("A"), &landlord_id).unwrap();
        insert_property(&conn, &landlord_id, new_fields("B"), &landlord_id).unwrap();
        insert_property(&conn, &other, new_fields("C"), &other).unwrap();
        change_status(&conn, &a.id, PropertyStatus::Listed, &landlord_id).unwrap();

        assert_eq!(list_properties(&conn).unwrap().len(), 3);
        assert_eq!(list_properties_by_landlord(&conn, &landlord_id).unwrap().len(), 2);

        let listed = list_properties_by_status(&conn, PropertyStatus::Listed).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
    }

    #[test]
    fn test_add_image_is_idempotent() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        let hash = "ab".repeat(32);
        add_image(&conn, &property.id, &hash, &landlord_id).unwrap();
        let again = add_image(&conn, &property.id, &hash, &landlord_id).unwrap();

        assert_eq!(again.images, vec![hash]);
        assert_eq!(again.version, 2);
    }

    #[test]
    fn test_rent_display() {
        let mut property = Property::new("l1", new_fields("Flat"));
        assert_eq!(property.rent_display(), "£1,250.00");

        property.rent_pence = 99_505;
        assert_eq!(property.rent_display(), "£995.05");

        property.rent_pence = 123_456_789;
        assert_eq!(property.rent_display(), "£1,234,567.89");
    }

    #[test]
    fn test_failed_event_write_rolls_back_status_change() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        fail_event_writes(&conn);

        let err = change_status(&conn, &property.id, PropertyStatus::Listed, &landlord_id).unwrap_err();
        assert!(matches!(err, DomainError::Storage(_)));

        let stored = get_property(&conn, &property.id).unwrap();
        assert_eq!(stored.status, PropertyStatus::Draft);
        assert_eq!(stored.version, 1);
        assert_eq!(stored, property);
    }

    #[test]
    fn test_failed_event_write_rolls_back_insert_and_image() {
        let conn = test_conn();
        let landlord_id = landlord(&conn);
        let property = insert_property(&conn, &landlord_id, new_fields("Flat"), &landlord_id).unwrap();

        fail_event_writes(&conn);

        assert!(insert_property(&conn, &landlord_id, new_fields("Studio"), &landlord_id).is_err());
        assert_eq!(list_properties(&conn).unwrap().len(), 1);

        assert!(add_image(&conn, &property.id, &"cd".repeat(32), &landlord_id).is_err());
        assert_eq!(get_property(&conn, &property.id).unwrap(), property);
    }
}
