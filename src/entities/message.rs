// ✉️ Messages between users (landlord <-> applicant, admin <-> anyone)

use crate::db::{get_user, parse_time};
use crate::entities::property::get_property;
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,

    /// Property the conversation is about, if any
    pub property_id: Option<String>,

    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, property_id, body, sent_at, read_at";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sent_at: String = row.get(5)?;
    let read_at: Option<String> = row.get(6)?;

    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        property_id: row.get(3)?,
        body: row.get(4)?,
        sent_at: parse_time(5, &sent_at)?,
        read_at: read_at.map(|s| parse_time(6, &s)).transpose()?,
    })
}

pub fn send_message(
    conn: &Connection,
    sender_id: &str,
    recipient_id: &str,
    property_id: Option<&str>,
    body: &str,
) -> DomainResult<Message> {
    let body = body.trim();
    if body.is_empty() {
        return Err(DomainError::Validation("message body is empty".to_string()));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(DomainError::Validation(format!(
            "message longer than {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if sender_id == recipient_id {
        return Err(DomainError::Validation("cannot message yourself".to_string()));
    }
    get_user(conn, recipient_id)?;
    if let Some(property_id) = property_id {
        get_property(conn, property_id)?;
    }

    let message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        sender_id: sender_id.to_string(),
        recipient_id: recipient_id.to_string(),
        property_id: property_id.map(str::to_string),
        body: body.to_string(),
        sent_at: Utc::now(),
        read_at: None,
    };

    conn.execute(
        "INSERT INTO messages (id, sender_id, recipient_id, property_id, body, sent_at, read_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        params![
            message.id,
            message.sender_id,
            message.recipient_id,
            message.property_id,
            message.body,
            message.sent_at.to_rfc3339(),
        ],
    )?;

    tracing::debug!(message_id = %message.id, sender_id, recipient_id, "message sent");
    Ok(message)
}

fn query_messages(conn: &Connection, column: &str, user_id: &str) -> DomainResult<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE {} = ?1 ORDER BY sent_at DESC",
        MESSAGE_COLUMNS, column
    ))?;

    let messages = stmt
        .query_map([user_id], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

/// Messages received by `user_id`, newest first
pub fn inbox(conn: &Connection, user_id: &str) -> DomainResult<Vec<Message>> {
    query_messages(conn, "recipient_id", user_id)
}

/// Messages sent by `user_id`, newest first
pub fn sent(conn: &Connection, user_id: &str) -> DomainResult<Vec<Message>> {
    query_messages(conn, "sender_id", user_id)
}

pub fn unread_count(conn: &Connection, user_id: &str) -> DomainResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND read_at IS NULL",
        [user_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Mark a message read. Only its recipient may do so; re-reading keeps the first timestamp.
pub fn mark_read(conn: &Connection, id: &str, reader_id: &str) -> DomainResult<Message> {
    let mut message = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            [id],
            message_from_row,
        )
        .optional()?
        .ok_or_else(|| DomainError::not_found("message", id))?;

    if message.recipient_id != reader_id {
        return Err(DomainError::Forbidden(
            "only the recipient can mark a message read".to_string(),
        ));
    }

    if message.read_at.is_none() {
        let now = Utc::now();
        conn.execute(
            "UPDATE messages SET read_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        message.read_at = Some(now);
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::{create_user, tests::test_conn};
    use crate::entities::property::{insert_property, NewProperty};

    fn two_users(conn: &Connection) -> (String, String) {
        let a = create_user(conn, "a@example.com", "Ari", Some(Role::Applicant)).unwrap();
        let b = create_user(conn, "b@example.com", "Lena", Some(Role::Landlord)).unwrap();
        (a.id, b.id)
    }

    #[test]
    fn test_send_and_read() {
        let conn = test_conn();
        let (a, b) = two_users(&conn);

        let message = send_message(&conn, &a, &b, None, "  Is it still available?  ").unwrap();
        assert_eq!(message.body, "Is it still available?");

        assert_eq!(inbox(&conn, &b).unwrap().len(), 1);
        assert_eq!(sent(&conn, &a).unwrap().len(), 1);
        assert!(inbox(&conn, &a).unwrap().is_empty());
        assert_eq!(unread_count(&conn, &b).unwrap(), 1);

        let read = mark_read(&conn, &message.id, &b).unwrap();
        assert!(read.is_read());
        assert_eq!(unread_count(&conn, &b).unwrap(), 0);

        // Second read keeps the original timestamp
        let again = mark_read(&conn, &message.id, &b).unwrap();
        assert_eq!(again.read_at, read.read_at);
    }

    #[test]
    fn test_only_recipient_marks_read() {
        let conn = test_conn();
        let (a, b) = two_users(&conn);

        let message = send_message(&conn, &a, &b, None, "hello").unwrap();
        assert!(matches!(
            mark_read(&conn, &message.id, &a),
            Err(DomainError::Forbidden(_))
        ));
    }

    #[test]
    fn test_rejected_messages() {
        let conn = test_conn();
        let (a, b) = two_users(&conn);

        assert!(matches!(
            send_message(&conn, &a, &b, None, "   "),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            send_message(&conn, &a, &b, None, &"x".repeat(MAX_MESSAGE_LEN + 1)),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            send_message(&conn, &a, &a, None, "me"),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            send_message(&conn, &a, "ghost", None, "boo"),
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            send_message(&conn, &a, &b, Some("no-such-property"), "about that flat"),
            Err(DomainError::NotFound { entity: "property", .. })
        ));
        assert!(inbox(&conn, &b).unwrap().is_empty());
    }

    #[test]
    fn test_message_about_a_property() {
        let conn = test_conn();
        let (a, b) = two_users(&conn);
        let property = insert_property(
            &conn,
            &b,
            NewProperty {
                title: "Flat".to_string(),
                address: "4 Dock Rd".to_string(),
                rent_pence: 85_000,
                bedrooms: 1,
                description: String::new(),
            },
            &b,
        )
        .unwrap();

        let message = send_message(&conn, &a, &b, Some(&property.id), "Can I view it?").unwrap();
        assert_eq!(message.property_id.as_deref(), Some(property.id.as_str()));
    }
}
