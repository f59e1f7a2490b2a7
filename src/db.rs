use crate::auth::{Role, Session, SessionUser};
use crate::error::{DomainError, DomainResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// CONNECTION
// ============================================================================

/// Open (or create) the database file and make sure the schema exists
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Users & Sessions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            role TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Documents (JSON body + indexed columns)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS properties (
            id TEXT PRIMARY KEY,
            landlord_id TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL,
            version INTEGER NOT NULL,
            document TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS applications (
            id TEXT PRIMARY KEY,
            property_id TEXT NOT NULL REFERENCES properties(id),
            applicant_id TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL REFERENCES users(id),
            recipient_id TEXT NOT NULL REFERENCES users(id),
            property_id TEXT REFERENCES properties(id),
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            read_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS images (
            hash TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            uploaded_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_properties_landlord ON properties(landlord_id)",
        "CREATE INDEX IF NOT EXISTS idx_properties_status ON properties(status)",
        "CREATE INDEX IF NOT EXISTS idx_applications_property ON applications(property_id)",
        "CREATE INDEX IF NOT EXISTS idx_applications_applicant ON applications(applicant_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id)",
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
    ] {
        conn.execute(ddl, [])?;
    }

    Ok(())
}

/// Parse an RFC 3339 column inside a row mapper
pub(crate) fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse a JSON document column inside a row mapper
pub(crate) fn parse_document<T: serde::de::DeserializeOwned>(
    idx: usize,
    value: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// EVENTS
// ============================================================================

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> DomainResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> DomainResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_time(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: parse_document(5, &data_json)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn to_session_user(&self) -> SessionUser {
        SessionUser {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

const USER_COLUMNS: &str = "id, email, name, role, created_at";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        // Unknown role strings are treated as no role
        role: role.and_then(|r| r.parse().ok()),
        created_at: parse_time(4, &created_at)?,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn create_user(
    conn: &Connection,
    email: &str,
    name: &str,
    role: Option<Role>,
) -> DomainResult<User> {
    let email = normalize_email(email);
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::Validation(format!("invalid email: {:?}", email)));
    }
    if name.trim().is_empty() {
        return Err(DomainError::Validation("name is required".to_string()));
    }

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        name: name.trim().to_string(),
        role,
        created_at: Utc::now(),
    };

    let result = conn.execute(
        "INSERT INTO users (id, email, name, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id,
            user.email,
            user.name,
            user.role.map(|r| r.as_str()),
            user.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(DomainError::Conflict(format!(
                "user already exists: {}",
                user.email
            )));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(user_id = %user.id, role = ?user.role, "user created");
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> DomainResult<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| DomainError::not_found("user", id))
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> DomainResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [normalize_email(email)],
            user_from_row,
        )
        .optional()?;

    Ok(user)
}

pub fn list_users(conn: &Connection) -> DomainResult<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY email",
        USER_COLUMNS
    ))?;

    let users = stmt
        .query_map([], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users)
}

/// Change a user's role and record who did it
pub fn set_user_role(
    conn: &Connection,
    actor: &str,
    user_id: &str,
    role: Option<Role>,
) -> DomainResult<User> {
    let tx = conn.unchecked_transaction()?;
    let mut user = get_user(&tx, user_id)?;
    let previous = user.role;

    tx.execute(
        "UPDATE users SET role = ?1 WHERE id = ?2",
        params![role.map(|r| r.as_str()), user_id],
    )?;
    user.role = role;

    insert_event(
        &tx,
        &Event::new(
            "user_role_changed",
            "user",
            user_id,
            serde_json::json!({ "from": previous, "to": role }),
            actor,
        ),
    )?;
    tx.commit()?;

    tracing::info!(user_id, from = ?previous, to = ?role, actor, "user role changed");
    Ok(user)
}

// ============================================================================
// SESSIONS
// ============================================================================

/// Create a session for `user_id` and return its opaque token
pub fn create_session(conn: &Connection, user_id: &str) -> DomainResult<String> {
    // Fails with NotFound before we hand out a token for nobody
    get_user(conn, user_id)?;

    let token = uuid::Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, Utc::now().to_rfc3339()],
    )?;

    Ok(token)
}

/// Resolve a session token. Unknown tokens yield `None`.
pub fn load_session(conn: &Connection, token: &str) -> DomainResult<Option<Session>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.email, u.name, u.role, u.created_at
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            [token],
            user_from_row,
        )
        .optional()?;

    Ok(user.map(|u| Session::for_user(u.to_session_user())))
}

pub fn delete_session(conn: &Connection, token: &str) -> DomainResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
    Ok(())
}
