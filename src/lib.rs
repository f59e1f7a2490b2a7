// Letting Desk - Core Library
// Exposes all modules for use in the CLI, the web server, and tests

pub mod status;     // Property lifecycle transition table
pub mod auth;       // Roles, sessions, role gate
pub mod error;
pub mod config;
pub mod telemetry;
pub mod db;
pub mod entities;
pub mod blobs;
pub mod import;
pub mod pages;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use status::{can_transition, can_transition_str, PropertyStatus, UnknownStatus};
pub use auth::{
    require_role, require_role_or, require_session, Redirect, Role, Session, SessionUser,
    UnknownRole, LOGIN_PATH,
};
pub use error::{DomainError, DomainResult};
pub use config::AppConfig;
pub use db::{
    Event, User,
    setup_database, insert_event, get_events_for_entity,
    create_user, get_user, find_user_by_email, list_users, set_user_role,
    create_session, load_session, delete_session,
};
pub use entities::{
    Property, NewProperty, Application, ApplicationStatus, Message,
};
pub use blobs::{BlobRef, BlobStore};
pub use import::{import_properties, load_properties_csv, ImportReport, PropertyRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
