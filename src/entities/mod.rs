// Entity documents and their data-access wrappers
//
// Each entity has a stable UUID identity. Properties and applications are
// stored as JSON documents with a few indexed columns; messages are plain rows.

pub mod property;
pub mod application;
pub mod message;

pub use property::{
    add_image, change_status, get_property, insert_property, list_properties,
    list_properties_by_landlord, list_properties_by_status, NewProperty, Property,
};
pub use application::{
    decide_application, get_application, list_applications_by_applicant,
    list_applications_for_property, submit_application, withdraw_application, Application,
    ApplicationStatus,
};
pub use message::{inbox, mark_read, send_message, sent, unread_count, Message};
