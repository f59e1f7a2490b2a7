// 📄 Server-rendered pages
//
// Pure functions from data to HTML. All user-supplied text goes through
// `escape` before it reaches the markup.

use crate::auth::{Role, SessionUser};
use crate::db::{Event, User};
use crate::entities::{Application, ApplicationStatus, Message, Property};
use std::collections::HashMap;
use std::fmt::Write;

/// Minimal HTML escaping for text and attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Signed-in user plus what the nav bar shows about them
#[derive(Debug, Clone, Copy)]
pub struct Viewer<'a> {
    pub user: &'a SessionUser,

    /// Unread messages in the user's inbox
    pub unread: i64,
}

impl<'a> Viewer<'a> {
    pub fn new(user: &'a SessionUser, unread: i64) -> Self {
        Viewer { user, unread }
    }
}

fn layout(title: &str, viewer: Option<&Viewer<'_>>, body: &str) -> String {
    let nav = match viewer {
        Some(viewer) => format!(
            "<nav><span>{} ({})</span> <a href=\"/messages\">Messages{}</a> \
             <form method=\"post\" action=\"/logout\"><button>Log out</button></form></nav>",
            escape(&viewer.user.name),
            viewer.user.role.map(|r| r.as_str()).unwrap_or("no role"),
            if viewer.unread > 0 {
                format!(" <span class=\"unread-count\">({})</span>", viewer.unread)
            } else {
                String::new()
            },
        ),
        None => "<nav><a href=\"/login\">Log in</a></nav>".to_string(),
    };

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\">\
         <title>{title} · Letting Desk</title></head>\n<body>\n{nav}\n<main>\n<h1>{title}</h1>\n{body}\n</main>\n</body>\n</html>\n",
        title = escape(title),
        nav = nav,
        body = body,
    )
}

fn property_row(property: &Property) -> String {
    format!(
        "<tr><td><a href=\"/landlord/properties/{}\">{}</a></td><td>{}</td><td>{}</td><td>{}</td><td class=\"status-{}\">{}</td></tr>",
        escape(&property.id),
        escape(&property.title),
        escape(&property.address),
        property.bedrooms,
        property.rent_display(),
        property.status.as_str(),
        property.status.label(),
    )
}

fn property_table(properties: &[Property]) -> String {
    if properties.is_empty() {
        return "<p>No properties.</p>".to_string();
    }

    let mut html = String::from(
        "<table><thead><tr><th>Title</th><th>Address</th><th>Beds</th><th>Rent pcm</th><th>Status</th></tr></thead><tbody>",
    );
    for property in properties {
        html.push_str(&property_row(property));
    }
    html.push_str("</tbody></table>");
    html
}

// ============================================================================
// PUBLIC PAGES
// ============================================================================

/// `email_sign_in` renders the email-only form; without it the page points
/// at the CLI that issues session tokens.
pub fn login_page(error: Option<&str>, email_sign_in: bool) -> String {
    let error = error
        .map(|e| format!("<p class=\"error\">{}</p>", escape(e)))
        .unwrap_or_default();

    let body = if email_sign_in {
        format!(
            "{}<form method=\"post\" action=\"/login\">\
             <label>Email <input type=\"email\" name=\"email\" required></label>\
             <button>Log in</button></form>",
            error
        )
    } else {
        format!(
            "{}<p>Ask an administrator for a session: \
             <code>letting-desk login &lt;email&gt;</code> prints a <code>session</code> cookie.</p>",
            error
        )
    };

    layout("Log in", None, &body)
}

pub fn unauthorized_page() -> String {
    layout(
        "Not allowed",
        None,
        "<p>Your account does not have access to that page.</p><p><a href=\"/\">Home</a></p>",
    )
}

pub fn error_page(status: u16, message: &str) -> String {
    layout(
        &format!("Error {}", status),
        None,
        &format!("<p>{}</p><p><a href=\"/\">Home</a></p>", escape(message)),
    )
}

// ============================================================================
// ADMIN
// ============================================================================

pub fn admin_dashboard(admin: &Viewer<'_>, users: &[User], properties: &[Property]) -> String {
    let mut body = String::from("<h2>Users</h2><table><thead><tr><th>Name</th><th>Email</th><th>Role</th><th></th></tr></thead><tbody>");

    for user in users {
        let mut options = String::from("<option value=\"\">(none)</option>");
        for role in Role::ALL {
            let selected = if user.role == Some(role) { " selected" } else { "" };
            let _ = write!(options, "<option value=\"{0}\"{1}>{0}</option>", role.as_str(), selected);
        }

        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>\
             <form method=\"post\" action=\"/admin/users/{}/role\"><select name=\"role\">{}</select>\
             <button>Set role</button></form></td></tr>",
            escape(&user.name),
            escape(&user.email),
            user.role.map(|r| r.as_str()).unwrap_or("-"),
            escape(&user.id),
            options,
        );
    }
    body.push_str("</tbody></table>");

    body.push_str("<h2>Properties</h2>");
    body.push_str(&property_table(properties));

    layout("Admin", Some(admin), &body)
}

// ============================================================================
// LANDLORD
// ============================================================================

pub fn landlord_dashboard(landlord: &Viewer<'_>, properties: &[Property]) -> String {
    let mut body = property_table(properties);

    body.push_str(
        "<h2>New property</h2><form method=\"post\" action=\"/landlord/properties\">\
         <label>Title <input name=\"title\" required></label>\
         <label>Address <input name=\"address\" required></label>\
         <label>Rent (pence pcm) <input type=\"number\" name=\"rent_pence\" min=\"1\" required></label>\
         <label>Bedrooms <input type=\"number\" name=\"bedrooms\" min=\"0\" value=\"1\"></label>\
         <label>Description <textarea name=\"description\"></textarea></label>\
         <button>Create draft</button></form>",
    );

    layout("My properties", Some(landlord), &body)
}

pub fn property_detail(
    viewer: &Viewer<'_>,
    property: &Property,
    applications: &[Application],
    events: &[Event],
) -> String {
    let mut body = format!(
        "<p>{}</p><p>{} bedrooms · {} pcm</p><p>Status: <strong>{}</strong> (version {})</p><p>{}</p>",
        escape(&property.address),
        property.bedrooms,
        property.rent_display(),
        property.status.label(),
        property.version,
        escape(&property.description),
    );

    // One button per allowed next status; terminal statuses get none
    let next = property.status.allowed_next();
    if next.is_empty() {
        body.push_str("<p>This property has reached a final status.</p>");
    } else {
        let _ = write!(
            body,
            "<form method=\"post\" action=\"/landlord/properties/{}/status\">",
            escape(&property.id)
        );
        for status in next {
            let _ = write!(
                body,
                "<button name=\"to\" value=\"{}\">Mark {}</button>",
                status.as_str(),
                status.label()
            );
        }
        body.push_str("</form>");
    }

    body.push_str("<h2>Images</h2>");
    for hash in &property.images {
        let _ = write!(body, "<img src=\"/images/{0}\" alt=\"\" width=\"240\">", escape(hash));
    }

    body.push_str("<h2>Applications</h2>");
    if applications.is_empty() {
        body.push_str("<p>No applications yet.</p>");
    }
    for application in applications {
        let _ = write!(
            body,
            "<div class=\"application\"><p>{}</p><p>Status: {}</p>",
            escape(&application.message),
            application.status.as_str()
        );
        if application.status == ApplicationStatus::Pending {
            let _ = write!(
                body,
                "<form method=\"post\" action=\"/landlord/applications/{}/decision\">\
                 <button name=\"decision\" value=\"accept\">Accept</button>\
                 <button name=\"decision\" value=\"reject\">Reject</button></form>",
                escape(&application.id)
            );
        }
        body.push_str("</div>");
    }

    body.push_str("<h2>History</h2><ul>");
    for event in events {
        let _ = write!(
            body,
            "<li>{} · {} · {}</li>",
            event.timestamp.format("%Y-%m-%d %H:%M"),
            escape(&event.event_type),
            escape(&event.data.to_string()),
        );
    }
    body.push_str("</ul>");

    layout(&property.title, Some(viewer), &body)
}

// ============================================================================
// APPLICANT
// ============================================================================

pub fn applicant_dashboard(
    applicant: &Viewer<'_>,
    listed: &[Property],
    applications: &[Application],
) -> String {
    let mut body = String::from("<h2>Available</h2>");

    if listed.is_empty() {
        body.push_str("<p>Nothing listed right now.</p>");
    }
    for property in listed {
        let _ = write!(
            body,
            "<div class=\"listing\"><h3>{}</h3><p>{} · {} bedrooms · {} pcm</p>\
             <form method=\"post\" action=\"/applicant/properties/{}/apply\">\
             <textarea name=\"message\" placeholder=\"Tell the landlord about yourself\"></textarea>\
             <button>Apply</button></form></div>",
            escape(&property.title),
            escape(&property.address),
            property.bedrooms,
            property.rent_display(),
            escape(&property.id),
        );
    }

    body.push_str("<h2>My applications</h2><ul>");
    for application in applications {
        let _ = write!(
            body,
            "<li>{} · {}",
            escape(&application.property_id),
            application.status.as_str()
        );
        if application.status == ApplicationStatus::Pending {
            let _ = write!(
                body,
                " <form method=\"post\" action=\"/applicant/applications/{}/withdraw\"><button>Withdraw</button></form>",
                escape(&application.id)
            );
        }
        body.push_str("</li>");
    }
    body.push_str("</ul>");

    layout("Find a home", Some(applicant), &body)
}

// ============================================================================
// MESSAGES
// ============================================================================

/// `received` adds a "Mark read" button to unread messages
fn message_list(
    messages: &[Message],
    heading: &str,
    names: &HashMap<String, String>,
    counterpart: fn(&Message) -> &str,
    received: bool,
) -> String {
    let mut html = format!("<h2>{}</h2><ul>", heading);
    for message in messages {
        let id = counterpart(message);
        let _ = write!(
            html,
            "<li class=\"{}\">{} · {}: {}",
            if message.is_read() { "read" } else { "unread" },
            message.sent_at.format("%Y-%m-%d %H:%M"),
            escape(names.get(id).map(String::as_str).unwrap_or(id)),
            escape(&message.body),
        );
        if received && !message.is_read() {
            let _ = write!(
                html,
                " <form method=\"post\" action=\"/messages/{}/read\"><button>Mark read</button></form>",
                escape(&message.id)
            );
        }
        html.push_str("</li>");
    }
    html.push_str("</ul>");
    html
}

/// `names` maps user ids to display names for the other side of each message
pub fn messages_page(
    user: &Viewer<'_>,
    inbox: &[Message],
    sent: &[Message],
    names: &HashMap<String, String>,
) -> String {
    let mut body = String::from(
        "<form method=\"post\" action=\"/messages\">\
         <label>To (email) <input type=\"email\" name=\"to\" required></label>\
         <label>Message <textarea name=\"body\" required></textarea></label>\
         <button>Send</button></form>",
    );

    body.push_str(&message_list(inbox, "Inbox", names, |m| &m.sender_id, true));
    body.push_str(&message_list(sent, "Sent", names, |m| &m.recipient_id, false));

    layout("Messages", Some(user), &body)
}
