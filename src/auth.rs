// 🔐 Roles, sessions and the role gate
//
// The gate is a single-role equality check invoked at the top of every
// role-restricted view. It never mutates anything and never logs. Missing
// session and wrong role produce the same redirect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default redirect target for failed role checks
pub const LOGIN_PATH: &str = "/login";

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Tenant,
    Landlord,
    Agent,
    Applicant,
    Tradesperson,
    Accountant,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Admin,
        Role::Tenant,
        Role::Landlord,
        Role::Agent,
        Role::Applicant,
        Role::Tradesperson,
        Role::Accountant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Tenant => "TENANT",
            Role::Landlord => "LANDLORD",
            Role::Agent => "AGENT",
            Role::Applicant => "APPLICANT",
            Role::Tradesperson => "TRADESPERSON",
            Role::Accountant => "ACCOUNTANT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Authenticated caller as seen by page views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub name: String,

    /// At most one role; `None` for users not yet assigned one
    pub role: Option<Role>,
}

/// Caller identity produced at authentication time. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: Option<SessionUser>,
}

impl Session {
    pub fn anonymous() -> Self {
        Session { user: None }
    }

    pub fn for_user(user: SessionUser) -> Self {
        Session { user: Some(user) }
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().and_then(|u| u.role)
    }
}

// ============================================================================
// ROLE GATE
// ============================================================================

/// Navigation away from the current view. Handlers return it with `?`
/// so nothing after a failed gate renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Redirect {
            location: location.into(),
        }
    }
}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for Redirect {
    fn into_response(self) -> axum::response::Response {
        axum::response::Redirect::to(&self.location).into_response()
    }
}

/// Require `required` exactly, redirecting to `/login` otherwise.
pub fn require_role(required: Role, session: Option<&Session>) -> Result<&SessionUser, Redirect> {
    require_role_or(required, session, LOGIN_PATH)
}

/// Require `required` exactly, redirecting to `redirect_to` otherwise.
///
/// No session, no user, no role and a different role all redirect the same way.
pub fn require_role_or<'a>(
    required: Role,
    session: Option<&'a Session>,
    redirect_to: &str,
) -> Result<&'a SessionUser, Redirect> {
    match session.and_then(|s| s.user.as_ref()) {
        Some(user) if user.role == Some(required) => Ok(user),
        _ => Err(Redirect::to(redirect_to)),
    }
}

/// Require any authenticated user, whatever the role.
pub fn require_session(session: Option<&Session>) -> Result<&SessionUser, Redirect> {
    session
        .and_then(|s| s.user.as_ref())
        .ok_or_else(|| Redirect::to(LOGIN_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(role: Option<Role>) -> Session {
        Session::for_user(SessionUser {
            id: "u1".to_string(),
            email: "someone@example.com".to_string(),
            name: "Someone".to_string(),
            role,
        })
    }

    #[test]
    fn test_missing_session_redirects_to_login() {
        let result = require_role(Role::Admin, None);
        assert_eq!(result, Err(Redirect::to("/login")));
    }

    #[test]
    fn test_wrong_role_redirects_to_login() {
        let session = session_with(Some(Role::Landlord));
        let result = require_role(Role::Admin, Some(&session));
        assert_eq!(result, Err(Redirect::to("/login")));
    }

    #[test]
    fn test_matching_role_passes() {
        let session = session_with(Some(Role::Admin));
        let user = require_role(Role::Admin, Some(&session)).unwrap();
        assert_eq!(user.id, "u1");
    }

    #[test]
    fn test_custom_redirect_target() {
        let session = session_with(Some(Role::Landlord));
        let result = require_role_or(Role::Admin, Some(&session), "/unauthorized");
        assert_eq!(result, Err(Redirect::to("/unauthorized")));
    }

    #[test]
    fn test_unauthenticated_and_wrong_role_are_indistinguishable() {
        let anonymous = Session::anonymous();
        let landlord = session_with(Some(Role::Landlord));
        let no_role = session_with(None);

        let a = require_role(Role::Admin, None).unwrap_err();
        let b = require_role(Role::Admin, Some(&anonymous)).unwrap_err();
        let c = require_role(Role::Admin, Some(&landlord)).unwrap_err();
        let d = require_role(Role::Admin, Some(&no_role)).unwrap_err();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c, d);
    }

    #[test]
    fn test_gate_has_no_or_semantics() {
        // An admin is not a landlord as far as the gate is concerned
        let admin = session_with(Some(Role::Admin));
        assert!(require_role(Role::Landlord, Some(&admin)).is_err());

        for role in Role::ALL {
            let session = session_with(Some(role));
            for required in Role::ALL {
                assert_eq!(
                    require_role(required, Some(&session)).is_ok(),
                    role == required
                );
            }
        }
    }

    #[test]
    fn test_require_session() {
        assert!(require_session(None).is_err());
        assert!(require_session(Some(&Session::anonymous())).is_err());
        assert!(require_session(Some(&session_with(None))).is_ok());
    }

    #[test]
    fn test_role_parse_and_serde() {
        assert_eq!("TRADESPERSON".parse::<Role>(), Ok(Role::Tradesperson));
        assert!("admin".parse::<Role>().is_err());

        let json = serde_json::to_string(&Role::Applicant).unwrap();
        assert_eq!(json, "\"APPLICANT\"");
    }
}
