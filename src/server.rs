// 🌐 Web Server - server-rendered pages + JSON API with Axum
//
// Every role-restricted handler starts with a role gate call and returns
// its Redirect with `?`, so nothing renders for the wrong caller.

use crate::auth::{require_role, require_role_or, require_session, Redirect, Role, Session, SessionUser};
use crate::blobs::{content_hash, get_image_meta, record_image, BlobRef, BlobStore};
use crate::db;
use crate::entities::{
    add_image, change_status, decide_application, get_application, get_property, inbox,
    insert_property, list_applications_by_applicant, list_applications_for_property,
    list_properties, list_properties_by_landlord, list_properties_by_status, mark_read,
    send_message, sent, submit_application, unread_count, withdraw_application, NewProperty,
    Property,
};
use crate::error::DomainError;
use crate::pages::{self, Viewer};
use crate::status::PropertyStatus;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const SESSION_COOKIE: &str = "session";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub blobs: Arc<BlobStore>,

    /// `POST /login` accepts a bare email address
    pub dev_login: bool,
}

impl AppState {
    pub fn new(conn: Connection, blobs: BlobStore) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            blobs: Arc::new(blobs),
            dev_login: false,
        }
    }

    pub fn with_dev_login(mut self, enabled: bool) -> Self {
        self.dev_login = enabled;
        self
    }

    /// Never hold the guard across an `.await`
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal("database lock poisoned".to_string()))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Redirect(Redirect),
    Domain(DomainError),
    Internal(String),
}

impl From<Redirect> for AppError {
    fn from(redirect: Redirect) -> Self {
        AppError::Redirect(redirect)
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::Domain(err)
    }
}

fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::InvalidStatusTransition { .. } | DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
        DomainError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::Storage(_) | DomainError::Serialization(_) | DomainError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Redirect(redirect) => redirect.into_response(),
            AppError::Domain(err) => {
                let status = status_for(&err);
                let message = if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                    "Internal server error".to_string()
                } else {
                    err.to_string()
                };
                (status, Html(pages::error_page(status.as_u16(), &message))).into_response()
            }
            AppError::Internal(message) => {
                tracing::error!(%message, "request failed");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Html(pages::error_page(status.as_u16(), "Internal server error")))
                    .into_response()
            }
        }
    }
}

type PageResult = Result<Response, AppError>;

fn see_other(location: impl Into<String>) -> Response {
    Redirect::to(location).into_response()
}

// ============================================================================
// Session extraction
// ============================================================================

/// Session for the current request; `None` without a valid session cookie
pub struct CurrentSession(pub Option<Session>);

/// Pull the session token out of the Cookie header(s)
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Ok(CurrentSession(None));
        };

        let conn = state.conn()?;
        let session = db::load_session(&conn, &token)?;
        Ok(CurrentSession(session))
    }
}

fn viewer<'a>(conn: &Connection, user: &'a SessionUser) -> Result<Viewer<'a>, AppError> {
    Ok(Viewer::new(user, unread_count(conn, &user.id)?))
}

/// Admins manage everything; landlords manage what they own.
/// The gate is single-role, so the disjunction lives here.
fn manager<'a>(session: Option<&'a Session>) -> Result<&'a SessionUser, Redirect> {
    require_role(Role::Admin, session).or_else(|_| require_role(Role::Landlord, session))
}

fn ensure_can_manage(user: &SessionUser, property: &Property) -> Result<(), DomainError> {
    if user.role == Some(Role::Admin) || property.is_owned_by(&user.id) {
        Ok(())
    } else {
        Err(DomainError::Forbidden(
            "this property belongs to another landlord".to_string(),
        ))
    }
}

// ============================================================================
// Public pages
// ============================================================================

/// GET / - send the caller to their home page
async fn home(CurrentSession(session): CurrentSession) -> Response {
    let target = match session.as_ref().map(|s| s.role()) {
        None => "/login",
        Some(Some(Role::Admin)) => "/admin",
        Some(Some(Role::Landlord)) => "/landlord",
        Some(Some(Role::Applicant)) => "/applicant",
        Some(_) => "/messages",
    };
    see_other(target)
}

async fn login_form(State(state): State<AppState>) -> Html<String> {
    Html(pages::login_page(None, state.dev_login))
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
}

/// POST /login - start a session for a known email (only with `auth.dev_login`)
async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> PageResult {
    if !state.dev_login {
        tracing::warn!("email login attempted while disabled");
        return Ok((
            StatusCode::NOT_FOUND,
            Html(pages::login_page(Some("Email sign-in is disabled."), false)),
        )
            .into_response());
    }

    let conn = state.conn()?;

    let Some(user) = db::find_user_by_email(&conn, &form.email)? else {
        tracing::info!("login attempt for unknown email");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Html(pages::login_page(Some("No account with that email."), true)),
        )
            .into_response());
    };

    let token = db::create_session(&conn, &user.id)?;
    tracing::info!(user_id = %user.id, "session started");

    Ok((
        [(
            header::SET_COOKIE,
            format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token),
        )],
        see_other("/"),
    )
        .into_response())
}

/// POST /logout - drop the session and clear the cookie
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> PageResult {
    if let Some(token) = session_token(&headers) {
        let conn = state.conn()?;
        db::delete_session(&conn, &token)?;
    }

    Ok((
        [(
            header::SET_COOKIE,
            format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE),
        )],
        see_other("/login"),
    )
        .into_response())
}

async fn unauthorized() -> impl IntoResponse {
    (StatusCode::FORBIDDEN, Html(pages::unauthorized_page()))
}

// ============================================================================
// Admin
// ============================================================================

async fn admin_page(State(state): State<AppState>, CurrentSession(session): CurrentSession) -> PageResult {
    let admin = require_role(Role::Admin, session.as_ref())?;

    let conn = state.conn()?;
    let users = db::list_users(&conn)?;
    let properties = list_properties(&conn)?;

    Ok(Html(pages::admin_dashboard(&viewer(&conn, admin)?, &users, &properties)).into_response())
}

#[derive(Deserialize)]
struct RoleForm {
    #[serde(default)]
    role: String,
}

async fn set_role(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(user_id): Path<String>,
    Form(form): Form<RoleForm>,
) -> PageResult {
    let admin = require_role(Role::Admin, session.as_ref())?;

    let role = match form.role.trim() {
        "" => None,
        value => Some(
            value
                .parse::<Role>()
                .map_err(|e| DomainError::Validation(e.to_string()))?,
        ),
    };

    let conn = state.conn()?;
    db::set_user_role(&conn, &admin.id, &user_id, role)?;

    Ok(see_other("/admin"))
}

// ============================================================================
// Landlord
// ============================================================================

async fn landlord_page(State(state): State<AppState>, CurrentSession(session): CurrentSession) -> PageResult {
    let landlord = require_role(Role::Landlord, session.as_ref())?;

    let conn = state.conn()?;
    let properties = list_properties_by_landlord(&conn, &landlord.id)?;

    Ok(Html(pages::landlord_dashboard(&viewer(&conn, landlord)?, &properties)).into_response())
}

async fn create_property(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Form(fields): Form<NewProperty>,
) -> PageResult {
    let landlord = require_role(Role::Landlord, session.as_ref())?;

    let conn = state.conn()?;
    let property = insert_property(&conn, &landlord.id, fields, &landlord.id)?;

    Ok(see_other(format!("/landlord/properties/{}", property.id)))
}

async fn property_page(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(property_id): Path<String>,
) -> PageResult {
    let user = manager(session.as_ref())?;

    let conn = state.conn()?;
    let property = get_property(&conn, &property_id)?;
    ensure_can_manage(user, &property)?;

    let applications = list_applications_for_property(&conn, &property.id)?;
    let events = db::get_events_for_entity(&conn, "property", &property.id)?;

    Ok(Html(pages::property_detail(&viewer(&conn, user)?, &property, &applications, &events))
        .into_response())
}

#[derive(Deserialize)]
struct StatusForm {
    to: String,
}

async fn update_status(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(property_id): Path<String>,
    Form(form): Form<StatusForm>,
) -> PageResult {
    let user = manager(session.as_ref())?;

    let to: PropertyStatus = form
        .to
        .parse()
        .map_err(|e: crate::status::UnknownStatus| DomainError::Validation(e.to_string()))?;

    let conn = state.conn()?;
    let property = get_property(&conn, &property_id)?;
    ensure_can_manage(user, &property)?;
    change_status(&conn, &property.id, to, &user.id)?;

    Ok(see_other(format!("/landlord/properties/{}", property.id)))
}

/// POST /landlord/properties/:id/images - raw image body, type from Content-Type
async fn upload_image(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(property_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> PageResult {
    let user = manager(session.as_ref())?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    {
        let conn = state.conn()?;
        let property = get_property(&conn, &property_id)?;
        ensure_can_manage(user, &property)?;
    }

    // Blob files are shared by content; only a file this upload created may be removed
    let fresh = !state.blobs.exists(&content_hash(&body));
    let blob = store_blob(&state, body, content_type).await?;

    let recorded = state.conn().and_then(|conn| {
        record_image(&conn, &blob, &user.id)?;
        add_image(&conn, &property_id, &blob.hash, &user.id)?;
        Ok(())
    });

    if let Err(err) = recorded {
        if fresh {
            if let Err(e) = state.blobs.delete(&blob.hash) {
                tracing::error!(hash = %blob.hash, error = %e, "failed to remove orphaned blob");
            }
        }
        return Err(err);
    }

    Ok(see_other(format!("/landlord/properties/{}", property_id)))
}

/// Hash and write the upload on the blocking pool
async fn store_blob(state: &AppState, body: Bytes, content_type: String) -> Result<BlobRef, AppError> {
    let blobs = Arc::clone(&state.blobs);

    tokio::task::spawn_blocking(move || blobs.put(&body, &content_type))
        .await
        .map_err(|e| AppError::Internal(format!("blob write task failed: {}", e)))?
        .map_err(AppError::from)
}

#[derive(Deserialize)]
struct DecisionForm {
    decision: String,
}

async fn decide(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(application_id): Path<String>,
    Form(form): Form<DecisionForm>,
) -> PageResult {
    let user = manager(session.as_ref())?;

    let accept = match form.decision.as_str() {
        "accept" => true,
        "reject" => false,
        other => {
            return Err(DomainError::Validation(format!("unknown decision: {:?}", other)).into())
        }
    };

    let conn = state.conn()?;
    let application = get_application(&conn, &application_id)?;
    let property = get_property(&conn, &application.property_id)?;
    ensure_can_manage(user, &property)?;
    decide_application(&conn, &application.id, accept, &user.id)?;

    Ok(see_other(format!("/landlord/properties/{}", property.id)))
}

// ============================================================================
// Applicant
// ============================================================================

async fn applicant_page(State(state): State<AppState>, CurrentSession(session): CurrentSession) -> PageResult {
    let applicant = require_role_or(Role::Applicant, session.as_ref(), "/unauthorized")?;

    let conn = state.conn()?;
    let listed = list_properties_by_status(&conn, PropertyStatus::Listed)?;
    let applications = list_applications_by_applicant(&conn, &applicant.id)?;

    Ok(Html(pages::applicant_dashboard(&viewer(&conn, applicant)?, &listed, &applications))
        .into_response())
}

#[derive(Deserialize)]
struct ApplyForm {
    #[serde(default)]
    message: String,
}

async fn apply(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(property_id): Path<String>,
    Form(form): Form<ApplyForm>,
) -> PageResult {
    let applicant = require_role_or(Role::Applicant, session.as_ref(), "/unauthorized")?;

    let conn = state.conn()?;
    submit_application(&conn, &property_id, &applicant.id, &form.message)?;

    Ok(see_other("/applicant"))
}

async fn withdraw(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(application_id): Path<String>,
) -> PageResult {
    let applicant = require_role_or(Role::Applicant, session.as_ref(), "/unauthorized")?;

    let conn = state.conn()?;
    withdraw_application(&conn, &application_id, &applicant.id)?;

    Ok(see_other("/applicant"))
}

// ============================================================================
// Messages (any authenticated user)
// ============================================================================

async fn messages_page(State(state): State<AppState>, CurrentSession(session): CurrentSession) -> PageResult {
    let user = require_session(session.as_ref())?;

    let conn = state.conn()?;
    let received = inbox(&conn, &user.id)?;
    let outgoing = sent(&conn, &user.id)?;
    let names: HashMap<String, String> = db::list_users(&conn)?
        .into_iter()
        .map(|u| (u.id, u.name))
        .collect();

    Ok(Html(pages::messages_page(&viewer(&conn, user)?, &received, &outgoing, &names)).into_response())
}

/// POST /messages/:id/read - recipient marks a message read
async fn read_message(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(message_id): Path<String>,
) -> PageResult {
    let user = require_session(session.as_ref())?;

    let conn = state.conn()?;
    mark_read(&conn, &message_id, &user.id)?;

    Ok(see_other("/messages"))
}

#[derive(Deserialize)]
struct SendForm {
    to: String,
    body: String,
    #[serde(default)]
    property_id: Option<String>,
}

async fn post_message(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Form(form): Form<SendForm>,
) -> PageResult {
    let user = require_session(session.as_ref())?;

    let conn = state.conn()?;
    let recipient = db::find_user_by_email(&conn, &form.to)?
        .ok_or_else(|| DomainError::not_found("user", form.to.clone()))?;
    let property_id = form.property_id.as_deref().filter(|id| !id.is_empty());

    send_message(&conn, &user.id, &recipient.id, property_id, &form.body)?;

    Ok(see_other("/messages"))
}

// ============================================================================
// Images
// ============================================================================

/// GET /images/:hash - public, immutable
async fn serve_image(State(state): State<AppState>, Path(hash): Path<String>) -> PageResult {
    let bytes = state.blobs.get(&hash)?;

    let content_type = {
        let conn = state.conn()?;
        get_image_meta(&conn, &hash)?
            .map(|meta| meta.content_type)
            .unwrap_or_else(|| "application/octet-stream".to_string())
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        bytes,
    )
        .into_response())
}

// ============================================================================
// JSON API
// ============================================================================

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Serialize)]
struct TransitionEntry {
    from: PropertyStatus,
    to: &'static [PropertyStatus],
    terminal: bool,
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/properties - listed properties
async fn api_properties(State(state): State<AppState>) -> Response {
    let result = state
        .conn()
        .map_err(|_| "database unavailable".to_string())
        .and_then(|conn| {
            list_properties_by_status(&conn, PropertyStatus::Listed).map_err(|e| e.to_string())
        });

    match result {
        Ok(properties) => (StatusCode::OK, Json(ApiResponse::ok(properties))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Error listing properties");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Vec<Property>>::err(e)),
            )
                .into_response()
        }
    }
}

/// GET /api/status-transitions - the lifecycle table
async fn api_status_transitions() -> impl IntoResponse {
    let table: Vec<TransitionEntry> = PropertyStatus::ALL
        .iter()
        .map(|status| TransitionEntry {
            from: *status,
            to: status.allowed_next(),
            terminal: status.is_terminal(),
        })
        .collect();

    Json(ApiResponse::ok(table))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    // Leave headroom above the image limit for the request envelope
    let body_limit = usize::try_from(state.blobs.max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/properties", get(api_properties))
        .route("/status-transitions", get(api_status_transitions))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/", get(home))
        .route("/login", get(login_form).post(login))
        .route("/logout", post(logout))
        .route("/unauthorized", get(unauthorized))
        .route("/admin", get(admin_page))
        .route("/admin/users/:id/role", post(set_role))
        .route("/landlord", get(landlord_page))
        .route("/landlord/properties", post(create_property))
        .route("/landlord/properties/:id", get(property_page))
        .route("/landlord/properties/:id/status", post(update_status))
        .route("/landlord/properties/:id/images", post(upload_image))
        .route("/landlord/applications/:id/decision", post(decide))
        .route("/applicant", get(applicant_page))
        .route("/applicant/properties/:id/apply", post(apply))
        .route("/applicant/applications/:id/withdraw", post(withdraw))
        .route("/messages", get(messages_page).post(post_message))
        .route("/messages/:id/read", post(read_message))
        .route("/images/:hash", get(serve_image))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc123; other=1"),
        );
        assert_eq!(session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_missing_or_empty_session_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("sessionid=zzz"));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn test_manager_disjunction() {
        let user = |role| {
            Session::for_user(SessionUser {
                id: "u".to_string(),
                email: "u@example.com".to_string(),
                name: "U".to_string(),
                role: Some(role),
            })
        };

        assert!(manager(Some(&user(Role::Admin))).is_ok());
        assert!(manager(Some(&user(Role::Landlord))).is_ok());
        assert_eq!(
            manager(Some(&user(Role::Tenant))).unwrap_err(),
            Redirect::to("/login")
        );
        assert!(manager(None).is_err());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&DomainError::InvalidStatusTransition {
                from: PropertyStatus::Draft,
                to: PropertyStatus::Let,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&DomainError::not_found("property", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&DomainError::Forbidden("no".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&DomainError::Validation("bad".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
