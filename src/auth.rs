use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const STUDENT_ROLE: &str = "student";
pub const STUDENT_HOME: &str = "/dashboard/student";
pub const ADMIN_HOME: &str = "/dashboard";
pub const LOGIN_ROUTE: &str = "/login";

const PUBLIC_ROUTES: &[&str] = &[
    "/",
    "/login",
    "/signup",
    "/forgot-password",
    "/reset-password",
    "/callback",
    "/auth/callback",
];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("STUDYD_JWT_SECRET is not configured")]
    MissingSecret,
    #[error("invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("access token has no subject")]
    MissingSubject,
    #[error("session refresh failed, signed out: {0}")]
    RefreshFailed(Box<AuthError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl AuthEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthEvent::InitialSession => "INITIAL_SESSION",
            AuthEvent::SignedIn => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed => "TOKEN_REFRESHED",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    exp: i64,
    #[serde(default)]
    user_role: Option<Value>,
    #[serde(default)]
    app_metadata: Option<Value>,
    #[serde(default)]
    user_metadata: Option<Value>,
}

impl Claims {
    /// Top-level claim wins, then app metadata, then user metadata.
    /// A present but non-string role means "no role".
    fn role(&self) -> Option<String> {
        let nested = |meta: &Option<Value>| {
            meta.as_ref()
                .and_then(|m| m.get("user_role"))
                .filter(|v| !v.is_null())
                .cloned()
        };
        let raw = self
            .user_role
            .clone()
            .filter(|v| !v.is_null())
            .or_else(|| nested(&self.app_metadata))
            .or_else(|| nested(&self.user_metadata))?;
        raw.as_str().map(|s| s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_student(&self) -> bool {
        self.role.as_deref() == Some(STUDENT_ROLE)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Verifies an HS256 access token and turns its claims into a session.
pub fn verify_token(secret: &str, token: &str) -> Result<Session, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Provider tokens carry an audience we do not pin.
    validation.validate_aud = false;
    let data = decode::<Claims>(
        token.trim(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;
    let user_id = claims
        .sub
        .clone()
        .filter(|s| !s.trim().is_empty())
        .ok_or(AuthError::MissingSubject)?;
    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    Ok(Session {
        user_id,
        email: claims.email.clone(),
        role: claims.role(),
        expires_at,
    })
}

/// Process-wide session slot, the daemon-side counterpart of the client auth provider.
pub struct AuthContext {
    secret: Option<String>,
    session: Option<Session>,
    ready: bool,
}

impl AuthContext {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            session: None,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// The current session, unless it has expired.
    pub fn active(&self, now: DateTime<Utc>) -> Option<&Session> {
        self.session.as_ref().filter(|s| !s.is_expired(now))
    }

    pub fn sign_in(&mut self, token: &str) -> Result<(&Session, AuthEvent), AuthError> {
        let secret = self.secret.as_deref().ok_or(AuthError::MissingSecret)?;
        let session = verify_token(secret, token)?;
        self.ready = true;
        info!(user = %session.user_id, role = ?session.role, "SIGNED_IN");
        let session: &Session = self.session.insert(session);
        Ok((session, AuthEvent::SignedIn))
    }

    /// A token that fails verification drops the current session.
    pub fn refresh(&mut self, token: &str) -> Result<(&Session, AuthEvent), AuthError> {
        let verified = match self.secret.as_deref() {
            Some(secret) => verify_token(secret, token),
            None => Err(AuthError::MissingSecret),
        };
        match verified {
            Ok(session) => {
                self.ready = true;
                info!(user = %session.user_id, "TOKEN_REFRESHED");
                let session: &Session = self.session.insert(session);
                Ok((session, AuthEvent::TokenRefreshed))
            }
            Err(e) => {
                self.sign_out();
                Err(AuthError::RefreshFailed(Box::new(e)))
            }
        }
    }

    pub fn sign_out(&mut self) -> AuthEvent {
        if let Some(prev) = self.session.take() {
            info!(user = %prev.user_id, "SIGNED_OUT");
        }
        self.ready = true;
        AuthEvent::SignedOut
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuardDecision {
    pub allow: bool,
    pub redirect: Option<String>,
    pub role: Option<String>,
}

fn route_path(path: &str) -> &str {
    let end = path.find(|c: char| c == '?' || c == '#').unwrap_or(path.len());
    let p = &path[..end];
    if p.len() > 1 {
        p.trim_end_matches('/')
    } else {
        p
    }
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

pub fn guard(path: &str, session: Option<&Session>) -> GuardDecision {
    let route = route_path(path);
    if route.is_empty() || PUBLIC_ROUTES.contains(&route) {
        return GuardDecision {
            allow: true,
            redirect: None,
            role: session.and_then(|s| s.role.clone()),
        };
    }

    let Some(session) = session else {
        return GuardDecision {
            allow: false,
            redirect: Some(format!(
                "{LOGIN_ROUTE}?redirect={}",
                urlencoding::encode(route)
            )),
            role: None,
        };
    };

    if session.is_student() && under(route, ADMIN_HOME) && !under(route, STUDENT_HOME) {
        return GuardDecision {
            allow: false,
            redirect: Some(STUDENT_HOME.to_string()),
            role: session.role.clone(),
        };
    }

    GuardDecision {
        allow: true,
        redirect: None,
        role: session.role.clone(),
    }
}

/// Where a freshly signed-in user lands. Only same-site absolute paths are honored.
pub fn login_destination(session: &Session, redirect: Option<&str>) -> String {
    if session.is_student() {
        return STUDENT_HOME.to_string();
    }
    match redirect.map(str::trim) {
        Some(r) if r.starts_with('/') && !r.starts_with("//") => r.to_string(),
        _ => ADMIN_HOME.to_string(),
    }
}
