use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;

use crate::auth::Session;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::resource::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

pub const ANONYMOUS_USER: &str = "anonymous";

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Integer param given as a number or a numeric string; null and "" count as absent.
pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{key} must be an integer"), None)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| err(&req.id, "bad_params", format!("{key} must be an integer"), None)),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be an integer"),
            None,
        )),
    }
}

/// `page` clamped to `1..=u32::MAX`, `pageSize` to `1..=MAX_PAGE_SIZE`.
pub fn page_params(req: &Request) -> Result<(u32, u32), Value> {
    let page = optional_i64(req, "page")?
        .unwrap_or(1)
        .clamp(1, i64::from(u32::MAX));
    let page_size = optional_i64(req, "pageSize")?
        .unwrap_or(i64::from(DEFAULT_PAGE_SIZE))
        .clamp(1, i64::from(MAX_PAGE_SIZE));
    Ok((
        u32::try_from(page).unwrap_or(u32::MAX),
        u32::try_from(page_size).unwrap_or(MAX_PAGE_SIZE),
    ))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, Value> {
    optional_i64(req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn current_session(state: &AppState) -> Option<Session> {
    state.auth.active(Utc::now()).cloned()
}

pub fn require_session(state: &AppState, req: &Request) -> Result<Session, Value> {
    current_session(state).ok_or_else(|| err(&req.id, "unauthorized", "sign in first", None))
}

/// Content management is closed to students.
pub fn require_staff(state: &AppState, req: &Request) -> Result<Session, Value> {
    let session = require_session(state, req)?;
    if session.is_student() {
        return Err(err(
            &req.id,
            "forbidden",
            "students cannot manage content",
            None,
        ));
    }
    Ok(session)
}

pub fn prefs_key(session: Option<&Session>) -> String {
    let user = session.map(|s| s.user_id.as_str()).unwrap_or(ANONYMOUS_USER);
    format!("prefs.subject.{user}")
}

pub fn stored_subject(conn: &Connection, session: Option<&Session>) -> anyhow::Result<Option<Value>> {
    db::settings_get_json(conn, &prefs_key(session))
}

/// Explicit `subjectId`, else the user's stored selection.
pub fn resolve_subject(
    conn: &Connection,
    req: &Request,
    session: Option<&Session>,
) -> Result<i64, Value> {
    if let Some(id) = optional_i64(req, "subjectId")? {
        return Ok(id);
    }
    let stored = stored_subject(conn, session)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    stored
        .as_ref()
        .and_then(|v| v.get("subjectId"))
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "no_subject", "Please select a subject first.", None))
}
