use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{current_session, db_conn, prefs_key, required_i64, stored_subject};
use crate::ipc::types::{AppState, Request};

/// `"CODE - Name"` when a code exists, else the name, else the id.
pub fn subject_label(id: i64, name: Option<&str>, code: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|s| !s.is_empty());
    match code.map(str::trim).filter(|s| !s.is_empty()) {
        Some(code) => format!("{} - {}", code, name.unwrap_or("")).trim().to_string(),
        None => name.map(str::to_string).unwrap_or_else(|| id.to_string()),
    }
}

pub fn subject_options(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, code FROM subject WHERE is_deleted = 0 ORDER BY name ASC, id ASC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let id: i64 = r.get(0)?;
            let name: Option<String> = r.get(1)?;
            let code: Option<String> = r.get(2)?;
            Ok(json!({
                "value": id,
                "label": subject_label(id, name.as_deref(), code.as_deref()),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_set(state: &mut AppState, req: &Request) -> Value {
    let session = current_session(state);
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_i64(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row: Option<(Option<String>, Option<String>)> = match conn
        .query_row(
            "SELECT name, code FROM subject WHERE id = ?",
            [subject_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, code)) = row else {
        return err(&req.id, "not_found", format!("subject {subject_id} not found"), None);
    };

    let selection = json!({
        "subjectId": subject_id,
        "subjectLabel": subject_label(subject_id, name.as_deref(), code.as_deref()),
    });
    if let Err(e) = db::settings_set_json(conn, &prefs_key(session.as_ref()), &selection) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(subject = subject_id, "subject selected");
    ok(&req.id, selection)
}

fn handle_get(state: &mut AppState, req: &Request) -> Value {
    let session = current_session(state);
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "selection": null, "subjects": [] }));
    };
    let selection = match stored_subject(conn, session.as_ref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects = match subject_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "selection": selection, "subjects": subjects }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "prefs.subject.set" => Some(handle_set(state, req)),
        "prefs.subject.get" => Some(handle_get(state, req)),
        _ => None,
    }
}
