use serde_json::json;

use crate::chapters;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_session, resolve_subject};
use crate::ipc::types::{AppState, Request};

fn handle_tree(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match resolve_subject(conn, req, Some(&session)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rows = match chapters::load_rows(conn, subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tree = chapters::build_tree(&rows);
    let outline = chapters::flatten(&tree);
    ok(
        &req.id,
        json!({
            "subjectId": subject_id,
            "tree": tree,
            "outline": outline,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chapters.tree" => Some(handle_tree(state, req)),
        _ => None,
    }
}
