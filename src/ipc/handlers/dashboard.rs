use serde_json::{json, Map, Value};

use crate::ipc::error::{err, ok};
use crate::ipc::handlers::prefs::subject_options;
use crate::ipc::helpers::require_session;
use crate::ipc::types::{AppState, Request};

const COUNTED: &[&str] = &["quiz", "flashcard", "note", "profiles"];

fn handle_summary(state: &mut AppState, req: &Request) -> Value {
    if let Err(e) = require_session(state, req) {
        return e;
    }
    let mut counts = Map::new();
    let Some(conn) = state.db.as_ref() else {
        for table in COUNTED {
            counts.insert(table.to_string(), json!(0));
        }
        return ok(&req.id, json!({ "counts": counts, "subjects": [] }));
    };
    for table in COUNTED {
        let n: i64 = match conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| {
            r.get(0)
        }) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        counts.insert(table.to_string(), json!(n));
    }
    let subjects = match subject_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "counts": counts, "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
