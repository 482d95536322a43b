use serde_json::{json, Map, Value};
use tracing::info;

use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{
    db_conn, optional_str, page_params, require_staff, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::resource::{self, ListQuery, TableSpec};

fn table_param(req: &Request) -> Result<&'static TableSpec, Value> {
    let name = required_str(req, "table")?;
    resource::table(&name).map_err(|e| fail(&req.id, &e, "bad_params"))
}

fn values_param(req: &Request) -> Result<Map<String, Value>, Value> {
    req.params
        .get("values")
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| err(&req.id, "bad_params", "values must be an object", None))
}

fn handle_tables(state: &mut AppState, req: &Request) -> Value {
    if let Err(e) = require_staff(state, req) {
        return e;
    }
    ok(&req.id, resource::describe())
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    if let Err(e) = require_staff(state, req) {
        return e;
    }
    let spec = match table_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (page, page_size) = match page_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(
            &req.id,
            json!({
                "rows": [],
                "totalCount": 0,
                "page": page,
                "pageSize": page_size,
                "totalPages": 1
            }),
        );
    };
    let filters = match resource::parse_filters(spec, req.params.get("filters")) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e, "bad_params"),
    };
    let query = ListQuery {
        filters,
        search: optional_str(req, "search"),
        page,
        page_size,
    };
    match resource::list(conn, spec, &query) {
        Ok(p) => ok(&req.id, json!(p)),
        Err(e) => fail(&req.id, &e, "db_query_failed"),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> Value {
    if let Err(e) = require_staff(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let spec = match table_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match resource::get(conn, spec, id) {
        Ok(Some(row)) => ok(&req.id, json!({ "row": row })),
        Ok(None) => err(&req.id, "not_found", format!("{} {id} not found", spec.name), None),
        Err(e) => fail(&req.id, &e, "db_query_failed"),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> Value {
    let session = match require_staff(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let spec = match table_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let values = match values_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match resource::insert(conn, spec, &values) {
        Ok(id) => id,
        Err(e) => return fail(&req.id, &e, "db_insert_failed"),
    };
    info!(table = spec.name, id, user = %session.user_id, "row created");
    match resource::get(conn, spec, id) {
        Ok(row) => ok(&req.id, json!({ "id": id, "row": row })),
        Err(e) => fail(&req.id, &e, "db_query_failed"),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> Value {
    let session = match require_staff(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let spec = match table_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let values = match values_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = resource::update(conn, spec, id, &values) {
        return fail(&req.id, &e, "db_update_failed");
    }
    info!(table = spec.name, id, user = %session.user_id, "row updated");
    match resource::get(conn, spec, id) {
        Ok(row) => ok(&req.id, json!({ "id": id, "row": row })),
        Err(e) => fail(&req.id, &e, "db_query_failed"),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> Value {
    let session = match require_staff(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let spec = match table_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match resource::parse_filters(spec, req.params.get("filters")) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e, "bad_params"),
    };
    if let Err(e) = resource::delete(conn, spec, id) {
        return fail(&req.id, &e, "db_delete_failed");
    }
    info!(table = spec.name, id, user = %session.user_id, "row deleted");
    let search = optional_str(req, "search");
    match resource::count(conn, spec, &filters, search.as_deref()) {
        Ok(total) => ok(&req.id, json!({ "deleted": true, "totalCount": total })),
        Err(e) => fail(&req.id, &e, "db_query_failed"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "resource.tables" => Some(handle_tables(state, req)),
        "resource.list" => Some(handle_list(state, req)),
        "resource.get" => Some(handle_get(state, req)),
        "resource.create" => Some(handle_create(state, req)),
        "resource.update" => Some(handle_update(state, req)),
        "resource.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
