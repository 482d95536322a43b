use chrono::Utc;
use serde_json::json;

use crate::auth::{guard, login_destination, AuthEvent};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{current_session, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_set_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = match required_str(req, "accessToken") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let redirect = optional_str(req, "redirect");
    match state.auth.sign_in(&token) {
        Ok((session, event)) => ok(
            &req.id,
            json!({
                "session": session,
                "destination": login_destination(session, redirect.as_deref()),
                "event": event.as_str(),
            }),
        ),
        Err(e) => fail(&req.id, &e, "invalid_token"),
    }
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let first = !state.auth.is_ready();
    state.auth.mark_ready();
    let session = state.auth.active(Utc::now());
    ok(
        &req.id,
        json!({
            "ready": true,
            "session": session,
            "event": first.then(|| AuthEvent::InitialSession.as_str()),
        }),
    )
}

fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = match required_str(req, "accessToken") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.auth.refresh(&token) {
        Ok((session, event)) => ok(
            &req.id,
            json!({ "session": session, "event": event.as_str() }),
        ),
        Err(e) => fail(&req.id, &e, "session_expired"),
    }
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let event = state.auth.sign_out();
    ok(&req.id, json!({ "event": event.as_str() }))
}

fn handle_guard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing path", None);
    };
    let session = current_session(state);
    ok(&req.id, json!(guard(path, session.as_ref())))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.setSession" => Some(handle_set_session(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        "auth.refresh" => Some(handle_refresh(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.guard" => Some(handle_guard(state, req)),
        _ => None,
    }
}
