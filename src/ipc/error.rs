use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::exam::ExamError;
use crate::resource::ResourceError;

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a domain error onto an IPC error code.
pub trait ErrorCode: std::fmt::Display {
    /// `None` for storage failures; the caller names the operation that failed.
    fn code(&self) -> Option<&'static str>;

    fn details(&self) -> Option<Value> {
        None
    }
}

pub fn fail(id: &str, e: &impl ErrorCode, db_code: &str) -> Value {
    err(id, e.code().unwrap_or(db_code), e.to_string(), e.details())
}

impl ErrorCode for AuthError {
    fn code(&self) -> Option<&'static str> {
        Some(match self {
            AuthError::RefreshFailed(_) => "session_expired",
            AuthError::MissingSecret | AuthError::InvalidToken(_) | AuthError::MissingSubject => {
                "invalid_token"
            }
        })
    }

    fn details(&self) -> Option<Value> {
        match self {
            AuthError::RefreshFailed(_) => Some(json!({ "event": "SIGNED_OUT" })),
            _ => None,
        }
    }
}

impl ErrorCode for ResourceError {
    fn code(&self) -> Option<&'static str> {
        Some(match self {
            ResourceError::UnknownTable(_)
            | ResourceError::UnknownField { .. }
            | ResourceError::MissingField(_)
            | ResourceError::InvalidNumber { .. }
            | ResourceError::OutOfRange { .. }
            | ResourceError::BadFilter(_)
            | ResourceError::InvalidParent(_) => "bad_params",
            ResourceError::ReadOnly(_) => "forbidden",
            ResourceError::NotFound { .. } => "not_found",
            ResourceError::NoSubject => "no_subject",
            ResourceError::HasChildren { .. } => "has_children",
            ResourceError::Database(_) => return None,
        })
    }

    fn details(&self) -> Option<Value> {
        match self {
            ResourceError::UnknownTable(table) => Some(json!({ "table": table })),
            ResourceError::UnknownField { field, .. } => Some(json!({ "field": field })),
            ResourceError::OutOfRange { field, min, max, .. } => {
                Some(json!({ "field": field, "min": min, "max": max }))
            }
            ResourceError::HasChildren { child_table, .. } => {
                Some(json!({ "childTable": child_table }))
            }
            _ => None,
        }
    }
}

impl ErrorCode for ExamError {
    fn code(&self) -> Option<&'static str> {
        Some(match self {
            ExamError::NotFound => "not_found",
            ExamError::UnknownQuestion => "bad_params",
            ExamError::Locked => "exam_locked",
            ExamError::AlreadySubmitted => "already_submitted",
            ExamError::Database(_) => return None,
        })
    }
}
