use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::AuthContext;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub auth: AuthContext,
}

impl AppState {
    pub fn new(jwt_secret: Option<String>) -> Self {
        Self {
            workspace: None,
            db: None,
            auth: AuthContext::new(jwt_secret),
        }
    }
}
