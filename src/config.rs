use std::env;
use std::path::PathBuf;

use tracing::{info, warn};

pub const JWT_SECRET_VAR: &str = "STUDYD_JWT_SECRET";
pub const WORKSPACE_VAR: &str = "STUDYD_WORKSPACE";
pub const LOG_VAR: &str = "STUDYD_LOG";

pub struct Config {
    /// HS256 secret shared with the identity provider that issues access tokens.
    pub jwt_secret: Option<String>,
    /// Workspace opened at boot, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Self {
        let jwt_secret = var(JWT_SECRET_VAR);
        if jwt_secret.is_none() {
            warn!("{JWT_SECRET_VAR} not set, sessions cannot be verified");
        }

        let workspace = var(WORKSPACE_VAR).map(PathBuf::from);
        match &workspace {
            Some(p) => info!("{WORKSPACE_VAR} set, opening {}", p.to_string_lossy()),
            None => info!("{WORKSPACE_VAR} not set, waiting for workspace.select"),
        }

        Self {
            jwt_secret,
            workspace,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
