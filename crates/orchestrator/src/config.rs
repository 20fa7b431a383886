//! Connection-profile loading: defaults, optional TOML file, env overrides.

use std::{env, fs, path::Path};

use serde::Deserialize;

use shared::{domain::ConnectionProfile, error::CommandError};

pub const PROFILE_FILE: &str = "authgate.toml";

pub const ENV_HOST: &str = "AUTHGATE_HOST";
pub const ENV_PORT: &str = "AUTHGATE_PORT";
pub const ENV_APP_ID: &str = "AUTHGATE_APP_ID";

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    host: Option<String>,
    port: Option<u16>,
    app_id: Option<String>,
}

/// Loads the connection profile handed to `initialize`. A missing file is
/// fine (defaults apply); a present-but-invalid file or a bad env value is
/// an error rather than a silently wrong endpoint.
pub fn load_profile(path: Option<&Path>) -> Result<ConnectionProfile, CommandError> {
    let mut profile = ConnectionProfile::default();
    let path = path.unwrap_or_else(|| Path::new(PROFILE_FILE));

    if let Ok(raw) = fs::read_to_string(path) {
        let file: ProfileFile = toml::from_str(&raw).map_err(|err| {
            CommandError::Profile(format!("invalid profile file '{}': {err}", path.display()))
        })?;
        if let Some(host) = file.host {
            profile.host = host;
        }
        if let Some(port) = file.port {
            profile.port = port;
        }
        if let Some(app_id) = file.app_id {
            profile.app_id = app_id;
        }
    }

    if let Ok(host) = env::var(ENV_HOST) {
        profile.host = host;
    }
    if let Ok(port) = env::var(ENV_PORT) {
        profile.port = port
            .parse()
            .map_err(|_| CommandError::Profile(format!("invalid {ENV_PORT} value '{port}'")))?;
    }
    if let Ok(app_id) = env::var(ENV_APP_ID) {
        profile.app_id = app_id;
    }

    Ok(profile)
}
