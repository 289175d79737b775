use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;

const APP_DIR: &str = "hangout-sync";

/// Connection settings remembered between runs
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    pub server: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Base64 encoded relay token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Settings {
    pub fn new(server: &str, username: &str, email: Option<&str>, token: Option<&str>) -> Self {
        Settings {
            server: server.to_string(),
            username: username.to_string(),
            email: email.map(str::to_string),
            token: token.map(|t| BASE64.encode(t)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        let encoded = self.token.as_ref()?;
        match BASE64.decode(encoded).map(String::from_utf8) {
            Ok(Ok(token)) => Some(token),
            _ => {
                warn!("Stored token for {} is not valid base64 text; ignoring it", self.username);
                None
            }
        }
    }
}

static SETTINGS_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_settings_path_override(path: PathBuf) {
    let _ = SETTINGS_PATH_OVERRIDE.set(path);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join(APP_DIR);

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Cannot create {}", config_dir.display()))?;
    }

    Ok(config_dir)
}

fn get_settings_path() -> Result<PathBuf> {
    if let Some(path) = SETTINGS_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("settings.json"))
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let path = get_settings_path()?;
    let file = File::create(&path).with_context(|| format!("Cannot write {}", path.display()))?;
    serde_json::to_writer_pretty(file, settings)?;

    info!("Settings saved for {}", settings.username);
    Ok(())
}

pub fn load_settings() -> Result<Option<Settings>> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed settings in {}", path.display()))?;
    info!("Loaded settings for {} from {}", settings.username, path.display());

    Ok(Some(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_stored_encoded() {
        let settings = Settings::new("ws://localhost:3000", "alice", Some("alice@example.com"), Some("s3cret"));
        assert_eq!(settings.token.as_deref(), Some("czNjcmV0"));
        assert_eq!(settings.get_token().as_deref(), Some("s3cret"));

        let broken = Settings {
            token: Some("%%%".to_string()),
            ..settings
        };
        assert_eq!(broken.get_token(), None);
    }

    #[test]
    fn test_settings_round_trip_through_override_path() {
        let dir = tempfile::tempdir().unwrap();
        set_settings_path_override(dir.path().join("settings.json"));

        assert_eq!(load_settings().unwrap(), None);

        let settings = Settings::new("ws://localhost:3000", "bob", None, None);
        save_settings(&settings).unwrap();
        assert_eq!(load_settings().unwrap(), Some(settings));
    }
}
