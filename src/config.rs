use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const LOCAL_OVERRIDE_FILE: &str = "callisto.local.json";
pub const PLACEHOLDER_CLIENT_ID: &str = "ReplaceWithYourApplicationClientID";

/// Client id and endpoints of the registered Mapillary application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub client_id: String,
    pub base_api_url: String,
    pub users_api_url: String,
    pub sequences_api_url: String,
    pub image_base_url: String,
    pub output_dir: Utf8PathBuf,
    pub image_dir: Utf8PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_id: PLACEHOLDER_CLIENT_ID.to_string(),
            base_api_url: "https://a.mapillary.com/v3".to_string(),
            users_api_url: "users".to_string(),
            sequences_api_url: "sequences".to_string(),
            image_base_url: "https://images.mapillary.com".to_string(),
            output_dir: Utf8PathBuf::from("."),
            image_dir: Utf8PathBuf::from("downloaded_images"),
        }
    }
}

impl Settings {
    pub fn users_url(&self) -> String {
        join_url(&self.base_api_url, &self.users_api_url)
    }

    pub fn sequences_url(&self) -> String {
        join_url(&self.base_api_url, &self.sequences_api_url)
    }

    pub fn has_placeholder_client_id(&self) -> bool {
        self.client_id == PLACEHOLDER_CLIENT_ID || self.client_id.trim().is_empty()
    }

    fn apply(mut self, overrides: SettingsOverride) -> Self {
        if let Some(value) = overrides.client_id {
            self.client_id = value;
        }
        if let Some(value) = overrides.base_api_url {
            self.base_api_url = value;
        }
        if let Some(value) = overrides.users_api_url {
            self.users_api_url = value;
        }
        if let Some(value) = overrides.sequences_api_url {
            self.sequences_api_url = value;
        }
        if let Some(value) = overrides.image_base_url {
            self.image_base_url = value;
        }
        if let Some(value) = overrides.output_dir {
            self.output_dir = value;
        }
        if let Some(value) = overrides.image_dir {
            self.image_dir = value;
        }
        self
    }
}

/// Contents of the non-versioned override file. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsOverride {
    pub client_id: Option<String>,
    pub base_api_url: Option<String>,
    pub users_api_url: Option<String>,
    pub sequences_api_url: Option<String>,
    pub image_base_url: Option<String>,
    pub output_dir: Option<Utf8PathBuf>,
    pub image_dir: Option<Utf8PathBuf>,
}

pub struct SettingsLoader;

impl SettingsLoader {
    /// Loads settings from `path`, or from the first override file found in
    /// the working directory or the user config directory.
    pub fn resolve(path: Option<&str>) -> Result<Settings, ConfigError> {
        let settings = match path {
            Some(path) => Self::load(Path::new(path))?,
            None => match Self::discover() {
                Some(found) => Self::load(&found)?,
                None => {
                    tracing::info!("no local settings override found, using defaults");
                    Settings::default()
                }
            },
        };
        if settings.has_placeholder_client_id() {
            tracing::warn!(
                "client id is not configured; set client_id in {}",
                LOCAL_OVERRIDE_FILE
            );
        }
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|_| ConfigError::Read(path.to_path_buf()))?;
        let overrides = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "loaded settings override");
        Ok(Settings::default().apply(overrides))
    }

    pub fn parse(content: &str) -> Result<SettingsOverride, ConfigError> {
        serde_json::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn resolve_overrides(overrides: SettingsOverride) -> Settings {
        Settings::default().apply(overrides)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_OVERRIDE_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "callisto-mapillary")
            .map(|dirs| dirs.config_dir().join(LOCAL_OVERRIDE_FILE))
            .filter(|path| path.exists())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
