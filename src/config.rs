//! Paths, user settings and device identity.
//!
//! Everything here is resolved once by the binary and handed to the
//! components as an immutable [`Config`].

use crate::error::ConfigError;
use crate::fs_utils::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default HTTP timeout in seconds
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Literal token in URLs that is replaced with the device identifier.
pub const DEVICE_ID_PLACEHOLDER: &str = "$SALT_UUID";

/// Storage locations under the salt root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub extensions_dir: PathBuf,
}

impl Paths {
    /// Lay out the standard directories under `root`.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("Config"),
            cache_dir: root.join("Cache"),
            extensions_dir: root.join("Extensions"),
            root,
        }
    }

    /// Resolve the root from an explicit override or the platform data dir.
    pub fn discover(override_root: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(root) = override_root {
            return Ok(Self::from_root(root));
        }
        let data = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(Self::from_root(data.join("Salt")))
    }

    /// Create every directory that does not exist yet.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        for dir in [
            &self.root,
            &self.config_dir,
            &self.cache_dir,
            &self.extensions_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("Settings.toml")
    }

    pub fn identity_file(&self) -> PathBuf {
        self.config_dir.join("User.toml")
    }

    pub fn repositories_file(&self) -> PathBuf {
        self.config_dir.join("Repositories.json")
    }
}

/// On-disk form; every field optional so partial files still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsToml {
    output: Option<PathBuf>,
    allow_insecure_connections: Option<bool>,
    extensions_enabled: Option<bool>,
    http_timeout_secs: Option<u64>,
}

/// User-adjustable settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where downloads and extension outputs are written
    pub output: PathBuf,
    /// Permit plain `http`/`ftp` instead of upgrading to the secure variant
    pub allow_insecure_connections: bool,
    /// Run the processing pipeline after downloads
    pub extensions_enabled: bool,
    pub http_timeout_secs: u64,
}

impl Settings {
    /// Defaults used when the settings file is missing or incomplete.
    pub fn defaults(paths: &Paths) -> Self {
        Self {
            output: dirs::download_dir().unwrap_or_else(|| paths.root.join("Downloads")),
            allow_insecure_connections: false,
            extensions_enabled: true,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    /// Load settings, falling back to defaults for anything not set.
    pub fn load(paths: &Paths) -> Result<Self, ConfigError> {
        let path = paths.settings_file();
        let mut settings = Self::defaults(paths);
        if !path.exists() {
            return Ok(settings);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let parsed: SettingsToml = toml::from_str(&content).map_err(|e| ConfigError::Invalid {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(output) = parsed.output {
            settings.output = output;
        }
        if let Some(insecure) = parsed.allow_insecure_connections {
            settings.allow_insecure_connections = insecure;
        }
        if let Some(enabled) = parsed.extensions_enabled {
            settings.extensions_enabled = enabled;
        }
        if let Some(secs) = parsed.http_timeout_secs {
            settings.http_timeout_secs = secs.clamp(5, 300);
        }
        Ok(settings)
    }

    pub fn save(&self, paths: &Paths) -> Result<(), ConfigError> {
        let path = paths.settings_file();
        let on_disk = SettingsToml {
            output: Some(self.output.clone()),
            allow_insecure_connections: Some(self.allow_insecure_connections),
            extensions_enabled: Some(self.extensions_enabled),
            http_timeout_secs: Some(self.http_timeout_secs),
        };
        let content = toml::to_string_pretty(&on_disk).map_err(|e| ConfigError::Invalid {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, content.as_bytes()).map_err(|source| ConfigError::Io { path, source })
    }

    /// Read a property by its CLI name.
    pub fn get(&self, property: &str) -> Result<String, ConfigError> {
        match property {
            "outputDir" => Ok(self.output.display().to_string()),
            "insecureConnections" => Ok(self.allow_insecure_connections.to_string()),
            "extensionsEnabled" => Ok(self.extensions_enabled.to_string()),
            other => Err(ConfigError::UnknownProperty(other.to_string())),
        }
    }

    /// Set a property by its CLI name.
    pub fn set(&mut self, property: &str, value: &str) -> Result<(), ConfigError> {
        match property {
            "outputDir" => self.output = PathBuf::from(value.replace('\\', "/")),
            "insecureConnections" => self.allow_insecure_connections = is_truthy(value),
            "extensionsEnabled" => self.extensions_enabled = is_truthy(value),
            other => return Err(ConfigError::UnknownProperty(other.to_string())),
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "t" | "yes" | "y"
    )
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityToml {
    uuid: String,
}

/// Read the device identifier, generating and persisting one on first use.
pub fn device_id(paths: &Paths) -> Result<String, ConfigError> {
    let path = paths.identity_file();
    if path.exists() {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let identity: IdentityToml =
            toml::from_str(&content).map_err(|e| ConfigError::Invalid {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        return Ok(identity.uuid);
    }

    let identity = IdentityToml {
        uuid: uuid::Uuid::new_v4().to_string(),
    };
    let content = toml::to_string(&identity).map_err(|e| ConfigError::Invalid {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    write_atomic(&path, content.as_bytes()).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(identity.uuid)
}

/// Everything a component needs to know about its environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: Paths,
    pub settings: Settings,
    pub device_id: String,
}

impl Config {
    pub fn new(paths: Paths, settings: Settings, device_id: impl Into<String>) -> Self {
        Self {
            paths,
            settings,
            device_id: device_id.into(),
        }
    }

    /// Create directories and load settings and identity from disk.
    pub fn load(paths: Paths) -> Result<Self, ConfigError> {
        paths.ensure()?;
        let settings = Settings::load(&paths)?;
        let device_id = device_id(&paths)?;
        Ok(Self::new(paths, settings, device_id))
    }

    /// Directory downloads land in.
    pub fn output_dir(&self) -> &Path {
        &self.settings.output
    }
}
