use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const CONFIG_FILE: &str = "config.json";
const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
const DEFAULT_USER_AGENT: &str = "opsdesk/0.1.0";

pub const DEFAULT_ACCESS_HEADER: &str = "Authorization-Accesstoken-Dev";
pub const DEFAULT_REFRESH_HEADER: &str = "Authorization-Refreshtoken-Dev";

/// Locates the per-user OpsDesk configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "opsdesk", "opsdesk")
            .ok_or(ConfigError::MissingProjectDirs)?;
        Self::from_root(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit directory instead of the platform default.
    pub fn from_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Path to the credentials file for the given origin key.
    pub fn credentials_file(&self, origin: &str) -> PathBuf {
        self.root.join(format!("credentials-{origin}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Settings shared by the request executor and the refresh exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_url: Url,
    pub access_header: String,
    pub refresh_header: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub refresh_path: String,
    pub identity_path: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    /// Surface failures whose code is not in the remediation table.
    pub notify_unmapped_failures: bool,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("valid default base URL"),
            access_header: DEFAULT_ACCESS_HEADER.to_owned(),
            refresh_header: DEFAULT_REFRESH_HEADER.to_owned(),
            access_ttl_minutes: 30,
            refresh_ttl_minutes: 7 * 24 * 60,
            refresh_path: "/auth/refresh".to_owned(),
            identity_path: "/auth/me".to_owned(),
            request_timeout_secs: 30,
            refresh_timeout_secs: 30,
            notify_unmapped_failures: false,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            ..Self::default()
        })
    }

    /// Defaults, then `config.json` from the locator, then environment overrides.
    pub fn load(locator: &ConfigLocator) -> Result<Self, ConfigError> {
        let path = locator.config_file();
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `OPSDESK_*` overrides using the supplied lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("OPSDESK_BASE_URL") {
            self.base_url = Url::parse(&value)?;
        }
        if let Some(value) = lookup("OPSDESK_ACCESS_HEADER") {
            self.access_header = value;
        }
        if let Some(value) = lookup("OPSDESK_REFRESH_HEADER") {
            self.refresh_header = value;
        }
        if let Some(value) = lookup("OPSDESK_ACCESS_TTL_MINUTES") {
            self.access_ttl_minutes = parse_minutes("OPSDESK_ACCESS_TTL_MINUTES", &value)?;
        }
        if let Some(value) = lookup("OPSDESK_REFRESH_TTL_MINUTES") {
            self.refresh_ttl_minutes = parse_minutes("OPSDESK_REFRESH_TTL_MINUTES", &value)?;
        }
        Ok(())
    }

    /// Resolve a request target against the base URL. Absolute URLs pass through.
    pub fn resolve(&self, target: &str) -> Result<Url, url::ParseError> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url);
        }
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(target.trim_start_matches('/'))
    }

    /// Filesystem-safe key for the base URL origin; credentials are scoped per origin.
    pub fn origin_key(&self) -> String {
        let origin = self.base_url.origin().ascii_serialization();
        let slug: String = origin
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let mut collapsed = String::with_capacity(slug.len());
        for c in slug.chars() {
            if c == '-' && collapsed.ends_with('-') {
                continue;
            }
            collapsed.push(c);
        }
        collapsed.trim_matches('-').to_owned()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

fn parse_minutes(key: &'static str, value: &str) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(minutes) if minutes > 0 => Ok(minutes),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
        }),
    }
}

/// Errors that can occur when working with configuration directories.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for opsdesk")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
