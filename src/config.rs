use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::backup::{BackupOptions, BackupTarget};
use crate::git::CloneProtocol;
use crate::github::{Auth, DEFAULT_PER_PAGE};

/// Main configuration structure for gitvault
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Back up public data without credentials
    #[serde(default)]
    pub noauth: bool,

    /// Account to back up (required with `noauth`)
    pub username: Option<String>,

    /// Personal access token; never written back out
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Maximum in-flight exports
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for API requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Backup root; `repos/` and `gists/` are created beneath it
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    #[serde(default = "default_true")]
    pub include_gists: bool,

    #[serde(default)]
    pub include_wikis: bool,

    /// Transport for authenticated clones
    #[serde(default)]
    pub clone_protocol: CloneProtocol,

    /// REST API base URL (GitHub Enterprise: `https://host/api/v3`)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact" | "full"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// Values given on the command line; `None`/`false` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub noauth: bool,
    pub username: Option<String>,
    pub token: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub output_directory: Option<String>,
    pub no_gists: bool,
    pub wikis: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    5
}
fn default_timeout() -> u64 {
    30
}
fn default_output_directory() -> String {
    "~/gitbackup".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            noauth: false,
            username: None,
            token: None,
            concurrency: default_concurrency(),
            timeout: default_timeout(),
            output_directory: default_output_directory(),
            include_gists: default_true(),
            include_wikis: false,
            clone_protocol: CloneProtocol::default(),
            api_url: default_api_url(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the file layer: an explicit path must exist, the default one may not.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration file at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("gitvault").join("config.yml"))
    }

    /// Full layering: file, then environment, then command line.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let config = Self::layered(path, overrides)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::resolve`] without validation, for display.
    pub fn layered(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env()?;
        config.apply_overrides(overrides);
        config.expand_paths()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `GITVAULT_*` and `GITHUB_TOKEN` from `lookup`; empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GITVAULT_NOAUTH") {
            self.noauth = parse_bool("GITVAULT_NOAUTH", &v)?;
        }
        if let Some(v) = get("GITVAULT_THREADS") {
            self.concurrency = v
                .trim()
                .parse()
                .with_context(|| format!("GITVAULT_THREADS is not a number: {:?}", v))?;
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = get("GITVAULT_USER") {
            self.username = Some(v);
        }
        if let Some(v) = get("GITVAULT_OUTPUT_DIR") {
            self.output_directory = v;
        }
        if let Some(v) = get("GITVAULT_TIMEOUT") {
            self.timeout = v
                .trim()
                .parse()
                .with_context(|| format!("GITVAULT_TIMEOUT is not a number: {:?}", v))?;
        }
        if let Some(v) = get("GITVAULT_INCLUDE_GISTS") {
            self.include_gists = parse_bool("GITVAULT_INCLUDE_GISTS", &v)?;
        }
        if let Some(v) = get("GITVAULT_INCLUDE_WIKIS") {
            self.include_wikis = parse_bool("GITVAULT_INCLUDE_WIKIS", &v)?;
        }

        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if overrides.noauth {
            self.noauth = true;
        }
        if let Some(username) = &overrides.username {
            self.username = Some(username.clone());
        }
        if let Some(token) = &overrides.token {
            self.token = Some(token.clone());
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout;
        }
        if let Some(dir) = &overrides.output_directory {
            self.output_directory = dir.clone();
        }
        if overrides.no_gists {
            self.include_gists = false;
        }
        if overrides.wikis {
            self.include_wikis = true;
        }
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.output_directory = shellexpand::full(&self.output_directory)
            .context("Failed to expand output_directory path")?
            .into_owned();

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.noauth {
            if self.username.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                bail!("A username is required when running without authentication (--noauth --username <name>)");
            }
        } else if self.token.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            bail!("A GitHub token is required (set GITHUB_TOKEN or pass --token), or use --noauth");
        }

        if self.concurrency < 1 {
            bail!("concurrency must be at least 1");
        }
        if self.timeout < 1 {
            bail!("timeout must be at least 1 second");
        }
        if self.output_directory.trim().is_empty() {
            bail!("output_directory must not be empty");
        }

        Ok(())
    }

    pub fn auth(&self) -> Auth {
        match (&self.token, self.noauth) {
            (Some(token), false) => Auth::Token(token.clone()),
            _ => Auth::Anonymous,
        }
    }

    pub fn target(&self) -> BackupTarget {
        BackupTarget {
            username: self.username.clone(),
            auth: self.auth(),
        }
    }

    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            output_dir: PathBuf::from(&self.output_directory),
            concurrency: self.concurrency,
            include_gists: self.include_gists,
            include_wikis: self.include_wikis,
            clone_protocol: self.clone_protocol,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Printable form with the token masked.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.noauth { "anonymous" } else { "token" };
        let token = match &self.token {
            Some(_) => "[REDACTED]",
            None => "(none)",
        };

        writeln!(f, "mode:             {}", mode)?;
        writeln!(f, "username:         {}", self.username.as_deref().unwrap_or("(from token)"))?;
        writeln!(f, "token:            {}", token)?;
        writeln!(f, "concurrency:      {}", self.concurrency)?;
        writeln!(f, "timeout:          {}s", self.timeout)?;
        writeln!(f, "output_directory: {}", self.output_directory)?;
        writeln!(f, "include_gists:    {}", self.include_gists)?;
        writeln!(f, "include_wikis:    {}", self.include_wikis)?;
        writeln!(f, "clone_protocol:   {:?}", self.clone_protocol)?;
        write!(f, "api_url:          {}", self.api_url)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got {:?}", key, other),
    }
}
