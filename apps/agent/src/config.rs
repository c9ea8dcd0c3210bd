//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/ota-agent/agent.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/ota-agent/agent.toml`
//!
//! `OTA_CLIENT_ID` and `OTA_CLIENT_SECRET` override the file's credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ota_auth::{ClientCredentials, RetryConfig};
use ota_handler::{ChecksumPolicy, HandlerConfig};
use serde::{Deserialize, Serialize};

pub const ENV_CLIENT_ID: &str = "OTA_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "OTA_CLIENT_SECRET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

/// `[auth]`: the OAuth2 client-credentials grant.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_expiry_skew_secs")]
    pub expiry_skew_secs: u64,
    #[serde(default = "default_token_lifetime_secs")]
    pub default_token_lifetime_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// `[transfer]`: limits, verification and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    #[serde(default = "default_max_transfer_size")]
    pub max_transfer_size: u64,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
    /// 0 disables idle expiry.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
}

fn default_refresh_timeout_secs() -> u64 {
    15
}

fn default_expiry_skew_secs() -> u64 {
    30
}

fn default_token_lifetime_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    RetryConfig::default().max_attempts
}

fn default_initial_backoff_ms() -> u64 {
    RetryConfig::default().initial_delay.as_millis() as u64
}

fn default_max_backoff_ms() -> u64 {
    RetryConfig::default().max_delay.as_millis() as u64
}

fn default_max_transfer_size() -> u64 {
    HandlerConfig::default().max_transfer_size
}

fn default_max_chunk_size() -> usize {
    HandlerConfig::default().max_chunk_size
}

fn default_verify_timeout_secs() -> u64 {
    HandlerConfig::default().verify_timeout.as_secs()
}

fn default_idle_timeout_secs() -> u64 {
    HandlerConfig::default().idle_timeout.as_secs()
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            refresh_timeout_secs: default_refresh_timeout_secs(),
            expiry_skew_secs: default_expiry_skew_secs(),
            default_token_lifetime_secs: default_token_lifetime_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl std::fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSection")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            max_transfer_size: default_max_transfer_size(),
            max_chunk_size: default_max_chunk_size(),
            verify_timeout_secs: default_verify_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            checksum_policy: ChecksumPolicy::default(),
            package_dir: None,
            manifest_path: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the default location), creating a
    /// default file if none exists, then applies environment overrides.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p,
            None => config_path(),
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            config
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Saves the configuration to `path` with owner-only permissions.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix; the file may hold the client secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Overrides credentials from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(ENV_CLIENT_ID).filter(|v| !v.is_empty()) {
            self.auth.client_id = id;
        }
        if let Some(secret) = lookup(ENV_CLIENT_SECRET).filter(|v| !v.is_empty()) {
            self.auth.client_secret = secret;
        }
    }

    /// The configured credential pair, if both halves are present.
    pub fn credentials(&self) -> Option<ClientCredentials> {
        ClientCredentials::from_parts(&self.auth.client_id, &self.auth.client_secret).ok()
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.auth.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.auth.initial_backoff_ms),
            max_delay: Duration::from_millis(self.auth.max_backoff_ms),
            ..RetryConfig::default()
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        let t = &self.transfer;
        HandlerConfig {
            max_transfer_size: t.max_transfer_size,
            max_chunk_size: t.max_chunk_size,
            verify_timeout: Duration::from_secs(t.verify_timeout_secs),
            idle_timeout: Duration::from_secs(t.idle_timeout_secs),
            checksum_policy: t.checksum_policy,
            package_dir: t.package_dir.clone(),
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("ota-agent").join("agent.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        base.join("ota-agent").join("agent.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.credentials().is_none());
        assert_eq!(config.auth.refresh_timeout_secs, 15);
        assert_eq!(config.auth.max_attempts, 5);
        assert_eq!(config.transfer.max_chunk_size, 50_331_648);
        assert_eq!(config.transfer.checksum_policy, ChecksumPolicy::SkipIfAbsent);
        assert!(config.transfer.package_dir.is_none());
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            [auth]
            token_url = "https://auth.example.com/oauth/token"
            client_id = "device-123"
            client_secret = "s3cret"

            [transfer]
            checksum_policy = "require"
            idle_timeout_secs = 0
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.auth.client_id, "device-123");
        assert_eq!(config.auth.expiry_skew_secs, 30);
        assert!(config.credentials().is_some());

        let handler = config.handler_config();
        assert_eq!(handler.checksum_policy, ChecksumPolicy::Require);
        assert!(handler.idle_timeout.is_zero());
        assert_eq!(handler.verify_timeout, Duration::from_secs(120));
    }

    #[test]
    fn env_overrides_credentials() {
        let mut config = Config::default();
        config.auth.client_id = "from-file".into();
        config.apply_env(|key| match key {
            ENV_CLIENT_ID => Some("from-env".into()),
            ENV_CLIENT_SECRET => Some("env-secret".into()),
            _ => None,
        });
        assert_eq!(config.auth.client_id, "from-env");
        assert_eq!(config.auth.client_secret, "env-secret");

        // Empty variables do not clobber the file.
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.auth.client_id, "from-env");
    }

    #[test]
    fn retry_config_from_section() {
        let mut config = Config::default();
        config.auth.max_attempts = 0;
        config.auth.initial_backoff_ms = 100;
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn debug_redacts_secret() {
        let mut config = Config::default();
        config.auth.client_secret = "hunter2".into();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("ota-agent"));
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/agent.toml");

        let mut config = Config::default();
        config.auth.token_url = "https://auth.example.com/token".into();
        config.transfer.package_dir = Some(tmp.path().join("pkgs"));
        config.save(&path).unwrap();

        let loaded: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.auth.token_url, "https://auth.example.com/token");
        assert_eq!(loaded.transfer.package_dir, Some(tmp.path().join("pkgs")));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        let config = Config::load(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.transfer.verify_timeout_secs, 120);
    }
}
