use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialConfig;
use crate::duration::{deserialize_duration, serialize_duration};
use crate::planner::DEFAULT_FULL_FETCH_AFTER;
use crate::portal::selectors;

fn default_login_url() -> String {
    selectors::LOGIN_FORM_URL.to_string()
}

fn default_user_agent() -> String {
    selectors::MOBILE_USER_AGENT.to_string()
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("chrome-profile")
}

/// Browser and portal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,

    /// Chromium profile directory. If relative, resolved from the data directory.
    pub profile_dir: PathBuf,

    /// User agent installed before the login page loads.
    pub user_agent: String,

    /// Run Chromium headless. Interactive login needs a visible window.
    pub headless: bool,

    /// Explicit Chromium executable.
    pub chrome_path: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            profile_dir: default_profile_dir(),
            user_agent: default_user_agent(),
            headless: false,
            chrome_path: None,
        }
    }
}

fn default_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// How long to wait on the portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for an intercepted response.
    #[serde(
        default = "default_wait",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub interception: Duration,

    /// Wait for a page element.
    #[serde(
        default = "default_wait",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub element: Duration,

    /// Wait for the login form after resetting the user agent.
    #[serde(
        default = "default_wait",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub user_agent_reset: Duration,

    /// Wait for the outcome of an automatic login.
    #[serde(
        default = "default_wait",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub auto_login: Duration,

    #[serde(
        default = "default_poll_interval",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            interception: default_wait(),
            element: default_wait(),
            user_agent_reset: default_wait(),
            auto_login: default_wait(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_full_fetch_after() -> Duration {
    DEFAULT_FULL_FETCH_AFTER
}

/// Incremental fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// A successful run older than this triggers a full fetch.
    #[serde(
        default = "default_full_fetch_after",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub full_fetch_after: Duration,

    /// Also save the third-party payment card PDF.
    pub attestation: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            full_fetch_after: default_full_fetch_after(),
            attestation: false,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    pub portal: PortalConfig,

    pub timeouts: TimeoutConfig,

    pub fetch: FetchConfig,

    /// Where portal credentials live. Interactive login every run when unset.
    pub credentials: Option<CredentialConfig>,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }

    fn resolve(mut self, config_dir: &Path) -> ResolvedConfig {
        let data_dir = self.resolve_data_dir(config_dir);
        if self.portal.profile_dir.is_relative() {
            self.portal.profile_dir = data_dir.join(&self.portal.profile_dir);
        }
        ResolvedConfig {
            data_dir,
            portal: self.portal,
            timeouts: self.timeouts,
            fetch: self.fetch,
            credentials: self.credentials.unwrap_or_default(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub portal: PortalConfig,
    pub timeouts: TimeoutConfig,
    pub fetch: FetchConfig,
    pub credentials: CredentialConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./mutuelle.toml` if it exists in current directory
/// 2. `~/.local/share/mutuelle-sync/mutuelle.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("mutuelle.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("mutuelle-sync").join("mutuelle.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    ///
    /// The data directory is resolved relative to the config file's parent directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        Ok(Config::load(&config_path)?.resolve(config_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    ///
    /// Without a file, the config file's intended parent directory is the
    /// data directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        Ok(Config::default().resolve(config_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_data_dir_is_config_dir() {
        let config = Config::default();
        let config_dir = Path::new("/home/user/mutuelle");
        assert_eq!(
            config.resolve_data_dir(config_dir),
            PathBuf::from("/home/user/mutuelle")
        );
    }

    #[test]
    fn test_relative_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("data")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_data_dir(Path::new("/home/user/mutuelle")),
            PathBuf::from("/home/user/mutuelle/data")
        );
    }

    #[test]
    fn test_load_empty_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("mutuelle.toml");
        std::fs::File::create(&config_path)?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.data_dir, None);
        assert_eq!(config.timeouts.interception, Duration::from_secs(30));
        assert_eq!(config.fetch.full_fetch_after, Duration::from_secs(30 * 24 * 60 * 60));
        assert!(!config.fetch.attestation);
        assert_eq!(config.portal.login_url, selectors::LOGIN_FORM_URL);
        assert!(config.credentials.is_none());

        Ok(())
    }

    #[test]
    fn test_load_timeouts_and_fetch() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("mutuelle.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[timeouts]")?;
        writeln!(file, "interception = \"45s\"")?;
        writeln!(file, "poll_interval = \"500ms\"")?;
        writeln!(file, "[fetch]")?;
        writeln!(file, "full_fetch_after = \"7d\"")?;
        writeln!(file, "attestation = true")?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.timeouts.interception, Duration::from_secs(45));
        assert_eq!(config.timeouts.poll_interval, Duration::from_millis(500));
        assert_eq!(config.timeouts.element, Duration::from_secs(30));
        assert_eq!(config.fetch.full_fetch_after, Duration::from_secs(7 * 24 * 60 * 60));
        assert!(config.fetch.attestation);

        Ok(())
    }

    #[test]
    fn test_load_pass_credentials() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("mutuelle.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[credentials]")?;
        writeln!(file, "backend = \"pass\"")?;
        writeln!(file, "path = \"health/mutuelle-generale\"")?;

        let config = Config::load(&config_path)?;
        assert!(matches!(config.credentials, Some(CredentialConfig::Pass { .. })));

        Ok(())
    }

    #[test]
    fn test_invalid_duration_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("mutuelle.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[timeouts]")?;
        writeln!(file, "element = \"soon\"")?;

        assert!(Config::load(&config_path).is_err());
        Ok(())
    }

    #[test]
    fn test_resolved_config_load_or_default_missing_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("mutuelle.toml");

        let resolved = ResolvedConfig::load_or_default(&config_path)?;
        assert_eq!(resolved.data_dir, dir.path());
        assert_eq!(resolved.portal.profile_dir, dir.path().join("chrome-profile"));
        assert!(matches!(resolved.credentials, CredentialConfig::Memory));

        Ok(())
    }

    #[test]
    fn test_resolved_config_resolves_relative_data_dir() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("mutuelle.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "data_dir = \"./data\"")?;

        let resolved = ResolvedConfig::load(&config_path)?;
        let data_dir = dir.path().canonicalize()?.join("./data");
        assert_eq!(resolved.data_dir, data_dir);
        assert_eq!(resolved.portal.profile_dir, data_dir.join("chrome-profile"));

        Ok(())
    }
}
