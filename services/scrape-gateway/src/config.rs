//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API tokens never appear here; they live in the credential store file.

use common::Tuning;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub tuning: Tuning,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Credential store location
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Remote actor-run API settings
#[derive(Debug, Deserialize)]
pub struct RemoteConfig {
    /// API root including the version prefix, e.g. `https://api.apify.com/v2`.
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Actor id per work type.
    pub actors: HashMap<String, String>,
    /// Work type used when a request names none.
    #[serde(default)]
    pub default_work_type: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `KEY_STORE_PATH` replaces `store.path`; the tuning variables are
    /// documented on [`Tuning::overlay_env`].
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.remote.base_url.starts_with("http://")
            && !config.remote.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.remote.base_url
            )));
        }

        if config.remote.timeout_secs == 0 || config.remote.probe_timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs and probe_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.remote.actors.is_empty() {
            return Err(common::Error::Config(
                "remote.actors must name at least one work type".into(),
            ));
        }

        if let Some(ref default) = config.remote.default_work_type {
            if !config.remote.actors.contains_key(default) {
                return Err(common::Error::Config(format!(
                    "default_work_type {default} has no entry in remote.actors"
                )));
            }
        }

        if let Ok(p) = std::env::var("KEY_STORE_PATH") {
            config.store.path = PathBuf::from(p);
        }

        config.tuning.overlay_env(|key| std::env::var(key).ok())?;
        config.tuning.validate()?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("scrape-gateway.toml")
    }
}

impl RemoteConfig {
    /// Resolve the work type of a request to `(work_type, actor)`.
    pub fn actor_for(&self, work_type: Option<&str>) -> Option<(String, String)> {
        let work_type = work_type.or(self.default_work_type.as_deref())?;
        self.actors
            .get(work_type)
            .map(|actor| (work_type.to_string(), actor.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    /// Clear every variable `Config::load` reads.
    unsafe fn clear_overrides() {
        for key in [
            "KEY_STORE_PATH",
            "COOLDOWN_MINUTES",
            "MIN_ACTIVE_FLOOR",
            "BATCH_SIZE",
            "MAX_ATTEMPTS_PER_ITEM",
        ] {
            unsafe { remove_env(key) };
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"

[store]
path = "/var/lib/scrape-gateway/credentials.json"

[remote]
base_url = "https://api.apify.com/v2"
default_work_type = "profiles"

[remote.actors]
profiles = "apify/instagram-profile-scraper"
comments = "apify/instagram-comment-scraper"

[tuning]
batch_size = 5

[tuning.max_attempts_by_work_type]
comments = 4
"#
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let (_dir, path) = write_config(valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.remote.probe_timeout_secs, 10);
        assert_eq!(config.remote.actors.len(), 2);
        assert_eq!(config.tuning.batch_size, 5);
        assert_eq!(config.tuning.max_attempts_for(Some("comments")), 4);
        // Untouched tuning keys keep their defaults.
        assert_eq!(config.tuning.min_active_floor, 2);
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/scrape-gateway/credentials.json")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let (_dir, path) = write_config("not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_tuning_section_is_optional() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let toml = r#"
[server]
listen_addr = "127.0.0.1:8080"

[store]
path = "keys.json"

[remote]
base_url = "http://localhost:9000/v2"

[remote.actors]
profiles = "apify/instagram-profile-scraper"
"#;
        let (_dir, path) = write_config(toml);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tuning, Tuning::default());
        assert!(config.remote.default_work_type.is_none());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let toml = valid_toml().replace("https://api.apify.com/v2", "ftp://api.apify.com");
        let (_dir, path) = write_config(&toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_rejects_unknown_default_work_type() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let toml = valid_toml().replace(
            "default_work_type = \"profiles\"",
            "default_work_type = \"followers\"",
        );
        let (_dir, path) = write_config(&toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("followers"));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let toml = valid_toml().replace("batch_size = 5", "batch_size = 0");
        let (_dir, path) = write_config(&toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let (_dir, path) = write_config(valid_toml());

        unsafe {
            set_env("KEY_STORE_PATH", "/tmp/override.json");
            set_env("BATCH_SIZE", "25");
            set_env("COOLDOWN_MINUTES", "15");
        }
        let config = Config::load(&path).unwrap();
        unsafe { clear_overrides() };

        assert_eq!(config.store.path, PathBuf::from("/tmp/override.json"));
        assert_eq!(config.tuning.batch_size, 25);
        assert_eq!(config.tuning.cooldown_minutes, 15);
    }

    #[test]
    fn test_env_override_must_parse() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let (_dir, path) = write_config(valid_toml());

        unsafe { set_env("MIN_ACTIVE_FLOOR", "many") };
        let result = Config::load(&path);
        unsafe { clear_overrides() };

        let err = result.unwrap_err();
        assert!(err.to_string().contains("MIN_ACTIVE_FLOOR"));
    }

    #[test]
    fn test_actor_for_resolves_default_and_named() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_overrides() };
        let (_dir, path) = write_config(valid_toml());
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.remote.actor_for(None),
            Some((
                "profiles".to_string(),
                "apify/instagram-profile-scraper".to_string()
            ))
        );
        assert_eq!(
            config.remote.actor_for(Some("comments")).map(|(_, a)| a),
            Some("apify/instagram-comment-scraper".to_string())
        );
        assert!(config.remote.actor_for(Some("followers")).is_none());
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("scrape-gateway.toml"));
    }
}
