//! Resolution of the configuration from files and the environment.

/// Loader errors.
pub mod error;

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{ShardscanConfig, validation::validate};
use error::ConfigError;

/// Path of a TOML or JSON config file.
pub const CONFIG_PATH_VAR: &str = "SHARDSCAN_CONFIG_PATH";
/// Inline JSON configuration.
pub const CONFIG_JSON_VAR: &str = "SHARDSCAN_CONFIG_JSON";
/// Overrides `database.url`.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
/// Overrides `redis.url`.
pub const REDIS_URL_VAR: &str = "REDIS_URL";

const DEFAULT_FILES: &[&str] = &[
    "shardscan.toml",
    "shardscan.json",
    "config/shardscan.toml",
    "config/shardscan.json",
];

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// Built-in defaults.
    #[default]
    Default,
    /// File named by `$SHARDSCAN_CONFIG_PATH` or `--config`.
    EnvPath(PathBuf),
    /// `$SHARDSCAN_CONFIG_JSON`.
    EnvInline,
    /// Default file found in the working directory.
    File(PathBuf),
}

impl ShardscanConfig {
    /// Load `.env`, then the configuration, then apply `DATABASE_URL` and
    /// `REDIS_URL`, then validate.
    ///
    /// Evaluation order:
    /// 1) `$SHARDSCAN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SHARDSCAN_CONFIG_JSON` (inline JSON),
    /// 3) `shardscan.toml` / `config/shardscan.toml` (or `.json`) in the
    ///    working directory,
    /// 4) defaults.
    pub fn load_from_env() -> Result<(Self, ConfigSource), ConfigError> {
        Self::load_from_env_or_path(None)
    }

    /// [`ShardscanConfig::load_from_env`] with `explicit` taking the place of
    /// `$SHARDSCAN_CONFIG_PATH` when given.
    pub fn load_from_env_or_path(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let explicit = explicit.map(|path| path.display().to_string());
        Self::load_with(
            |name| match (&explicit, name) {
                (Some(path), CONFIG_PATH_VAR) => Some(path.clone()),
                _ => env::var(name).ok(),
            },
            &cwd,
        )
    }

    /// Same as [`ShardscanConfig::load_from_env`] with an explicit variable
    /// lookup and base directory for the default files, skipping `.env`.
    pub fn load_with<F>(lookup: F, base_dir: &Path) -> Result<(Self, ConfigSource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let (mut config, source) = if let Some(path) = set(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = set(CONFIG_JSON_VAR) {
            (Self::parse_json(&raw, CONFIG_JSON_VAR)?, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        if let Some(url) = set(DATABASE_URL_VAR) {
            config.database.url = Some(url);
        }
        if let Some(url) = set(REDIS_URL_VAR) {
            config.redis.url = Some(url);
        }

        validate(&config)?;
        info!(source = ?source, shards = config.table.resolved_shard_count(), "configuration loaded");
        Ok((config, source))
    }

    /// Parse a file by extension: `.json` as JSON, `.toml` as TOML, anything
    /// else TOML then JSON. Does not validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents, &origin),
            Some("toml") | Some("tml") => toml::from_str(&contents).map_err(|err| ConfigError::Parse {
                origin,
                message: err.to_string(),
            }),
            _ => Self::parse_from_str(&contents, &origin),
        }
    }

    /// TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| ConfigError::Parse {
                origin: origin.to_string(),
                message: format!("toml error: {toml_err}; json error: {json_err}"),
            })
        })
    }

    /// Parse JSON, naming `origin` in errors.
    pub fn parse_json(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Parse {
            origin: origin.to_string(),
            message: err.to_string(),
        })
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.exists())
    }
}
