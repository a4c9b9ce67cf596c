//! Locating and parsing the configuration file.
//!
//! Evaluation order:
//! 1) `$SLUICE_CONFIG_PATH` (TOML or JSON file),
//! 2) `$SLUICE_CONFIG_JSON` (inline JSON),
//! 3) the first default file candidate that exists,
//! 4) built-in defaults.
//!
//! `DATABASE_URL` then overrides `database.url`, and `.env` is read first so
//! it can supply any of these.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use sluice_model::Library;
use tracing::{debug, info};

use crate::models::SluiceConfig;
use crate::validation::validate;

pub const CONFIG_PATH_VAR: &str = "SLUICE_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "SLUICE_CONFIG_JSON";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

const DEFAULT_CANDIDATES: &[&str] = &[
    "sluice.toml",
    "sluice.json",
    "config/sluice.toml",
    "config/sluice.json",
];

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// A loaded, validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: SluiceConfig,
    pub libraries: Vec<Library>,
    pub source: ConfigSource,
    /// `DATABASE_URL` replaced the file's database URL.
    pub database_url_from_env: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Skip reading `.env`.
    skip_dotenv: bool,
    /// Directory default candidates are resolved against.
    base_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_dotenv(mut self) -> Self {
        self.skip_dotenv = true;
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Load from the process environment.
    pub fn load(&self) -> anyhow::Result<ConfigLoad> {
        if !self.skip_dotenv {
            match dotenvy::dotenv() {
                Ok(path) => debug!(path = %path.display(), "loaded .env"),
                Err(err) if err.not_found() => {}
                Err(err) => return Err(err).context("failed to read .env"),
            }
        }
        self.load_with(|key| env::var(key).ok())
    }

    /// Load with an explicit variable lookup.
    pub fn load_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<ConfigLoad> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let (mut config, source) = if let Some(path) = var(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path);
            (load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = var(CONFIG_JSON_VAR) {
            let config = parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            (config, ConfigSource::EnvInline)
        } else if let Some(path) = self.find_default_file() {
            (load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (SluiceConfig::default(), ConfigSource::Default)
        };

        let database_url_from_env = match var(DATABASE_URL_VAR) {
            Some(url) => {
                config.database.url = Some(url);
                true
            }
            None => false,
        };

        let libraries = validate(&config)?;
        info!(
            source = ?source,
            libraries = libraries.len(),
            database = config.database.primary_url().is_some(),
            "configuration loaded"
        );

        Ok(ConfigLoad {
            config,
            libraries,
            source,
            database_url_from_env,
        })
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        DEFAULT_CANDIDATES
            .iter()
            .map(|candidate| match &self.base_dir {
                Some(base) => base.join(candidate),
                None => PathBuf::from(candidate),
            })
            .find(|path| path.exists())
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<SluiceConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            parse_json(&contents).with_context(|| format!("invalid config {}", path.display()))
        }
        Some("toml") | Some("tml") => toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<SluiceConfig> {
    // Try TOML first, then JSON.
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

pub fn parse_json(raw: &str) -> anyhow::Result<SluiceConfig> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
}
