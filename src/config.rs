use std::{collections::HashMap, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

pub struct RepofetchConfig {
    pub cache_dir: Option<PathBuf>,
    pub git_executable: Option<PathBuf>,
    pub fetch_interval: Option<Duration>,
}

impl RepofetchConfig {
    pub fn load() -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(None)?;

        Ok(Self {
            cache_dir: raw_config.cache.dir,
            git_executable: raw_config.git.executable,
            fetch_interval: raw_config.fetch.interval.map(Duration::from_secs),
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    git: GitConfig,
    #[serde(default)]
    fetch: FetchConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct GitConfig {
    executable: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct FetchConfig {
    /// Seconds.
    interval: Option<u64>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("REPOFETCH")
                    .separator("_")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
