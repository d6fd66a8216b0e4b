use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::fastq::DEFAULT_MAX_READ_LEN;
use crate::scheduler::{DEFAULT_SAVE_INTERVAL, DEFAULT_WORKERS, SchedulerOptions};
use crate::sra::EUTILS_BASE;
use crate::srr::DEFAULT_DOWNLOAD_WORKERS;

pub const CONFIG_FILE: &str = "kira-sr.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub save_interval: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub download_workers: Option<usize>,
    #[serde(default)]
    pub max_read_len: Option<usize>,
    #[serde(default)]
    pub eutils_base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Values given on the command line; these win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub save_interval: Option<usize>,
    pub workers: Option<usize>,
    pub download_workers: Option<usize>,
    pub max_read_len: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub scheduler: SchedulerOptions,
    pub download_workers: usize,
    pub max_read_len: usize,
    pub eutils_base_url: String,
    pub api_key: Option<String>,
    pub source: Option<Utf8PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            scheduler: SchedulerOptions::default(),
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            max_read_len: DEFAULT_MAX_READ_LEN,
            eutils_base_url: EUTILS_BASE.to_string(),
            api_key: None,
            source: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, else `kira-sr.json` in the working directory, else the
    /// user config file; falls back to defaults when none exists.
    pub fn resolve(
        path: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let (config, source) = match path {
            Some(path) => {
                let path = Utf8PathBuf::from(path);
                (Self::read(&path)?, Some(path))
            }
            None => match Self::discover() {
                Some(path) => (Self::read(&path)?, Some(path)),
                None => (Config::default(), None),
            },
        };
        let mut resolved = Self::resolve_config(config, overrides)?;
        resolved.source = source;
        Ok(resolved)
    }

    pub fn resolve_config(
        config: Config,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();
        let save_interval = overrides
            .save_interval
            .or(config.save_interval)
            .unwrap_or(DEFAULT_SAVE_INTERVAL);
        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS);
        let download_workers = overrides
            .download_workers
            .or(config.download_workers)
            .unwrap_or(defaults.download_workers);
        let max_read_len = overrides
            .max_read_len
            .or(config.max_read_len)
            .unwrap_or(defaults.max_read_len);

        for (name, value) in [
            ("save_interval", save_interval),
            ("workers", workers),
            ("download_workers", download_workers),
            ("max_read_len", max_read_len),
        ] {
            if value == 0 {
                return Err(KiraError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            scheduler: SchedulerOptions {
                workers,
                save_interval,
            },
            download_workers,
            max_read_len,
            eutils_base_url: config
                .eutils_base_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.eutils_base_url),
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
            source: None,
        })
    }

    fn read(path: &Utf8PathBuf) -> Result<Config, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| KiraError::ConfigRead(PathBuf::from(path.as_std_path())))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<Utf8PathBuf> {
        let local = Utf8PathBuf::from(CONFIG_FILE);
        if local.as_std_path().exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "kira-series-resolver")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.config_dir().join("config.json")).ok())
            .filter(|path| path.as_std_path().exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_values() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), &ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.scheduler.save_interval, 500);
        assert_eq!(resolved.scheduler.workers, 10);
        assert_eq!(resolved.download_workers, 8);
        assert_eq!(resolved.max_read_len, 150);
        assert_eq!(resolved.eutils_base_url, EUTILS_BASE);
    }

    #[test]
    fn overrides_win_over_file() {
        let config = Config {
            save_interval: Some(50),
            workers: Some(4),
            ..Config::default()
        };
        let overrides = ConfigOverrides {
            workers: Some(2),
            ..ConfigOverrides::default()
        };
        let resolved = ConfigLoader::resolve_config(config, &overrides).unwrap();
        assert_eq!(resolved.scheduler.save_interval, 50);
        assert_eq!(resolved.scheduler.workers, 2);
    }
}
