use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::HookVersion;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Alternate databases selectable with `--db-mode <name>`.
    #[serde(default)]
    pub modes: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Hook versions below this value write the abstract as a single
    /// `ABSTRACT | text` line; newer hooks write an `<ABSTRACT>` block.
    /// Written as a version string, e.g. `"2.0"`.
    #[serde(default = "default_legacy_abstract_below")]
    pub legacy_abstract_below: HookVersion,
    #[serde(default = "default_na_token")]
    pub na_token: String,
    #[serde(default = "default_dev_token")]
    pub dev_token: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            legacy_abstract_below: default_legacy_abstract_below(),
            na_token: default_na_token(),
            dev_token: default_dev_token(),
        }
    }
}

fn default_legacy_abstract_below() -> HookVersion {
    HookVersion::new(2, 0)
}
fn default_na_token() -> String {
    "N/A".to_string()
}
fn default_dev_token() -> String {
    "DEV".to_string()
}

impl Config {
    /// Config pointing at a single database with default ingest settings.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: path.into(),
                modes: BTreeMap::new(),
            },
            ingest: IngestConfig::default(),
        }
    }

    /// Swap the active database for the one registered under `mode`.
    pub fn select_db_mode(&mut self, mode: &str) -> Result<()> {
        let path = self.db.modes.get(mode).cloned().with_context(|| {
            let known: Vec<&str> = self.db.modes.keys().map(String::as_str).collect();
            format!(
                "Unknown db mode '{}'. Configured modes: [{}]",
                mode,
                known.join(", ")
            )
        })?;
        self.db.path = path;
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.ingest.na_token.trim().is_empty() || config.ingest.dev_token.trim().is_empty() {
        anyhow::bail!("ingest.na_token and ingest.dev_token must not be empty");
    }

    if config
        .ingest
        .na_token
        .eq_ignore_ascii_case(&config.ingest.dev_token)
    {
        anyhow::bail!(
            "ingest.na_token and ingest.dev_token must differ (both are '{}')",
            config.ingest.na_token
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(tmp: &TempDir, body: &str) -> PathBuf {
        let p = tmp.path().join("tkt.toml");
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn test_defaults_applied() {
        let tmp = TempDir::new().unwrap();
        let p = write(&tmp, "[db]\npath = \"data/tkt.sqlite\"\n");
        let cfg = load_config(&p).unwrap();
        assert_eq!(cfg.ingest.legacy_abstract_below, HookVersion::new(2, 0));
        assert_eq!(cfg.ingest.na_token, "N/A");
        assert_eq!(cfg.ingest.dev_token, "DEV");
        assert!(cfg.db.modes.is_empty());
    }

    #[test]
    fn test_db_mode_selection() {
        let tmp = TempDir::new().unwrap();
        let p = write(
            &tmp,
            "[db]\npath = \"prod.sqlite\"\n[db.modes]\ntest = \"test.sqlite\"\n",
        );
        let mut cfg = load_config(&p).unwrap();
        cfg.select_db_mode("test").unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("test.sqlite"));
        let err = cfg.select_db_mode("staging").unwrap_err();
        assert!(err.to_string().contains("Unknown db mode 'staging'"));
    }

    #[test]
    fn test_legacy_threshold_is_a_version_string() {
        let tmp = TempDir::new().unwrap();
        let p = write(
            &tmp,
            "[db]\npath = \"x.sqlite\"\n[ingest]\nlegacy_abstract_below = \"2.10\"\n",
        );
        let cfg = load_config(&p).unwrap();
        assert_eq!(cfg.ingest.legacy_abstract_below, HookVersion::new(2, 10));

        let p = write(
            &tmp,
            "[db]\npath = \"x.sqlite\"\n[ingest]\nlegacy_abstract_below = \"two\"\n",
        );
        assert!(load_config(&p).is_err());
    }

    #[test]
    fn test_rejects_identical_sentinels() {
        let tmp = TempDir::new().unwrap();
        let p = write(
            &tmp,
            "[db]\npath = \"x.sqlite\"\n[ingest]\nna_token = \"dev\"\ndev_token = \"DEV\"\n",
        );
        assert!(load_config(&p).is_err());
    }
}
