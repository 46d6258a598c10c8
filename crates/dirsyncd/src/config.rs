//! Typed configuration (spec.md §1 places parsing the textual
//! `syncrepl` directive out of scope; this loads the already-typed
//! TOML form described in SPEC_FULL.md §3.3).

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use dirsync_node::retry::{RetrySchedule, RetryStep};
use dirsync_primitives::{Dialect, Dn, OperatingMode, ServerId};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("source rid {0} is out of the 0..=4095 range")]
    RidOutOfRange(u32),

    #[error("duplicate source rid {0}")]
    DuplicateRid(u32),

    #[error("source rid {rid}: {reason}")]
    Invalid { rid: u32, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "dirsyncd=info,dirsync_=info".to_owned()
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub suffix: String,
    pub context_dn: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetryStepConfig {
    pub interval_secs: u64,
    /// Absent means this step repeats forever once reached.
    pub attempts: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    pub rid: u32,
    pub provider: String,
    pub base_dn: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_filter")]
    pub filter: String,
    pub mode: OperatingMode,
    pub dialect: Dialect,
    pub interval_secs: u64,
    #[serde(default)]
    pub retry: Vec<RetryStepConfig>,
    #[serde(default)]
    pub attrs: Vec<String>,
    #[serde(default)]
    pub exattrs: Vec<String>,
    pub log_base: Option<String>,
    pub log_filter: Option<String>,
    #[serde(default)]
    pub manage_dsa_it: bool,
    pub size_limit: Option<usize>,
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub lazy_commit: bool,
    #[serde(default)]
    pub strict_refresh: bool,
}

fn default_scope() -> String {
    "subtree".to_owned()
}

fn default_filter() -> String {
    "(objectClass=*)".to_owned()
}

impl SourceConfig {
    #[must_use]
    pub fn retry_schedule(&self) -> RetrySchedule {
        if self.retry.is_empty() {
            return RetrySchedule::new(vec![RetryStep::new(
                Duration::from_secs(self.interval_secs.max(1)),
                None,
            )]);
        }
        RetrySchedule::new(
            self.retry
                .iter()
                .map(|step| RetryStep::new(Duration::from_secs(step.interval_secs), step.attempts))
                .collect(),
        )
    }

    fn validate(&self) -> ConfigResult<()> {
        if ServerId::new(i32::try_from(self.rid).unwrap_or(i32::MAX)).is_err() {
            return Err(ConfigError::RidOutOfRange(self.rid));
        }
        if self.dialect == Dialect::Plain && (self.log_base.is_some() || self.log_filter.is_some()) {
            return Err(ConfigError::Invalid {
                rid: self.rid,
                reason: "plain dialect does not read a change log; log_base/log_filter are unused"
                    .into(),
            });
        }
        if self.dialect != Dialect::Plain && self.log_base.is_none() {
            return Err(ConfigError::Invalid {
                rid: self.rid,
                reason: "access-log/change-log dialects require log_base".into(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub database: DatabaseConfig,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    pub fn load(path: &Utf8Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        let mut seen = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            source.validate()?;
            if seen.contains(&source.rid) {
                return Err(ConfigError::DuplicateRid(source.rid));
            }
            seen.push(source.rid);
        }
        Ok(())
    }

    #[must_use]
    pub fn suffix(&self) -> Dn {
        Dn::new(self.database.suffix.clone())
    }

    #[must_use]
    pub fn context_dn(&self) -> Dn {
        Dn::new(self.database.context_dn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_rids() {
        let toml_text = r#"
            [database]
            suffix = "dc=example,dc=com"
            context_dn = "dc=example,dc=com"

            [[source]]
            rid = 1
            provider = "ldap://a"
            base_dn = "dc=example,dc=com"
            mode = "refresh-and-persist"
            dialect = "plain"
            interval_secs = 60

            [[source]]
            rid = 1
            provider = "ldap://b"
            base_dn = "dc=example,dc=com"
            mode = "refresh-only"
            dialect = "plain"
            interval_secs = 60
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateRid(1))));
    }

    #[test]
    fn delta_dialect_without_log_base_is_rejected() {
        let toml_text = r#"
            [database]
            suffix = "dc=example,dc=com"
            context_dn = "dc=example,dc=com"

            [[source]]
            rid = 1
            provider = "ldap://a"
            base_dn = "dc=example,dc=com"
            mode = "refresh-and-persist"
            dialect = "change-log"
            interval_secs = 60
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert!(config.validate().is_err());
    }
}
