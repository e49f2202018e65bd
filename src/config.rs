//! Configuration loading and validation.
//!
//! Values come from a TOML file merged with `DB_HEALTHCHECK_*` environment
//! variables. Keys are flat so existing probe configs carry over unchanged.

use anyhow::Context;
use bitflags::bitflags;
use chrono_tz::Tz;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use crate::record::ProbeSchema;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/db-healthcheck/healthcheck.toml";

/// Prefix for environment overrides, e.g. `DB_HEALTHCHECK_DB_HOST`
pub const ENV_PREFIX: &str = "DB_HEALTHCHECK_";

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Root configuration for one probe invocation.
#[derive(custom_debug_derive::Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub database: DatabaseConfig,

    #[serde(flatten)]
    pub syslog: SyslogConfig,

    /// Whether the table has a `src_ip_addr` column.
    #[serde(default = "default_true")]
    pub record_source_address: bool,

    /// Whether the table has an `app_name` column.
    #[serde(default = "default_true")]
    pub record_application_name: bool,

    /// Overrides the local host name written to the `hostname` column.
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub hostname: Option<String>,

    /// IANA zone for the `date` column; local time when unset.
    #[serde(default, deserialize_with = "deserialize_timezone")]
    #[debug(skip_if = Option::is_none)]
    pub timezone: Option<Tz>,

    #[serde(default)]
    pub response_mode: ResponseMode,

    /// Level for the `db_healthcheck` target when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Connection target for the probe.
#[derive(custom_debug_derive::Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub db_host: String,
    pub db_user: String,
    #[debug(skip)]
    pub db_password: String,
    pub db_database: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_table: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub ssl_key: Option<PathBuf>,
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub ssl_cert: Option<PathBuf>,
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub ssl_ca: Option<PathBuf>,
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub ssl_capath: Option<PathBuf>,
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub ssl_cipher: Option<String>,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

/// Syslog identity used for the failure line.
#[derive(Debug, Clone, Deserialize)]
pub struct SyslogConfig {
    #[serde(default = "default_syslog_ident")]
    pub syslog_ident: String,
    #[serde(default = "default_syslog_facility")]
    pub syslog_facility: String,
    #[serde(default = "default_syslog_options")]
    pub syslog_options: SyslogOptions,
}

bitflags! {
    /// `openlog(3)` option flags, written in config as e.g. `"PID | NDELAY"`.
    ///
    /// `PID` and `NDELAY` describe what the socket backend always does;
    /// `PERROR` additionally copies the entry to stderr. The rest are accepted
    /// for compatibility and have no effect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SyslogOptions: u8 {
        const PID = 1;
        const CONS = 1 << 1;
        const ODELAY = 1 << 2;
        const NDELAY = 1 << 3;
        const NOWAIT = 1 << 4;
        const PERROR = 1 << 5;
    }
}

/// How the response status is written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Non-parsed-header script: a literal `HTTP/1.0 <code> <reason>` line.
    #[default]
    Nph,
    /// Regular CGI: a `Status: <code> <reason>` header.
    Cgi,
}

fn default_true() -> bool {
    true
}

fn default_db_port() -> u16 {
    3306
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_syslog_ident() -> String {
    "db-healthcheck".to_owned()
}

fn default_syslog_facility() -> String {
    "user".to_owned()
}

fn default_syslog_options() -> SyslogOptions {
    SyslogOptions::PID | SyslogOptions::NDELAY
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_owned()
}

fn deserialize_timezone<'de, D>(deserializer: D) -> Result<Option<Tz>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|name| {
            name.parse::<Tz>()
                .map_err(|e| serde::de::Error::custom(format!("unknown timezone {name:?}: {e}")))
        })
        .transpose()
}

impl Config {
    /// Load from `path` plus environment overrides, then run semantic checks.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file_exact(path))
            .merge(Env::prefixed(ENV_PREFIX));
        Self::from_figment(&figment)
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    }

    pub fn from_figment(figment: &Figment) -> anyhow::Result<Self> {
        let config: Config = figment.extract().context("failed to parse configuration")?;
        let problems = config.validate();
        if !problems.is_empty() {
            anyhow::bail!("invalid configuration: {}", problems.join(", "));
        }
        Ok(config)
    }

    pub fn schema(&self) -> ProbeSchema {
        ProbeSchema {
            source_address: self.record_source_address,
            application_name: self.record_application_name,
        }
    }

    /// Semantic checks serde cannot express. Returns every problem, not just the first.
    pub fn validate(&self) -> Vec<String> {
        static TABLE_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_$]{1,64}$").unwrap());

        let db = &self.database;
        let mut problems = Vec::new();

        if db.db_host.trim().is_empty() {
            problems.push("db_host must not be empty".to_owned());
        }
        if db.db_port == 0 {
            problems.push("db_port must be between 1 and 65535".to_owned());
        }
        if !TABLE_RE.is_match(&db.db_table) {
            problems.push(format!("db_table {:?} is not a plain table identifier", db.db_table));
        }
        if db.connection_timeout == 0 {
            problems.push("connection_timeout must be at least 1 second".to_owned());
        }
        if db.ssl {
            for (key, path) in [("ssl_key", &db.ssl_key), ("ssl_cert", &db.ssl_cert), ("ssl_ca", &db.ssl_ca)] {
                if let Some(path) = path
                    && !path.is_file()
                {
                    problems.push(format!("{key} {} is not a readable file", path.display()));
                }
            }
            if db.ssl_key.is_some() != db.ssl_cert.is_some() {
                problems.push("ssl_key and ssl_cert must be set together".to_owned());
            }
        }
        if self.syslog.syslog_ident.is_empty() {
            problems.push("syslog_ident must not be empty".to_owned());
        }
        if ::syslog::Facility::from_str(&self.syslog.syslog_facility).is_err() {
            problems.push(format!(
                "syslog_facility {:?} is not a known facility",
                self.syslog.syslog_facility
            ));
        }
        if let Some(hostname) = &self.hostname
            && hostname.trim().is_empty()
        {
            problems.push("hostname override must not be empty".to_owned());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const MINIMAL: &str = r#"
        db_host = "db01.example.net"
        db_user = "probe"
        db_password = "s3cret"
        db_database = "monitoring"
        db_table = "healthcheck"
    "#;

    #[test]
    fn minimal_file_gets_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("healthcheck.toml", MINIMAL)?;
            let config = Config::load(Path::new("healthcheck.toml")).map_err(|e| e.to_string())?;

            assert_eq!(config.database.db_port, 3306);
            assert_eq!(config.database.connect_timeout(), Duration::from_secs(5));
            assert!(!config.database.ssl);
            assert_eq!(config.syslog.syslog_ident, "db-healthcheck");
            assert_eq!(config.syslog.syslog_options, SyslogOptions::PID | SyslogOptions::NDELAY);
            assert_eq!(config.response_mode, ResponseMode::Nph);
            assert_eq!(
                config.schema(),
                ProbeSchema {
                    source_address: true,
                    application_name: true
                }
            );
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("healthcheck.toml", MINIMAL)?;
            jail.set_env("DB_HEALTHCHECK_DB_PORT", "3307");
            jail.set_env("DB_HEALTHCHECK_RESPONSE_MODE", "cgi");
            let config = Config::load(Path::new("healthcheck.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.database.db_port, 3307);
            assert_eq!(config.response_mode, ResponseMode::Cgi);
            Ok(())
        });
    }

    #[test]
    fn syslog_options_parse_from_flag_expression() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "healthcheck.toml",
                &format!(
                    "{MINIMAL}\nsyslog_facility = \"local3\"\nsyslog_options = \"PID | PERROR\"\ntimezone = \"Europe/Zurich\"\n"
                ),
            )?;
            let config = Config::load(Path::new("healthcheck.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.syslog.syslog_options, SyslogOptions::PID | SyslogOptions::PERROR);
            assert_eq!(config.timezone, Some(chrono_tz::Europe::Zurich));
            Ok(())
        });
    }

    #[test]
    fn semantic_problems_are_all_reported() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "healthcheck.toml",
                r#"
                    db_host = ""
                    db_user = "probe"
                    db_password = "x"
                    db_database = "monitoring"
                    db_table = "health`check"
                    db_port = 0
                    syslog_facility = "nonsense"
                "#,
            )?;
            let err = Config::load(Path::new("healthcheck.toml")).unwrap_err();
            let message = format!("{err:#}");
            assert!(message.contains("db_host must not be empty"), "{message}");
            assert!(message.contains("db_port must be between"), "{message}");
            assert!(message.contains("not a plain table identifier"), "{message}");
            assert!(message.contains("not a known facility"), "{message}");
            Ok(())
        });
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "healthcheck.toml",
                &format!("{MINIMAL}\ntimezone = \"Mars/Olympus_Mons\"\n"),
            )?;
            assert!(Config::load(Path::new("healthcheck.toml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn debug_output_hides_password() {
        Jail::expect_with(|jail| {
            jail.create_file("healthcheck.toml", MINIMAL)?;
            let config = Config::load(Path::new("healthcheck.toml")).map_err(|e| e.to_string())?;
            let rendered = format!("{config:?}");
            assert!(!rendered.contains("s3cret"), "{rendered}");
            assert!(rendered.contains("db01.example.net"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_named_as_the_cause() {
        Jail::expect_with(|_| {
            let err = Config::load(Path::new("nonexistent.toml")).unwrap_err();
            let message = format!("{err:#}");
            assert!(message.contains("nonexistent.toml"), "{message}");
            assert!(!message.contains("missing field"), "{message}");
            Ok(())
        });
    }
}
