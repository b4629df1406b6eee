//! Configuration handling for db_tools
//!
//! Connection settings come from the `--connection` flag, a TOML file, or
//! environment variables (optionally loaded from a `.env` file).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::db::connection::Platform;
use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_CHARSET: &str = "utf8";

/// Cluster hosts are numbered from 1 up to this bound
const MAX_CLUSTER_HOSTS: usize = 1000;

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;

    Ok(config)
}

/// Represents the complete db_tools configuration
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub schema: SchemaConfig,
    pub logging: Option<LoggingConfig>,
}

/// Database connection configuration
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: Option<String>,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub charset: Option<String>,
    pub socket: Option<String>,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl DatabaseConfig {
    /// Configuration for a full connection URL
    pub fn from_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    /// Configuration for a SQLite file, or `:memory:`
    pub fn sqlite(path: &str) -> Self {
        Self {
            driver: Some("sqlite".to_string()),
            database: Some(path.to_string()),
            ..Default::default()
        }
    }

    /// Platform named by the driver, or by the URL scheme
    pub fn platform(&self) -> Result<Platform> {
        if let Some(driver) = &self.driver {
            return driver.parse();
        }
        match &self.url {
            Some(url) => {
                let scheme = url.split(':').next().unwrap_or_default();
                scheme.parse()
            }
            None => Ok(Platform::MySql),
        }
    }

    /// Short description safe for logs (no password)
    pub fn describe(&self) -> String {
        if let Some(url) = &self.url {
            return match url.rfind('@') {
                Some(at) => {
                    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                    format!("{}***{}", &url[..scheme_end], &url[at..])
                }
                None => url.clone(),
            };
        }
        format!(
            "{}:{}/{}",
            self.host.as_deref().unwrap_or(DEFAULT_HOST),
            self.port.unwrap_or(DEFAULT_PORT),
            self.database.as_deref().unwrap_or_default()
        )
    }

    /// Resolve the connection from `{prefix}DB_*` variables
    pub fn from_env<F>(prefix: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("{}{}", prefix, name));
        if let Some(dsn) = var("DB_DSN") {
            return Ok(Self::from_url(&dsn));
        }

        let driver = var("DB_DRIVER")
            .unwrap_or_else(|| "mysql".to_string())
            .to_lowercase();
        let mut config = Self {
            username: var("DB_USERNAME").or_else(|| var("DB_USER")),
            password: var("DB_PASSWORD").or_else(|| var("DB_PASS")),
            database: var("DB_DATABASE").or_else(|| var("DB_NAME")),
            ..Default::default()
        };
        if driver.parse::<Platform>()? == Platform::MySql {
            config.host = Some(
                env("MYSQL_PORT_3306_TCP_ADDR")
                    .or_else(|| var("DB_HOST"))
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            );
            config.port = Some(parse_port(
                env("MYSQL_PORT_3306_TCP_PORT").or_else(|| var("DB_PORT")),
            )?);
            config.charset = Some(var("DB_CHARSET").unwrap_or_else(|| DEFAULT_CHARSET.to_string()));
            config.socket = var("DB_SOCKET");
        }
        config.driver = Some(driver);
        Ok(config)
    }

    /// Resolve cluster hosts from `{prefix}DB{n}_*` variables, stopping at the first gap
    pub fn cluster_from_env<F>(prefix: &str, env: F) -> Result<Vec<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("{}{}", prefix, name));
        let mut hosts = Vec::new();
        for index in 1..=MAX_CLUSTER_HOSTS {
            let numbered = |name: &str| var(&format!("DB{}_{}", index, name));
            if let Some(dsn) = numbered("DSN") {
                hosts.push(Self::from_url(&dsn));
                continue;
            }
            let Some(host) = numbered("HOST") else {
                break;
            };

            let driver = var("DB_DRIVER")
                .unwrap_or_else(|| "mysql".to_string())
                .to_lowercase();
            let mut config = Self {
                username: numbered("USER").or_else(|| var("DB_USER")),
                password: numbered("PASS").or_else(|| var("DB_PASS")),
                database: numbered("NAME").or_else(|| var("DB_NAME")),
                ..Default::default()
            };
            if driver.parse::<Platform>()? == Platform::MySql {
                config.host = Some(host);
                config.port = Some(parse_port(numbered("PORT"))?);
                config.charset =
                    Some(var("DB_CHARSET").unwrap_or_else(|| DEFAULT_CHARSET.to_string()));
                config.socket = numbered("SOCKET").or_else(|| var("DB_SOCKET"));
            }
            config.driver = Some(driver);
            hosts.push(config);
        }
        Ok(hosts)
    }
}

fn parse_port(value: Option<String>) -> Result<u16> {
    match value {
        Some(port) => port
            .trim()
            .parse()
            .map_err(|_| Error::ConfigError(format!("invalid port '{}'", port))),
        None => Ok(DEFAULT_PORT),
    }
}

/// Read a variable from the process environment; empty values count as unset
pub fn system_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Load a `.env` file (or `<dir>/.env`) into the process environment.
/// Without a path, `./.env` is loaded when it exists.
pub fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) if path.is_file() => {
            dotenv::from_path(path)
                .map_err(|e| Error::ConfigError(format!("Cannot load env file: {}", e)))?;
        }
        Some(path) if path.is_dir() => {
            let file = path.join(".env");
            if file.is_file() {
                dotenv::from_path(&file)
                    .map_err(|e| Error::ConfigError(format!("Cannot load env file: {}", e)))?;
            }
        }
        Some(path) => {
            return Err(Error::ConfigError(format!(
                "Cannot load env: file {} does not exist",
                path.display()
            )))
        }
        None => {
            if Path::new(".env").is_file() {
                dotenv::dotenv()
                    .map_err(|e| Error::ConfigError(format!("Cannot load env file: {}", e)))?;
            }
        }
    }
    Ok(())
}

/// Schema definition settings
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct SchemaConfig {
    /// Definition file used when `--target` is not given
    pub target: Option<String>,
    /// Storage engine for tables whose definition names none
    pub engine: Option<String>,
    /// Column collation treated as the platform default when comparing
    pub default_collation: Option<String>,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default = "default_true")]
    pub include_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            format: default_log_format(),
            stdout: false,
            include_timestamps: true,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn dsn_wins_over_parts() {
        let config = DatabaseConfig::from_env(
            "",
            env(&[("DB_DSN", "mysql://u:p@db/app"), ("DB_HOST", "ignored")]),
        )
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("mysql://u:p@db/app"));
        assert_eq!(config.platform().unwrap(), Platform::MySql);
        assert_eq!(config.describe(), "mysql://***@db/app");
    }

    #[test]
    fn mysql_parts_with_prefix_and_defaults() {
        let config = DatabaseConfig::from_env(
            "APP_",
            env(&[
                ("APP_DB_USER", "app"),
                ("APP_DB_PASS", "secret"),
                ("APP_DB_NAME", "shop"),
                ("DB_HOST", "not-prefixed"),
            ]),
        )
        .unwrap();
        assert_eq!(config.driver.as_deref(), Some("mysql"));
        assert_eq!(config.host.as_deref(), Some(DEFAULT_HOST));
        assert_eq!(config.port, Some(DEFAULT_PORT));
        assert_eq!(config.username.as_deref(), Some("app"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.database.as_deref(), Some("shop"));
        assert_eq!(config.charset.as_deref(), Some("utf8"));
    }

    #[test]
    fn linked_container_variables_take_precedence() {
        let config = DatabaseConfig::from_env(
            "",
            env(&[
                ("DB_HOST", "db"),
                ("MYSQL_PORT_3306_TCP_ADDR", "10.0.0.2"),
                ("MYSQL_PORT_3306_TCP_PORT", "3307"),
            ]),
        )
        .unwrap();
        assert_eq!(config.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(config.port, Some(3307));
    }

    #[test]
    fn sqlite_parts_skip_network_settings() {
        let config =
            DatabaseConfig::from_env("", env(&[("DB_DRIVER", "sqlite"), ("DB_NAME", "a.db")]))
                .unwrap();
        assert_eq!(config.platform().unwrap(), Platform::Sqlite);
        assert_eq!(config.host, None);
        assert_eq!(config.database.as_deref(), Some("a.db"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = DatabaseConfig::from_env("", env(&[("DB_PORT", "abc")])).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn cluster_hosts_stop_at_first_gap() {
        let hosts = DatabaseConfig::cluster_from_env(
            "",
            env(&[
                ("DB1_DSN", "mysql://a/app"),
                ("DB2_HOST", "b"),
                ("DB2_PORT", "3310"),
                ("DB_USER", "shared"),
                ("DB_NAME", "app"),
                ("DB4_HOST", "unreachable"),
            ]),
        )
        .unwrap();

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].url.as_deref(), Some("mysql://a/app"));
        assert_eq!(hosts[1].host.as_deref(), Some("b"));
        assert_eq!(hosts[1].port, Some(3310));
        assert_eq!(hosts[1].username.as_deref(), Some("shared"));
    }

    #[test]
    fn config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[database]
driver = "sqlite"
database = ":memory:"

[schema]
target = "schema.yaml"
engine = "InnoDB"

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.database.unwrap().platform().unwrap(), Platform::Sqlite);
        assert_eq!(config.schema.engine.as_deref(), Some("InnoDB"));
        let logging = config.logging.unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, "text");
    }
}
