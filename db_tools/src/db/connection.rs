//! Database connection handling
//!
//! This module provides functionality to establish and manage database connections.

use serde::{Deserialize, Serialize};
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    MySql, Pool, Sqlite,
};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::utils::naming;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// SQL dialect spoken by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::MySql => "mysql",
            Platform::Sqlite => "sqlite",
        }
    }

    /// Whether the platform groups tables into several namespaces
    pub fn supports_namespaces(&self) -> bool {
        matches!(self, Platform::Sqlite)
    }

    pub fn max_identifier_length(&self) -> usize {
        naming::get_max_identifier_length(self.name())
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        naming::format_sql_identifier(name, self.name())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches("pdo_").to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Platform::MySql),
            "sqlite" | "sqlite3" => Ok(Platform::Sqlite),
            other => Err(Error::DatabaseError(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }
}

/// Process-unique identity of a connection, stable across clones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Pool for one of the supported databases
#[derive(Debug, Clone)]
pub enum DatabasePool {
    MySql(Pool<MySql>),
    Sqlite(Pool<Sqlite>),
}

/// A live database connection
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    id: ConnectionId,
    pool: DatabasePool,
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or(5);
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));
        let platform = config.platform()?;

        let pool = match platform {
            Platform::MySql => {
                let options = match &config.url {
                    Some(url) => MySqlConnectOptions::from_str(url)?,
                    None => {
                        let mut options = MySqlConnectOptions::new()
                            .host(config.host.as_deref().unwrap_or(crate::config::DEFAULT_HOST))
                            .port(config.port.unwrap_or(crate::config::DEFAULT_PORT));
                        if let Some(username) = &config.username {
                            options = options.username(username);
                        }
                        if let Some(password) = &config.password {
                            options = options.password(password);
                        }
                        if let Some(database) = &config.database {
                            options = options.database(database);
                        }
                        if let Some(charset) = &config.charset {
                            options = options.charset(charset);
                        }
                        if let Some(socket) = &config.socket {
                            options = options.socket(socket);
                        }
                        options
                    }
                };
                let pool = MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;
                DatabasePool::MySql(pool)
            }
            Platform::Sqlite => {
                let url = match (&config.url, &config.database) {
                    (Some(url), _) => url.clone(),
                    (None, Some(database)) if database == ":memory:" => {
                        "sqlite::memory:".to_string()
                    }
                    (None, Some(database)) => format!("sqlite://{}", database),
                    (None, None) => {
                        return Err(Error::ConfigError(
                            "sqlite connections need a url or a database path".to_string(),
                        ))
                    }
                };
                let in_memory = url.contains(":memory:") || url.contains("mode=memory");
                let options = SqliteConnectOptions::from_str(&url)?.foreign_keys(true);
                // every pooled connection to an in-memory database would see its own database
                let pool = SqlitePoolOptions::new()
                    .max_connections(if in_memory { 1 } else { pool_size })
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;
                DatabasePool::Sqlite(pool)
            }
        };

        let connection = Self::from_pool(pool);
        tracing::debug!(
            connection = %connection.id,
            platform = %connection.platform(),
            "Connected to database"
        );
        Ok(connection)
    }

    /// Wrap an existing pool, assigning it a fresh identity
    pub fn from_pool(pool: DatabasePool) -> Self {
        Self {
            id: ConnectionId::next(),
            pool,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn platform(&self) -> Platform {
        match self.pool {
            DatabasePool::MySql(_) => Platform::MySql,
            DatabasePool::Sqlite(_) => Platform::Sqlite,
        }
    }

    /// Execute a SQL statement
    pub async fn execute(&self, sql: &str) -> Result<()> {
        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
        }
        Ok(())
    }
}
