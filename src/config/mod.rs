use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub tokens: TokenConfig,
    pub tenancy: TenancyConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// SQL engine family. Drives identifier quoting and DDL shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    pub fn default_port(self) -> u16 {
        match self {
            Dialect::Postgres => 5432,
            Dialect::MySql => 3306,
        }
    }

    pub fn url_scheme(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// Longest user name the engine accepts.
    pub fn max_user_len(self) -> usize {
        match self {
            Dialect::Postgres => 63,
            Dialect::MySql => 32,
        }
    }

    /// Longest database (schema) name the engine accepts.
    pub fn max_identifier_len(self) -> usize {
        match self {
            Dialect::Postgres => 63,
            Dialect::MySql => 64,
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(format!("unsupported dialect '{}'", other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url_scheme())
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(skip_serializing)]
    pub access_secret: String,
    #[serde(skip_serializing)]
    pub refresh_secret: String,
    pub algorithm: String,
    pub access_expires_in: String,
    pub refresh_expires_in: String,
    pub leeway_secs: u64,
    pub token_prefix: String,
    pub token_header: String,
    pub sweep_interval_secs: u64,
    pub password_hash_cost: u32,
}

impl TokenConfig {
    pub fn access_ttl(&self) -> Result<Duration, ConfigError> {
        parse_expiry("JWT_ACCESS_TOKEN_EXPIRES_IN", &self.access_expires_in)
    }

    pub fn refresh_ttl(&self) -> Result<Duration, ConfigError> {
        parse_expiry("JWT_REFRESH_TOKEN_EXPIRES_IN", &self.refresh_expires_in)
    }

    pub fn algorithm(&self) -> Result<jsonwebtoken::Algorithm, ConfigError> {
        let algorithm = jsonwebtoken::Algorithm::from_str(&self.algorithm).map_err(|e| {
            ConfigError::Invalid {
                key: "JWT_ALGORITHM",
                reason: e.to_string(),
            }
        })?;
        // Only shared-secret algorithms can be driven by the configured secrets.
        match algorithm {
            jsonwebtoken::Algorithm::HS256
            | jsonwebtoken::Algorithm::HS384
            | jsonwebtoken::Algorithm::HS512 => Ok(algorithm),
            other => Err(ConfigError::Invalid {
                key: "JWT_ALGORITHM",
                reason: format!("{:?} needs key material, only HS256/HS384/HS512 are supported", other),
            }),
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("algorithm", &self.algorithm)
            .field("access_expires_in", &self.access_expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("leeway_secs", &self.leeway_secs)
            .field("token_prefix", &self.token_prefix)
            .field("token_header", &self.token_header)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("password_hash_cost", &self.password_hash_cost)
            .finish_non_exhaustive()
    }
}

/// Parses expiry strings such as `15m`, `7d` or `1h 30m`.
fn parse_expiry(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    pub header_name: String,
    pub credentials: CredentialPolicy,
}

/// Shape of generated tenant database credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPolicy {
    pub username_words: usize,
    pub password_words: usize,
    pub password_digits: usize,
    pub separator: char,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            username_words: 3,
            password_words: 4,
            password_digits: 3,
            separator: '_',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. `from_env` uses
    /// the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(lookup)
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Database overrides
        if let Some(v) = lookup("DB_DIALECT") {
            if let Ok(dialect) = v.parse::<Dialect>() {
                self.database.dialect = dialect;
                self.database.port = dialect.default_port();
            }
        }
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.database.port = v.parse().unwrap_or(self.database.port);
        }
        if let Some(v) = lookup("DB_USERNAME") {
            self.database.username = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("DB_DATABASE") {
            self.database.database = v;
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = lookup("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Token overrides
        if let Some(v) = lookup("JWT_ACCESS_TOKEN_SECRET") {
            self.tokens.access_secret = v;
        }
        if let Some(v) = lookup("JWT_REFRESH_TOKEN_SECRET") {
            self.tokens.refresh_secret = v;
        }
        if let Some(v) = lookup("JWT_ACCESS_TOKEN_EXPIRES_IN") {
            self.tokens.access_expires_in = v;
        }
        if let Some(v) = lookup("JWT_REFRESH_TOKEN_EXPIRES_IN") {
            self.tokens.refresh_expires_in = v;
        }
        if let Some(v) = lookup("JWT_ALGORITHM") {
            self.tokens.algorithm = v;
        }
        if let Some(v) = lookup("JWT_LEEWAY_SECS") {
            self.tokens.leeway_secs = v.parse().unwrap_or(self.tokens.leeway_secs);
        }
        if let Some(v) = lookup("JWT_TOKEN_PREFIX") {
            self.tokens.token_prefix = v;
        }
        if let Some(v) = lookup("JWT_TOKEN_HEADER") {
            self.tokens.token_header = v;
        }
        if let Some(v) = lookup("TOKEN_SWEEP_INTERVAL_SECS") {
            self.tokens.sweep_interval_secs = v.parse().unwrap_or(self.tokens.sweep_interval_secs);
        }

        if let Some(v) = lookup("BCRYPT_COST") {
            self.tokens.password_hash_cost = v.parse().unwrap_or(self.tokens.password_hash_cost);
        }

        // Tenancy overrides
        if let Some(v) = lookup("TENANT_HEADER") {
            self.tenancy.header_name = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("TENANT_DB_USER_WORDS") {
            self.tenancy.credentials.username_words =
                v.parse().unwrap_or(self.tenancy.credentials.username_words);
        }
        if let Some(v) = lookup("TENANT_DB_PASSWORD_WORDS") {
            self.tenancy.credentials.password_words =
                v.parse().unwrap_or(self.tenancy.credentials.password_words);
        }

        // Server overrides
        if let Some(v) = lookup("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Some(v) = lookup("ALLOWED_ORIGINS") {
            self.server.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        self
    }

    /// Reports every missing required setting at once, then checks the
    /// values that must parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.tokens.access_secret.is_empty() {
            missing.push("JWT_ACCESS_TOKEN_SECRET");
        }
        if self.tokens.refresh_secret.is_empty() {
            missing.push("JWT_REFRESH_TOKEN_SECRET");
        }
        if self.database.host.is_empty() {
            missing.push("DB_HOST");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        self.tokens.access_ttl()?;
        self.tokens.refresh_ttl()?;
        self.tokens.algorithm()?;
        if !(4..=31).contains(&self.tokens.password_hash_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                reason: "cost must be between 4 and 31".to_string(),
            });
        }
        if self.tokens.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "TOKEN_SWEEP_INTERVAL_SECS",
                reason: "sweep interval must be at least one second".to_string(),
            });
        }

        if self.tenancy.header_name.is_empty() {
            return Err(ConfigError::Invalid {
                key: "TENANT_HEADER",
                reason: "header name cannot be empty".to_string(),
            });
        }
        if self.tenancy.credentials.username_words == 0 || self.tenancy.credentials.password_words == 0 {
            return Err(ConfigError::Invalid {
                key: "TENANT_DB_USER_WORDS",
                reason: "credential word counts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }

    fn base(environment: Environment) -> Self {
        Self {
            environment,
            database: DatabaseConfig {
                dialect: Dialect::Postgres,
                host: "localhost".to_string(),
                port: Dialect::Postgres.default_port(),
                username: "postgres".to_string(),
                password: String::new(),
                database: "tenant_master".to_string(),
                max_connections: 10,
                connection_timeout: 30,
            },
            tokens: TokenConfig {
                access_secret: String::new(),
                refresh_secret: String::new(),
                algorithm: "HS256".to_string(),
                access_expires_in: "15m".to_string(),
                refresh_expires_in: "7d".to_string(),
                leeway_secs: 0,
                token_prefix: "Bearer".to_string(),
                token_header: "authorization".to_string(),
                sweep_interval_secs: 3600,
                password_hash_cost: bcrypt::DEFAULT_COST,
            },
            tenancy: TenancyConfig {
                header_name: "x-tenant-id".to_string(),
                credentials: CredentialPolicy::default(),
            },
            server: ServerConfig {
                port: 3000,
                cors_origins: vec!["*".to_string()],
            },
        }
    }

    pub(crate) fn development() -> Self {
        Self::base(Environment::Development)
    }

    fn staging() -> Self {
        let mut config = Self::base(Environment::Staging);
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.server.cors_origins = vec!["https://staging.example.com".to_string()];
        config
    }

    fn production() -> Self {
        let mut config = Self::base(Environment::Production);
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.tokens.sweep_interval_secs = 900;
        config.tenancy.credentials.password_words = 5;
        config.server.cors_origins = vec!["https://app.example.com".to_string()];
        config
    }
}
