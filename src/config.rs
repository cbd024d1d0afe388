//! Service configuration.
//!
//! Defaults suit local development. Each field can be overridden by an
//! environment variable named `{PREFIX}_{SECTION}_{FIELD}`, e.g.
//! `BOOKS_API_READ_TIMEOUT=10s` or `BOOKS_DB_HOST=db:5432`. A `.env` file in
//! the working directory is read first when present.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading .env: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("failed to parse environment variable {var}: {reason}")]
    Env { var: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub db: DbConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub debug_host: String,
    #[serde(with = "duration")]
    pub read_timeout: Duration,
    #[serde(with = "duration")]
    pub shutdown_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0:3000".into(),
            debug_host: "0.0.0.0:4000".into(),
            read_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub user: String,
    pub pass: String,
    /// `host` or `host:port`.
    pub host: String,
    pub name: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            user: "postgres".into(),
            pass: "password".into(),
            host: "localhost".into(),
            name: "bds".into(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub secret: String,
    /// `iss` stamped on issued tokens and required on incoming ones.
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { secret: "local-development-secret".into(), issuer: "bds-api".into() }
    }
}

const MASK: &str = "******";

impl Config {
    /// Reads `.env` if present, then applies `{prefix}_*` environment overrides.
    pub fn load(prefix: &str) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Self::from_lookup(prefix, |var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let env = Env { prefix: prefix.to_uppercase(), lookup };

        env.string("API", "HOST", &mut cfg.api.host);
        env.string("API", "DEBUG_HOST", &mut cfg.api.debug_host);
        env.duration("API", "READ_TIMEOUT", &mut cfg.api.read_timeout)?;
        env.duration("API", "SHUTDOWN_TIMEOUT", &mut cfg.api.shutdown_timeout)?;

        env.string("DB", "USER", &mut cfg.db.user);
        env.string("DB", "PASS", &mut cfg.db.pass);
        env.string("DB", "HOST", &mut cfg.db.host);
        env.string("DB", "NAME", &mut cfg.db.name);
        env.parsed("DB", "MAX_CONNECTIONS", &mut cfg.db.max_connections)?;

        env.string("AUTH", "SECRET", &mut cfg.auth.secret);
        env.string("AUTH", "ISSUER", &mut cfg.auth.issuer);

        Ok(cfg)
    }

    /// JSON rendering with the database password and signing secret masked.
    pub fn redacted(&self) -> String {
        let mut masked = self.clone();
        masked.db.pass = MASK.into();
        masked.auth.secret = MASK.into();
        serde_json::to_string(&masked).unwrap_or_else(|e| format!("<unrenderable config: {e}>"))
    }
}

struct Env<F> {
    prefix: String,
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, section: &str, field: &str) -> Option<(String, String)> {
        let var = format!("{}_{section}_{field}", self.prefix);
        let value = (self.lookup)(&var)?;
        Some((var, value))
    }

    fn string(&self, section: &str, field: &str, target: &mut String) {
        if let Some((_, value)) = self.get(section, field) {
            *target = value;
        }
    }

    fn parsed<T>(&self, section: &str, field: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some((var, value)) = self.get(section, field) {
            *target = value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::Env { var, reason: e.to_string() })?;
        }
        Ok(())
    }

    fn duration(&self, section: &str, field: &str, target: &mut Duration) -> Result<(), ConfigError> {
        if let Some((var, value)) = self.get(section, field) {
            *target = parse_duration(&value).map_err(|reason| ConfigError::Env { var, reason })?;
        }
        Ok(())
    }
}

/// Accepts `500ms`, `30s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let n: u64 = digits.parse().map_err(|_| format!("`{raw}` is not a duration"))?;
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        other => Err(format!("unknown duration unit `{other}`")),
    }
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if d.subsec_millis() == 0 {
            s.serialize_str(&format!("{}s", d.as_secs()))
        } else {
            s.serialize_str(&format!("{}ms", d.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
