use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("both HOTELBOOK_TLS_CERT and HOTELBOOK_TLS_KEY must be set, or neither")]
    PartialTls,
}

/// Server settings, read from `HOTELBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsPaths>,
    pub seed_demo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls = match (lookup("HOTELBOOK_TLS_CERT"), lookup("HOTELBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::PartialTls),
        };

        Ok(Self {
            port: parse_or(&lookup, "HOTELBOOK_PORT", 5433)?,
            bind: lookup("HOTELBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("HOTELBOOK_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            user: lookup("HOTELBOOK_USER").unwrap_or_else(|| "hotelbook".into()),
            password: lookup("HOTELBOOK_PASSWORD").unwrap_or_else(|| "hotelbook".into()),
            max_connections: parse_or(&lookup, "HOTELBOOK_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "HOTELBOOK_COMPACT_THRESHOLD", 1000)?,
            lock_timeout: Duration::from_millis(parse_or(&lookup, "HOTELBOOK_LOCK_TIMEOUT_MS", 2000)?),
            metrics_port: parse_opt(&lookup, "HOTELBOOK_METRICS_PORT")?,
            tls,
            seed_demo: parse_or(&lookup, "HOTELBOOK_SEED_DEMO", false)?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hotelbook.wal")
    }
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    let parsed: Result<T, T::Err> = value.trim().parse();
    match parsed {
        Ok(v) => Ok(Some(v)),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}
