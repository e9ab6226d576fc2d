use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::model::BookingStatus;

/// Server settings, read once from `SLOTLEDGER_*` environment variables.
/// Unparsable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub store_timeout: Duration,
    pub cache_ttl: Duration,
    pub initial_status: BookingStatus,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotledger".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            store_timeout: Duration::from_millis(2000),
            cache_ttl: Duration::from_secs(300),
            initial_status: BookingStatus::Confirmed,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let initial_status = match lookup("SLOTLEDGER_INITIAL_STATUS") {
            Some(s) => match BookingStatus::parse(&s) {
                Some(st @ (BookingStatus::Pending | BookingStatus::Confirmed)) => st,
                _ => {
                    warn!("SLOTLEDGER_INITIAL_STATUS={s:?} ignored, using {}", d.initial_status);
                    d.initial_status
                }
            },
            None => d.initial_status,
        };
        Self {
            port: parsed(&lookup, "SLOTLEDGER_PORT").unwrap_or(d.port),
            bind: lookup("SLOTLEDGER_BIND").unwrap_or(d.bind),
            data_dir: lookup("SLOTLEDGER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            password: lookup("SLOTLEDGER_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "SLOTLEDGER_MAX_CONNECTIONS")
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "SLOTLEDGER_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "SLOTLEDGER_METRICS_PORT"),
            tls_cert: lookup("SLOTLEDGER_TLS_CERT"),
            tls_key: lookup("SLOTLEDGER_TLS_KEY"),
            store_timeout: parsed(&lookup, "SLOTLEDGER_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.store_timeout),
            cache_ttl: parsed(&lookup, "SLOTLEDGER_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.cache_ttl),
            initial_status,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{key}={raw:?} is not valid, using default");
            None
        }
    }
}
