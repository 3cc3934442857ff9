use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::engine::SweepPolicy;
use crate::limits::DEFAULT_BOOKING_THRESHOLD;

/// Server settings, read from `MEETBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Shared password for logins that have no account yet.
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub booking_threshold: usize,
    pub sweep_interval: Duration,
    pub cancel_suspended: bool,
    pub admin_user: String,
    /// Required the first time the admin account is created.
    pub admin_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "meetbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            booking_threshold: DEFAULT_BOOKING_THRESHOLD,
            sweep_interval: Duration::from_secs(60),
            cancel_suspended: false,
            admin_user: "admin".into(),
            admin_password: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parsed = |key: &str| get(key).and_then(|s| s.parse().ok());
        Self {
            port: parse_or(&get, "MEETBOOK_PORT", d.port),
            bind: get("MEETBOOK_BIND").unwrap_or(d.bind),
            data_dir: get("MEETBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("MEETBOOK_PASSWORD").unwrap_or(d.password),
            max_connections: parse_or(&get, "MEETBOOK_MAX_CONNECTIONS", d.max_connections),
            compact_threshold: parse_or(&get, "MEETBOOK_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: parsed("MEETBOOK_METRICS_PORT"),
            tls_cert: get("MEETBOOK_TLS_CERT"),
            tls_key: get("MEETBOOK_TLS_KEY"),
            booking_threshold: parse_or(&get, "MEETBOOK_BOOKING_THRESHOLD", d.booking_threshold),
            sweep_interval: Duration::from_secs(parse_or(
                &get,
                "MEETBOOK_SWEEP_INTERVAL_SECS",
                d.sweep_interval.as_secs(),
            )),
            cancel_suspended: parse_or(&get, "MEETBOOK_CANCEL_SUSPENDED", d.cancel_suspended),
            admin_user: get("MEETBOOK_ADMIN_USER").unwrap_or(d.admin_user),
            admin_password: get("MEETBOOK_ADMIN_PASSWORD").filter(|p| !p.is_empty()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("meetbook.wal")
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            booking_threshold: self.booking_threshold,
            cancel_suspended: self.cancel_suspended,
            ..SweepPolicy::default()
        }
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub fn load_tls_acceptor(cert_path: Option<&str>, key_path: Option<&str>) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both MEETBOOK_TLS_CERT and MEETBOOK_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
