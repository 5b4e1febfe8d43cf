use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Server settings, read once from `DOCSLOT_*` environment variables.
/// Unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends per tenant before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// Upper bound on each registry call made while booking.
    pub store_timeout: Option<Duration>,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        Self {
            bind: lookup("DOCSLOT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "DOCSLOT_PORT").unwrap_or(5433),
            data_dir: lookup("DOCSLOT_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("DOCSLOT_PASSWORD").unwrap_or_else(|| "docslot".into()),
            max_connections: parsed(&lookup, "DOCSLOT_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "DOCSLOT_COMPACT_THRESHOLD").unwrap_or(1000),
            store_timeout: parsed(&lookup, "DOCSLOT_STORE_TIMEOUT_MS").map(Duration::from_millis),
            metrics_port: parsed(&lookup, "DOCSLOT_METRICS_PORT"),
            tls_cert: lookup("DOCSLOT_TLS_CERT"),
            tls_key: lookup("DOCSLOT_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Build the TLS acceptor from the configured PEM files. Both paths or neither.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (cert_path, key_path) = match (&self.tls_cert, &self.tls_key) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "both DOCSLOT_TLS_CERT and DOCSLOT_TLS_KEY must be set, or neither",
                ));
            }
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        server.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(server))))
    }
}
