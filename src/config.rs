use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Server settings, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "slotwise".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let num = |key: &str| get(key).and_then(|s| s.trim().parse().ok());
        Self {
            bind: get("SLOTWISE_BIND").unwrap_or(d.bind),
            port: num("SLOTWISE_PORT").map_or(d.port, |p: u64| u16::try_from(p).unwrap_or(d.port)),
            data_dir: get("SLOTWISE_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: get("SLOTWISE_PASSWORD").unwrap_or(d.password),
            max_connections: num("SLOTWISE_MAX_CONNECTIONS")
                .and_then(|n: u64| usize::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(d.max_connections),
            compact_threshold: num("SLOTWISE_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: num("SLOTWISE_METRICS_PORT").and_then(|p: u64| u16::try_from(p).ok()),
            tls_cert: get("SLOTWISE_TLS_CERT"),
            tls_key: get("SLOTWISE_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// TLS acceptor from the configured PEM files, if any.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (cert_path, key_path) = match (self.tls_cert.as_deref(), self.tls_key.as_deref()) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "both SLOTWISE_TLS_CERT and SLOTWISE_TLS_KEY must be set, or neither",
                ));
            }
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
        assert_eq!(Config::default().listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLOTWISE_PORT", "6543"),
            ("SLOTWISE_DATA_DIR", "/var/lib/slotwise"),
            ("SLOTWISE_MAX_CONNECTIONS", "32"),
            ("SLOTWISE_METRICS_PORT", "9100"),
        ]));
        assert_eq!(cfg.port, 6543);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/slotwise"));
        assert_eq!(cfg.max_connections, 32);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLOTWISE_PORT", "not-a-port"),
            ("SLOTWISE_MAX_CONNECTIONS", "0"),
            ("SLOTWISE_COMPACT_THRESHOLD", "-5"),
            ("SLOTWISE_METRICS_PORT", "70000"),
        ]));
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn tls_needs_both_files() {
        let cfg = Config { tls_cert: Some("cert.pem".into()), ..Config::default() };
        let err = cfg.tls_acceptor().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(Config::default().tls_acceptor().unwrap().is_none());
    }
}
