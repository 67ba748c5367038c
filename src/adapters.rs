//! Protocol adapters (C8): the transport layer the driver dispatches each
//! step through. `HttpAdapter` is the concrete, fully implemented adapter;
//! `SqlAdapter` is a narrow trait so the engine never takes on a concrete
//! SQL driver dependency — callers provide their own implementation, built
//! against whichever client crate their database needs.

use std::fs::File;
use std::io::Read as _;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::ErrorCategory;
use crate::utils::parse_headers_with_escapes;

/// Transport or protocol failure from a single dispatch. Recorded by the
/// aggregator via its `ErrorCategory`; never surfaced to a caller as a
/// propagating error (§7's `AdapterError` is data, not a `Result::Err` the
/// orchestrator sees).
#[derive(Debug, Clone)]
pub struct AdapterError {
    pub category: ErrorCategory,
    pub message: String,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.category.label(), self.message)
    }
}

/// The outcome of a single dispatched request: how long it took and whether
/// it succeeded, with enough detail to classify a failure into failRequest
/// vs failTransport.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub latency: Duration,
    pub error: Option<AdapterError>,
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Errors raised while constructing an adapter — configuration problems,
/// not per-request failures.
#[derive(Error, Debug)]
pub enum AdapterBuildError {
    #[error("failed to open {path}: {source}")]
    CertFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificates found in {0}")]
    NoCertificates(String),

    #[error("no PKCS#8 private key found in {0}")]
    NoPrivateKey(String),

    #[error("invalid mTLS identity: {0}")]
    InvalidIdentity(String),

    #[error("RESOLVE_TARGET_ADDR '{0}' is not in the expected 'hostname:ip:port' form")]
    InvalidDnsOverride(String),

    #[error("invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Connection pool tuning, folded in from the connection-pool module: idle
/// connections per host, how long they're kept, and TCP keepalive.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);
        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }
        builder
    }
}

/// Everything needed to build an `HttpAdapter`.
#[derive(Debug, Clone, Default)]
pub struct HttpAdapterConfig {
    pub timeout: Option<Duration>,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
    pub pool: PoolConfig,
}

/// The HTTP protocol adapter: a thin, pre-configured wrapper over a single
/// `reqwest::Client` shared by every worker.
pub struct HttpAdapter {
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(config: &HttpAdapterConfig) -> Result<Self, AdapterBuildError> {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(resolve_str) = config.resolve_target_addr.as_deref() {
            if !resolve_str.is_empty() {
                builder = configure_dns_override(builder, resolve_str)?;
            }
        }

        builder = configure_mtls(
            builder,
            config.client_cert_path.as_deref(),
            config.client_key_path.as_deref(),
        )?;

        let headers = configure_custom_headers(config.custom_headers.as_deref())?;
        if !headers.is_empty() {
            builder = builder.default_headers(headers);
        }

        builder = config.pool.apply_to_builder(builder);

        if config.skip_tls_verify {
            warn!("TLS certificate verification is disabled for the HTTP adapter");
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let client = builder.build()?;
        Ok(Self { client })
    }

    /// Issues one HTTP request and returns its outcome. Never returns
    /// `Err` for a failed request — failures become a populated `error`
    /// field, classified via `ErrorCategory`.
    pub async fn send(&self, method: &str, url: &str) -> DispatchOutcome {
        let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let start = Instant::now();
        match self.client.request(method, url).send().await {
            Ok(response) => {
                let latency = start.elapsed();
                let status = response.status();
                match ErrorCategory::from_status_code(status.as_u16()) {
                    None => DispatchOutcome { latency, error: None },
                    Some(category) => DispatchOutcome {
                        latency,
                        error: Some(AdapterError {
                            category,
                            message: format!("HTTP {}", status.as_u16()),
                        }),
                    },
                }
            }
            Err(err) => {
                let latency = start.elapsed();
                let category = ErrorCategory::from_reqwest_error(&err);
                DispatchOutcome {
                    latency,
                    error: Some(AdapterError {
                        category,
                        message: err.to_string(),
                    }),
                }
            }
        }
    }
}

fn configure_dns_override(
    mut builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, AdapterBuildError> {
    let parts: Vec<&str> = resolve_str.split(':').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(AdapterBuildError::InvalidDnsOverride(resolve_str.to_string()));
    }
    let hostname = parts[0].trim();
    let ip = parts[1].trim();
    let port: u16 = parts[2]
        .trim()
        .parse()
        .map_err(|_| AdapterBuildError::InvalidDnsOverride(resolve_str.to_string()))?;

    let socket_addr: SocketAddr = format!("{}:{}", ip, port)
        .parse()
        .map_err(|_| AdapterBuildError::InvalidDnsOverride(resolve_str.to_string()))?;

    info!(hostname, %socket_addr, "overriding DNS resolution for HTTP adapter");
    Ok(builder.resolve(hostname, socket_addr))
}

fn configure_mtls(
    mut builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, AdapterBuildError> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = read_file(cert_path)?;
            let key_pem = read_file(key_path)?;

            let mut cert_cursor = std::io::Cursor::new(cert_pem.as_slice());
            let certs: Vec<_> = rustls_pemfile::certs(&mut cert_cursor).collect();
            if certs.is_empty() || certs.iter().any(Result::is_err) {
                return Err(AdapterBuildError::NoCertificates(cert_path.to_string()));
            }

            let mut key_cursor = std::io::Cursor::new(key_pem.as_slice());
            let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut key_cursor).collect();
            if keys.is_empty() || keys.iter().any(Result::is_err) {
                return Err(AdapterBuildError::NoPrivateKey(key_path.to_string()));
            }

            let mut combined = cert_pem.clone();
            if !cert_pem.ends_with(b"\n") {
                combined.push(b'\n');
            }
            combined.extend_from_slice(&key_pem);

            let identity = reqwest::Identity::from_pem(&combined)
                .map_err(|e| AdapterBuildError::InvalidIdentity(e.to_string()))?;

            debug!(cert_path, key_path, "configured mTLS identity for HTTP adapter");
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(AdapterBuildError::InvalidIdentity(
                "client cert and key must both be set, or neither".into(),
            ))
        }
    }
    Ok(builder)
}

fn read_file(path: &str) -> Result<Vec<u8>, AdapterBuildError> {
    let mut file = File::open(path).map_err(|source| AdapterBuildError::CertFile {
        path: path.to_string(),
        source,
    })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|source| AdapterBuildError::CertFile {
            path: path.to_string(),
            source,
        })?;
    Ok(buf)
}

fn configure_custom_headers(headers_str: Option<&str>) -> Result<HeaderMap, AdapterBuildError> {
    let mut headers = HeaderMap::new();
    let Some(headers_str) = headers_str.filter(|s| !s.is_empty()) else {
        return Ok(headers);
    };

    for pair in parse_headers_with_escapes(headers_str) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once(':').ok_or_else(|| AdapterBuildError::InvalidHeader {
            name: pair.to_string(),
            message: "expected 'Name:Value'".into(),
        })?;
        let name = name.trim();
        let value = value.trim().replace("\\,", ",");

        let header_name = HeaderName::from_str(name).map_err(|e| AdapterBuildError::InvalidHeader {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| AdapterBuildError::InvalidHeader {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// A narrow SQL execution surface. The engine ships no concrete
/// implementation — callers wire in whatever database client their
/// SqlProcedure/SqlQuery steps need and hand the driver a `Box<dyn
/// SqlAdapter>`.
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    async fn execute_procedure(&self, connection_string: &str, procedure_name: &str) -> DispatchOutcome;
    async fn execute_query(&self, connection_string: &str, query: &str) -> DispatchOutcome;
}
