use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, Request as ReqwestRequest, Response as ReqwestResponse};
use tracing::debug;

use crate::error::{Error, Result};
use crate::tls::TlsConfig;

/// Transport trait for HTTP operations
///
/// A transport performs exactly one round trip per call. Retry behavior is
/// layered on top by decorating a transport (see [`crate::retry::RetryTransport`]).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the response
    async fn send(&self, request: ReqwestRequest) -> Result<ReqwestResponse>;

    /// Get the transport name/type
    fn name(&self) -> &str;
}

/// Options applied to the underlying reqwest client
#[derive(Clone, Debug, Default)]
pub struct TransportOptions {
    /// Overall request timeout
    pub timeout: Option<Duration>,
    /// Connection establishment timeout
    pub connect_timeout: Option<Duration>,
}

/// Default HTTP transport implementation using reqwest
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: ReqwestClient,
    tls_config: Option<TlsConfig>,
}

impl HttpTransport {
    /// Build a transport, attaching TLS material when any is present
    ///
    /// A TLS config assembled from builder options takes precedence over one
    /// supplied wholesale by the caller. With neither, the platform defaults
    /// apply.
    pub fn build(
        explicit: Option<&TlsConfig>,
        assembled: Option<TlsConfig>,
        options: &TransportOptions,
    ) -> Result<Self> {
        let tls_config = assembled.or_else(|| explicit.cloned());

        let mut builder = ReqwestClient::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(tls_config) = &tls_config {
            builder = builder.use_preconfigured_tls(tls_config.to_client_config()?);
        }

        let client = builder.build().map_err(Error::Network)?;
        debug!(
            custom_tls = tls_config.is_some(),
            timeout = ?options.timeout,
            connect_timeout = ?options.connect_timeout,
            "built base HTTP client"
        );

        Ok(Self { client, tls_config })
    }

    /// Get the TLS configuration the client was built with
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        self.tls_config.as_ref()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ReqwestRequest) -> Result<ReqwestResponse> {
        self.client.execute(request).await.map_err(Error::Network)
    }

    fn name(&self) -> &str {
        "http"
    }
}
