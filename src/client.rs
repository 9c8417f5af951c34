use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Request as ReqwestRequest, Response as ReqwestResponse};
use tracing::debug;

use crate::error::{BuildStage, Error, Result};
use crate::request::RequestBuilder;
use crate::retry::{Backoff, RetryLogger, RetryOptions, RetryPolicy, RetrySettings, RetryTransport};
use crate::tls::{TlsBuilder, TlsConfig};
use crate::transport::{HttpTransport, Transport, TransportOptions};

/// Configured HTTP client
///
/// Every request goes through the retry decorator and then the base
/// transport the client was built with. Cloning is cheap and clones share
/// the same connection pool.
///
/// # Examples
///
/// ```rust,no_run
/// use httpext::{Client, RequestBuilder};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::builder().retries(5).build()?;
///     let response = client
///         .send(&RequestBuilder::get().url("https://httpbin.org/json"))
///         .await?;
///     println!("Status: {}", response.status());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    transport: Arc<RetryTransport>,
    tls_config: Option<TlsConfig>,
}

impl Client {
    /// Create a new client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Execute a request, retrying according to the client's retry settings
    pub async fn execute(&self, request: ReqwestRequest) -> Result<ReqwestResponse> {
        self.transport.send(request).await
    }

    /// Build and execute a request
    pub async fn send(&self, request: &RequestBuilder) -> Result<ReqwestResponse> {
        self.execute(request.build()?).await
    }

    /// Get the TLS configuration the base transport was built with
    ///
    /// `None` means the platform defaults are in effect.
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        self.tls_config.as_ref()
    }

    /// Get the effective retry settings
    pub fn retry_settings(&self) -> &RetrySettings {
        self.transport.settings()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport.inner().name())
            .field("tls_config", &self.tls_config)
            .field("retry", self.transport.settings())
            .finish()
    }
}

/// Builder for creating HTTP clients with custom configuration
///
/// Options can be set in any order; setting the same option twice keeps the
/// last value. The builder is only borrowed by [`ClientBuilder::build`].
///
/// # Examples
///
/// ```rust,no_run
/// use httpext::ClientBuilder;
/// use std::time::Duration;
///
/// let client = ClientBuilder::new()
///     .retries(5)
///     .retry_wait_max(Duration::from_secs(10))
///     .tls_ca_certs(["/etc/ssl/private-ca.pem"])
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// # Ok::<(), httpext::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClientBuilder {
    tls: TlsBuilder,
    explicit_tls: Option<TlsConfig>,
    retry: RetryOptions,
    transport: TransportOptions,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retries after the first attempt
    ///
    /// Negative values are ignored. Zero leaves the default in place.
    pub fn retries(mut self, max_retries: i32) -> Self {
        if let Ok(max_retries) = u32::try_from(max_retries) {
            self.retry.max_retries = Some(max_retries);
        }
        self
    }

    /// Set the policy deciding whether an attempt is retried
    pub fn check_retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry.check_retry = Some(Arc::new(policy));
        self
    }

    /// Set the policy computing the wait between attempts
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.retry.backoff = Some(Arc::new(backoff));
        self
    }

    /// Set the minimum wait handed to the backoff policy
    pub fn retry_wait_min(mut self, wait: Duration) -> Self {
        self.retry.wait_min = Some(wait);
        self
    }

    /// Set the maximum wait handed to the backoff policy
    pub fn retry_wait_max(mut self, wait: Duration) -> Self {
        self.retry.wait_max = Some(wait);
        self
    }

    /// Set the sink that receives one event per retry
    pub fn retry_logger(mut self, logger: impl RetryLogger + 'static) -> Self {
        self.retry.logger = Some(Arc::new(logger));
        self
    }

    /// Set a complete TLS configuration
    ///
    /// Used only when none of the `tls_*` options are set.
    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.explicit_tls = Some(config);
        self
    }

    /// Skip server certificate verification. Dangerous.
    pub fn tls_skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.tls = self.tls.skip_verify(insecure_skip_verify);
        self
    }

    /// Set the CA certificate files to trust instead of the platform roots
    pub fn tls_ca_certs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.tls = self.tls.ca_certs(paths);
        self
    }

    /// Set the client certificate and private key files
    pub fn tls_key_pair(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.tls = self.tls.key_pair(cert_path, key_path);
        self
    }

    /// Set the default timeout for all requests
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport.connect_timeout = Some(timeout);
        self
    }

    /// Build the client
    pub fn build(&self) -> Result<Client> {
        let assembled = if self.tls.is_empty() {
            None
        } else {
            Some(self.tls.build().map_err(|e| Error::build(BuildStage::Tls, e))?)
        };

        let http = HttpTransport::build(self.explicit_tls.as_ref(), assembled, &self.transport)
            .map_err(|e| Error::build(BuildStage::Transport, e))?;
        let tls_config = http.tls_config().cloned();

        let client = self.wrap(Arc::new(http), tls_config);
        debug!(client = ?client, "built client");
        Ok(client)
    }

    /// Build a client that sends through `transport` instead of a reqwest client
    ///
    /// TLS and timeout options do not apply; retry options do.
    pub fn build_with_transport(&self, transport: Arc<dyn Transport>) -> Client {
        self.wrap(transport, None)
    }

    fn wrap(&self, transport: Arc<dyn Transport>, tls_config: Option<TlsConfig>) -> Client {
        let settings = RetrySettings::default().merge(&self.retry);
        Client {
            transport: Arc::new(RetryTransport::new(transport, settings)),
            tls_config,
        }
    }
}
