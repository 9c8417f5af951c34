//! httpext - configured HTTP clients with retry and TLS customization
//!
//! httpext builds a [`reqwest`]-based HTTP client from a fluent
//! [`ClientBuilder`]: TLS material is validated and loaded from PEM files, the
//! base client is assembled with that configuration, and every request is
//! routed through a retry decorator with pluggable retry and backoff policies.
//!
//! ## Features
//!
//! - **Retry with backoff**: 429 and 5xx responses and transient connection
//!   errors are retried with exponential backoff that honors `Retry-After`
//! - **Pluggable policies**: replace the retry decision, the backoff or the
//!   retry log sink with a closure or your own type
//! - **TLS from files**: custom CA pools, client certificates and an explicit
//!   skip-verify switch, validated before any connection is made
//! - **Request builder** with query, header, text, bytes and JSON bodies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use httpext::{Client, RequestBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .retries(5)
//!         .tls_ca_certs(["/etc/ssl/private-ca.pem"])
//!         .build()?;
//!
//!     let request = RequestBuilder::get()
//!         .url("https://internal.example.com/health")
//!         .header("Accept", "application/json");
//!     let response = client.send(&request).await?;
//!
//!     println!("Status: {}", response.status());
//!     println!("Body: {}", response.text().await?);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod request;
pub mod retry;
pub mod tls;
pub mod transport;
pub mod util;

// Re-export main types for convenience
pub use client::{Client, ClientBuilder};
pub use error::{BuildStage, Error, FileKind, Result};
pub use request::{Body, RequestBuilder};
pub use retry::{
    Backoff, DefaultRetryPolicy, ExponentialBackoff, LinearJitterBackoff, NoopRetryLogger,
    RetryEvent, RetryLogger, RetryOptions, RetryPolicy, RetrySettings, TracingRetryLogger,
};
pub use tls::{TlsBuilder, TlsConfig};
pub use transport::Transport;

// Re-export common HTTP types
pub use reqwest::header::{HeaderMap, HeaderValue};
pub use reqwest::{Method, Response, StatusCode};

// Re-export URL types
pub use url::Url;

// Re-export time types
pub use std::time::Duration;

// Re-export common traits
pub use async_trait::async_trait;
