use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, Request as ReqwestRequest, Response as ReqwestResponse, StatusCode, Url};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Number of retries after the first attempt when not overridden
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lower bound handed to the backoff when not overridden
pub const DEFAULT_WAIT_MIN: Duration = Duration::from_secs(1);

/// Upper bound handed to the backoff when not overridden
pub const DEFAULT_WAIT_MAX: Duration = Duration::from_secs(30);

/// Decides whether the outcome of an attempt warrants another attempt
///
/// Returning `Err` stops retrying and surfaces that error instead of the
/// outcome. Closures taking `&Result<reqwest::Response>` implement this trait.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, outcome: &Result<ReqwestResponse>) -> Result<bool>;
}

impl<F> RetryPolicy for F
where
    F: Fn(&Result<ReqwestResponse>) -> Result<bool> + Send + Sync,
{
    fn should_retry(&self, outcome: &Result<ReqwestResponse>) -> Result<bool> {
        self(outcome)
    }
}

/// Computes how long to wait before the next retry
///
/// `attempt` is zero for the first retry. `response` is the response of the
/// attempt that just failed, if there was one.
pub trait Backoff: Send + Sync {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&ReqwestResponse>,
    ) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(Duration, Duration, u32, Option<&ReqwestResponse>) -> Duration + Send + Sync,
{
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&ReqwestResponse>,
    ) -> Duration {
        self(min, max, attempt, response)
    }
}

/// A retry about to happen
#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub method: Method,
    pub url: Url,
    /// One-based number of the retry about to be made
    pub retry: u32,
    /// Retries left after this one
    pub remaining: u32,
    pub wait: Duration,
    /// Status of the failed attempt, if it produced a response
    pub status: Option<StatusCode>,
    pub timestamp: SystemTime,
}

/// Sink for retry diagnostics
pub trait RetryLogger: Send + Sync {
    fn log_retry(&self, event: &RetryEvent);
}

impl<F> RetryLogger for F
where
    F: Fn(&RetryEvent) + Send + Sync,
{
    fn log_retry(&self, event: &RetryEvent) {
        self(event)
    }
}

/// Emits each retry as a `tracing` warning
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetryLogger;

impl RetryLogger for TracingRetryLogger {
    fn log_retry(&self, event: &RetryEvent) {
        warn!(
            method = %event.method,
            url = %event.url,
            retry = event.retry,
            remaining = event.remaining,
            wait = ?event.wait,
            status = ?event.status,
            "request failed, retrying"
        );
    }
}

/// Discards retry diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRetryLogger;

impl RetryLogger for NoopRetryLogger {
    fn log_retry(&self, _event: &RetryEvent) {}
}

/// Retries transient transport errors, 429 and 5xx (except 501)
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, outcome: &Result<ReqwestResponse>) -> Result<bool> {
        Ok(match outcome {
            Ok(response) => is_retryable_status(response.status()),
            Err(error) => is_retryable_error(error),
        })
    }
}

/// Check whether a response status is worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

/// Check whether a transport error is transient
///
/// Redirect loops, malformed requests and certificate verification failures
/// will fail the same way again and are not retried.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Network(e) => !(e.is_redirect() || e.is_builder() || is_certificate_error(e)),
        _ => false,
    }
}

fn is_certificate_error(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        if has_invalid_certificate(err) {
            return true;
        }
        source = err.source();
    }
    false
}

fn has_invalid_certificate(err: &(dyn StdError + 'static)) -> bool {
    if let Some(tls) = err.downcast_ref::<rustls::Error>() {
        return matches!(tls, rustls::Error::InvalidCertificate(_));
    }
    // io::Error::source skips the wrapped error itself
    if let Some(inner) = err.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
        return has_invalid_certificate(inner);
    }
    false
}

/// `min * 2^attempt`, capped at `max`
///
/// A 429 or 503 response carrying an integer `Retry-After` header waits that
/// many seconds instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialBackoff;

impl Backoff for ExponentialBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&ReqwestResponse>,
    ) -> Duration {
        if let Some(wait) = response.and_then(retry_after) {
            return wait;
        }

        2u32.checked_pow(attempt)
            .and_then(|factor| min.checked_mul(factor))
            .filter(|wait| *wait <= max)
            .unwrap_or(max)
    }
}

fn retry_after(response: &ReqwestResponse) -> Option<Duration> {
    if !matches!(
        response.status(),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        return None;
    }

    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// `(min + jitter) * (attempt + 1)` with jitter drawn uniformly from `[0, max - min]`
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearJitterBackoff;

impl Backoff for LinearJitterBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        _response: Option<&ReqwestResponse>,
    ) -> Duration {
        let factor = attempt.saturating_add(1);
        if max <= min {
            return min.saturating_mul(factor);
        }

        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=max - min);
        (min + jitter).saturating_mul(factor)
    }
}

/// Caller overrides for the retry defaults
///
/// Unset values keep the default, and so do a zero `max_retries` and zero
/// waits. `wait_min` overrides the minimum wait and `wait_max` the maximum
/// wait. A supplied policy, backoff or logger replaces the default outright.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub max_retries: Option<u32>,
    pub wait_min: Option<Duration>,
    pub wait_max: Option<Duration>,
    pub check_retry: Option<Arc<dyn RetryPolicy>>,
    pub backoff: Option<Arc<dyn Backoff>>,
    pub logger: Option<Arc<dyn RetryLogger>>,
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("wait_min", &self.wait_min)
            .field("wait_max", &self.wait_max)
            .field("check_retry", &self.check_retry.as_ref().map(|_| "custom"))
            .field("backoff", &self.backoff.as_ref().map(|_| "custom"))
            .field("logger", &self.logger.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Effective retry configuration
#[derive(Clone)]
pub struct RetrySettings {
    max_retries: u32,
    wait_min: Duration,
    wait_max: Duration,
    check_retry: Arc<dyn RetryPolicy>,
    backoff: Arc<dyn Backoff>,
    logger: Arc<dyn RetryLogger>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            wait_min: DEFAULT_WAIT_MIN,
            wait_max: DEFAULT_WAIT_MAX,
            check_retry: Arc::new(DefaultRetryPolicy),
            backoff: Arc::new(ExponentialBackoff),
            logger: Arc::new(TracingRetryLogger),
        }
    }
}

impl RetrySettings {
    /// Apply the explicitly set options on top of these settings
    pub fn merge(mut self, options: &RetryOptions) -> Self {
        if let Some(max_retries) = options.max_retries.filter(|n| *n > 0) {
            self.max_retries = max_retries;
        }
        if let Some(wait_min) = options.wait_min.filter(|d| !d.is_zero()) {
            self.wait_min = wait_min;
        }
        if let Some(wait_max) = options.wait_max.filter(|d| !d.is_zero()) {
            self.wait_max = wait_max;
        }
        if let Some(check_retry) = &options.check_retry {
            self.check_retry = Arc::clone(check_retry);
        }
        if let Some(backoff) = &options.backoff {
            self.backoff = Arc::clone(backoff);
        }
        if let Some(logger) = &options.logger {
            self.logger = Arc::clone(logger);
        }
        self
    }

    /// Get the number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the minimum wait handed to the backoff
    pub fn wait_min(&self) -> Duration {
        self.wait_min
    }

    /// Get the maximum wait handed to the backoff
    pub fn wait_max(&self) -> Duration {
        self.wait_max
    }

    /// Get the retry policy
    pub fn check_retry(&self) -> &dyn RetryPolicy {
        self.check_retry.as_ref()
    }

    /// Get the backoff policy
    pub fn backoff(&self) -> &dyn Backoff {
        self.backoff.as_ref()
    }

    /// Get the retry diagnostics sink
    pub fn logger(&self) -> &dyn RetryLogger {
        self.logger.as_ref()
    }
}

impl fmt::Debug for RetrySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySettings")
            .field("max_retries", &self.max_retries)
            .field("wait_min", &self.wait_min)
            .field("wait_max", &self.wait_max)
            .finish_non_exhaustive()
    }
}

/// Transport decorator that retries failed round trips
///
/// A request is attempted at most `max_retries + 1` times. When retries run
/// out, or the policy declines, the last response or error is returned
/// unchanged. Requests whose body cannot be replayed are sent once.
pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    settings: RetrySettings,
}

impl RetryTransport {
    /// Create a new retry transport around `inner`
    pub fn new(inner: Arc<dyn Transport>, settings: RetrySettings) -> Self {
        Self { inner, settings }
    }

    /// Get the retry settings
    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Get the wrapped transport
    pub fn inner(&self) -> &dyn Transport {
        self.inner.as_ref()
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn send(&self, request: ReqwestRequest) -> Result<ReqwestResponse> {
        let settings = &self.settings;
        let mut retry: u32 = 0;

        loop {
            let Some(attempt) = request.try_clone() else {
                debug!(url = %request.url(), "request body cannot be replayed, sending once");
                return self.inner.send(request).await;
            };

            let outcome = self.inner.send(attempt).await;
            if !settings.check_retry.should_retry(&outcome)? {
                return outcome;
            }

            let remaining = settings.max_retries - retry;
            if remaining == 0 {
                debug!(
                    method = %request.method(),
                    url = %request.url(),
                    attempts = retry + 1,
                    "giving up"
                );
                return outcome;
            }

            let response = outcome.as_ref().ok();
            let wait = settings
                .backoff
                .backoff(settings.wait_min, settings.wait_max, retry, response);
            settings.logger.log_retry(&RetryEvent {
                method: request.method().clone(),
                url: request.url().clone(),
                retry: retry + 1,
                remaining: remaining - 1,
                wait,
                status: response.map(ReqwestResponse::status),
                timestamp: SystemTime::now(),
            });

            drop(outcome);
            tokio::time::sleep(wait).await;
            retry += 1;
        }
    }

    fn name(&self) -> &str {
        "retry"
    }
}
