//! HTTP specialization of the retry executor.
//!
//! Status classification:
//! - `< 400`: success; the response (or the extracted payload) is returned.
//! - `429` and `>= 500`: retryable.
//! - any other `4xx`: permanent, surfaced on the first occurrence as `HTTP {status}: {text}`.
//!
//! A failing payload extractor counts as retryable since it usually means a truncated or partial
//! body. Transport errors are retried when their [`FailureKind`] is one the network profile
//! retries.

use crate::backoff::Backoff;
use crate::classify::{Classify, FailureKind};
use crate::profiles::{ProfileSettings, RetryProfile};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::{Jitter, ResilienceError};
use http::Response;
use std::future::Future;
use std::sync::Arc;

/// Boxed error produced by payload extractors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single HTTP attempt.
#[derive(Debug, thiserror::Error)]
pub enum HttpError<E> {
    /// The upstream answered with a status `>= 400`.
    #[error("HTTP {status}: {status_text}")]
    Status { status: u16, status_text: String },
    /// The response arrived but its payload could not be extracted.
    #[error("failed to extract response payload: {0}")]
    Extract(#[source] BoxError),
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[source] E),
}

impl<E> HttpError<E> {
    /// Status code, if the upstream answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl<E: Classify> HttpError<E> {
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Status { status, .. } => *status == 429 || *status >= 500,
            HttpError::Extract(_) => true,
            HttpError::Transport(e) => RetryProfile::Network.retries(e.failure_kind()),
        }
    }
}

impl<E: Classify> Classify for HttpError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            HttpError::Status { status, .. } => FailureKind::from_status(*status),
            HttpError::Extract(_) => FailureKind::Decode,
            HttpError::Transport(e) => e.failure_kind(),
        }
    }
}

/// Retries HTTP calls by status code on top of a shared [`RetryExecutor`].
#[derive(Debug, Clone)]
pub struct ResilientHttp {
    executor: RetryExecutor,
    settings: ProfileSettings,
    jitter: Jitter,
}

impl ResilientHttp {
    /// Adapter using the network profile's attempt and delay settings.
    pub fn new(executor: RetryExecutor) -> Self {
        Self { executor, settings: RetryProfile::Network.settings(), jitter: Jitter::default() }
    }

    pub fn with_settings(mut self, settings: ProfileSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Retry config applied to each HTTP call.
    pub fn config<E>(&self) -> RetryConfig<HttpError<E>>
    where
        E: Classify + 'static,
    {
        let backoff = Backoff::from_parts(
            self.settings.base_delay,
            self.settings.max_delay,
            self.settings.multiplier,
        );
        RetryConfig::from_parts(
            self.settings.max_attempts,
            backoff,
            self.jitter,
            Arc::new(|e: &HttpError<E>| e.is_retryable()),
        )
    }

    /// Send until a successful status and return the raw response.
    pub async fn run<B, E, Fut, Op>(
        &self,
        operation: Op,
        key: Option<&str>,
    ) -> Result<Response<B>, ResilienceError<HttpError<E>>>
    where
        E: Classify + 'static,
        Op: Fn() -> Fut,
        Fut: Future<Output = Result<Response<B>, E>>,
    {
        let config = self.config::<E>();
        let operation = &operation;
        self.executor.run(move || send(operation), &config, key).await
    }

    /// Send until a successful status and extract a payload; extractor failures are retried.
    pub async fn run_with<B, T, E, X, XFut, XErr, Fut, Op>(
        &self,
        operation: Op,
        extract: X,
        key: Option<&str>,
    ) -> Result<T, ResilienceError<HttpError<E>>>
    where
        E: Classify + 'static,
        Op: Fn() -> Fut,
        Fut: Future<Output = Result<Response<B>, E>>,
        X: Fn(Response<B>) -> XFut,
        XFut: Future<Output = Result<T, XErr>>,
        XErr: Into<BoxError>,
    {
        let config = self.config::<E>();
        let operation = &operation;
        let extract = &extract;
        self.executor.run(move || send_and_extract(operation, extract), &config, key).await
    }
}

async fn send<B, E, Fut, Op>(operation: &Op) -> Result<Response<B>, HttpError<E>>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = Result<Response<B>, E>>,
{
    let response = operation().await.map_err(HttpError::Transport)?;
    check_status(response)
}

async fn send_and_extract<B, T, E, X, XFut, XErr, Fut, Op>(
    operation: &Op,
    extract: &X,
) -> Result<T, HttpError<E>>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = Result<Response<B>, E>>,
    X: Fn(Response<B>) -> XFut,
    XFut: Future<Output = Result<T, XErr>>,
    XErr: Into<BoxError>,
{
    let response = send(operation).await?;
    extract(response).await.map_err(|e| HttpError::Extract(e.into()))
}

fn check_status<B, E>(response: Response<B>) -> Result<Response<B>, HttpError<E>> {
    let status = response.status();
    if status.as_u16() < 400 {
        return Ok(response);
    }
    tracing::debug!(status = status.as_u16(), "upstream returned error status");
    Err(HttpError::Status {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
    })
}
