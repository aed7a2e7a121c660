//! Best-effort outbound HTTP client
//!
//! A pooled `reqwest` client with bounded timeouts and a retry policy keyed
//! on the kind of failure. Independent of the orchestration core; the admin
//! CLI uses it for read-only calls against the coordinator.

use crate::common::{Error, Result};
use std::error::Error as StdError;
use std::time::Duration;

/// Total executions of one request, first attempt included.
pub const MAX_HTTP_EXECUTIONS: u32 = 3;

const MAX_IDLE_PER_HOST: usize = 20;

/// What went wrong with one HTTP execution, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFailure {
    /// Could not establish the connection in time.
    ConnectTimeout,
    /// The server dropped the connection without answering.
    NoResponse,
    /// Read/overall timeout after the request was sent.
    Timeout,
    TlsHandshake,
    UnknownHost,
    Other,
}

/// Retry decision for an HTTP execution that failed with `failure`.
///
/// `executions` counts attempts made so far (1 after the first failure).
pub fn should_retry_http(failure: HttpFailure, executions: u32, idempotent: bool) -> bool {
    if executions >= MAX_HTTP_EXECUTIONS {
        return false;
    }
    match failure {
        HttpFailure::ConnectTimeout | HttpFailure::TlsHandshake | HttpFailure::UnknownHost => {
            false
        }
        HttpFailure::NoResponse | HttpFailure::Timeout => true,
        HttpFailure::Other => idempotent,
    }
}

/// Walk an error's `source()` chain.
pub(crate) fn error_chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e: &&'a (dyn StdError + 'static)| (*e).source())
}

/// First `std::io::ErrorKind` found anywhere in the chain.
pub(crate) fn io_kind_in_chain(err: &(dyn StdError + 'static)) -> Option<std::io::ErrorKind> {
    error_chain(err).find_map(|e| e.downcast_ref::<std::io::Error>().map(|io| io.kind()))
}

/// Lower-cased messages of everything below the top-level error.
///
/// The top-level message of a `reqwest::Error` carries the request URL, so
/// matching against it would let a host name decide the classification.
pub(crate) fn cause_text(err: &(dyn StdError + 'static)) -> String {
    error_chain(err)
        .skip(1)
        .map(|e| e.to_string().to_lowercase())
        .collect::<Vec<_>>()
        .join(": ")
}

pub(crate) fn looks_like_dns_failure(text: &str) -> bool {
    text.contains("dns error")
        || text.contains("failed to lookup address")
        || text.contains("name or service not known")
        || text.contains("nodename nor servname")
}

pub(crate) fn looks_like_tls_failure(text: &str) -> bool {
    text.contains("certificate") || text.contains("tls") || text.contains("ssl")
}

/// Classify a failed execution from its error chain and the timeout flags
/// reported by the client.
fn classify_failure(err: &(dyn StdError + 'static), timed_out: bool, connecting: bool) -> HttpFailure {
    if timed_out {
        return if connecting {
            HttpFailure::ConnectTimeout
        } else {
            HttpFailure::Timeout
        };
    }
    let text = cause_text(err);
    if looks_like_dns_failure(&text) {
        return HttpFailure::UnknownHost;
    }
    if looks_like_tls_failure(&text) {
        return HttpFailure::TlsHandshake;
    }
    match io_kind_in_chain(err) {
        Some(std::io::ErrorKind::ConnectionReset)
        | Some(std::io::ErrorKind::ConnectionAborted)
        | Some(std::io::ErrorKind::UnexpectedEof)
        | Some(std::io::ErrorKind::BrokenPipe) => HttpFailure::NoResponse,
        Some(std::io::ErrorKind::TimedOut) => HttpFailure::Timeout,
        _ if text.contains("connection closed before message completed") => {
            HttpFailure::NoResponse
        }
        _ => HttpFailure::Other,
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> HttpFailure {
    classify_failure(err, err.is_timeout(), err.is_connect())
}

pub struct RestClient {
    client: reqwest::Client,
}

impl RestClient {
    /// `timeout` bounds connection setup and each whole request.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .connect_timeout(timeout)
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// GET `url` and return the body. Anything but 200 is an error.
    pub async fn http_get(&self, url: &str) -> Result<String> {
        let mut executions = 0;
        loop {
            executions += 1;
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status != reqwest::StatusCode::OK {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::Http(format!(
                            "Failed to get http response, due to http code: {}, response: {}",
                            status.as_u16(),
                            body
                        )));
                    }
                    return Ok(response.text().await?);
                }
                Err(e) => {
                    let failure = classify_reqwest_error(&e);
                    if should_retry_http(failure, executions, true) {
                        tracing::debug!(
                            "GET {} failed ({:?}), retrying (execution {})",
                            url,
                            failure,
                            executions
                        );
                        continue;
                    }
                    tracing::warn!("GET {} failed after {} executions: {}", url, executions, e);
                    return Err(e.into());
                }
            }
        }
    }
}
