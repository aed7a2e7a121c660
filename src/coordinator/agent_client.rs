//! Client side of the worker agent RPC
//!
//! [`AgentClient`] is the seam between the dispatcher and the network. The
//! shipped implementation speaks JSON over HTTP; tests plug in fakes.

use crate::common::rest_client::{
    cause_text, io_kind_in_chain, looks_like_dns_failure, looks_like_tls_failure,
};
use crate::common::Result;
use crate::coordinator::catalog::{SchemaHash, TabletId, Version};
use crate::coordinator::registry::NodeAddress;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::time::Duration;

/// Path of the consistency endpoint on every worker.
pub const CHECK_CONSISTENCY_PATH: &str = "/api/check_consistency";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    ConnectRefused,
    ConnectTimeout,
    Timeout,
    Io,
    UnknownHost,
    Tls,
    /// The worker answered with an error code.
    Remote,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportErrorKind::ConnectRefused => "connect refused",
            TransportErrorKind::ConnectTimeout => "connect timeout",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Io => "i/o error",
            TransportErrorKind::UnknownHost => "unknown host",
            TransportErrorKind::Tls => "tls failure",
            TransportErrorKind::Remote => "remote error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = transport_kind(&err, err.is_timeout(), err.is_connect(), err.is_decode());
        Self::new(kind, err.to_string())
    }
}

/// Map a client error chain onto a [`TransportErrorKind`].
///
/// Only the causes are matched as text; the top-level message names the URL.
fn transport_kind(
    err: &(dyn StdError + 'static),
    timed_out: bool,
    connecting: bool,
    decoding: bool,
) -> TransportErrorKind {
    if timed_out {
        return if connecting {
            TransportErrorKind::ConnectTimeout
        } else {
            TransportErrorKind::Timeout
        };
    }
    let text = cause_text(err);
    if looks_like_dns_failure(&text) {
        TransportErrorKind::UnknownHost
    } else if looks_like_tls_failure(&text) {
        TransportErrorKind::Tls
    } else if io_kind_in_chain(err) == Some(std::io::ErrorKind::ConnectionRefused)
        || text.contains("connection refused")
    {
        TransportErrorKind::ConnectRefused
    } else if decoding {
        TransportErrorKind::Remote
    } else {
        TransportErrorKind::Io
    }
}

/// A remote call the dispatcher can issue against a node.
pub trait AgentClient: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Response: Send + 'static;

    fn call<'a>(
        &'a self,
        addr: &'a NodeAddress,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, std::result::Result<Self::Response, TransportError>>;

    /// Whether repeating the request is harmless.
    fn is_idempotent(&self, _request: &Self::Request) -> bool {
        true
    }
}

/// Ask a worker for the checksum of one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConsistencyRequest {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConsistencyResponse {
    pub checksum: u64,
}

/// Any client that speaks the consistency RPC.
pub trait ConsistencyAgent:
    AgentClient<Request = CheckConsistencyRequest, Response = CheckConsistencyResponse>
{
}

impl<T> ConsistencyAgent for T where
    T: AgentClient<Request = CheckConsistencyRequest, Response = CheckConsistencyResponse>
{
}

/// Error body returned by workers on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentErrorBody {
    pub error: String,
}

/// JSON-over-HTTP agent client.
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    /// Per-attempt deadlines are enforced by the dispatcher; only connection
    /// setup is bounded here.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

impl AgentClient for HttpAgentClient {
    type Request = CheckConsistencyRequest;
    type Response = CheckConsistencyResponse;

    fn call<'a>(
        &'a self,
        addr: &'a NodeAddress,
        request: &'a CheckConsistencyRequest,
    ) -> BoxFuture<'a, std::result::Result<CheckConsistencyResponse, TransportError>> {
        Box::pin(async move {
            let url = format!("http://{}{}", addr, CHECK_CONSISTENCY_PATH);
            let response = self
                .client
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(TransportError::from_reqwest)?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<CheckConsistencyResponse>()
                    .await
                    .map_err(TransportError::from_reqwest);
            }

            let message = match response.json::<AgentErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            let kind = if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                TransportErrorKind::Io
            } else {
                TransportErrorKind::Remote
            };
            Err(TransportError::new(kind, message))
        })
    }
}
