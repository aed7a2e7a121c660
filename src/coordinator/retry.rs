//! Retry policy for agent tasks
//!
//! Pure functions over [`TransportErrorKind`]; the dispatcher's retry loop is
//! their only consumer.

use crate::coordinator::agent_client::TransportErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Retriable,
    NonRetriable,
}

/// Map a transport failure to a retry class.
pub fn classify(kind: TransportErrorKind) -> Retry {
    match kind {
        // Fail fast: the node is down or the request can never succeed.
        TransportErrorKind::ConnectRefused
        | TransportErrorKind::UnknownHost
        | TransportErrorKind::Tls
        | TransportErrorKind::Remote => Retry::NonRetriable,
        TransportErrorKind::ConnectTimeout
        | TransportErrorKind::Timeout
        | TransportErrorKind::Io => Retry::Retriable,
    }
}

impl TransportErrorKind {
    /// Could the request have been delivered before this failure?
    ///
    /// Only failures raised while establishing the connection prove that the
    /// remote side never saw the request.
    pub fn may_have_reached_remote(&self) -> bool {
        !matches!(
            self,
            TransportErrorKind::ConnectRefused
                | TransportErrorKind::ConnectTimeout
                | TransportErrorKind::UnknownHost
                | TransportErrorKind::Tls
        )
    }
}

/// Should the dispatcher try again after `kind`?
///
/// Requests that mutate remote state are repeated only when the previous
/// attempt provably never arrived.
pub fn should_retry(kind: TransportErrorKind, idempotent: bool) -> bool {
    classify(kind) == Retry::Retriable && (idempotent || !kind.may_have_reached_remote())
}
