//! Error types for tabletd

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Membership Errors ===
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid host migration: {0}")]
    InvalidMigration(String),

    #[error("Unknown host: {0}")]
    UnresolvableHost(String),

    #[error("Address list is empty")]
    EmptyAddressList,

    #[error("Node already exists: {role} {host}:{port}")]
    DuplicateNode {
        role: String,
        host: String,
        port: u16,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid clause: {0}")]
    InvalidClause(String),

    // === Consistency Errors ===
    #[error("Insufficient replicas for tablet {tablet_id}: need at least 2, have {available}")]
    InsufficientReplicas { tablet_id: u64, available: usize },

    #[error("Tablet not found: {0}")]
    TabletNotFound(u64),

    #[error("Table not found: {0}")]
    TableNotFound(u64),

    // === Worker Errors ===
    #[error("Schema hash mismatch for tablet {tablet_id}: expected {expected}, got {actual}")]
    SchemaMismatch {
        tablet_id: u64,
        expected: i32,
        actual: i32,
    },

    #[error("Tablet {tablet_id} has not reached version {requested} (at {available})")]
    VersionNotReached {
        tablet_id: u64,
        requested: u64,
        available: u64,
    },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Errors raised while validating or applying a membership change.
    /// They describe a malformed request and are never retried.
    pub fn is_membership_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddress(_)
                | Error::InvalidMigration(_)
                | Error::UnresolvableHost(_)
                | Error::EmptyAddressList
                | Error::DuplicateNode { .. }
                | Error::NodeNotFound(_)
                | Error::InvalidClause(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NodeNotFound(_) | Error::TabletNotFound(_) | Error::TableNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::DuplicateNode { .. } | Error::VersionNotReached { .. } => StatusCode::CONFLICT,
            Error::InvalidAddress(_)
            | Error::InvalidMigration(_)
            | Error::UnresolvableHost(_)
            | Error::EmptyAddressList
            | Error::InvalidClause(_)
            | Error::SchemaMismatch { .. }
            | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::InsufficientReplicas { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig(format!("JSON error: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}
