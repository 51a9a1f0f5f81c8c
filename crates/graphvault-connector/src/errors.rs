//! Connector error taxonomy
//!
//! Remote failures fall into a small set of kinds the rest of the
//! pipeline dispatches on: an invalidated delta token triggers a local
//! full-enumeration fallback, recoverable errors may be retried, and
//! everything else aborts the affected unit of work.

use reqwest::StatusCode;
use thiserror::Error;

use graphvault_core::domain::errors::DomainError;

/// Graph error codes that invalidate a saved delta token.
const RESYNC_CODES: &[&str] = &["resyncRequired", "syncStateNotFound", "resyncApplyDifferences"];

/// Errors raised by the connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The server rejected the saved delta token; enumerate from scratch.
    #[error("delta token no longer valid")]
    InvalidDelta,

    /// Transient remote failure; the caller may retry.
    #[error("recoverable graph error: {0:#}")]
    Recoverable(anyhow::Error),

    /// Permanent remote failure; abort the unit of work.
    #[error("non-recoverable graph error: {0:#}")]
    NonRecoverable(anyhow::Error),

    /// Resolver lookup for an unknown container ID.
    #[error("container {0:?} not found in cache")]
    NotFound(String),

    /// Resolver traversal hit a container whose parent is absent.
    #[error("container {id:?} references missing parent {parent:?}")]
    MissingParent { id: String, parent: String },

    /// Resolver traversal exceeded the depth bound (cycle guard).
    #[error("folder traversal exceeded {max} levels at container {id:?}")]
    DepthExceeded { id: String, max: usize },

    /// Invalid container, path, or metadata protocol data.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ConnectorError {
    /// True for failures worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConnectorError::Recoverable(_))
    }

    /// Classifies a non-success HTTP response into an error kind.
    ///
    /// A 410 Gone, or a Graph error body carrying one of the resync
    /// codes, means the delta token expired. Throttling and server
    /// errors are recoverable; remaining client errors are not.
    pub fn classify_response(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::GONE {
            return ConnectorError::InvalidDelta;
        }

        if let Some(code) = parse_odata_error_code(body) {
            if RESYNC_CODES.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
                return ConnectorError::InvalidDelta;
            }
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ConnectorError::Recoverable(anyhow::anyhow!(
                "graph returned {status}: {}",
                truncate(body, 256)
            ))
        } else {
            ConnectorError::NonRecoverable(anyhow::anyhow!(
                "graph returned {status}: {}",
                truncate(body, 256)
            ))
        }
    }

    /// Wraps a transport-level failure (connect, timeout, body read).
    pub fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ConnectorError::Recoverable(err.into())
        } else {
            ConnectorError::NonRecoverable(err.into())
        }
    }
}

/// Pulls `error.code` out of a Graph OData error body, if present.
fn parse_odata_error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("code")?
        .as_str()
        .map(str::to_string)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gone_is_invalid_delta() {
        let err = ConnectorError::classify_response(StatusCode::GONE, "");
        assert!(matches!(err, ConnectorError::InvalidDelta));
    }

    #[test]
    fn test_resync_code_is_invalid_delta() {
        let body = r#"{"error":{"code":"resyncRequired","message":"resync"}}"#;
        let err = ConnectorError::classify_response(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, ConnectorError::InvalidDelta));
    }

    #[test]
    fn test_throttle_and_server_errors_recoverable() {
        let err = ConnectorError::classify_response(StatusCode::TOO_MANY_REQUESTS, "{}");
        assert!(err.is_recoverable());

        let err = ConnectorError::classify_response(StatusCode::SERVICE_UNAVAILABLE, "{}");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_client_errors_non_recoverable() {
        let body = r#"{"error":{"code":"itemNotFound","message":"gone"}}"#;
        let err = ConnectorError::classify_response(StatusCode::NOT_FOUND, body);
        assert!(matches!(err, ConnectorError::NonRecoverable(_)));
    }

    #[test]
    fn test_malformed_body_does_not_panic() {
        let err = ConnectorError::classify_response(StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(err, ConnectorError::NonRecoverable(_)));
    }
}
