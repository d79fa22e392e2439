//! Error types for the dmart client and the text parsers.
//!
//! # Design
//! `NotFound` gets a dedicated variant because callers frequently distinguish
//! "the entry does not exist" from "the server returned an unexpected
//! status." A response carrying the backend's `failed` envelope becomes
//! `Backend` so the structured `type`/`code`/`message` survive. Anything else
//! non-2xx lands in `HttpError` with the raw status and body for debugging.

use thiserror::Error;

use crate::types::ErrorInfo;

/// Errors returned by `parse_table` and `parse_lines`.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Nothing is left for the header line once the preamble is discarded.
    #[error("input has no header line after the preamble")]
    EmptyInput,

    /// A JSONL line is not a standalone JSON document. `index` is zero-based
    /// and counts lines of the trimmed input.
    #[error("line {} is not valid JSON: {source}", .index + 1)]
    MalformedLine {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by `DmartClient` build and parse methods.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned 404 without a structured error body.
    #[error("resource not found")]
    NotFound,

    /// The backend answered with a `failed` envelope.
    #[error("backend error (HTTP {status}): {error}")]
    Backend { status: u16, error: ErrorInfo },

    /// The request was rejected by the web application firewall in front of
    /// the backend. `log_id` is the incident reference it hands out.
    #[error("request blocked by firewall (HTTP {status}), log id {log_id}")]
    Firewall { status: u16, log_id: String },

    /// Any other non-2xx response.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// A CSV or JSONL response body could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ApiError {
    /// True when the backend reported an expired or missing session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::Backend { error, .. } if error.is_session_expired())
    }
}
