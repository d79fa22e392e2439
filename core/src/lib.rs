//! Synchronous API client core for the dmart content-management backend.
//!
//! # Overview
//! Builds `HttpRequest` values and parses `HttpResponse` values without
//! touching the network (host-does-IO pattern). The caller executes the
//! actual HTTP round-trip, making the core fully deterministic and testable.
//! Two text parsers ship alongside: `parse_table` for the backend's CSV
//! export and `parse_lines` for JSON Lines payloads.
//!
//! # Design
//! - `DmartClient` is stateless; it holds only `base_url`.
//! - Each operation is split into `build_*` (produces request) and
//!   `parse_*` (consumes response), so the I/O boundary is explicit.
//! - Cross-cutting request/response handling lives in an explicit
//!   `Pipeline` of interceptors owned by the host.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod client;
pub mod error;
pub mod http;
pub mod jsonl;
pub mod pipeline;
pub mod table;
pub mod types;

pub use client::{DmartClient, EntryOptions};
pub use error::{ApiError, ParseError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, MultipartForm, PayloadFile};
pub use jsonl::parse_lines;
pub use pipeline::{DefaultHeaders, Interceptor, Pipeline, RequestLog, SessionGuard};
pub use table::{parse_table, ParsedTable, Row};
pub use types::{
    ActionRequest, ActionRequestRecord, ApiResponse, ErrorInfo, QueryRequest, QueryType, RequestType,
    ResourceType, ResponseEntry, ResponseRecord, Status,
};
