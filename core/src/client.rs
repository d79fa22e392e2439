//! Stateless HTTP request builder and response parser for the dmart API.
//!
//! # Design
//! `DmartClient` holds only a `base_url` and carries no mutable state between
//! calls. Each backend operation is split into a `build_*` method that
//! produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. The caller executes the actual HTTP round-trip and keeps
//! the session cookie, keeping the core deterministic and free of I/O.
//!
//! Failure classification is shared by every `parse_*` method: a body with a
//! `Log-Id` key is a firewall rejection, a `failed` envelope becomes
//! `ApiError::Backend`, a bare 404 becomes `ApiError::NotFound` and anything
//! else is kept raw in `ApiError::HttpError`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, MultipartForm, PayloadFile};
use crate::jsonl::parse_lines;
use crate::table::{parse_table, ParsedTable};
use crate::types::{
    ActionRequest, ApiResponse, ErrorInfo, HealthResponse, LoginRequest, ProgressTicketRequest,
    QueryRequest, QueryResponse, QueryType, ResourceType, ResponseEntry, SortType, Status,
};

/// Subpath placeholder the backend uses for the space root.
pub const ROOT_SUBPATH: &str = "__root__";

/// Space that holds the list of spaces.
pub const MANAGEMENT_SPACE: &str = "management";

/// Default sort column applied to queries.
pub const DEFAULT_SORT_BY: &str = "created_at";

/// Flags sent with `retrieve_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOptions {
    pub retrieve_json_payload: bool,
    pub retrieve_attachments: bool,
    pub validate_schema: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            retrieve_json_payload: false,
            retrieve_attachments: false,
            validate_schema: true,
        }
    }
}

/// Synchronous, stateless client for the dmart API.
///
/// Builds `HttpRequest` values and parses `HttpResponse` values without
/// touching the network. The caller is responsible for executing the HTTP
/// round-trip between `build_*` and `parse_*`.
#[derive(Debug, Clone)]
pub struct DmartClient {
    base_url: String,
}

impl DmartClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    pub fn build_login(&self, shortname: &str, password: &str) -> Result<HttpRequest, ApiError> {
        let body = LoginRequest {
            shortname: shortname.to_string(),
            password: password.to_string(),
        };
        self.json_request(HttpMethod::Post, "/user/login", &body)
    }

    pub fn parse_login(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    pub fn build_logout(&self) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/user/logout", &json!({}))
    }

    pub fn parse_logout(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    pub fn build_get_profile(&self) -> HttpRequest {
        self.get("/user/profile")
    }

    /// `ApiResponse::profile` reads the signed-in user out of the reply.
    pub fn parse_get_profile(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Unless listing spaces, the query is sorted ascending by `created_at`
    /// when the caller left sorting unset. An empty `sort_by` counts as unset.
    pub fn build_query(&self, query: &QueryRequest) -> Result<HttpRequest, ApiError> {
        let mut query = query.clone();
        if query.query_type != QueryType::Spaces {
            query.sort_type.get_or_insert(SortType::Ascending);
            if query.sort_by.as_deref().is_none_or(str::is_empty) {
                query.sort_by = Some(DEFAULT_SORT_BY.to_string());
            }
        }
        query.subpath = collapse_slashes(&query.subpath);
        self.json_request(HttpMethod::Post, "/managed/query", &query)
    }

    pub fn parse_query(&self, response: HttpResponse) -> Result<QueryResponse, ApiError> {
        parse_envelope(response)
    }

    /// CSV export of a query. The export is always sorted by `created_at`.
    pub fn build_csv(&self, query: &QueryRequest) -> Result<HttpRequest, ApiError> {
        let mut query = query.clone();
        query.sort_type.get_or_insert(SortType::Ascending);
        query.sort_by = Some(DEFAULT_SORT_BY.to_string());
        query.subpath = collapse_slashes(&query.subpath);
        self.json_request(HttpMethod::Post, "/managed/csv", &query)
    }

    pub fn parse_csv(&self, response: HttpResponse) -> Result<ParsedTable, ApiError> {
        check_status(&response)?;
        Ok(parse_table(&response.body)?)
    }

    pub fn build_get_spaces(&self) -> Result<HttpRequest, ApiError> {
        let mut query = QueryRequest::new(QueryType::Spaces, MANAGEMENT_SPACE, "/");
        query.limit = Some(100);
        self.build_query(&query)
    }

    /// Direct children of `subpath`, optionally restricted to some resource
    /// types. An empty `restrict_types` means every type.
    pub fn build_get_children(
        &self,
        space_name: &str,
        subpath: &str,
        limit: u32,
        offset: u32,
        restrict_types: &[ResourceType],
    ) -> Result<HttpRequest, ApiError> {
        let mut query = QueryRequest::new(QueryType::Search, space_name, subpath);
        query.filter_types = Some(restrict_types.to_vec());
        query.exact_subpath = Some(true);
        query.limit = Some(limit);
        query.offset = Some(offset);
        self.build_query(&query)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    pub fn build_space(&self, action: &ActionRequest) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/managed/space", action)
    }

    pub fn parse_space(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    pub fn build_request(&self, action: &ActionRequest) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/managed/request", action)
    }

    pub fn parse_request(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    // -----------------------------------------------------------------------
    // Entries and payloads
    // -----------------------------------------------------------------------

    pub fn build_retrieve_entry(
        &self,
        resource_type: ResourceType,
        space_name: &str,
        subpath: &str,
        shortname: &str,
        options: EntryOptions,
    ) -> HttpRequest {
        let subpath = if subpath.is_empty() || subpath == "/" {
            ROOT_SUBPATH
        } else {
            subpath
        };
        let path = format!(
            "/managed/entry/{resource_type}/{space_name}/{subpath}/{shortname}\
             ?retrieve_json_payload={}&retrieve_attachments={}&validate_schema={}",
            options.retrieve_json_payload, options.retrieve_attachments, options.validate_schema,
        );
        self.get(&collapse_slashes(&path))
    }

    pub fn parse_retrieve_entry(&self, response: HttpResponse) -> Result<ResponseEntry, ApiError> {
        check_status(&response)?;
        decode(&response.body)
    }

    /// Create an active entry together with its payload file in one
    /// multipart request.
    pub fn build_upload_with_payload(
        &self,
        space_name: &str,
        subpath: &str,
        resource_type: ResourceType,
        shortname: &str,
        payload_file: &PayloadFile,
    ) -> Result<HttpRequest, ApiError> {
        let record = json!({
            "resource_type": resource_type,
            "subpath": subpath,
            "shortname": shortname,
            "attributes": { "is_active": true },
        });
        let record = serde_json::to_vec(&record).map_err(|e| ApiError::SerializationError(e.to_string()))?;

        let form = MultipartForm::new();
        let content_type = form.content_type();
        let body = form
            .text("space_name", space_name)
            .file("request_record", "blob", "application/json", &record)
            .file(
                "payload_file",
                &payload_file.file_name,
                &payload_file.content_type,
                &payload_file.bytes,
            )
            .finish();

        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: self.url("/managed/resource_with_payload"),
            headers: vec![("content-type".to_string(), content_type)],
            body: Some(body),
        })
    }

    pub fn parse_upload_with_payload(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    /// Address of an attachment's payload, for embedding in links.
    pub fn attachment_url(
        &self,
        resource_type: ResourceType,
        space_name: &str,
        subpath: &str,
        parent_shortname: &str,
        shortname: &str,
        ext: &str,
    ) -> String {
        let path = format!(
            "/managed/payload/{resource_type}/{space_name}/{}/{parent_shortname}/{shortname}.{ext}",
            subpath.trim_end_matches('/'),
        );
        self.url(&path.replace("..", "."))
    }

    /// `ext` includes the leading dot, usually `.json`.
    pub fn build_get_payload(
        &self,
        resource_type: ResourceType,
        space_name: &str,
        subpath: &str,
        shortname: &str,
        ext: &str,
    ) -> HttpRequest {
        self.get(&format!(
            "/managed/payload/{resource_type}/{space_name}/{subpath}/{shortname}{ext}"
        ))
    }

    pub fn parse_get_payload(&self, response: HttpResponse) -> Result<Value, ApiError> {
        check_status(&response)?;
        decode(&response.body)
    }

    /// Parse a `.jsonl` payload, one value per line.
    pub fn parse_payload_lines(&self, response: HttpResponse) -> Result<Vec<Value>, ApiError> {
        check_status(&response)?;
        Ok(parse_lines(&response.body)?)
    }

    // -----------------------------------------------------------------------
    // Workflow and info
    // -----------------------------------------------------------------------

    pub fn build_progress_ticket(
        &self,
        space_name: &str,
        subpath: &str,
        shortname: &str,
        action: &str,
        resolution: &str,
        comment: &str,
    ) -> Result<HttpRequest, ApiError> {
        let body = ProgressTicketRequest {
            resolution: resolution.to_string(),
            comment: comment.to_string(),
        };
        let path = format!("/managed/progress-ticket/{space_name}/{subpath}/{shortname}/{action}");
        self.json_request(HttpMethod::Put, &path, &body)
    }

    pub fn parse_progress_ticket(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        parse_envelope(response)
    }

    pub fn build_get_space_health(&self, space_name: &str) -> HttpRequest {
        self.get(&format!("/managed/health/{space_name}"))
    }

    pub fn parse_get_space_health(&self, response: HttpResponse) -> Result<HealthResponse, ApiError> {
        parse_envelope(response)
    }

    pub fn build_get_manifest(&self) -> HttpRequest {
        self.get("/info/manifest")
    }

    pub fn parse_get_manifest(&self, response: HttpResponse) -> Result<Value, ApiError> {
        check_status(&response)?;
        decode(&response.body)
    }

    pub fn build_get_settings(&self) -> HttpRequest {
        self.get("/info/settings")
    }

    pub fn parse_get_settings(&self, response: HttpResponse) -> Result<Value, ApiError> {
        check_status(&response)?;
        decode(&response.body)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: self.url(path),
            headers: Vec::new(),
            body: None,
        }
    }

    fn json_request<T: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: &T,
    ) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_vec(body).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method,
            path: self.url(path),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        })
    }
}

/// Replace every run of `/` with a single one.
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Keys a failure body may carry. `status` is not required.
#[derive(Deserialize)]
pub(crate) struct FailureBody {
    #[serde(default)]
    pub(crate) error: Option<ErrorInfo>,
    #[serde(rename = "Log-Id", default)]
    log_id: Option<Value>,
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    Err(classify_failure(response))
}

fn classify_failure(response: &HttpResponse) -> ApiError {
    let status = response.status;
    if let Ok(body) = serde_json::from_str::<FailureBody>(&response.body) {
        if let Some(log_id) = body.log_id {
            let log_id = match log_id {
                Value::String(s) => s,
                other => other.to_string(),
            };
            warn!(status, log_id = %log_id, "request rejected by firewall");
            return ApiError::Firewall { status, log_id };
        }
        if let Some(error) = body.error {
            debug!(status, kind = %error.kind, code = error.code, "backend reported failure");
            return ApiError::Backend { status, error };
        }
    }
    if status == 404 {
        return ApiError::NotFound;
    }
    ApiError::HttpError {
        status,
        body: response.body.clone(),
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Decode an envelope, turning a `failed` one into an error even when the
/// HTTP status was 2xx.
fn parse_envelope<A: DeserializeOwned>(response: HttpResponse) -> Result<ApiResponse<A>, ApiError> {
    check_status(&response)?;
    let envelope: ApiResponse<A> = decode(&response.body)?;
    if envelope.status == Status::Failed {
        return Err(match envelope.error {
            Some(error) => ApiError::Backend {
                status: response.status,
                error,
            },
            None => ApiError::HttpError {
                status: response.status,
                body: response.body,
            },
        });
    }
    Ok(envelope)
}
