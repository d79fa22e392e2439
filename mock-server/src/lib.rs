//! In-memory stand-in for the dmart backend, used by integration tests.
//!
//! Sessions are an `auth_token` cookie handed out by `/user/login`. Every
//! other route except `/info/settings` answers 401 with the backend's
//! `jwtauth`/13 error when the cookie is missing or unknown.

pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

use store::{
    normalize_subpath, timestamp, Entry, EntryKey, Store, StoredPayload, ADMIN_PASSWORD, ADMIN_SHORTNAME,
};

pub type Db = Arc<RwLock<Store>>;

pub const SESSION_COOKIE: &str = "auth_token";

// Error codes reported in the `failed` envelope.
pub const INVALID_CREDENTIALS: i64 = 10;
pub const NOT_AUTHENTICATED: i64 = 13;
pub const OBJECT_NOT_FOUND: i64 = 220;
pub const ALREADY_EXISTS: i64 = 400;
pub const INVALID_DATA: i64 = 402;
pub const INVALID_TRANSITION: i64 = 403;

/// A `failed` envelope together with its HTTP status.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    kind: &'static str,
    code: i64,
    message: String,
}

impl Failure {
    fn new(status: StatusCode, kind: &'static str, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            code,
            message: message.into(),
        }
    }

    fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "jwtauth", NOT_AUTHENTICATED, "Not authenticated")
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "db", OBJECT_NOT_FOUND, format!("{what} not found"))
    }

    fn conflict(what: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "request", ALREADY_EXISTS, format!("{what} already exists"))
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "request", INVALID_DATA, message)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "failed",
            "error": { "type": self.kind, "code": self.code, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}

fn success(records: Vec<Value>) -> Json<Value> {
    Json(json!({ "status": "success", "records": records }))
}

fn success_with(records: Vec<Value>, attributes: Value) -> Json<Value> {
    Json(json!({ "status": "success", "records": records, "attributes": attributes }))
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::seeded()));
    Router::new()
        .route("/user/login", post(login))
        .route("/user/logout", post(logout))
        .route("/user/profile", get(profile))
        .route("/managed/query", post(query))
        .route("/managed/csv", post(csv))
        .route("/managed/space", post(space))
        .route("/managed/request", post(request))
        .route("/managed/entry/{resource_type}/{space_name}/{*rest}", get(entry))
        .route("/managed/resource_with_payload", post(upload_with_payload))
        .route("/managed/payload/{resource_type}/{space_name}/{*rest}", get(payload))
        .route("/managed/progress-ticket/{space_name}/{*rest}", put(progress_ticket))
        .route("/managed/health/{space_name}", get(health))
        .route("/info/manifest", get(manifest))
        .route("/info/settings", get(settings))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock backend listening");
    }
    axum::serve(listener, app()).await
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

fn authenticate(store: &Store, headers: &HeaderMap) -> Result<(), Failure> {
    match session_token(headers) {
        Some(token) if store.sessions.contains(token) => Ok(()),
        _ => Err(Failure::unauthenticated()),
    }
}

fn require_space(store: &Store, space_name: &str) -> Result<(), Failure> {
    if store.spaces.contains(space_name) {
        Ok(())
    } else {
        Err(Failure::not_found(&format!("space {space_name}")))
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LoginInput {
    pub shortname: String,
    pub password: String,
}

async fn login(State(db): State<Db>, Json(input): Json<LoginInput>) -> Result<Response, Failure> {
    if input.shortname != ADMIN_SHORTNAME || input.password != ADMIN_PASSWORD {
        return Err(Failure::new(
            StatusCode::UNAUTHORIZED,
            "auth",
            INVALID_CREDENTIALS,
            "Invalid username or password",
        ));
    }
    let token = db.write().await.open_session();
    debug!(shortname = %input.shortname, "session opened");
    let record = json!({
        "resource_type": "user",
        "shortname": ADMIN_SHORTNAME,
        "subpath": "users",
        "attributes": {
            "access_token": token,
            "type": "web",
            "displayname": { "en": "Administrator" },
        },
    });
    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly");
    Ok(([(header::SET_COOKIE, cookie)], success(vec![record])).into_response())
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> Result<Response, Failure> {
    let mut store = db.write().await;
    authenticate(&store, &headers)?;
    if let Some(token) = session_token(&headers) {
        store.sessions.remove(token);
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/; Max-Age=0");
    Ok(([(header::SET_COOKIE, cookie)], success(Vec::new())).into_response())
}

async fn profile(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, Failure> {
    authenticate(&*db.read().await, &headers)?;
    let record = json!({
        "resource_type": "user",
        "shortname": ADMIN_SHORTNAME,
        "subpath": "users",
        "attributes": {
            "email": "dmart@example.com",
            "displayname": { "en": "Administrator" },
            "type": "web",
            "language": "english",
            "is_email_verified": true,
            "is_msisdn_verified": false,
            "force_password_change": false,
            "permissions": {
                "demo:__all_subpaths__:content": {
                    "allowed_actions": ["query", "view", "create", "update", "delete"],
                    "conditions": [],
                    "restricted_fields": [],
                    "allowed_fields_values": {}
                }
            }
        }
    });
    Ok(success(vec![record]))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct QueryInput {
    #[serde(rename = "type")]
    pub query_type: String,
    pub space_name: String,
    pub subpath: String,
    #[serde(default)]
    pub filter_types: Option<Vec<String>>,
    #[serde(default)]
    pub filter_shortnames: Option<Vec<String>>,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_type: Option<String>,
    #[serde(default)]
    pub retrieve_json_payload: Option<bool>,
    #[serde(default)]
    pub exact_subpath: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Entries matching a search query, before paging.
fn search<'a>(store: &'a Store, input: &QueryInput) -> Vec<&'a Entry> {
    let mut found: Vec<&Entry> = store
        .children(&input.space_name, &input.subpath, input.exact_subpath.unwrap_or(false))
        .into_iter()
        .filter(|e| match &input.filter_types {
            Some(types) if !types.is_empty() => types.contains(&e.resource_type),
            _ => true,
        })
        .filter(|e| match &input.filter_shortnames {
            Some(names) if !names.is_empty() => names.contains(&e.shortname),
            _ => true,
        })
        .filter(|e| input.search.is_empty() || e.shortname.contains(&input.search))
        .collect();
    if input.sort_by.as_deref() == Some("shortname") {
        found.sort_by(|a, b| a.shortname.cmp(&b.shortname));
    }
    if input.sort_type.as_deref() == Some("descending") {
        found.reverse();
    }
    found
}

async fn query(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<QueryInput>,
) -> Result<Json<Value>, Failure> {
    let store = db.read().await;
    authenticate(&store, &headers)?;

    let records: Vec<Value> = match input.query_type.as_str() {
        "spaces" => store
            .spaces
            .iter()
            .map(|name| {
                json!({
                    "resource_type": "space",
                    "shortname": name,
                    "subpath": "/",
                    "attributes": { "is_active": true },
                })
            })
            .collect(),
        "search" | "subpath" => {
            require_space(&store, &input.space_name)?;
            let with_payload = input.retrieve_json_payload.unwrap_or(false);
            search(&store, &input)
                .into_iter()
                .map(|e| e.to_record(with_payload))
                .collect()
        }
        _ => Vec::new(),
    };

    let total = records.len();
    let offset = input.offset.unwrap_or(0);
    let limit = input.limit.unwrap_or(10);
    let page: Vec<Value> = records.into_iter().skip(offset).take(limit).collect();
    let returned = page.len();
    Ok(success_with(page, json!({ "total": total, "returned": returned })))
}

async fn csv(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<QueryInput>,
) -> Result<Response, Failure> {
    let store = db.read().await;
    authenticate(&store, &headers)?;
    require_space(&store, &input.space_name)?;

    let mut text = format!("{} export\nshortname,subpath,resource_type,is_active,state\n", input.space_name);
    for entry in search(&store, &input) {
        let is_active = entry.attributes.get("is_active").and_then(Value::as_bool).unwrap_or(true);
        text.push_str(&format!(
            "{},{},{},{},{}\n",
            entry.shortname,
            entry.subpath,
            entry.resource_type,
            is_active,
            entry.state().unwrap_or_default(),
        ));
    }
    Ok(([(header::CONTENT_TYPE, "text/csv")], text).into_response())
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecordInput {
    pub resource_type: String,
    pub shortname: String,
    pub subpath: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct ActionInput {
    pub space_name: String,
    pub request_type: String,
    pub records: Vec<RecordInput>,
}

fn record_key(space: &str, record: &RecordInput) -> EntryKey {
    (space.to_string(), normalize_subpath(&record.subpath), record.shortname.clone())
}

/// Apply an action to every record, all or nothing.
async fn request(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<ActionInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    authenticate(&store, &headers)?;
    require_space(&store, &input.space_name)?;

    let mut entries = store.entries.clone();
    let mut results = Vec::with_capacity(input.records.len());
    for record in &input.records {
        let key = record_key(&input.space_name, record);
        let entry = match input.request_type.as_str() {
            "create" => {
                if entries.contains_key(&key) {
                    return Err(Failure::conflict(&record.shortname));
                }
                let entry = store.new_entry(
                    &record.resource_type,
                    &input.space_name,
                    &record.subpath,
                    &record.shortname,
                    record.attributes.clone(),
                );
                entries.insert(key, entry.clone());
                entry
            }
            "update" | "replace" => {
                let entry = entries
                    .get_mut(&key)
                    .ok_or_else(|| Failure::not_found(&record.shortname))?;
                if input.request_type == "replace" {
                    let keep: Map<String, Value> = entry
                        .attributes
                        .iter()
                        .filter(|(k, _)| matches!(k.as_str(), "state" | "is_open" | "workflow_shortname"))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    entry.attributes = keep;
                }
                entry.attributes.extend(record.attributes.clone());
                entry.updated_at = timestamp();
                entry.clone()
            }
            "delete" => entries
                .remove(&key)
                .ok_or_else(|| Failure::not_found(&record.shortname))?,
            "move" => move_entry(&mut entries, &input.space_name, record)?,
            other => return Err(Failure::invalid(format!("unsupported request type {other}"))),
        };
        results.push(entry.to_record(false));
    }
    store.entries = entries;
    debug!(space = %input.space_name, request_type = %input.request_type, count = results.len(), "applied request");
    Ok(success(results))
}

fn move_entry(
    entries: &mut BTreeMap<EntryKey, Entry>,
    space: &str,
    record: &RecordInput,
) -> Result<Entry, Failure> {
    let attr = |name: &str| record.attributes.get(name).and_then(Value::as_str);
    let src_subpath = normalize_subpath(attr("src_subpath").unwrap_or(&record.subpath));
    let src_shortname = attr("src_shortname").unwrap_or(&record.shortname).to_string();
    let dest_subpath = normalize_subpath(attr("dest_subpath").unwrap_or(&src_subpath));
    let dest_shortname = attr("dest_shortname").unwrap_or(&src_shortname).to_string();

    let dest_key = (space.to_string(), dest_subpath.clone(), dest_shortname.clone());
    if entries.contains_key(&dest_key) {
        return Err(Failure::conflict(&dest_shortname));
    }
    let mut entry = entries
        .remove(&(space.to_string(), src_subpath, src_shortname.clone()))
        .ok_or_else(|| Failure::not_found(&src_shortname))?;
    entry.subpath = dest_subpath;
    entry.shortname = dest_shortname;
    entry.updated_at = timestamp();
    entries.insert(dest_key, entry.clone());
    Ok(entry)
}

async fn space(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<ActionInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    authenticate(&store, &headers)?;

    let mut results = Vec::with_capacity(input.records.len());
    for record in &input.records {
        let name = record.shortname.clone();
        match input.request_type.as_str() {
            "create" => {
                if store.spaces.contains(&name) {
                    return Err(Failure::conflict(&name));
                }
                store.spaces.insert(name.clone());
            }
            "update" => require_space(&store, &name)?,
            "delete" => {
                if !store.spaces.remove(&name) {
                    return Err(Failure::not_found(&format!("space {name}")));
                }
                store.entries.retain(|(space, _, _), _| *space != name);
            }
            other => return Err(Failure::invalid(format!("unsupported request type {other}"))),
        }
        results.push(json!({
            "resource_type": "space",
            "shortname": name,
            "subpath": "/",
            "attributes": record.attributes,
        }));
    }
    Ok(success(results))
}

// ---------------------------------------------------------------------------
// Entries and payloads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct EntryParams {
    #[serde(default)]
    pub retrieve_json_payload: bool,
    #[serde(default)]
    pub retrieve_attachments: bool,
    #[serde(default)]
    pub validate_schema: bool,
}

/// Split `a/b/name` into its subpath and last segment.
fn split_last(rest: &str) -> (String, &str) {
    match rest.rsplit_once('/') {
        Some((subpath, last)) => (normalize_subpath(subpath), last),
        None => ("/".to_string(), rest),
    }
}

async fn entry(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((resource_type, space_name, rest)): Path<(String, String, String)>,
    Query(params): Query<EntryParams>,
) -> Result<Json<Value>, Failure> {
    let store = db.read().await;
    authenticate(&store, &headers)?;
    let (subpath, shortname) = split_last(&rest);
    let entry = store
        .entries
        .get(&(space_name, subpath, shortname.to_string()))
        .filter(|e| e.resource_type == resource_type)
        .ok_or_else(|| Failure::not_found(shortname))?;
    Ok(Json(entry.to_meta(params.retrieve_json_payload)))
}

async fn upload_with_payload(
    State(db): State<Db>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, Failure> {
    authenticate(&*db.read().await, &headers)?;

    let mut space_name = None;
    let mut record = None;
    let mut payload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Failure::invalid(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let mime = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field.bytes().await.map_err(|e| Failure::invalid(e.to_string()))?;
        match name.as_str() {
            "space_name" => space_name = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "request_record" => {
                let parsed: RecordInput =
                    serde_json::from_slice(&bytes).map_err(|e| Failure::invalid(e.to_string()))?;
                record = Some(parsed);
            }
            "payload_file" => payload = Some(StoredPayload { mime, bytes: bytes.to_vec() }),
            _ => {}
        }
    }
    let (Some(space_name), Some(record), Some(payload)) = (space_name, record, payload) else {
        return Err(Failure::invalid("space_name, request_record and payload_file are required"));
    };

    let mut store = db.write().await;
    require_space(&store, &space_name)?;
    let key = record_key(&space_name, &record);
    if store.entries.contains_key(&key) {
        return Err(Failure::conflict(&record.shortname));
    }
    let mut entry = store.new_entry(
        &record.resource_type,
        &space_name,
        &record.subpath,
        &record.shortname,
        record.attributes,
    );
    debug!(shortname = %entry.shortname, mime = %payload.mime, size = payload.bytes.len(), "stored payload");
    entry.payload = Some(payload);
    let result = entry.to_record(false);
    store.entries.insert(key, entry);
    Ok(success(vec![result]))
}

async fn payload(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((resource_type, space_name, rest)): Path<(String, String, String)>,
) -> Result<Response, Failure> {
    let store = db.read().await;
    authenticate(&store, &headers)?;
    let (subpath, file) = split_last(&rest);
    let shortname = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    let stored = store
        .entries
        .get(&(space_name, subpath, shortname.to_string()))
        .filter(|e| e.resource_type == resource_type)
        .and_then(|e| e.payload.as_ref())
        .ok_or_else(|| Failure::not_found(file))?;
    Ok(([(header::CONTENT_TYPE, stored.mime.clone())], stored.bytes.clone()).into_response())
}

// ---------------------------------------------------------------------------
// Workflow and info
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ProgressInput {
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub comment: String,
}

/// `new -start-> in_progress -resolve-> resolved -close-> closed`, with
/// `reopen` taking a resolved ticket back to `in_progress`.
fn transition(state: &str, action: &str) -> Option<&'static str> {
    match (state, action) {
        ("new", "start") => Some("in_progress"),
        ("in_progress", "resolve") => Some("resolved"),
        ("resolved", "reopen") => Some("in_progress"),
        ("resolved", "close") => Some("closed"),
        _ => None,
    }
}

async fn progress_ticket(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((space_name, rest)): Path<(String, String)>,
    Json(input): Json<ProgressInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    authenticate(&store, &headers)?;
    let (location, action) = split_last(&rest);
    let (subpath, shortname) = split_last(&location);
    let shortname = shortname.to_string();

    let ticket = store
        .entries
        .get_mut(&(space_name, subpath, shortname.clone()))
        .filter(|e| e.resource_type == "ticket")
        .ok_or_else(|| Failure::not_found(&shortname))?;
    let state = ticket.state().unwrap_or("new").to_string();
    let next = transition(&state, action).ok_or_else(|| {
        Failure::new(
            StatusCode::BAD_REQUEST,
            "request",
            INVALID_TRANSITION,
            format!("cannot {action} a ticket in state {state}"),
        )
    })?;
    if next == "resolved" && input.resolution.is_empty() {
        return Err(Failure::invalid("resolve requires a resolution"));
    }

    ticket.attributes.insert("state".into(), json!(next));
    ticket.attributes.insert("is_open".into(), json!(next != "closed"));
    if !input.resolution.is_empty() {
        ticket.attributes.insert("resolution_reason".into(), json!(input.resolution));
    }
    if !input.comment.is_empty() {
        ticket.attributes.insert("comment".into(), json!(input.comment));
    }
    ticket.updated_at = timestamp();
    debug!(ticket = %shortname, from = %state, to = next, "ticket progressed");
    Ok(success(vec![ticket.to_record(false)]))
}

async fn health(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(space_name): Path<String>,
) -> Result<Json<Value>, Failure> {
    let store = db.read().await;
    authenticate(&store, &headers)?;
    require_space(&store, &space_name)?;
    let report = store.folders_report(&space_name);
    Ok(success_with(Vec::new(), json!({ "folders_report": report })))
}

async fn manifest(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, Failure> {
    authenticate(&*db.read().await, &headers)?;
    Ok(Json(json!({
        "status": "success",
        "attributes": {
            "name": "dmart",
            "type": "microservice",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })))
}

async fn settings() -> Json<Value> {
    Json(json!({
        "status": "success",
        "attributes": {
            "languages": { "en": "English", "ar": "العربية", "kd": "کوردی" },
            "websocket_url": null,
        },
    }))
}
