//! Domain DTOs for the dmart API.
//!
//! # Design
//! Every backend reply except raw entries and payloads shares one envelope:
//! `status`, an `error` on failure and a `records` list on success. The
//! envelope is generic over its `attributes` block so query and health
//! replies get typed totals while the rest keep raw JSON. Record attributes
//! stay a JSON map because their shape depends on the resource type; use
//! `ResponseRecord::attributes_as` to read them into a concrete struct.
//!
//! These types are defined independently from the mock-server crate.
//! Integration tests catch any schema drift between the two.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ApiError;

/// Outcome tag of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// Structured error carried by a `failed` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl ErrorInfo {
    pub const SESSION_EXPIRED_KIND: &'static str = "jwtauth";
    pub const SESSION_EXPIRED_CODE: i64 = 13;

    /// The backend's signal that the session token is missing or expired.
    pub fn is_session_expired(&self) -> bool {
        self.kind == Self::SESSION_EXPIRED_KIND && self.code == Self::SESSION_EXPIRED_CODE
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.code, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    User,
    Group,
    Folder,
    Schema,
    Content,
    Acl,
    Comment,
    Media,
    Locator,
    Relationship,
    Alteration,
    History,
    Space,
    Branch,
    Permission,
    Role,
    Ticket,
    Json,
    Post,
    PluginWrapper,
    Notification,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::User => "user",
            ResourceType::Group => "group",
            ResourceType::Folder => "folder",
            ResourceType::Schema => "schema",
            ResourceType::Content => "content",
            ResourceType::Acl => "acl",
            ResourceType::Comment => "comment",
            ResourceType::Media => "media",
            ResourceType::Locator => "locator",
            ResourceType::Relationship => "relationship",
            ResourceType::Alteration => "alteration",
            ResourceType::History => "history",
            ResourceType::Space => "space",
            ResourceType::Branch => "branch",
            ResourceType::Permission => "permission",
            ResourceType::Role => "role",
            ResourceType::Ticket => "ticket",
            ResourceType::Json => "json",
            ResourceType::Post => "post",
            ResourceType::PluginWrapper => "plugin_wrapper",
            ResourceType::Notification => "notification",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Html,
    Markdown,
    Json,
    Image,
    Python,
    Pdf,
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Aggregation,
    Search,
    Subpath,
    Events,
    History,
    Tags,
    Spaces,
    Counters,
    Reports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Create,
    Update,
    Replace,
    Delete,
    Move,
}

/// Actions a permission can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Query,
    View,
    Update,
    Create,
    Delete,
    Attach,
    Move,
    ProgressTicket,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationReducer {
    pub name: String,
    pub alias: String,
    pub args: Vec<String>,
}

/// Reducers are either named shorthands or fully spelled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reducers {
    Named(Vec<String>),
    Full(Vec<AggregationReducer>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationData {
    pub load: Vec<String>,
    pub group_by: Vec<String>,
    pub reducers: Reducers,
}

/// Body of `/managed/query` and `/managed/csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub space_name: String,
    pub subpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_types: Option<Vec<ResourceType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_schema_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_shortnames: Option<Vec<String>>,
    #[serde(default)]
    pub search: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_type: Option<SortType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieve_json_payload: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieve_attachments: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_schema: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jq_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact_subpath: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_data: Option<AggregationData>,
}

impl QueryRequest {
    /// A query with every optional field unset.
    pub fn new(query_type: QueryType, space_name: &str, subpath: &str) -> Self {
        Self {
            query_type,
            space_name: space_name.to_string(),
            subpath: subpath.to_string(),
            filter_types: None,
            filter_schema_names: None,
            filter_shortnames: None,
            search: String::new(),
            from_date: None,
            to_date: None,
            sort_by: None,
            sort_type: None,
            retrieve_json_payload: None,
            retrieve_attachments: None,
            validate_schema: None,
            jq_filter: None,
            exact_subpath: None,
            limit: None,
            offset: None,
            aggregation_data: None,
        }
    }
}

/// One record inside an `ActionRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequestRecord {
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub shortname: String,
    pub subpath: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<BTreeMap<ResourceType, Vec<Value>>>,
}

/// Body of `/managed/request` and `/managed/space`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub space_name: String,
    pub request_type: RequestType,
    pub records: Vec<ActionRequestRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub shortname: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressTicketRequest {
    pub resolution: String,
    pub comment: String,
}

/// A record inside a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub shortname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub subpath: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<BTreeMap<String, Vec<ResponseRecord>>>,
}

impl ResponseRecord {
    /// Deserialize `attributes` into a concrete type.
    pub fn attributes_as<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(Value::Object(self.attributes.clone()))
            .map_err(|e| ApiError::DeserializationError(e.to_string()))
    }
}

/// The shared response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<A = Value> {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub records: Vec<ResponseRecord>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<A>,
}

impl<A> ApiResponse<A> {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl ApiResponse {
    /// The token handed out by a successful login.
    pub fn access_token(&self) -> Option<&str> {
        self.records.first()?.attributes.get("access_token")?.as_str()
    }

    /// Attributes of the signed-in user from a `get_profile` reply.
    pub fn profile(&self) -> Result<ProfileAttributes, ApiError> {
        self.records
            .first()
            .ok_or_else(|| ApiError::DeserializationError("profile reply has no records".to_string()))?
            .attributes_as()
    }
}

/// Totals attached to query replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAttributes {
    pub total: u64,
    pub returned: u64,
}

/// Space health report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthAttributes {
    #[serde(default)]
    pub folders_report: Map<String, Value>,
}

pub type QueryResponse = ApiResponse<QueryAttributes>;
pub type HealthResponse = ApiResponse<HealthAttributes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Web,
    Mobile,
    Bot,
}

/// Per-resource permission granted to the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub allowed_actions: Vec<ActionType>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub restricted_fields: Vec<Value>,
    #[serde(default)]
    pub allowed_fields_values: Map<String, Value>,
}

/// Attributes of the record returned by `/user/profile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub displayname: Translation,
    #[serde(rename = "type")]
    pub user_type: UserType,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub is_msisdn_verified: bool,
    #[serde(default)]
    pub force_password_change: bool,
    #[serde(default)]
    pub permissions: BTreeMap<String, Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
}

/// Raw entry metadata returned by `/managed/entry/...`.
///
/// Fields specific to users or tickets are optional; anything else the
/// backend sends is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub shortname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub displayname: Translation,
    #[serde(default)]
    pub description: Translation,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_open: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_envelope_defaults_records() {
        let response: ApiResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(response.is_success());
        assert!(response.records.is_empty());
        assert!(response.error.is_none());
    }

    #[test]
    fn failed_envelope_carries_error() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"status":"failed","error":{"type":"jwtauth","code":13,"message":"Not authenticated"}}"#,
        )
        .unwrap();
        assert!(!response.is_success());
        assert!(response.error.unwrap().is_session_expired());
    }

    #[test]
    fn query_request_skips_unset_fields() {
        let query = QueryRequest::new(QueryType::Search, "demo", "/posts");
        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(
            body,
            json!({"type": "search", "space_name": "demo", "subpath": "/posts", "search": ""})
        );
    }

    #[test]
    fn resource_type_wire_names() {
        assert_eq!(serde_json::to_value(ResourceType::PluginWrapper).unwrap(), json!("plugin_wrapper"));
        assert_eq!(ResourceType::PluginWrapper.to_string(), "plugin_wrapper");
        let parsed: ResourceType = serde_json::from_value(json!("ticket")).unwrap();
        assert_eq!(parsed, ResourceType::Ticket);
    }

    #[test]
    fn reducers_accept_both_shapes() {
        let named: Reducers = serde_json::from_value(json!(["count"])).unwrap();
        assert_eq!(named, Reducers::Named(vec!["count".to_string()]));
        let full: Reducers =
            serde_json::from_value(json!([{"name": "count", "alias": "n", "args": []}])).unwrap();
        assert!(matches!(full, Reducers::Full(ref r) if r[0].alias == "n"));
    }

    #[test]
    fn profile_reads_first_record() {
        let response: ApiResponse = serde_json::from_value(json!({
            "status": "success",
            "records": [{
                "resource_type": "user",
                "shortname": "dmart",
                "subpath": "users",
                "attributes": {"type": "bot", "force_password_change": true}
            }]
        }))
        .unwrap();
        let profile = response.profile().unwrap();
        assert_eq!(profile.user_type, UserType::Bot);
        assert!(profile.force_password_change);

        let empty: ApiResponse = serde_json::from_value(json!({"status": "success"})).unwrap();
        assert!(matches!(empty.profile(), Err(ApiError::DeserializationError(_))));
    }

    #[test]
    fn record_attributes_into_profile() {
        let record: ResponseRecord = serde_json::from_value(json!({
            "resource_type": "user",
            "shortname": "dmart",
            "subpath": "users",
            "attributes": {
                "email": "dmart@example.com",
                "type": "web",
                "displayname": {"en": "Admin"},
                "permissions": {
                    "demo:__all_subpaths__:content": {"allowed_actions": ["view", "query"]}
                }
            }
        }))
        .unwrap();
        let profile: ProfileAttributes = record.attributes_as().unwrap();
        assert_eq!(profile.user_type, UserType::Web);
        assert_eq!(profile.displayname.en.as_deref(), Some("Admin"));
        let permission = &profile.permissions["demo:__all_subpaths__:content"];
        assert_eq!(permission.allowed_actions, vec![ActionType::View, ActionType::Query]);
    }

    #[test]
    fn entry_keeps_unknown_fields() {
        let entry: ResponseEntry = serde_json::from_value(json!({
            "shortname": "t1",
            "is_active": true,
            "state": "new",
            "is_open": true,
            "collaborators": {"delivered_by": "x"}
        }))
        .unwrap();
        assert_eq!(entry.state.as_deref(), Some("new"));
        assert!(entry.extra.contains_key("collaborators"));
    }
}
