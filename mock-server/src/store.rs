//! In-memory backend state: sessions, spaces and entries.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const ADMIN_SHORTNAME: &str = "dmart";
pub const ADMIN_PASSWORD: &str = "Password1234";
pub const MANAGEMENT_SPACE: &str = "management";
pub const DEMO_SPACE: &str = "demo";

/// `(space, subpath, shortname)`
pub type EntryKey = (String, String, String);

#[derive(Clone, Debug)]
pub struct StoredPayload {
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub resource_type: String,
    pub uuid: Uuid,
    pub space: String,
    pub subpath: String,
    pub shortname: String,
    pub attributes: Map<String, Value>,
    pub payload: Option<StoredPayload>,
    pub seq: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl Entry {
    pub fn key(&self) -> EntryKey {
        (self.space.clone(), self.subpath.clone(), self.shortname.clone())
    }

    pub fn state(&self) -> Option<&str> {
        self.attributes.get("state").and_then(Value::as_str)
    }

    /// Payload in the backend's `{content_type, body}` form. Only JSON
    /// payloads are inlined.
    fn payload_json(&self) -> Option<Value> {
        let payload = self.payload.as_ref()?;
        if payload.mime != "application/json" {
            return None;
        }
        let body: Value = serde_json::from_slice(&payload.bytes).ok()?;
        Some(json!({ "content_type": "json", "body": body }))
    }

    /// The entry as an envelope record.
    pub fn to_record(&self, with_payload: bool) -> Value {
        let mut attributes = self.attributes.clone();
        attributes.insert("created_at".into(), json!(self.created_at));
        attributes.insert("updated_at".into(), json!(self.updated_at));
        attributes.insert("owner_shortname".into(), json!(ADMIN_SHORTNAME));
        attributes.entry("is_active").or_insert(json!(true));
        if with_payload {
            if let Some(payload) = self.payload_json() {
                attributes.insert("payload".into(), payload);
            }
        }
        json!({
            "resource_type": self.resource_type,
            "uuid": self.uuid,
            "shortname": self.shortname,
            "subpath": self.subpath,
            "attributes": attributes,
        })
    }

    /// The entry as raw metadata, attributes flattened to the top level.
    pub fn to_meta(&self, with_payload: bool) -> Value {
        let mut meta = self.attributes.clone();
        meta.insert("uuid".into(), json!(self.uuid));
        meta.insert("shortname".into(), json!(self.shortname));
        meta.insert("subpath".into(), json!(self.subpath));
        meta.insert("created_at".into(), json!(self.created_at));
        meta.insert("updated_at".into(), json!(self.updated_at));
        meta.insert("owner_shortname".into(), json!(ADMIN_SHORTNAME));
        meta.entry("is_active").or_insert(json!(true));
        if with_payload {
            if let Some(payload) = self.payload_json() {
                meta.insert("payload".into(), payload);
            }
        }
        Value::Object(meta)
    }
}

#[derive(Debug)]
pub struct Store {
    pub sessions: HashSet<String>,
    pub spaces: BTreeSet<String>,
    pub entries: BTreeMap<EntryKey, Entry>,
    next_seq: u64,
}

impl Store {
    pub fn seeded() -> Self {
        Self {
            sessions: HashSet::new(),
            spaces: [MANAGEMENT_SPACE, DEMO_SPACE].into_iter().map(String::from).collect(),
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn open_session(&mut self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone());
        token
    }

    pub fn new_entry(
        &mut self,
        resource_type: &str,
        space: &str,
        subpath: &str,
        shortname: &str,
        mut attributes: Map<String, Value>,
    ) -> Entry {
        if resource_type == "ticket" {
            attributes.insert("state".into(), json!("new"));
            attributes.insert("is_open".into(), json!(true));
            attributes
                .entry("workflow_shortname")
                .or_insert(json!("default"));
        }
        self.next_seq += 1;
        let now = timestamp();
        Entry {
            resource_type: resource_type.to_string(),
            uuid: Uuid::new_v4(),
            space: space.to_string(),
            subpath: normalize_subpath(subpath),
            shortname: shortname.to_string(),
            attributes,
            payload: None,
            seq: self.next_seq,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Entries of `space` under `subpath`, oldest first. With `exact` only
    /// direct children match.
    pub fn children(&self, space: &str, subpath: &str, exact: bool) -> Vec<&Entry> {
        let subpath = normalize_subpath(subpath);
        let mut found: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.space == space)
            .filter(|e| {
                if exact {
                    e.subpath == subpath
                } else {
                    subpath == "/" || e.subpath == subpath || e.subpath.starts_with(&format!("{subpath}/"))
                }
            })
            .collect();
        found.sort_by_key(|e| e.seq);
        found
    }

    /// Number of entries per subpath of `space`.
    pub fn folders_report(&self, space: &str) -> Map<String, Value> {
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for entry in self.entries.values().filter(|e| e.space == space) {
            *counts.entry(&entry.subpath).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(subpath, n)| (subpath.to_string(), json!({ "valid_entries": n })))
            .collect()
    }
}

/// Canonical subpath: no surrounding slashes, `/` for the space root.
pub fn normalize_subpath(subpath: &str) -> String {
    let trimmed = subpath.trim_matches('/');
    if trimmed.is_empty() || trimmed == "__root__" {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    secs.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpaths_are_normalized() {
        assert_eq!(normalize_subpath("/posts/"), "posts");
        assert_eq!(normalize_subpath("__root__"), "/");
        assert_eq!(normalize_subpath(""), "/");
        assert_eq!(normalize_subpath("a/b"), "a/b");
    }

    #[test]
    fn tickets_start_open() {
        let mut store = Store::seeded();
        let ticket = store.new_entry("ticket", DEMO_SPACE, "/tickets", "t1", Map::new());
        assert_eq!(ticket.state(), Some("new"));
        assert_eq!(ticket.attributes["is_open"], true);
        assert_eq!(ticket.subpath, "tickets");
    }

    #[test]
    fn children_respect_exact_subpath() {
        let mut store = Store::seeded();
        for (subpath, name) in [("posts", "a"), ("posts/2024", "b"), ("other", "c")] {
            let entry = store.new_entry("content", DEMO_SPACE, subpath, name, Map::new());
            store.entries.insert(entry.key(), entry);
        }
        assert_eq!(store.children(DEMO_SPACE, "/posts", true).len(), 1);
        assert_eq!(store.children(DEMO_SPACE, "/posts", false).len(), 2);
        assert_eq!(store.children(DEMO_SPACE, "/", false).len(), 3);
        assert_eq!(store.folders_report(DEMO_SPACE)["posts/2024"]["valid_entries"], 1);
    }
}
