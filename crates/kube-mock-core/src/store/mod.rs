//! In-memory resource store backing CRUD mode.
//!
//! Objects are kept per (resource type, namespace) and versioned by a single
//! store-wide counter: every mutation, deletes included, takes the next
//! `resourceVersion`, so versions are unique, strictly increasing and never reused.
//! Each mutation is recorded in a bounded history that watch sessions replay from.
//!
//! All mutations run under one write lock, and watch events are published before
//! that lock is released. Subscribers therefore observe mutations in version order.

pub mod error;
pub mod patch;
pub mod path;
pub mod watch;

pub use error::StoreError;
pub use patch::{apply_patch, PatchType};
pub use path::ApiPath;
pub use watch::{WatchFilter, WatchSession};

use crate::matching::{FieldSelector, LabelSelector};
use crate::types::resource::{
    finalizers, generate_name, is_terminating, kind, list_object, metadata_mut, name, namespace,
    raw_resource_version, ResourceType,
};
use crate::types::watch::{WatchEvent, WatchEventType};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use watch::{Change, WatchRegistry};

/// Number of mutations kept for watch replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

const GENERATED_SUFFIX_LEN: usize = 5;

type Table = BTreeMap<String, Value>;

/// Label and field selectors of a list, watch or delete-collection request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub labels: LabelSelector,
    pub fields: FieldSelector,
}

impl ListOptions {
    pub fn parse(label_selector: Option<&str>, field_selector: Option<&str>) -> Result<Self, StoreError> {
        Ok(Self {
            labels: LabelSelector::parse(label_selector.unwrap_or_default())?,
            fields: FieldSelector::parse(field_selector.unwrap_or_default())?,
        })
    }

    fn matches(&self, obj: &Value) -> bool {
        self.labels.matches_object(obj) && self.fields.matches(obj)
    }
}

#[derive(Debug)]
struct StoreState {
    tables: BTreeMap<(ResourceType, String), Table>,
    resource_version: u64,
    history: VecDeque<Change>,
    history_limit: usize,
    watches: WatchRegistry,
    generated_names: u64,
    uids: u64,
}

impl StoreState {
    fn new(history_limit: usize) -> Self {
        Self {
            tables: BTreeMap::new(),
            resource_version: 0,
            history: VecDeque::new(),
            history_limit,
            watches: WatchRegistry::default(),
            generated_names: 0,
            uids: 0,
        }
    }

    fn next_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }

    fn get(&self, resource_type: &ResourceType, ns: &str, name: &str) -> Option<&Value> {
        self.tables
            .get(&(resource_type.clone(), ns.to_string()))
            .and_then(|table| table.get(name))
    }

    fn table_mut(&mut self, resource_type: &ResourceType, ns: &str) -> &mut Table {
        self.tables
            .entry((resource_type.clone(), ns.to_string()))
            .or_default()
    }

    fn remove(&mut self, resource_type: &ResourceType, ns: &str, name: &str) {
        let key = (resource_type.clone(), ns.to_string());
        if let Some(table) = self.tables.get_mut(&key) {
            table.remove(name);
            if table.is_empty() {
                self.tables.remove(&key);
            }
        }
    }

    /// Objects of `resource_type` in `ns` (every namespace when `None`), sorted by
    /// name then namespace.
    fn objects(&self, resource_type: &ResourceType, ns: Option<&str>) -> Vec<&Value> {
        let mut objects: Vec<&Value> = self
            .tables
            .iter()
            .filter(|((rt, table_ns), _)| rt == resource_type && ns.map_or(true, |n| n == table_ns.as_str()))
            .flat_map(|(_, table)| table.values())
            .collect();
        objects.sort_by(|a, b| (name(a), namespace(a)).cmp(&(name(b), namespace(b))));
        objects
    }

    fn record(&mut self, change: Change) {
        debug!(
            resource = %change.resource_type,
            event = ?change.event_type,
            version = change.resource_version(),
            "store mutation"
        );
        self.watches.publish(&change);
        self.history.push_back(change);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn generate_name(&mut self, resource_type: &ResourceType, ns: &str, prefix: &str) -> String {
        loop {
            self.generated_names += 1;
            let candidate = format!("{prefix}{}", base36(self.generated_names, GENERATED_SUFFIX_LEN));
            if self.get(resource_type, ns, &candidate).is_none() {
                return candidate;
            }
        }
    }

    fn next_uid(&mut self) -> String {
        self.uids += 1;
        format!("00000000-0000-4000-8000-{:012x}", self.uids)
    }

    /// Store a client-supplied `updated` in place of `previous`.
    fn commit_update(
        &mut self,
        resource_type: &ResourceType,
        ns: &str,
        previous: Value,
        mut updated: Value,
    ) -> Value {
        carry_server_metadata(&previous, &mut updated);
        self.store_update(resource_type, ns, previous, updated)
    }

    /// Assign the next version to `updated` and store it.
    ///
    /// Completes a pending deletion when the update leaves a terminating object
    /// without finalizers.
    fn store_update(
        &mut self,
        resource_type: &ResourceType,
        ns: &str,
        previous: Value,
        mut updated: Value,
    ) -> Value {
        let object_name = name(&previous).unwrap_or_default().to_string();
        let version = self.next_version();
        set_meta(&mut updated, "resourceVersion", Value::String(version.to_string()));

        if is_terminating(&updated) && finalizers(&updated).is_empty() {
            self.remove(resource_type, ns, &object_name);
            self.record(Change {
                resource_type: resource_type.clone(),
                event_type: WatchEventType::Deleted,
                object: updated.clone(),
                previous: None,
            });
            return updated;
        }

        self.table_mut(resource_type, ns)
            .insert(object_name, updated.clone());
        self.record(Change {
            resource_type: resource_type.clone(),
            event_type: WatchEventType::Modified,
            object: updated.clone(),
            previous: Some(previous),
        });
        updated
    }

    /// Delete or, when finalizers are pending, mark for deletion.
    fn delete_object(&mut self, resource_type: &ResourceType, ns: &str, previous: Value) -> Value {
        if !finalizers(&previous).is_empty() {
            if is_terminating(&previous) {
                return previous;
            }
            let mut marked = previous.clone();
            set_meta(&mut marked, "deletionTimestamp", Value::String(now()));
            return self.store_update(resource_type, ns, previous, marked);
        }

        let object_name = name(&previous).unwrap_or_default().to_string();
        self.remove(resource_type, ns, &object_name);
        let mut deleted = previous;
        let version = self.next_version();
        set_meta(&mut deleted, "resourceVersion", Value::String(version.to_string()));
        self.record(Change {
            resource_type: resource_type.clone(),
            event_type: WatchEventType::Deleted,
            object: deleted.clone(),
            previous: None,
        });
        deleted
    }
}

/// Versioned in-memory object store with watch support.
#[derive(Debug)]
pub struct ResourceStore {
    state: RwLock<StoreState>,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::new(history_limit)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest version handed out; `0` for a fresh store.
    pub fn resource_version(&self) -> u64 {
        self.read().resource_version
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read().tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of watch sessions still connected.
    pub fn watch_count(&self) -> usize {
        self.read().watches.len()
    }

    /// Insert a new object.
    ///
    /// `namespace` comes from the request path; when absent, the body's namespace
    /// is used, and an object with neither is cluster scoped.
    pub fn create(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        mut body: Value,
    ) -> Result<Value, StoreError> {
        ensure_object(&body)?;
        let ns = resolve_namespace(namespace, &body)?;

        let mut state = self.write();
        let object_name = match name(&body) {
            Some(n) => n.to_string(),
            None => {
                let prefix = match generate_name(&body) {
                    Some(prefix) => prefix.to_string(),
                    None => format!(
                        "{}-",
                        kind(&body)
                            .unwrap_or(resource_type.plural.as_str())
                            .to_lowercase()
                    ),
                };
                state.generate_name(resource_type, &ns, &prefix)
            }
        };

        if state.get(resource_type, &ns, &object_name).is_some() {
            return Err(StoreError::AlreadyExists {
                resource: resource_type.to_string(),
                name: object_name,
            });
        }

        let version = state.next_version();
        let uid = state.next_uid();
        if body.get("apiVersion").is_none() {
            body["apiVersion"] = Value::String(resource_type.api_version());
        }
        if let Some(meta) = metadata_mut(&mut body) {
            meta.insert("name".to_string(), Value::String(object_name.clone()));
            if !ns.is_empty() {
                meta.insert("namespace".to_string(), Value::String(ns.clone()));
            }
            meta.insert("uid".to_string(), Value::String(uid));
            meta.insert("creationTimestamp".to_string(), Value::String(now()));
            meta.insert("generation".to_string(), Value::from(1u64));
            meta.insert("resourceVersion".to_string(), Value::String(version.to_string()));
            meta.remove("deletionTimestamp");
        }

        state
            .table_mut(resource_type, &ns)
            .insert(object_name, body.clone());
        state.record(Change {
            resource_type: resource_type.clone(),
            event_type: WatchEventType::Added,
            object: body.clone(),
            previous: None,
        });
        Ok(body)
    }

    pub fn get(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        self.read()
            .get(resource_type, namespace.unwrap_or_default(), name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(resource_type, name))
    }

    /// Replace an object.
    ///
    /// A body carrying `metadata.resourceVersion` must match the stored version;
    /// without one the write is unconditional.
    pub fn replace(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        body: Value,
    ) -> Result<Value, StoreError> {
        ensure_object(&body)?;
        check_identity(&body, namespace, name)?;
        let ns = namespace.unwrap_or_default();

        let mut state = self.write();
        let previous = state
            .get(resource_type, ns, name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(resource_type, name))?;
        check_version(resource_type, &body, &previous)?;
        Ok(state.commit_update(resource_type, ns, previous, body))
    }

    /// Replace only `.status`; everything else in `body` is ignored.
    pub fn replace_status(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        body: Value,
    ) -> Result<Value, StoreError> {
        ensure_object(&body)?;
        check_identity(&body, namespace, name)?;
        let ns = namespace.unwrap_or_default();

        let mut state = self.write();
        let previous = state
            .get(resource_type, ns, name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(resource_type, name))?;
        check_version(resource_type, &body, &previous)?;
        let updated = with_status_of(&previous, &body);
        Ok(state.commit_update(resource_type, ns, previous, updated))
    }

    /// Patch an object, or only its `.status` when `status_only` is set.
    pub fn patch(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch_type: PatchType,
        patch: &Value,
        status_only: bool,
    ) -> Result<Value, StoreError> {
        let ns = namespace.unwrap_or_default();

        let mut state = self.write();
        let previous = state
            .get(resource_type, ns, name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(resource_type, name))?;
        let patched = apply_patch(&previous, patch_type, patch)?;

        if crate::types::resource::name(&patched) != Some(name)
            || crate::types::resource::namespace(&patched) != crate::types::resource::namespace(&previous)
        {
            return Err(StoreError::BadRequest(
                "patch must not change metadata.name or metadata.namespace".to_string(),
            ));
        }
        if raw_resource_version(&patched).is_some()
            && raw_resource_version(&patched) != raw_resource_version(&previous)
        {
            return Err(conflict(resource_type, name));
        }

        let updated = if status_only {
            with_status_of(&previous, &patched)
        } else {
            patched
        };
        Ok(state.commit_update(resource_type, ns, previous, updated))
    }

    /// Delete an object, returning its final state.
    ///
    /// Objects with finalizers are only marked with `deletionTimestamp`; they go
    /// away once an update removes the last finalizer.
    pub fn delete(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        let ns = namespace.unwrap_or_default();
        let mut state = self.write();
        let previous = state
            .get(resource_type, ns, name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(resource_type, name))?;
        Ok(state.delete_object(resource_type, ns, previous))
    }

    /// Delete every object matching `options`, returning them as a list.
    pub fn delete_collection(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Value {
        let mut state = self.write();
        let targets: Vec<Value> = state
            .objects(resource_type, namespace)
            .into_iter()
            .filter(|obj| options.matches(obj))
            .cloned()
            .collect();

        let deleted: Vec<Value> = targets
            .into_iter()
            .map(|obj| {
                let ns = crate::types::resource::namespace(&obj).unwrap_or_default().to_string();
                state.delete_object(resource_type, &ns, obj)
            })
            .collect();
        list_object(resource_type, deleted, state.resource_version)
    }

    /// List objects matching `options`, across namespaces when `namespace` is `None`.
    pub fn list(
        &self,
        resource_type: &ResourceType,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Value {
        let state = self.read();
        let items: Vec<Value> = state
            .objects(resource_type, namespace)
            .into_iter()
            .filter(|obj| options.matches(obj))
            .cloned()
            .collect();
        list_object(resource_type, items, state.resource_version)
    }

    /// Open a watch.
    ///
    /// With `since`, every retained change after that version is replayed first;
    /// without it the session starts with an `ADDED` event per matching object.
    /// Either way no event at or below the starting version is delivered, so a
    /// version ahead of the store waits for the store to pass it.
    pub fn watch(&self, filter: WatchFilter, since: Option<u64>) -> Result<WatchSession, StoreError> {
        let mut state = self.write();
        let initial: Vec<WatchEvent> = match since {
            Some(version) => {
                let oldest = state
                    .history
                    .front()
                    .map_or(state.resource_version, |change| {
                        change.resource_version().saturating_sub(1)
                    });
                if version < oldest {
                    return Err(StoreError::Expired {
                        requested: version,
                        oldest,
                    });
                }
                state
                    .history
                    .iter()
                    .filter(|change| change.resource_version() > version)
                    .filter_map(|change| change.event_for(&filter))
                    .collect()
            }
            None => state
                .objects(&filter.resource_type, filter.namespace.as_deref())
                .into_iter()
                .filter(|obj| filter.matches(&filter.resource_type, obj))
                .map(|obj| WatchEvent::new(WatchEventType::Added, obj.clone()))
                .collect(),
        };
        let floor = since.unwrap_or(state.resource_version);
        Ok(state.watches.subscribe(filter, floor, initial))
    }

    /// End every open watch session.
    pub fn close_watches(&self) {
        self.write().watches.close_all();
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn set_meta(obj: &mut Value, field: &str, value: Value) {
    if let Some(meta) = metadata_mut(obj) {
        meta.insert(field.to_string(), value);
    }
}

fn ensure_object(body: &Value) -> Result<(), StoreError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(StoreError::BadRequest("request body must be a JSON object".to_string()))
    }
}

fn resolve_namespace(path_namespace: Option<&str>, body: &Value) -> Result<String, StoreError> {
    match (path_namespace, namespace(body)) {
        (Some(path), Some(body)) if path != body => Err(StoreError::BadRequest(format!(
            "the namespace of the object ({body}) does not match the namespace on the request ({path})"
        ))),
        (Some(path), _) => Ok(path.to_string()),
        (None, body) => Ok(body.unwrap_or_default().to_string()),
    }
}

fn check_identity(body: &Value, path_namespace: Option<&str>, path_name: &str) -> Result<(), StoreError> {
    if let Some(body_name) = name(body) {
        if body_name != path_name {
            return Err(StoreError::BadRequest(format!(
                "the name of the object ({body_name}) does not match the name on the URL ({path_name})"
            )));
        }
    }
    resolve_namespace(path_namespace, body).map(|_| ())
}

fn conflict(resource_type: &ResourceType, name: &str) -> StoreError {
    StoreError::Conflict(format!(
        "Operation cannot be fulfilled on {resource_type} \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
    ))
}

fn check_version(resource_type: &ResourceType, body: &Value, stored: &Value) -> Result<(), StoreError> {
    match raw_resource_version(body) {
        Some(requested) if Some(requested) != raw_resource_version(stored) => {
            Err(conflict(resource_type, name(stored).unwrap_or_default()))
        }
        _ => Ok(()),
    }
}

/// `previous` with `.status` taken from `source` (removed if `source` has none).
fn with_status_of(previous: &Value, source: &Value) -> Value {
    let mut updated = previous.clone();
    if let Some(map) = updated.as_object_mut() {
        match source.get("status") {
            Some(status) => {
                map.insert("status".to_string(), status.clone());
            }
            None => {
                map.remove("status");
            }
        }
    }
    updated
}

/// Keep fields clients cannot change and bump `generation` on spec changes.
fn carry_server_metadata(previous: &Value, updated: &mut Value) {
    for field in ["apiVersion", "kind"] {
        if updated.get(field).is_none() {
            if let Some(value) = previous.get(field) {
                updated[field] = value.clone();
            }
        }
    }

    let previous_meta = previous.get("metadata").cloned().unwrap_or_default();
    let generation = previous_meta
        .get("generation")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let spec_changed = previous.get("spec") != updated.get("spec");

    if let Some(meta) = metadata_mut(updated) {
        for field in ["name", "namespace", "uid", "creationTimestamp", "deletionTimestamp"] {
            match previous_meta.get(field) {
                Some(value) => {
                    meta.insert(field.to_string(), value.clone());
                }
                None => {
                    meta.remove(field);
                }
            }
        }
        let generation = if spec_changed { generation + 1 } else { generation };
        meta.insert("generation".to_string(), Value::from(generation));
    }
}

fn base36(mut n: u64, width: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    while out.len() < width {
        out.push(b'0');
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
