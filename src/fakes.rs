// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory collaborators for unit tests.
//!
//! - [`FakeClusterApi`] stores Services, `DirectoryService`s and Secrets, applies
//!   JSON merge patches, enforces `metadata.resourceVersion` on status patches,
//!   counts writes, and cascades deletion to owned Services.
//! - [`FakeDirectory`] is a directory server: it holds entries and passwords,
//!   records every call, counts connections opened and closed, and can inject
//!   one-shot failures or delays per operation.

use crate::cluster_api::ClusterApi;
use crate::crd::{DirectoryService, DirectoryServiceSpec};
use crate::ds_errors::ApiError;
use crate::ldap::{DirectoryConnection, DirectoryConnector, Entry, ProtocolError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Apply an RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

/// Build a `DirectoryService` the way the API server would return it.
pub fn directory_service(namespace: &str, name: &str, spec: Value) -> DirectoryService {
    let spec: DirectoryServiceSpec = serde_json::from_value(spec).unwrap();
    let mut ds = DirectoryService::new(name, spec);
    ds.metadata.namespace = Some(namespace.to_string());
    ds.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    ds.metadata.generation = Some(1);
    ds
}

// ============================================================================
// Orchestration API
// ============================================================================

#[derive(Default)]
pub struct ClusterState {
    pub services: BTreeMap<Key, Service>,
    pub instances: BTreeMap<Key, DirectoryService>,
    pub secrets: BTreeMap<Key, BTreeMap<String, String>>,
    pub service_creates: usize,
    pub service_patches: usize,
    pub status_patches: Vec<Value>,
    pub reads: usize,
    failures: HashMap<&'static str, ApiError>,
    resource_version: u64,
}

impl ClusterState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn take_failure(&mut self, op: &'static str) -> Result<(), ApiError> {
        self.failures.remove(op).map_or(Ok(()), Err)
    }
}

#[derive(Clone, Default)]
pub struct FakeClusterApi {
    pub state: Arc<Mutex<ClusterState>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_instance(&self, mut ds: DirectoryService) {
        let mut state = self.state.lock().unwrap();
        ds.metadata.resource_version = Some(state.next_resource_version());
        state
            .instances
            .insert(key(&ds.namespace().unwrap(), &ds.name_any()), ds);
    }

    pub fn insert_service(&self, namespace: &str, mut service: Service) {
        let mut state = self.state.lock().unwrap();
        service.metadata.namespace = Some(namespace.to_string());
        service.metadata.resource_version = Some(state.next_resource_version());
        state.services.insert(key(namespace, &service.name_any()), service);
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, data_key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .entry(key(namespace, name))
            .or_default()
            .insert(data_key.to_string(), value.to_string());
    }

    /// Change the spec and bump `metadata.generation`.
    pub fn update_spec(&self, namespace: &str, name: &str, spec: Value) {
        let mut state = self.state.lock().unwrap();
        let rv = state.next_resource_version();
        let ds = state.instances.get_mut(&key(namespace, name)).unwrap();
        ds.spec = serde_json::from_value(spec).unwrap();
        ds.metadata.generation = Some(ds.metadata.generation.unwrap_or(0) + 1);
        ds.metadata.resource_version = Some(rv);
    }

    /// Remove an instance and every Service it owns.
    pub fn delete_instance(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(ds) = state.instances.remove(&key(namespace, name)) else {
            return;
        };
        let uid = ds.metadata.uid.unwrap_or_default();
        state.services.retain(|_, svc| {
            !svc.owner_references()
                .iter()
                .any(|owner| owner.uid == uid)
        });
    }

    /// Mark an instance as being deleted.
    pub fn set_deleting(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let ds = state.instances.get_mut(&key(namespace, name)).unwrap();
        ds.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            k8s_openapi::jiff::Timestamp::now(),
        ));
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: ApiError) {
        self.state.lock().unwrap().failures.insert(op, err);
    }

    pub fn instance(&self, namespace: &str, name: &str) -> Option<DirectoryService> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().unwrap().services.len()
    }

    /// Service creates plus patches.
    pub fn service_writes(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.service_creates + state.service_patches
    }

    pub fn status_patch_count(&self) -> usize {
        self.state.lock().unwrap().status_patches.len()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("get_service")?;
        state.reads += 1;
        Ok(state.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("create_service")?;
        let name = service.name_any();
        if state.services.contains_key(&key(namespace, &name)) {
            return Err(ApiError::new(Some(409), format!("services \"{name}\" already exists")));
        }
        let mut created = service.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("svc-uid-{namespace}-{name}"));
        created.metadata.resource_version = Some(state.next_resource_version());
        state.services.insert(key(namespace, &name), created.clone());
        state.service_creates += 1;
        Ok(created)
    }

    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Service, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("patch_service")?;
        let existing = state
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::new(Some(404), format!("services \"{name}\" not found")))?;

        let mut value = serde_json::to_value(&existing).unwrap();
        merge_patch(&mut value, patch);
        let mut patched: Service = serde_json::from_value(value)
            .map_err(|e| ApiError::new(Some(422), e.to_string()))?;
        patched.metadata.resource_version = Some(state.next_resource_version());
        state.services.insert(key(namespace, name), patched.clone());
        state.service_patches += 1;
        Ok(patched)
    }

    async fn get_directory_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DirectoryService>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("get_directory_service")?;
        state.reads += 1;
        Ok(state.instances.get(&key(namespace, name)).cloned())
    }

    async fn patch_directory_service_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DirectoryService, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("patch_status")?;
        let existing = state
            .instances
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::new(Some(404), format!("directoryservices \"{name}\" not found")))?;

        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            if existing.metadata.resource_version.as_deref() != Some(expected) {
                return Err(ApiError::new(
                    Some(409),
                    "the object has been modified; please apply your changes to the latest version",
                ));
            }
        }

        let mut value = serde_json::to_value(&existing).unwrap();
        if let Some(status_patch) = patch.get("status") {
            let status = value
                .as_object_mut()
                .unwrap()
                .entry("status")
                .or_insert(Value::Null);
            merge_patch(status, status_patch);
        }
        let mut patched: DirectoryService = serde_json::from_value(value)
            .map_err(|e| ApiError::new(Some(422), e.to_string()))?;
        patched.metadata.resource_version = Some(state.next_resource_version());
        state.instances.insert(key(namespace, name), patched.clone());
        state.status_patches.push(patch.clone());
        Ok(patched)
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        data_key: &str,
    ) -> Result<Option<String>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("get_secret")?;
        Ok(state
            .secrets
            .get(&key(namespace, name))
            .and_then(|data| data.get(data_key))
            .cloned())
    }
}

// ============================================================================
// Directory server
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryCall {
    Connect(String),
    Bind(String),
    Search { base: String, filter: String },
    PasswordModify(String),
    Add { dn: String, attrs: Vec<(String, Vec<String>)> },
    Delete(String),
    Unbind,
}

#[derive(Default)]
pub struct DirectoryState {
    /// Entries keyed by lower-cased DN.
    pub entries: BTreeMap<String, Entry>,
    /// Bind credentials and passwords set via password modify, keyed by DN.
    pub passwords: BTreeMap<String, String>,
    pub calls: Vec<DirectoryCall>,
    pub opened: usize,
    pub closed: usize,
    connect_failure: Option<ProtocolError>,
    failures: HashMap<&'static str, ProtocolError>,
    delays: HashMap<&'static str, Duration>,
}

#[derive(Clone, Default)]
pub struct FakeDirectory {
    pub state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    /// A directory that accepts `bind_dn` / `password`.
    pub fn with_admin(bind_dn: &str, password: &str) -> Self {
        let fake = Self::default();
        fake.set_password(bind_dn, password);
        fake
    }

    pub fn set_password(&self, dn: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(dn.to_string(), password.to_string());
    }

    pub fn insert_entry(&self, entry: Entry) {
        self.state
            .lock()
            .unwrap()
            .entries
            .insert(entry.dn.to_ascii_lowercase(), entry);
    }

    pub fn fail_connect(&self, err: ProtocolError) {
        self.state.lock().unwrap().connect_failure = Some(err);
    }

    /// Make the next call of `op` (`bind`, `search`, `password_modify`, `add`,
    /// `delete`) fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: ProtocolError) {
        self.state.lock().unwrap().failures.insert(op, err);
    }

    /// Delay every call of `op`.
    pub fn delay(&self, op: &'static str, duration: Duration) {
        self.state.lock().unwrap().delays.insert(op, duration);
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn adds(&self) -> Vec<DirectoryCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DirectoryCall::Add { .. }))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&DirectoryCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn entry(&self, dn: &str) -> Option<Entry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&dn.to_ascii_lowercase())
            .cloned()
    }

    pub fn entries_under(&self, base: &str) -> Vec<Entry> {
        let base = base.to_ascii_lowercase();
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|(dn, _)| dn.ends_with(&base))
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn password(&self, dn: &str) -> Option<String> {
        self.state.lock().unwrap().passwords.get(dn).cloned()
    }
}

#[async_trait]
impl DirectoryConnector for FakeDirectory {
    async fn connect(
        &self,
        url: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn DirectoryConnection>, ProtocolError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(DirectoryCall::Connect(url.to_string()));
            if let Some(err) = state.connect_failure.clone() {
                return Err(err);
            }
            state.delays.get("connect").copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().unwrap().opened += 1;
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeConnection {
    /// Log the call, then apply any injected delay and failure.
    async fn enter(&self, op: &'static str, call: DirectoryCall) -> Result<(), ProtocolError> {
        let (delay, failure) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            (state.delays.get(op).copied(), state.failures.remove(op))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

/// Match a single `(attr=value)` equality or `(attr=*)` presence filter.
fn matches_filter(entry: &Entry, filter: &str) -> bool {
    let inner = filter.trim().trim_start_matches('(').trim_end_matches(')');
    let Some((attr, value)) = inner.split_once('=') else {
        return false;
    };
    let values = entry.values(attr);
    if value == "*" {
        return !values.is_empty();
    }
    values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

fn no_such_object(dn: &str) -> ProtocolError {
    ProtocolError::Result {
        code: 32,
        message: format!("No such object: {dn}"),
    }
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ProtocolError> {
        self.enter("bind", DirectoryCall::Bind(dn.to_string())).await?;
        let state = self.state.lock().unwrap();
        if state.passwords.get(dn).map(String::as_str) == Some(password) {
            Ok(())
        } else {
            Err(ProtocolError::Result {
                code: 49,
                message: "Invalid Credentials".to_string(),
            })
        }
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        _attrs: &[&str],
        _page_size: i32,
    ) -> Result<Vec<Entry>, ProtocolError> {
        self.enter(
            "search",
            DirectoryCall::Search {
                base: base.to_string(),
                filter: filter.to_string(),
            },
        )
        .await?;
        let base = base.to_ascii_lowercase();
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|(dn, entry)| dn.ends_with(&base) && matches_filter(entry, filter))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn password_modify(&mut self, dn: &str, new_password: &str) -> Result<(), ProtocolError> {
        self.enter("password_modify", DirectoryCall::PasswordModify(dn.to_string()))
            .await?;
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(&dn.to_ascii_lowercase()) {
            return Err(no_such_object(dn));
        }
        state.passwords.insert(dn.to_string(), new_password.to_string());
        Ok(())
    }

    async fn add(&mut self, dn: &str, attrs: &[(String, Vec<String>)]) -> Result<(), ProtocolError> {
        self.enter(
            "add",
            DirectoryCall::Add {
                dn: dn.to_string(),
                attrs: attrs.to_vec(),
            },
        )
        .await?;
        let mut state = self.state.lock().unwrap();
        let lowered = dn.to_ascii_lowercase();
        if state.entries.contains_key(&lowered) {
            return Err(ProtocolError::Result {
                code: 68,
                message: "Entry Already Exists".to_string(),
            });
        }
        let entry = Entry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .map(|(name, values)| (name.to_ascii_lowercase(), values.clone()))
                .collect(),
        };
        state.entries.insert(lowered, entry);
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<(), ProtocolError> {
        self.enter("delete", DirectoryCall::Delete(dn.to_string())).await?;
        let mut state = self.state.lock().unwrap();
        state
            .entries
            .remove(&dn.to_ascii_lowercase())
            .map(|_| ())
            .ok_or_else(|| no_such_object(dn))
    }

    async fn unbind(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DirectoryCall::Unbind);
        state.closed += 1;
        Ok(())
    }
}
