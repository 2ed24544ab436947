// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Convergence of the headless `Service` fronting a directory server.
//!
//! Every `DirectoryService` owns exactly one `Service` with the same name. It is
//! headless so clients address individual replicas, selects the instance's pods
//! through the `app.kubernetes.io/{name,instance}` pair, and carries a
//! controller owner reference so deleting the instance deletes the service.
//!
//! Convergence is a fixed point: an absent service is created, a drifted one is
//! patched with only the fields that differ and then re-checked, and a service
//! that already matches costs one read and no writes.

use crate::cluster_api::ClusterApi;
use crate::constants::{API_GROUP_VERSION, KIND_DIRECTORY_SERVICE, KIND_SERVICE};
use crate::crd::{DirectoryPort, DirectoryService, DirectoryServiceSpec};
use crate::ds_errors::{ApiError, ConvergenceError};
use crate::labels::{
    APP_NAME_DS, COMPONENT_DIRECTORY, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_NAME,
    K8S_PART_OF, MANAGED_BY_DS_OPERATOR, PART_OF_FORGEROCK,
};
use crate::metrics;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// `clusterIP` value that makes a service headless.
const HEADLESS_CLUSTER_IP: &str = "None";

/// What convergence had to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergeAction {
    Created,
    Patched,
    Unchanged,
}

/// The converged service and the action taken.
#[derive(Clone, Debug)]
pub struct ConvergeOutcome {
    pub service: Service,
    pub action: ConvergeAction,
}

/// Selector binding the service to the instance's pods.
#[must_use]
pub fn build_selector(instance_name: &str) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(K8S_NAME.into(), APP_NAME_DS.into());
    selector.insert(K8S_INSTANCE.into(), instance_name.into());
    selector
}

/// Labels put on the service: the selector pair plus ownership labels.
#[must_use]
pub fn build_labels(instance_name: &str) -> BTreeMap<String, String> {
    let mut labels = build_selector(instance_name);
    labels.insert(K8S_COMPONENT.into(), COMPONENT_DIRECTORY.into());
    labels.insert(K8S_PART_OF.into(), PART_OF_FORGEROCK.into());
    labels.insert(K8S_MANAGED_BY.into(), MANAGED_BY_DS_OPERATOR.into());
    labels
}

/// Controller owner reference pointing at the instance, for cascade deletion.
#[must_use]
pub fn build_owner_reference(ds: &DirectoryService) -> OwnerReference {
    OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: KIND_DIRECTORY_SERVICE.to_string(),
        name: ds.name_any(),
        uid: ds.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Service ports in canonical order, target port equal to the port.
#[must_use]
pub fn build_ports(spec: &DirectoryServiceSpec) -> Vec<ServicePort> {
    spec.exposed_ports()
        .into_iter()
        .map(|port: DirectoryPort| ServicePort {
            name: Some(port.port_name().into()),
            port: i32::from(port.number()),
            target_port: Some(IntOrString::Int(i32::from(port.number()))),
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect()
}

/// Build the desired headless service for an instance.
#[must_use]
pub fn build_service(ds: &DirectoryService) -> Service {
    let name = ds.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: ds.namespace(),
            labels: Some(build_labels(&name)),
            owner_references: Some(vec![build_owner_reference(ds)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some(HEADLESS_CLUSTER_IP.into()),
            selector: Some(build_selector(&name)),
            ports: Some(build_ports(&ds.spec)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Comparable form of a port: (port, name, protocol, target port).
fn normalize_ports(ports: Option<&Vec<ServicePort>>) -> Vec<(i32, String, String, String)> {
    let mut normalized: Vec<_> = ports
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    let target = match &p.target_port {
                        None => p.port.to_string(),
                        Some(IntOrString::Int(i)) => i.to_string(),
                        Some(IntOrString::String(s)) => s.clone(),
                    };
                    (
                        p.port,
                        p.name.clone().unwrap_or_default(),
                        p.protocol.clone().unwrap_or_else(|| "TCP".into()),
                        target,
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    normalized.sort();
    normalized
}

/// Compute the merge patch that repairs `observed` towards `desired`.
///
/// Only desired labels are enforced; labels added by others are left alone.
/// Selector keys that are not desired are removed. Ports are compared as a set
/// and replaced as a list. The desired owner reference is appended if missing.
///
/// Returns `None` when nothing differs.
#[must_use]
pub fn service_drift(observed: &Service, desired: &Service) -> Option<Value> {
    let mut metadata = Map::new();
    let mut spec = Map::new();

    let observed_labels = observed.metadata.labels.clone().unwrap_or_default();
    let label_patch: Map<String, Value> = desired
        .metadata
        .labels
        .iter()
        .flatten()
        .filter(|(k, v)| observed_labels.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if !label_patch.is_empty() {
        metadata.insert("labels".into(), Value::Object(label_patch));
    }

    let desired_refs = desired.metadata.owner_references.clone().unwrap_or_default();
    let mut observed_refs = observed.metadata.owner_references.clone().unwrap_or_default();
    let missing: Vec<OwnerReference> = desired_refs
        .into_iter()
        .filter(|d| !observed_refs.iter().any(|o| o.uid == d.uid))
        .collect();
    if !missing.is_empty() {
        observed_refs.extend(missing);
        metadata.insert("ownerReferences".into(), json!(observed_refs));
    }

    let observed_spec = observed.spec.clone().unwrap_or_default();
    let desired_spec = desired.spec.clone().unwrap_or_default();

    let observed_selector = observed_spec.selector.unwrap_or_default();
    let desired_selector = desired_spec.selector.unwrap_or_default();
    if observed_selector != desired_selector {
        let mut selector: Map<String, Value> = desired_selector
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        for k in observed_selector.keys() {
            if !desired_selector.contains_key(k) {
                selector.insert(k.clone(), Value::Null);
            }
        }
        spec.insert("selector".into(), Value::Object(selector));
    }

    if normalize_ports(observed_spec.ports.as_ref()) != normalize_ports(desired_spec.ports.as_ref()) {
        spec.insert("ports".into(), json!(desired_spec.ports));
    }

    if metadata.is_empty() && spec.is_empty() {
        return None;
    }

    let mut patch = Map::new();
    if !metadata.is_empty() {
        patch.insert("metadata".into(), Value::Object(metadata));
    }
    if !spec.is_empty() {
        patch.insert("spec".into(), Value::Object(spec));
    }
    Some(Value::Object(patch))
}

/// Dotted names of the fields a drift patch touches, for messages.
fn drift_fields(patch: &Value) -> String {
    let mut fields = Vec::new();
    for section in ["metadata", "spec"] {
        if let Some(obj) = patch.get(section).and_then(Value::as_object) {
            fields.extend(obj.keys().map(|k| format!("{section}.{k}")));
        }
    }
    fields.join(", ")
}

/// Reject a service controlled by someone else.
///
/// # Errors
///
/// [`ConvergenceError::OwnershipConflict`] naming the foreign controller.
pub fn check_ownership(observed: &Service, ds: &DirectoryService) -> Result<(), ConvergenceError> {
    let uid = ds.metadata.uid.as_deref().unwrap_or_default();
    let foreign = observed
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true) && o.uid != uid);

    match foreign {
        Some(owner) => Err(ConvergenceError::OwnershipConflict {
            service: service_key(observed),
            owner: format!("{}/{}", owner.kind, owner.name),
        }),
        None => Ok(()),
    }
}

/// Reject drift in fields the API server does not allow patching.
///
/// # Errors
///
/// [`ConvergenceError::ImmutableFieldDrift`] if the service is not headless.
pub fn check_immutable(observed: &Service) -> Result<(), ConvergenceError> {
    let cluster_ip = observed.spec.as_ref().and_then(|s| s.cluster_ip.as_deref());
    match cluster_ip {
        Some(ip) if ip != HEADLESS_CLUSTER_IP => Err(ConvergenceError::ImmutableFieldDrift {
            service: service_key(observed),
            field: "spec.clusterIP",
            observed: ip.to_string(),
            expected: HEADLESS_CLUSTER_IP.to_string(),
        }),
        _ => Ok(()),
    }
}

fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    )
}

fn api_failure(
    namespace: &str,
    name: &str,
    operation: &'static str,
) -> impl FnOnce(ApiError) -> ConvergenceError {
    let service = format!("{namespace}/{name}");
    move |source| ConvergenceError::ApiFailure {
        service,
        operation,
        source,
    }
}

/// Converge the managed service of `ds`.
///
/// # Errors
///
/// Returns a [`ConvergenceError`]; the reconciler classifies it.
pub async fn converge_service(
    api: &dyn ClusterApi,
    ds: &DirectoryService,
) -> Result<ConvergeOutcome, ConvergenceError> {
    let namespace = ds.namespace().unwrap_or_default();
    let name = ds.name_any();
    let desired = build_service(ds);

    let observed = api
        .get_service(&namespace, &name)
        .await
        .map_err(api_failure(&namespace, &name, "get"))?;

    let observed = match observed {
        Some(observed) => observed,
        None => match api.create_service(&namespace, &desired).await {
            Ok(service) => {
                info!(namespace = %namespace, name = %name, "Created headless Service");
                metrics::record_resource_created(KIND_SERVICE);
                return Ok(ConvergeOutcome {
                    service,
                    action: ConvergeAction::Created,
                });
            }
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %namespace, name = %name, "Service appeared concurrently, re-reading");
                api.get_service(&namespace, &name)
                    .await
                    .map_err(api_failure(&namespace, &name, "get"))?
                    .ok_or_else(|| {
                        api_failure(&namespace, &name, "create")(e)
                    })?
            }
            Err(e) => return Err(api_failure(&namespace, &name, "create")(e)),
        },
    };

    check_ownership(&observed, ds)?;
    check_immutable(&observed)?;

    let Some(patch) = service_drift(&observed, &desired) else {
        debug!(namespace = %namespace, name = %name, "Service already converged");
        return Ok(ConvergeOutcome {
            service: observed,
            action: ConvergeAction::Unchanged,
        });
    };

    info!(
        namespace = %namespace,
        name = %name,
        fields = %drift_fields(&patch),
        "Repairing Service drift"
    );
    let patched = api
        .patch_service(&namespace, &name, &patch)
        .await
        .map_err(api_failure(&namespace, &name, "patch"))?;
    metrics::record_resource_updated(KIND_SERVICE);

    if let Some(remaining) = service_drift(&patched, &desired) {
        return Err(ConvergenceError::DriftPersisted {
            service: format!("{namespace}/{name}"),
            fields: drift_fields(&remaining),
        });
    }

    Ok(ConvergeOutcome {
        service: patched,
        action: ConvergeAction::Patched,
    })
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
