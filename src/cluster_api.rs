// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Orchestration-API surface used by the reconciler.
//!
//! The reconciler never talks to `kube::Api` directly. It goes through
//! [`ClusterApi`], which covers exactly the verbs it needs: get/create/patch on
//! the managed `Service`, get and status-patch on `DirectoryService`, and
//! reading one key of a `Secret`. [`KubeClusterApi`] is the production
//! implementation and retries transient failures with
//! [`retry_api_call`](crate::reconcilers::retry::retry_api_call).

use crate::constants::FIELD_MANAGER;
use crate::crd::DirectoryService;
use crate::ds_errors::ApiError;
use crate::reconcilers::retry::retry_api_call;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::warn;

/// Orchestration-API verbs consumed by the reconciler.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ApiError>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ApiError>;

    /// JSON merge patch on a `Service`.
    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Service, ApiError>;

    async fn get_directory_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DirectoryService>, ApiError>;

    /// JSON merge patch on the status subresource. A patch carrying
    /// `metadata.resourceVersion` fails with 409 if the object has moved on.
    async fn patch_directory_service_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DirectoryService, ApiError>;

    /// Read one key of a `Secret`. `None` if the Secret or the key is missing.
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, ApiError>;
}

/// [`ClusterApi`] backed by a Kubernetes client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        retry_api_call(|| api.get_opt(name), &format!("get service {namespace}/{name}")).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        retry_api_call(
            || api.create(&params, service),
            &format!("create service {namespace}"),
        )
        .await
    }

    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Service, ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let params = Self::patch_params();
        let patch = Patch::Merge(patch);
        retry_api_call(
            || api.patch(name, &params, &patch),
            &format!("patch service {namespace}/{name}"),
        )
        .await
    }

    async fn get_directory_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DirectoryService>, ApiError> {
        let api: Api<DirectoryService> = Api::namespaced(self.client.clone(), namespace);
        retry_api_call(
            || api.get_opt(name),
            &format!("get directoryservice {namespace}/{name}"),
        )
        .await
    }

    async fn patch_directory_service_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DirectoryService, ApiError> {
        let api: Api<DirectoryService> = Api::namespaced(self.client.clone(), namespace);
        let params = Self::patch_params();
        let patch = Patch::Merge(patch);
        retry_api_call(
            || api.patch_status(name, &params, &patch),
            &format!("patch directoryservice status {namespace}/{name}"),
        )
        .await
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, ApiError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = retry_api_call(|| api.get_opt(name), &format!("get secret {namespace}/{name}"))
            .await?;

        let Some(bytes) = secret.and_then(|s| s.data).and_then(|mut data| data.remove(key)) else {
            return Ok(None);
        };

        match String::from_utf8(bytes.0) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!(namespace = %namespace, secret = %name, key = %key, "Secret value is not valid UTF-8");
                Ok(None)
            }
        }
    }
}
