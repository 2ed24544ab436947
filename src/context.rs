// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the `DirectoryService` controller.
//!
//! The controller hands every reconciliation an `Arc<Context>` holding:
//! - the orchestration API ([`ClusterApi`])
//! - the directory connector used to open admin sessions
//! - the operator configuration
//! - the per-instance single-flight tracker and retry budget
//!
//! Both external systems sit behind traits so tests can drive the reconciler
//! against in-memory fakes.

use crate::cluster_api::{ClusterApi, KubeClusterApi};
use crate::config::OperatorConfig;
use crate::constants::{RECONCILE_BACKOFF_BASE_MILLIS, RECONCILE_BACKOFF_CAP_SECS};
use crate::ldap::{DirectoryConnector, Ldap3Connector, SessionParams};
use crate::reconcilers::flight::InFlight;
use crate::reconcilers::retry::RetryBudget;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

/// Shared state passed to every reconciliation.
#[derive(Clone)]
pub struct Context {
    /// Orchestration API
    pub api: Arc<dyn ClusterApi>,

    /// Dials directory servers
    pub connector: Arc<dyn DirectoryConnector>,

    pub config: OperatorConfig,

    /// At most one reconciliation per instance
    pub flights: InFlight,

    /// Transient failure budget per instance
    pub retry_budget: Arc<RetryBudget>,
}

impl Context {
    /// Assemble a context from its collaborators.
    #[must_use]
    pub fn new(
        api: Arc<dyn ClusterApi>,
        connector: Arc<dyn DirectoryConnector>,
        config: OperatorConfig,
    ) -> Self {
        let retry_budget = Arc::new(RetryBudget::new(
            config.max_retry_attempts,
            Duration::from_millis(RECONCILE_BACKOFF_BASE_MILLIS),
            Duration::from_secs(RECONCILE_BACKOFF_CAP_SECS),
        ));

        Self {
            api,
            connector,
            config,
            flights: InFlight::new(),
            retry_budget,
        }
    }

    /// Production context backed by the Kubernetes API and `ldap3`.
    #[must_use]
    pub fn from_client(client: Client, config: OperatorConfig) -> Self {
        Self::new(
            Arc::new(KubeClusterApi::new(client)),
            Arc::new(Ldap3Connector),
            config,
        )
    }

    /// Session parameters for one instance's admin session.
    #[must_use]
    pub fn session_params(&self, url: String, bind_dn: String, credential: String) -> SessionParams {
        SessionParams {
            url,
            bind_dn,
            credential,
            connect_timeout: self.config.connect_timeout(),
            operation_timeout: self.config.operation_timeout(),
            page_size: self.config.ldap_page_size,
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
