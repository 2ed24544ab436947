// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for `DirectoryService` resources.
//!
//! The controller drives [`reconcile`] for every instance. Each reconciliation
//! converges three independent pieces of state and reports the result in the
//! instance's status:
//!
//! 1. **Service** - the headless `Service` fronting the instance ([`service`])
//! 2. **Backup** - a recurring backup task on the directory server ([`backup`])
//! 3. **Passwords** - administrative account passwords ([`credentials`])
//!
//! The supporting modules keep reconciliation well-behaved under load:
//!
//! - [`flight`] - at most one reconciliation per instance, later requests coalesced
//! - [`retry`] - in-place API retries and the per-instance retry budget
//! - [`status`] - batched status updates written with optimistic concurrency
//!
//! # Example: Reconciling One Instance
//!
//! ```rust,no_run
//! use ds_operator::config::OperatorConfig;
//! use ds_operator::context::Context;
//! use ds_operator::crd::DirectoryService;
//! use ds_operator::reconcilers::reconcile_directoryservice;
//! use kube::Client;
//! use std::sync::Arc;
//!
//! async fn reconcile_one(client: Client, ds: DirectoryService) -> anyhow::Result<()> {
//!     let ctx = Arc::new(Context::from_client(client, OperatorConfig::default()));
//!
//!     let action = reconcile_directoryservice(ctx, ds).await?;
//!     println!("next: {action:?}");
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod credentials;
pub mod directoryservice;
pub mod flight;
pub mod retry;
pub mod service;
pub mod status;

pub use directoryservice::{error_policy, reconcile, reconcile_directoryservice};
