// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use ds_operator::{
    config::OperatorConfig,
    constants::{KIND_DIRECTORY_SERVICE, TOKIO_WORKER_THREADS},
    context::Context,
    crd::DirectoryService,
    metrics,
    reconcilers::{error_policy, reconcile},
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    runtime::{controller, predicates, reflector, watcher, Controller, WatchStreamExt},
    Api, Client,
};
use std::sync::Arc;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let config = OperatorConfig::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("ds-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Initialize logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT` (`json` or
/// `text`, default `text`).
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(config: OperatorConfig) -> Result<()> {
    init_logging();

    info!("Starting Directory Service operator");
    debug!(?config, "Configuration loaded");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let metrics_addr = config.metrics_bind_address;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve_metrics(metrics_addr).await {
            error!(addr = %metrics_addr, error = %e, "Metrics server exited");
        }
    });

    run_directoryservice_controller(client, config).await;

    info!("Directory Service operator shut down");
    Ok(())
}

/// Run the `DirectoryService` controller until a shutdown signal arrives.
///
/// Instances trigger a reconciliation only when their generation changes, so
/// the operator's own status writes do not cut a requested backoff short.
/// Owned `Service` objects are watched too, so deleting or editing the managed
/// service triggers a reconciliation of its owner.
async fn run_directoryservice_controller(client: Client, config: OperatorConfig) {
    let (instances, services): (Api<DirectoryService>, Api<Service>) =
        match &config.watch_namespace {
            Some(namespace) => {
                info!(namespace = %namespace, "Watching a single namespace");
                (
                    Api::namespaced(client.clone(), namespace),
                    Api::namespaced(client.clone(), namespace),
                )
            }
            None => {
                info!("Watching all namespaces");
                (Api::all(client.clone()), Api::all(client.clone()))
            }
        };

    let controller_config = controller::Config::default().concurrency(config.concurrency);
    let ctx = Arc::new(Context::from_client(client, config));

    info!(kind = KIND_DIRECTORY_SERVICE, "Starting controller");

    let (reader, writer) = reflector::store();
    let instances = watcher(instances, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation, Default::default());

    Controller::for_stream(instances, reader)
        .owns(services, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(instance = %object, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    debug!(error = %e, "Reconciliation error");
                }
            }
        })
        .await;
}
