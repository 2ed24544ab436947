// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! Every setting is a command-line flag with an environment fallback, so the
//! same binary runs unchanged from a shell or from a Deployment manifest:
//!
//! ```text
//! ds-operator --watch-namespace identity --concurrency 4
//! WATCH_NAMESPACE=identity DS_OPERATOR_CONCURRENCY=4 ds-operator
//! ```
//!
//! Logging is configured separately through `RUST_LOG` and `RUST_LOG_FORMAT`.

use crate::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_LDAP_CONNECT_TIMEOUT_SECS, DEFAULT_LDAP_OPERATION_TIMEOUT_SECS,
    DEFAULT_LDAP_PAGE_SIZE, DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_METRICS_BIND_ADDRESS,
    DEFAULT_RESYNC_INTERVAL_SECS,
};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Directory Service operator for Kubernetes
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "ds-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Only watch `DirectoryService` resources in this namespace (default: all)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Maximum number of instances reconciled concurrently
    #[arg(
        long,
        env = "DS_OPERATOR_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub concurrency: u16,

    /// Timeout for dialing and binding to a directory server, in seconds
    #[arg(
        long,
        env = "DS_OPERATOR_LDAP_CONNECT_TIMEOUT",
        default_value_t = DEFAULT_LDAP_CONNECT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub ldap_connect_timeout_secs: u64,

    /// Timeout for a single directory operation, in seconds
    #[arg(
        long,
        env = "DS_OPERATOR_LDAP_OPERATION_TIMEOUT",
        default_value_t = DEFAULT_LDAP_OPERATION_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub ldap_operation_timeout_secs: u64,

    /// Entries per page for paged directory searches
    #[arg(
        long,
        env = "DS_OPERATOR_LDAP_PAGE_SIZE",
        default_value_t = DEFAULT_LDAP_PAGE_SIZE,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub ldap_page_size: i32,

    /// Periodic resync of settled instances, in seconds
    #[arg(
        long,
        env = "DS_OPERATOR_RESYNC_INTERVAL",
        default_value_t = DEFAULT_RESYNC_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub resync_interval_secs: u64,

    /// Transient failures tolerated before an instance is marked Failed
    #[arg(
        long,
        env = "DS_OPERATOR_MAX_RETRY_ATTEMPTS",
        default_value_t = DEFAULT_MAX_RETRY_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_retry_attempts: u32,

    /// Address the Prometheus endpoint listens on
    #[arg(long, env = "DS_OPERATOR_METRICS_ADDR", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,
}

impl OperatorConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ldap_connect_timeout_secs)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.ldap_operation_timeout_secs)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            concurrency: DEFAULT_CONCURRENCY,
            ldap_connect_timeout_secs: DEFAULT_LDAP_CONNECT_TIMEOUT_SECS,
            ldap_operation_timeout_secs: DEFAULT_LDAP_OPERATION_TIMEOUT_SECS,
            ldap_page_size: DEFAULT_LDAP_PAGE_SIZE,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            metrics_bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
