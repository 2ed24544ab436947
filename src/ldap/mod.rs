// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Directory server administrative protocol.
//!
//! The operator talks to the directory server over LDAP. Everything protocol
//! specific sits behind two traits:
//!
//! - [`DirectoryConnector`] dials an endpoint and hands back a raw connection
//! - [`DirectoryConnection`] exposes the handful of operations the operator
//!   needs (bind, paged search, password modify, add, delete, unbind)
//!
//! [`session::AdminSession`] layers the session rules on top: no command before
//! a successful bind, bounded timeouts, typed errors, and release on every exit
//! path via [`session::with_session`]. [`ldap3_conn::Ldap3Connector`] is the
//! production implementation.

pub mod ldap3_conn;
pub mod session;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub use ldap3_conn::Ldap3Connector;
pub use session::{with_session, AdminSession, SessionParams};

/// Failure reported by a raw directory connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// No LDAP result was received (I/O, TLS, protocol framing).
    Transport(String),
    /// The server answered with a non-success result code.
    Result { code: u32, message: String },
}

impl ProtocolError {
    /// The LDAP result code, if the server produced one.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Transport(_) => None,
            Self::Result { code, .. } => Some(*code),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(reason) => write!(f, "{reason}"),
            Self::Result { code, message } if message.is_empty() => {
                write!(f, "result code {code}")
            }
            Self::Result { code, message } => write!(f, "result code {code}: {message}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A directory entry returned by a search.
///
/// Attribute names are stored lower-cased; LDAP attribute descriptions are
/// case-insensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl Entry {
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style attribute insertion.
    #[must_use]
    pub fn with_attr(mut self, name: &str, values: &[&str]) -> Self {
        self.attrs.insert(
            name.to_ascii_lowercase(),
            values.iter().map(|v| (*v).to_string()).collect(),
        );
        self
    }

    /// First value of an attribute.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of an attribute.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }
}

/// Dials directory server endpoints.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Open a raw, unauthenticated connection.
    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn DirectoryConnection>, ProtocolError>;
}

/// One raw connection to a directory server.
#[async_trait]
pub trait DirectoryConnection: Send {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ProtocolError>;

    /// Subtree search returning every matching entry. Implementations page
    /// through the result set with `page_size` entries per round trip.
    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
        page_size: i32,
    ) -> Result<Vec<Entry>, ProtocolError>;

    /// Password modify extended operation (RFC 3062) without the old password.
    async fn password_modify(&mut self, dn: &str, new_password: &str) -> Result<(), ProtocolError>;

    async fn add(&mut self, dn: &str, attrs: &[(String, Vec<String>)]) -> Result<(), ProtocolError>;

    async fn delete(&mut self, dn: &str) -> Result<(), ProtocolError>;

    async fn unbind(&mut self) -> Result<(), ProtocolError>;
}
