// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `ldap3`-backed directory connections.
//!
//! Each connection owns its own `LdapConnAsync` driver task. Searches use the
//! simple paged results control so large containers are walked page by page.

use super::{DirectoryConnection, DirectoryConnector, Entry, ProtocolError};
use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::exop::PasswordModify;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Production connector dialing real directory servers.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ldap3Connector;

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn DirectoryConnection>, ProtocolError> {
        let settings = LdapConnSettings::new().set_conn_timeout(timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(map_ldap_error)?;

        let endpoint = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(endpoint = %endpoint, error = %e, "LDAP connection driver exited with error");
            }
        });

        debug!(endpoint = %url, "Opened LDAP connection");
        Ok(Box::new(Ldap3Connection { ldap }))
    }
}

struct Ldap3Connection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ProtocolError> {
        self.ldap
            .simple_bind(dn, password)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
        page_size: i32,
    ) -> Result<Vec<Entry>, ProtocolError> {
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(page_size)),
        ];
        let attrs: Vec<String> = attrs.iter().map(|a| (*a).to_string()).collect();

        let mut stream = self
            .ldap
            .streaming_search_with(adapters, base, Scope::Subtree, filter, attrs)
            .await
            .map_err(map_ldap_error)?;

        let mut entries = Vec::new();
        while let Some(raw) = stream.next().await.map_err(map_ldap_error)? {
            let entry = SearchEntry::construct(raw);
            entries.push(Entry {
                dn: entry.dn,
                attrs: entry
                    .attrs
                    .into_iter()
                    .map(|(name, values)| (name.to_ascii_lowercase(), values))
                    .collect(),
            });
        }
        stream.finish().await.success().map_err(map_ldap_error)?;

        Ok(entries)
    }

    async fn password_modify(&mut self, dn: &str, new_password: &str) -> Result<(), ProtocolError> {
        let exop = PasswordModify {
            user_id: Some(dn),
            old_pass: None,
            new_pass: Some(new_password),
        };
        self.ldap
            .extended(exop)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn add(&mut self, dn: &str, attrs: &[(String, Vec<String>)]) -> Result<(), ProtocolError> {
        let attrs: Vec<(String, HashSet<String>)> = attrs
            .iter()
            .map(|(name, values)| (name.clone(), values.iter().cloned().collect()))
            .collect();
        self.ldap
            .add(dn, attrs)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<(), ProtocolError> {
        self.ldap
            .delete(dn)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<(), ProtocolError> {
        self.ldap.unbind().await.map_err(map_ldap_error)
    }
}

/// Split `ldap3` errors into server results and transport failures.
fn map_ldap_error(err: LdapError) -> ProtocolError {
    match err {
        LdapError::LdapResult { result } => ProtocolError::Result {
            code: result.rc,
            message: result.text,
        },
        other => ProtocolError::Transport(other.to_string()),
    }
}
