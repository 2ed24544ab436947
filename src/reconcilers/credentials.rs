// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Administrative password rotation.
//!
//! Each managed account under `ou=admins,ou=identities` has its password reset
//! to the value held in a Secret. Status records a salted SHA-256 fingerprint
//! per DN so an unchanged Secret never triggers another reset, and the
//! password itself never lands in status or logs.

use crate::ds_errors::CredentialError;
use crate::ldap::AdminSession;
use crate::metrics;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// A managed account together with the password read from its Secret.
#[derive(Clone)]
pub struct ResolvedPassword {
    pub uid: String,
    pub password: String,
}

impl fmt::Debug for ResolvedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedPassword")
            .field("uid", &self.uid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Salted fingerprint of a password.
///
/// `salt` is the owning instance's UID, so a re-created instance re-applies
/// every password. Fields are NUL separated.
#[must_use]
pub fn fingerprint(salt: &str, uid: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(uid.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of a rotation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    /// DN to fingerprint for every managed account, to be written to status.
    pub fingerprints: BTreeMap<String, String>,
    /// DNs whose password was reset during this pass.
    pub rotated: Vec<String>,
}

/// Bring every managed password in line with its Secret.
///
/// Accounts no longer listed simply drop out of the returned fingerprints.
///
/// # Errors
///
/// - [`CredentialError::IdentityNotFound`] if an account does not exist
/// - [`CredentialError::Session`] for directory failures
pub async fn rotate_passwords(
    session: &mut AdminSession,
    desired: &[ResolvedPassword],
    salt: &str,
    recorded: &BTreeMap<String, String>,
) -> Result<RotationOutcome, CredentialError> {
    let mut outcome = RotationOutcome::default();

    for account in desired {
        let fp = fingerprint(salt, &account.uid, &account.password);

        if let Some((dn, _)) = recorded.iter().find(|(_, v)| **v == fp) {
            debug!(uid = %account.uid, dn = %dn, "Password already applied");
            outcome.fingerprints.insert(dn.clone(), fp);
            continue;
        }

        let Some(identity) = session.lookup_identity(&account.uid).await? else {
            metrics::record_password_rotation("identity_not_found");
            return Err(CredentialError::IdentityNotFound {
                uid: account.uid.clone(),
            });
        };

        if let Err(e) = session.modify_password(&identity.dn, &account.password).await {
            metrics::record_password_rotation("failed");
            return Err(e.into());
        }

        info!(uid = %account.uid, dn = %identity.dn, "Rotated administrative password");
        metrics::record_password_rotation("rotated");
        outcome.rotated.push(identity.dn.clone());
        outcome.fingerprints.insert(identity.dn, fp);
    }

    Ok(outcome)
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod credentials_tests;
