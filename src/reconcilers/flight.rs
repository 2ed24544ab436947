// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Single-flight tracking per `DirectoryService`.
//!
//! At most one reconciliation per instance key (`namespace/name`) runs at a
//! time. A reconcile request that arrives while the key is busy does not run;
//! it marks the key as needing one more pass, and any number of such requests
//! collapse into that single pending re-run.
//!
//! ```rust
//! use ds_operator::reconcilers::flight::InFlight;
//!
//! let flights = InFlight::default();
//! let guard = flights.try_begin("identity/ds-idrepo").unwrap();
//! assert!(flights.try_begin("identity/ds-idrepo").is_none());
//! assert!(guard.finish(), "the second request is owed a re-run");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-key state: `true` if a re-run was requested while in flight.
type Flights = Arc<Mutex<HashMap<String, bool>>>;

/// Tracks which instance keys are currently being reconciled.
#[derive(Clone, Default)]
pub struct InFlight {
    flights: Flights,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` and records a pending re-run if it is busy.
    #[must_use]
    pub fn try_begin(&self, key: &str) -> Option<FlightGuard> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rerun) = flights.get_mut(key) {
            *rerun = true;
            return None;
        }
        flights.insert(key.to_string(), false);
        Some(FlightGuard {
            key: key.to_string(),
            flights: Arc::clone(&self.flights),
            released: false,
        })
    }
}

/// Ownership of one key. Dropping it releases the key.
pub struct FlightGuard {
    key: String,
    flights: Flights,
    released: bool,
}

impl FlightGuard {
    /// Release the key. Returns `true` if another request arrived meanwhile.
    #[must_use]
    pub fn finish(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key)
            .unwrap_or(false)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "flight_tests.rs"]
mod flight_tests;
