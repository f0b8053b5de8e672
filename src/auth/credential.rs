//! Runtime credential state shared across transfer workers.
//!
//! The remote service authenticates every archive request with a short-lived
//! session cookie. Exactly one value is live at a time, held in a
//! lock-guarded cell that the coordinator passes by reference to every
//! worker at dispatch time. Replacing it is an atomic swap visible to all
//! subsequently-dispatched workers; in-flight workers keep the value they
//! captured when their request was built.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::download::constants::{AUTH_SESSION_LIFETIME, AUTH_WARNING_AGE};

/// Inner state: the live cookie plus when its session began.
#[derive(Debug)]
struct CredentialState {
    cookie: String,
    session_started: Instant,
}

/// Lock-guarded holder of the current session cookie.
///
/// Shared by `Arc` between the coordinator and its workers. The lock is
/// held only for in-memory reads and swaps, never across IO.
#[derive(Debug)]
pub struct CredentialStore {
    inner: Mutex<CredentialState>,
}

impl CredentialStore {
    /// Creates a store around the initial credential; the session clock
    /// starts now.
    #[must_use]
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(CredentialState {
                cookie: cookie.into(),
                session_started: Instant::now(),
            }),
        }
    }

    /// Returns a copy of the current cookie.
    #[must_use]
    pub fn get(&self) -> String {
        self.lock().cookie.clone()
    }

    /// Atomically installs a new cookie and restarts the session clock.
    pub fn swap(&self, cookie: impl Into<String>) {
        let mut state = self.lock();
        state.cookie = cookie.into();
        state.session_started = Instant::now();
        info!("credential replaced, session clock reset");
    }

    /// Age of the current session.
    #[must_use]
    pub fn session_age(&self) -> Duration {
        self.lock().session_started.elapsed()
    }

    /// True once the session is old enough to warn about upcoming expiry.
    #[must_use]
    pub fn nearing_expiry(&self) -> bool {
        let age = self.session_age();
        let nearing = age >= AUTH_WARNING_AGE;
        if nearing {
            debug!(age_secs = age.as_secs(), "session nearing expiry");
        }
        nearing
    }

    /// Estimated time left before the remote service rejects the session.
    ///
    /// Zero once the typical lifetime has fully elapsed.
    #[must_use]
    pub fn estimated_remaining(&self) -> Duration {
        AUTH_SESSION_LIFETIME.saturating_sub(self.session_age())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CredentialState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
