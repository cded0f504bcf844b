//! Per-test automation session management.
//!
//! Sessions are keyed by execution unit, never held in a process-wide
//! singleton:
//! - Each concurrently running test gets its own backend connection
//! - A failed connection affects only the test that asked for it
//! - Teardown never fails; backend errors are logged and dropped

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::{AutomationDriver, Capabilities, DriverConnector, DriverError};

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

/// Identity of one concurrently running test
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(String);

impl UnitId {
    /// Use `id` verbatim
    pub fn new(id: impl Into<String>) -> Self {
        UnitId(id.into())
    }

    /// A process-unique id derived from a test name
    pub fn unique(test_name: &str) -> Self {
        let n = NEXT_UNIT.fetch_add(1, Ordering::Relaxed);
        UnitId(format!("{test_name}#{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error types for session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to create session for {unit} at {url}: {source}")]
    Creation {
        unit: UnitId,
        url: String,
        #[source]
        source: DriverError,
    },

    #[error("No active session for {0}")]
    NoActiveSession(UnitId),
}

/// A live automation session owned by one execution unit
pub struct Session {
    unit: UnitId,
    driver: Box<dyn AutomationDriver>,
    created_at: DateTime<Utc>,
    capabilities: Capabilities,
}

impl Session {
    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn driver(&self) -> &dyn AutomationDriver {
        self.driver.as_ref()
    }

    pub fn session_id(&self) -> &str {
        self.driver.session_id()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn teardown(&self) {
        match self.driver.quit() {
            Ok(()) => info!(unit = %self.unit, session = %self.session_id(), "Session closed"),
            Err(e) => warn!(
                unit = %self.unit,
                session = %self.session_id(),
                error = %e,
                "Session teardown failed; continuing"
            ),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("unit", &self.unit)
            .field("session_id", &self.session_id())
            .field("created_at", &self.created_at)
            .field("device", &self.capabilities.device_name)
            .finish()
    }
}

/// Owns at most one session per execution unit
pub struct SessionManager {
    server_url: String,
    connector: Arc<dyn DriverConnector>,
    sessions: Mutex<HashMap<UnitId, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(server_url: impl Into<String>, connector: Arc<dyn DriverConnector>) -> Self {
        Self {
            server_url: server_url.into(),
            connector,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Open a session for `unit`.
    ///
    /// A session the unit still holds from an earlier test is torn down
    /// first. Connection failures are returned to this caller only.
    pub fn open_session(
        &self,
        unit: &UnitId,
        capabilities: Capabilities,
    ) -> SessionResult<Arc<Session>> {
        if let Some(stale) = self.sessions.lock().remove(unit) {
            warn!(%unit, "Unit already held a session; closing it first");
            stale.teardown();
        }

        debug!(%unit, url = %self.server_url, device = %capabilities.device_name, "Opening session");
        let driver = self
            .connector
            .connect(&self.server_url, &capabilities)
            .map_err(|source| SessionError::Creation {
                unit: unit.clone(),
                url: self.server_url.clone(),
                source,
            })?;

        let session = Arc::new(Session {
            unit: unit.clone(),
            driver,
            created_at: Utc::now(),
            capabilities,
        });
        info!(%unit, session = %session.session_id(), "Session opened");

        self.sessions
            .lock()
            .insert(unit.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// The session bound to `unit`
    pub fn current_session(&self, unit: &UnitId) -> SessionResult<Arc<Session>> {
        self.sessions
            .lock()
            .get(unit)
            .cloned()
            .ok_or_else(|| SessionError::NoActiveSession(unit.clone()))
    }

    /// Close the session bound to `unit`, if any.
    ///
    /// Idempotent and infallible. Returns whether a session was closed.
    pub fn close_session(&self, unit: &UnitId) -> bool {
        let session = self.sessions.lock().remove(unit);
        match session {
            Some(session) => {
                session.teardown();
                true
            }
            None => {
                debug!(%unit, "No session to close");
                false
            }
        }
    }

    /// Number of open sessions
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Close every open session
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.teardown();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AppReference, MockConnector};

    fn caps() -> Capabilities {
        Capabilities::new("Android", "emulator-1", AppReference::binary("/apps/shop.apk"))
    }

    fn manager() -> (SessionManager, MockConnector) {
        let connector = MockConnector::default();
        let manager = SessionManager::new("http://127.0.0.1:4723", Arc::new(connector.clone()));
        (manager, connector)
    }

    #[test]
    fn test_unit_id_unique() {
        let a = UnitId::unique("addItem");
        let b = UnitId::unique("addItem");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("addItem#"));
    }

    #[test]
    fn test_open_and_close() {
        let (manager, connector) = manager();
        let unit = UnitId::new("t1");

        let session = manager.open_session(&unit, caps()).unwrap();
        assert_eq!(session.unit(), &unit);
        assert_eq!(session.capabilities().device_name, "emulator-1");
        assert_eq!(
            manager.current_session(&unit).unwrap().session_id(),
            session.session_id()
        );

        assert!(manager.close_session(&unit));
        assert!(!manager.close_session(&unit));
        assert_eq!(connector.live_sessions(), 0);
        assert!(matches!(
            manager.current_session(&unit),
            Err(SessionError::NoActiveSession(_))
        ));
    }

    #[test]
    fn test_creation_failure_is_isolated() {
        let (manager, connector) = manager();
        let healthy = UnitId::new("healthy");
        manager.open_session(&healthy, caps()).unwrap();

        connector.set_unreachable(true);
        let err = manager.open_session(&UnitId::new("doomed"), caps()).unwrap_err();
        assert!(matches!(err, SessionError::Creation { .. }));
        assert!(err.to_string().contains("http://127.0.0.1:4723"));

        assert!(manager.current_session(&healthy).is_ok());
        assert_eq!(manager.active_sessions(), 1);
    }

    #[test]
    fn test_teardown_error_is_swallowed() {
        let (manager, connector) = manager();
        connector.fail_quit(true);
        let unit = UnitId::new("t1");
        manager.open_session(&unit, caps()).unwrap();
        assert!(manager.close_session(&unit));
        assert_eq!(manager.active_sessions(), 0);
    }

    #[test]
    fn test_reopen_replaces_stale_session() {
        let (manager, connector) = manager();
        let unit = UnitId::new("t1");
        let first = manager.open_session(&unit, caps()).unwrap();
        let second = manager.open_session(&unit, caps()).unwrap();
        assert_ne!(first.session_id(), second.session_id());
        assert_eq!(connector.live_sessions(), 1);
        assert_eq!(manager.active_sessions(), 1);
    }

    #[test]
    fn test_drop_closes_remaining_sessions() {
        let (manager, connector) = manager();
        manager.open_session(&UnitId::new("a"), caps()).unwrap();
        manager.open_session(&UnitId::new("b"), caps()).unwrap();
        drop(manager);
        assert_eq!(connector.live_sessions(), 0);
    }

    #[test]
    fn test_parallel_units_get_distinct_sessions() {
        let (manager, connector) = manager();
        let manager = Arc::new(manager);

        let ids: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let manager = Arc::clone(&manager);
                    s.spawn(move || {
                        let unit = UnitId::new(format!("unit-{i}"));
                        let session = manager.open_session(&unit, caps()).unwrap();
                        let id = session.session_id().to_string();
                        assert_eq!(manager.current_session(&unit).unwrap().session_id(), id);
                        id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        assert_eq!(connector.sessions_created(), 4);
    }
}
