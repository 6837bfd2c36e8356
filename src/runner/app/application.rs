use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::runner::app::listener::{default_listener, ApplicationListener};
use crate::runner::app::session::{duration_millis, millis_to_datetime, Session};
use crate::runner::config::ApplicationSettings;
use crate::runner::context::Context;
use crate::runner::ds::error::{LifecyclePhase, Result, RuntimeError};
use crate::runner::ds::key::{Key, APPLICATION, APPLICATION_NAME};
use crate::runner::ds::scope::{Scope, ScopeRef};
use crate::runner::ds::value::Value;

/// What an application shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub application: String,
    pub sessions_closed: usize,
    /// One message per hook that failed. Failures never stop the cascade.
    pub failures: Vec<String>,
}

/// Long-lived state shared by every request that runs under one name.
pub struct Application {
    name: Key,
    scope: ScopeRef,
    sessions: DashMap<Key, Arc<Session>>,
    started: AtomicBool,
    discarded: AtomicBool,
    shut_down: AtomicBool,
    start_lock: Mutex<()>,
    /// The listener whose start hook ran; end hooks go to the same one.
    listener: RwLock<Option<Arc<dyn ApplicationListener>>>,
    created: DateTime<Utc>,
    last_accessed: AtomicI64,
    timeout_ms: AtomicU64,
    session_timeout_ms: AtomicU64,
}

impl Application {
    pub(crate) fn new(name: Key, settings: &ApplicationSettings) -> Arc<Self> {
        let created = Utc::now();
        let app = Application {
            scope: Scope::new(APPLICATION.clone()),
            name,
            sessions: DashMap::new(),
            started: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            start_lock: Mutex::new(()),
            listener: RwLock::new(None),
            created,
            last_accessed: AtomicI64::new(created.timestamp_millis()),
            timeout_ms: AtomicU64::new(duration_millis(settings.application_timeout())),
            session_timeout_ms: AtomicU64::new(duration_millis(settings.session_timeout())),
        };
        app.seed_scope();
        Arc::new(app)
    }

    fn seed_scope(&self) {
        if let Err(e) = self
            .scope
            .put(APPLICATION_NAME.clone(), self.name.name())
        {
            warn!(application = %self.name, error = %e, "failed to seed application scope");
        }
    }

    pub fn name(&self) -> &Key {
        &self.name
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Failed to start or already shut down; the registry replaces such
    /// instances on the next lookup.
    pub fn is_defunct(&self) -> bool {
        self.is_discarded() || self.is_shut_down()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_accessed.load(Ordering::Acquire))
    }

    pub fn touch(&self) {
        self.last_accessed
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.timeout_ms
            .store(duration_millis(timeout), Ordering::Release);
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        match self.session_timeout_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_session_timeout(&self, timeout: Option<Duration>) {
        self.session_timeout_ms
            .store(duration_millis(timeout), Ordering::Release);
    }

    pub(crate) fn apply_settings(&self, settings: &ApplicationSettings) {
        self.set_timeout(settings.application_timeout());
        self.set_session_timeout(settings.session_timeout());
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let timeout = self.timeout_ms.load(Ordering::Acquire);
        if timeout == 0 {
            return false;
        }
        let idle = now.timestamp_millis() - self.last_accessed.load(Ordering::Acquire);
        idle > 0 && idle as u64 > timeout
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn listener(&self) -> Option<Arc<dyn ApplicationListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs the start hook once per instance. `Ok(false)` means another
    /// caller's start failed and this instance is gone; look it up again.
    pub(crate) fn start<F: FnOnce()>(
        &self,
        ctx: &Context<'_>,
        listener: &Arc<dyn ApplicationListener>,
        discard: F,
    ) -> Result<bool> {
        if self.is_started() {
            return Ok(true);
        }
        let _guard = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_started() {
            return Ok(true);
        }
        if self.is_discarded() {
            return Ok(false);
        }

        debug!(application = %self.name, listener = listener.name(), "starting application");
        let failure = match listener.on_application_start(ctx, &[]) {
            Ok(true) => {
                *self.listener.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(listener.clone());
                self.started.store(true, Ordering::Release);
                info!(application = %self.name, "application started");
                return Ok(true);
            }
            Ok(false) => RuntimeError::Runtime("application start aborted by listener".to_string()),
            Err(e) => e,
        };

        error!(application = %self.name, error = %failure, "application start failed");
        self.discarded.store(true, Ordering::Release);
        discard();
        Err(RuntimeError::lifecycle(
            LifecyclePhase::ApplicationStart,
            &self.name,
            failure,
        ))
    }

    /// The live session for `id`, creating it when missing. A defunct session
    /// under the same id is replaced atomically and handed back so the caller
    /// can end it. `None` once the application is shut down: the check runs
    /// under the map's entry lock, so a session is either refused here or
    /// inserted early enough for the shutdown drain to end it.
    pub(crate) fn get_or_create_session(
        &self,
        id: &Key,
    ) -> Option<(Arc<Session>, Option<Arc<Session>>)> {
        let timeout = self.session_timeout();
        let entry = self.sessions.entry(id.clone());
        if self.is_shut_down() {
            debug!(application = %self.name, session = %id, "refusing session on shut down application");
            return None;
        }
        match entry {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_defunct() {
                    return Some((entry.get().clone(), None));
                }
                let fresh = Session::new(id.clone(), &self.name, timeout);
                let stale = entry.insert(fresh.clone());
                debug!(application = %self.name, session = %id, "replacing defunct session");
                Some((fresh, Some(stale)))
            }
            Entry::Vacant(entry) => {
                let fresh = Session::new(id.clone(), &self.name, timeout);
                entry.insert(fresh.clone());
                debug!(application = %self.name, session = %id, "session created");
                Some((fresh, None))
            }
        }
    }

    pub fn session(&self, id: &Key) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn has_session(&self, id: &Key) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session ids, sorted.
    pub fn session_ids(&self) -> Vec<Key> {
        let mut ids: Vec<Key> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Drops a session from the map without running its end hook.
    pub fn remove_session(&self, id: &Key) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// Removes `session` only if it is still the one mapped under its id.
    pub(crate) fn discard_session(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Ends every session, then the application itself. Hook failures are
    /// logged and collected; they never stop the cascade.
    pub fn shutdown(self: &Arc<Self>, server: &Context<'_>) -> ShutdownReport {
        let mut report = ShutdownReport {
            application: self.name.to_string(),
            ..ShutdownReport::default()
        };
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return report;
        }

        let listener = self.listener().unwrap_or_else(default_listener);
        let ctx = Context::detached(server, self.clone());
        // drain until empty: a request that got past the shut_down check
        // before the flag flipped may still be inserting
        loop {
            let ids: Vec<Key> = self.sessions.iter().map(|e| e.key().clone()).collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                let session = match self.sessions.remove(&id) {
                    Some((_, session)) => session,
                    None => continue,
                };
                match session.shutdown(&ctx, listener.as_ref(), &self.scope) {
                    Ok(()) => report.sessions_closed += 1,
                    Err(e) => {
                        error!(application = %self.name, session = %session.id(), error = %e, "session end hook failed");
                        report
                            .failures
                            .push(format!("session [{}]: {}", session.id(), e));
                    }
                }
            }
        }

        if self.is_started() {
            if let Err(e) = listener.on_application_end(&ctx, &[Value::Struct(self.scope.clone())]) {
                error!(application = %self.name, error = %e, "application end hook failed");
                report.failures.push(format!("application [{}]: {}", self.name, e));
            }
        }
        info!(
            application = %self.name,
            sessions = report.sessions_closed,
            failures = report.failures.len(),
            "application shut down"
        );
        report
    }

    /// Shuts the application down and makes the same instance startable
    /// again with a fresh scope.
    pub fn restart(self: &Arc<Self>, server: &Context<'_>) -> ShutdownReport {
        let report = self.shutdown(server);
        let _guard = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.scope.clear();
        self.seed_scope();
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.started.store(false, Ordering::Release);
        self.shut_down.store(false, Ordering::Release);
        self.touch();
        info!(application = %self.name, "application restarted");
        report
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
