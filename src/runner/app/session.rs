use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::runner::app::listener::ApplicationListener;
use crate::runner::context::Context;
use crate::runner::ds::error::{LifecyclePhase, Result, RuntimeError};
use crate::runner::ds::key::{Key, JSESSIONID, LAST_VISIT, SESSION, SESSIONID, TIME_CREATED};
use crate::runner::ds::scope::{Scope, ScopeRef};
use crate::runner::ds::value::Value;

/// A fresh random session id.
pub fn new_session_id() -> Key {
    Key::of(Uuid::new_v4().to_hyphenated().to_string())
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub(crate) fn duration_millis(timeout: Option<Duration>) -> u64 {
    timeout.map_or(0, |d| d.as_millis().min(u128::from(u64::MAX)) as u64)
}

/// Per-client state owned by one application.
pub struct Session {
    id: Key,
    application: Key,
    scope: ScopeRef,
    started: AtomicBool,
    discarded: AtomicBool,
    shut_down: AtomicBool,
    start_lock: Mutex<()>,
    created: DateTime<Utc>,
    last_visit: AtomicI64,
    timeout_ms: AtomicU64,
}

impl Session {
    pub(crate) fn new(id: Key, application: &Key, timeout: Option<Duration>) -> Arc<Self> {
        let created = Utc::now();
        let scope = Scope::new(SESSION.clone());
        let seeds: [(Key, Value); 4] = [
            (JSESSIONID.clone(), Value::from(id.name())),
            (
                SESSIONID.clone(),
                Value::from(format!("{}:{}", application, id)),
            ),
            (TIME_CREATED.clone(), Value::from(created)),
            (LAST_VISIT.clone(), Value::from(created)),
        ];
        for (key, value) in seeds {
            if let Err(e) = scope.put(key, value) {
                warn!(session = %id, error = %e, "failed to seed session scope");
            }
        }
        Arc::new(Session {
            id,
            application: application.clone(),
            scope,
            started: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            start_lock: Mutex::new(()),
            created,
            last_visit: AtomicI64::new(created.timestamp_millis()),
            timeout_ms: AtomicU64::new(duration_millis(timeout)),
        })
    }

    pub fn id(&self) -> &Key {
        &self.id
    }

    pub fn application_name(&self) -> &Key {
        &self.application
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn last_visit(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_visit.load(Ordering::Acquire))
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

    /// Records a visit and refreshes `lastvisit`.
    pub fn touch(&self) {
        let now = Utc::now();
        self.last_visit
            .store(now.timestamp_millis(), Ordering::Release);
        if let Err(e) = self.scope.put(LAST_VISIT.clone(), now) {
            warn!(session = %self.id, error = %e, "failed to refresh lastvisit");
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let timeout = self.timeout_ms.load(Ordering::Acquire);
        if timeout == 0 {
            return false;
        }
        let idle = now.timestamp_millis() - self.last_visit.load(Ordering::Acquire);
        idle > 0 && idle as u64 > timeout
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Shut down, failed to start, or idle for too long.
    pub fn is_defunct(&self) -> bool {
        self.is_shut_down() || self.is_discarded() || self.is_expired()
    }

    /// Runs the start hook once. `Ok(false)` means another caller's start
    /// failed and this instance is gone; look the session up again.
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

        debug!(application = %self.application, session = %self.id, "starting session");
        let failure = match listener.on_session_start(ctx, &[]) {
            Ok(true) => {
                self.started.store(true, Ordering::Release);
                info!(application = %self.application, session = %self.id, "session started");
                return Ok(true);
            }
            Ok(false) => RuntimeError::Runtime("session start aborted by listener".to_string()),
            Err(e) => e,
        };

        warn!(application = %self.application, session = %self.id, error = %failure, "session start failed");
        self.discarded.store(true, Ordering::Release);
        discard();
        Err(RuntimeError::lifecycle(
            LifecyclePhase::SessionStart,
            &self.id,
            failure,
        ))
    }

    /// Ends the session, running the end hook if it had started. Only the
    /// first call does anything.
    pub(crate) fn shutdown(
        &self,
        ctx: &Context<'_>,
        listener: &dyn ApplicationListener,
        application_scope: &ScopeRef,
    ) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(application = %self.application, session = %self.id, "ending session");
        if !self.is_started() {
            return Ok(());
        }
        listener.on_session_end(
            ctx,
            &[
                Value::Struct(self.scope.clone()),
                Value::Struct(application_scope.clone()),
            ],
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("application", &self.application)
            .field("started", &self.is_started())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
