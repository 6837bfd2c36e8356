extern crate cfml_runtime;

use cfml_runtime::runner::app::application::Application;
use cfml_runtime::runner::app::listener::ApplicationListener;
use cfml_runtime::runner::app::session::Session;
use cfml_runtime::runner::config::{ApplicationSettings, RuntimeConfig};
use cfml_runtime::runner::context::Context;
use cfml_runtime::runner::ds::error::{Result, RuntimeError};
use cfml_runtime::runner::ds::key::Key;
use cfml_runtime::runner::ds::value::Value;
use cfml_runtime::runner::runtime::Runtime;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 16;

/// Counts hook calls; start hooks sleep so racing callers pile up behind them.
#[derive(Default)]
struct Counting {
    app_starts: AtomicUsize,
    session_starts: AtomicUsize,
    failures_left: AtomicUsize,
}

impl ApplicationListener for Counting {
    fn on_application_start(&self, _ctx: &Context<'_>, _args: &[Value]) -> Result<bool> {
        self.app_starts.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RuntimeError::Runtime("start failed".to_string()));
        }
        Ok(true)
    }

    fn on_session_start(&self, _ctx: &Context<'_>, _args: &[Value]) -> Result<bool> {
        self.session_starts.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        Ok(true)
    }
}

/// Runs `f` on `THREADS` threads released together and collects the results.
fn stampede<T, F>(f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(THREADS));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn bump(current: Option<&Value>) -> Value {
    Value::Integer(current.and_then(Value::as_i64).unwrap_or(0) + 1)
}

// ── Applications ─────────────────────────────────────────────────────

#[test]
fn test_first_requests_share_one_started_application() {
    let counting = Arc::new(Counting::default());
    let rt = Arc::new(Runtime::new(RuntimeConfig::default()).with_listener(counting.clone()));

    let runtime = rt.clone();
    let apps: Vec<Arc<Application>> = stampede(move |_| {
        let server = runtime.server_context();
        let request = server.request();
        request.update_settings(ApplicationSettings::named("race")).unwrap();
        request.get_scope(&Key::of("application")).unwrap();
        request.spliced_application().unwrap()
    });

    assert_eq!(counting.app_starts.load(Ordering::SeqCst), 1);
    assert!(apps.iter().all(|a| Arc::ptr_eq(a, &apps[0])));
    assert!(apps[0].is_started());
    assert_eq!(rt.registry().len(), 1);
}

#[test]
fn test_failed_start_under_contention_recovers() {
    let counting = Arc::new(Counting::default());
    counting.failures_left.store(1, Ordering::SeqCst);
    let rt = Arc::new(Runtime::new(RuntimeConfig::default()).with_listener(counting.clone()));

    let runtime = rt.clone();
    let outcomes: Vec<bool> = stampede(move |_| {
        let server = runtime.server_context();
        let request = server.request();
        request.update_settings(ApplicationSettings::named("shaky")).unwrap();
        request.get_scope(&Key::of("application")).is_ok()
    });

    // exactly the caller whose hook failed sees the error
    assert_eq!(outcomes.iter().filter(|ok| !**ok).count(), 1);
    assert_eq!(counting.app_starts.load(Ordering::SeqCst), 2);
    let app = rt.registry().get(&Key::of("shaky")).unwrap();
    assert!(app.is_started());
}

#[test]
fn test_application_counter_is_exact() {
    let rt = Arc::new(Runtime::new(RuntimeConfig::default()));
    let runtime = rt.clone();
    stampede(move |_| {
        let server = runtime.server_context();
        for _ in 0..50 {
            let request = server.request();
            request.update_settings(ApplicationSettings::named("counter")).unwrap();
            let scope = request.get_scope(&Key::of("application")).unwrap();
            scope.update("hits", bump).unwrap();
        }
    });

    let app = rt.registry().get(&Key::of("counter")).unwrap();
    assert_eq!(
        app.scope().get(&Key::of("hits")),
        Some(Value::Integer((THREADS * 50) as i64))
    );
}

// ── Sessions ─────────────────────────────────────────────────────────

#[test]
fn test_same_session_id_yields_one_session() {
    let counting = Arc::new(Counting::default());
    let rt = Arc::new(Runtime::new(RuntimeConfig::default()).with_listener(counting.clone()));

    let runtime = rt.clone();
    let sessions: Vec<Arc<Session>> = stampede(move |_| {
        let server = runtime.server_context();
        let request = server.request();
        request
            .update_settings(ApplicationSettings::named("shared").with_sessions(true))
            .unwrap();
        request.set_session_id(Key::of("one-client")).unwrap();
        request
            .get_scope(&Key::of("session"))
            .unwrap()
            .update("hits", bump)
            .unwrap();
        request.spliced_session().unwrap()
    });

    assert_eq!(counting.session_starts.load(Ordering::SeqCst), 1);
    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    assert_eq!(
        sessions[0].scope().get(&Key::of("hits")),
        Some(Value::Integer(THREADS as i64))
    );
    let app = rt.registry().get(&Key::of("shared")).unwrap();
    assert_eq!(app.session_count(), 1);
}

#[test]
fn test_distinct_session_ids_stay_apart() {
    let counting = Arc::new(Counting::default());
    let rt = Arc::new(Runtime::new(RuntimeConfig::default()).with_listener(counting.clone()));

    let runtime = rt.clone();
    stampede(move |i| {
        let server = runtime.server_context();
        let request = server.request();
        request
            .update_settings(ApplicationSettings::named("many").with_sessions(true))
            .unwrap();
        request.set_session_id(Key::of(format!("client-{}", i % 4))).unwrap();
        request.set("session.touched", true).unwrap();
    });

    let app = rt.registry().get(&Key::of("many")).unwrap();
    assert_eq!(app.session_count(), 4);
    assert_eq!(counting.session_starts.load(Ordering::SeqCst), 4);
    assert_eq!(counting.app_starts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_while_idle_closes_every_session() {
    let rt = Arc::new(Runtime::new(RuntimeConfig::default()));
    let runtime = rt.clone();
    stampede(move |i| {
        let server = runtime.server_context();
        let request = server.request();
        request
            .update_settings(ApplicationSettings::named("drain").with_sessions(true))
            .unwrap();
        request.set_session_id(Key::of(format!("s{}", i))).unwrap();
        request.get_scope(&Key::of("session")).unwrap();
    });

    let reports = rt.shutdown();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].sessions_closed, THREADS);
    assert!(reports[0].failures.is_empty());
}
