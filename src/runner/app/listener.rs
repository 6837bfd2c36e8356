//! Lifecycle callbacks.
//!
//! An [`ApplicationListener`] is told when applications and sessions start
//! and end. The start hooks may veto startup by returning `false`, which the
//! lifecycle manager treats exactly like a failure.

use std::sync::Arc;

use crate::runner::context::Context;
use crate::runner::ds::class::BoxClass;
use crate::runner::ds::error::Result;
use crate::runner::ds::function::{Arguments, Function};
use crate::runner::ds::key::{
    Key, ON_APPLICATION_END, ON_APPLICATION_START, ON_SESSION_END, ON_SESSION_START,
};
use crate::runner::ds::value::Value;

pub trait ApplicationListener: Send + Sync {
    /// Runs once per application instance, with the application already
    /// spliced into `ctx`.
    fn on_application_start(&self, _ctx: &Context<'_>, _args: &[Value]) -> Result<bool> {
        Ok(true)
    }

    /// Runs once per session instance, with the session already spliced into
    /// `ctx`.
    fn on_session_start(&self, _ctx: &Context<'_>, _args: &[Value]) -> Result<bool> {
        Ok(true)
    }

    /// `args` holds the session scope followed by the application scope.
    fn on_session_end(&self, _ctx: &Context<'_>, _args: &[Value]) -> Result<()> {
        Ok(())
    }

    /// `args` holds the application scope.
    fn on_application_end(&self, _ctx: &Context<'_>, _args: &[Value]) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "listener"
    }
}

/// Does nothing; every start proceeds.
#[derive(Debug, Default)]
pub struct DefaultListener;

impl ApplicationListener for DefaultListener {
    fn name(&self) -> &str {
        "default"
    }
}

pub fn default_listener() -> Arc<dyn ApplicationListener> {
    Arc::new(DefaultListener)
}

/// Dispatches hooks to user functions, typically the methods of an
/// application descriptor class. Hooks that are not defined are no-ops.
pub struct ScriptedListener {
    name: String,
    class: Option<Arc<BoxClass>>,
    on_application_start: Option<Arc<Function>>,
    on_session_start: Option<Arc<Function>>,
    on_session_end: Option<Arc<Function>>,
    on_application_end: Option<Arc<Function>>,
}

impl ScriptedListener {
    pub fn new(name: &str) -> Self {
        ScriptedListener {
            name: name.to_string(),
            class: None,
            on_application_start: None,
            on_session_start: None,
            on_session_end: None,
            on_application_end: None,
        }
    }

    /// Picks the hooks up from the public methods of `class`.
    pub fn from_class(class: Arc<BoxClass>) -> Self {
        let hook = |key: &Key| class.this().get(key).and_then(|v| v.as_function().cloned());
        ScriptedListener {
            name: class.name().to_string(),
            on_application_start: hook(&*ON_APPLICATION_START),
            on_session_start: hook(&*ON_SESSION_START),
            on_session_end: hook(&*ON_SESSION_END),
            on_application_end: hook(&*ON_APPLICATION_END),
            class: Some(class),
        }
    }

    pub fn class(&self) -> Option<&Arc<BoxClass>> {
        self.class.as_ref()
    }

    pub fn with_application_start(mut self, f: Function) -> Self {
        self.on_application_start = Some(Arc::new(f));
        self
    }

    pub fn with_session_start(mut self, f: Function) -> Self {
        self.on_session_start = Some(Arc::new(f));
        self
    }

    pub fn with_session_end(mut self, f: Function) -> Self {
        self.on_session_end = Some(Arc::new(f));
        self
    }

    pub fn with_application_end(mut self, f: Function) -> Self {
        self.on_application_end = Some(Arc::new(f));
        self
    }

    fn call(hook: &Option<Arc<Function>>, ctx: &Context<'_>, args: &[Value]) -> Result<Value> {
        match hook {
            Some(f) => f.invoke(ctx, Arguments::Positional(args.to_vec())),
            None => Ok(Value::Null),
        }
    }
}

/// Anything but an explicit `false` lets startup continue.
fn proceeds(value: &Value) -> bool {
    !matches!(value, Value::Boolean(false))
}

impl ApplicationListener for ScriptedListener {
    fn on_application_start(&self, ctx: &Context<'_>, args: &[Value]) -> Result<bool> {
        Self::call(&self.on_application_start, ctx, args).map(|v| proceeds(&v))
    }

    fn on_session_start(&self, ctx: &Context<'_>, args: &[Value]) -> Result<bool> {
        Self::call(&self.on_session_start, ctx, args).map(|v| proceeds(&v))
    }

    fn on_session_end(&self, ctx: &Context<'_>, args: &[Value]) -> Result<()> {
        Self::call(&self.on_session_end, ctx, args).map(|_| ())
    }

    fn on_application_end(&self, ctx: &Context<'_>, args: &[Value]) -> Result<()> {
        Self::call(&self.on_application_end, ctx, args).map(|_| ())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
