//! Execution contexts.
//!
//! A [`Context`] is one node of the per-request tree that code runs against.
//! Children borrow their parent, so a context can never outlive the one that
//! spawned it and no node ever points down at a child:
//!
//! ```text
//!   Server            (one per thread, built by the Runtime)
//!     └─ Request      (+ spliced Session / Application nodes)
//!          └─ Template
//!               └─ Function / Closure / Lambda / Class ...
//! ```
//!
//! Application and Session nodes are not borrowed; the Request owns them in
//! its ancestor list (see [`splice`]) so they can be swapped in and out while
//! children of the request are alive.
//!
//! A context tree is confined to the thread executing the request. Only the
//! scopes it points at (application, session, server) are shared.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use crate::runner::app::application::Application;
use crate::runner::app::listener::ApplicationListener;
use crate::runner::app::registry::ApplicationRegistry;
use crate::runner::app::session::Session;
use crate::runner::config::ApplicationSettings;
use crate::runner::ds::class::BoxClass;
use crate::runner::ds::function::{Function, FunctionKind, LexicalFrame};
use crate::runner::ds::key::{Key, LOCAL, REQUEST, VARIABLES};
use crate::runner::ds::scope::{Scope, ScopeRef};

pub mod resolve;
pub mod splice;

pub use resolve::ScopeSearchResult;
pub use splice::ContextRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextType {
    Server,
    Application,
    Session,
    Request,
    Template,
    Function,
    Closure,
    Lambda,
    Class,
}

pub(crate) struct ServerState {
    pub(crate) scope: ScopeRef,
    pub(crate) registry: Arc<ApplicationRegistry>,
    pub(crate) defaults: ApplicationSettings,
    pub(crate) listener: Arc<dyn ApplicationListener>,
}

pub(crate) struct RequestState {
    pub(crate) variables: ScopeRef,
    pub(crate) request: ScopeRef,
    pub(crate) settings: RefCell<ApplicationSettings>,
    pub(crate) listener: RefCell<Arc<dyn ApplicationListener>>,
    /// Spliced Session/Application nodes, nearest first.
    pub(crate) ancestors: RefCell<Vec<Rc<Context<'static>>>>,
    pub(crate) session_id: RefCell<Option<Key>>,
    /// Runs end hooks for an application that may already be shutting down.
    pub(crate) detached: bool,
}

/// Scopes owned by one function-like call.
pub(crate) struct CallState {
    pub(crate) local: ScopeRef,
    pub(crate) arguments: ScopeRef,
    pub(crate) function: Arc<Function>,
    pub(crate) class: Option<Arc<BoxClass>>,
}

pub(crate) enum ContextKind {
    Server(ServerState),
    Application(Arc<Application>),
    Session(Arc<Session>),
    Request(RequestState),
    Template { variables: ScopeRef },
    Function(CallState),
    Closure(CallState),
    Lambda(CallState),
    Class(Arc<BoxClass>),
}

pub struct Context<'p> {
    parent: Option<&'p Context<'p>>,
    pub(crate) kind: ContextKind,
    templates: RefCell<Vec<PathBuf>>,
}

impl<'p> Context<'p> {
    fn build(parent: Option<&'p Context<'p>>, kind: ContextKind) -> Self {
        Context {
            parent,
            kind,
            templates: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn server(
        scope: ScopeRef,
        registry: Arc<ApplicationRegistry>,
        defaults: ApplicationSettings,
        listener: Arc<dyn ApplicationListener>,
    ) -> Context<'static> {
        Context::build(
            None,
            ContextKind::Server(ServerState {
                scope,
                registry,
                defaults,
                listener,
            }),
        )
    }

    pub(crate) fn application_node(app: Arc<Application>) -> Rc<Context<'static>> {
        Rc::new(Context::build(None, ContextKind::Application(app)))
    }

    pub(crate) fn session_node(session: Arc<Session>) -> Rc<Context<'static>> {
        Rc::new(Context::build(None, ContextKind::Session(session)))
    }

    /// Starts a request below this context, normally the server context.
    /// Application settings and the listener are inherited from the nearest
    /// server.
    pub fn request(&self) -> Context<'_> {
        self.new_request(false)
    }

    pub(crate) fn new_request(&self, detached: bool) -> Context<'_> {
        let (settings, listener) = match self.server_state() {
            Some(server) => (server.defaults.clone(), server.listener.clone()),
            None => (
                ApplicationSettings::default(),
                crate::runner::app::listener::default_listener(),
            ),
        };
        Context::build(
            Some(self),
            ContextKind::Request(RequestState {
                variables: Scope::new(VARIABLES.clone()),
                request: Scope::new(REQUEST.clone()),
                settings: RefCell::new(settings),
                listener: RefCell::new(listener),
                ancestors: RefCell::new(Vec::new()),
                session_id: RefCell::new(None),
                detached,
            }),
        )
    }

    /// A template with its own `variables` scope.
    pub fn template(&self, path: impl Into<PathBuf>) -> Context<'_> {
        let ctx = Context::build(
            Some(self),
            ContextKind::Template {
                variables: Scope::new(VARIABLES.clone()),
            },
        );
        ctx.push_template(path);
        ctx
    }

    pub fn class_context(&self, class: Arc<BoxClass>) -> Context<'_> {
        Context::build(Some(self), ContextKind::Class(class))
    }

    /// The context for one call of `function`, with `self` as its caller.
    pub(crate) fn function_context(
        &self,
        function: Arc<Function>,
        arguments: ScopeRef,
    ) -> Context<'_> {
        let class = match function.kind() {
            FunctionKind::Udf => function.class(),
            FunctionKind::Closure => function.frame().and_then(LexicalFrame::class),
            FunctionKind::Lambda => None,
        };
        let kind = function.kind();
        let state = CallState {
            local: Scope::new(LOCAL.clone()),
            arguments,
            function,
            class,
        };
        let kind = match kind {
            FunctionKind::Udf => ContextKind::Function(state),
            FunctionKind::Closure => ContextKind::Closure(state),
            FunctionKind::Lambda => ContextKind::Lambda(state),
        };
        Context::build(Some(self), kind)
    }

    pub fn context_type(&self) -> ContextType {
        match &self.kind {
            ContextKind::Server(_) => ContextType::Server,
            ContextKind::Application(_) => ContextType::Application,
            ContextKind::Session(_) => ContextType::Session,
            ContextKind::Request(_) => ContextType::Request,
            ContextKind::Template { .. } => ContextType::Template,
            ContextKind::Function(_) => ContextType::Function,
            ContextKind::Closure(_) => ContextType::Closure,
            ContextKind::Lambda(_) => ContextType::Lambda,
            ContextKind::Class(_) => ContextType::Class,
        }
    }

    pub fn parent(&self) -> Option<&Context<'p>> {
        self.parent
    }

    pub(crate) fn call_state(&self) -> Option<&CallState> {
        match &self.kind {
            ContextKind::Function(s) | ContextKind::Closure(s) | ContextKind::Lambda(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn server_state<'a>(&'a self) -> Option<&'a ServerState> {
        let mut cur: Option<&'a Context<'a>> = Some(self);
        while let Some(ctx) = cur {
            if let ContextKind::Server(state) = &ctx.kind {
                return Some(state);
            }
            cur = ctx.parent;
        }
        None
    }

    /// The nearest request context, `self` included.
    pub fn request_context<'a>(&'a self) -> Option<&'a Context<'a>> {
        let mut cur: Option<&'a Context<'a>> = Some(self);
        while let Some(ctx) = cur {
            if let ContextKind::Request(_) = ctx.kind {
                return Some(ctx);
            }
            cur = ctx.parent;
        }
        None
    }

    pub(crate) fn request_state(&self) -> Option<&RequestState> {
        match &self.kind {
            ContextKind::Request(state) => Some(state),
            _ => None,
        }
    }

    pub fn registry(&self) -> Option<Arc<ApplicationRegistry>> {
        self.server_state().map(|s| s.registry.clone())
    }

    /* Template stack */

    pub fn push_template(&self, path: impl Into<PathBuf>) {
        self.templates.borrow_mut().push(path.into());
    }

    pub fn pop_template(&self) -> Option<PathBuf> {
        self.templates.borrow_mut().pop()
    }

    pub fn has_templates(&self) -> bool {
        !self.templates.borrow().is_empty()
    }

    /// The template currently executing: the top of the nearest non-empty
    /// template stack.
    pub fn find_closest_template(&self) -> Option<PathBuf> {
        self.lineage()
            .iter()
            .find_map(|ctx| ctx.templates.borrow().last().cloned())
    }

    /// The template the request started with.
    pub fn find_base_template(&self) -> Option<PathBuf> {
        self.lineage()
            .iter()
            .rev()
            .find_map(|ctx| ctx.templates.borrow().first().cloned())
    }

    /// Every template on the way to the root, nearest first.
    pub fn templates(&self) -> Vec<PathBuf> {
        let mut all = Vec::new();
        for ctx in self.lineage() {
            all.extend(ctx.templates.borrow().iter().rev().cloned());
        }
        all
    }

    /// The name of the function the nearest call context is running.
    pub fn find_closest_function_name(&self) -> Option<Key> {
        self.lineage()
            .iter()
            .find_map(|ctx| ctx.call_state().map(|s| s.function.name().clone()))
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("type", &self.context_type())
            .field("templates", &self.templates.borrow())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
