//! Scope resolution.
//!
//! Resolving a bare identifier happens in three steps:
//!
//! 1. A recognized scope name (`variables`, `local`, `session`, ...) resolves
//!    to the scope itself. If this context cannot reach that scope the lookup
//!    fails with [`RuntimeError::ScopeNotFound`]; the name is never searched
//!    for as an ordinary variable.
//! 2. The context's own scopes are searched in priority order, then the
//!    search continues as far as the context type allows:
//!
//!    | context            | searched                                        | then                     |
//!    |--------------------|-------------------------------------------------|--------------------------|
//!    | Request / Template | variables                                       | request scope            |
//!    | Function           | local, arguments                                | caller's nearby scopes   |
//!    | Function (class)   | local, arguments, class variables               | request scope            |
//!    | Closure            | local, arguments, scopes captured at declaration| request scope            |
//!    | Lambda             | local, arguments                                | nothing                  |
//!    | Class              | variables                                       | request scope            |
//!
//!    Session, application and server scopes are never searched unqualified.
//! 3. When nothing matched, the supplied default scope is reported as the
//!    owner with a null value. Nothing is written; the caller's assignment
//!    creates the binding. Without a default scope the lookup fails with
//!    [`RuntimeError::KeyNotFound`].

use std::sync::Arc;

use crate::runner::context::{Context, ContextKind};
use crate::runner::ds::class::BoxClass;
use crate::runner::ds::error::{Result, RuntimeError};
use crate::runner::ds::function::{Arguments, Function, FunctionKind, LexicalFrame};
use crate::runner::ds::key::{
    is_scope_name, Key, APPLICATION, ARGUMENTS, LOCAL, REQUEST, SERVER, SESSION, STATIC, THIS,
    VARIABLES,
};
use crate::runner::ds::scope::{Scope, ScopeRef};
use crate::runner::ds::value::Value;

/// Where a name was found. `scope` is the container that owns the binding, so
/// compound assignment can write back without resolving again.
#[derive(Debug, Clone)]
pub struct ScopeSearchResult {
    pub scope: ScopeRef,
    pub key: Key,
    pub value: Value,
    /// The name itself denoted a scope.
    pub is_scope: bool,
}

impl ScopeSearchResult {
    fn binding(scope: &ScopeRef, key: &Key, value: Value) -> Self {
        ScopeSearchResult {
            scope: scope.clone(),
            key: key.clone(),
            value,
            is_scope: false,
        }
    }

    fn of_scope(scope: ScopeRef, key: &Key) -> Self {
        ScopeSearchResult {
            value: Value::Struct(scope.clone()),
            scope,
            key: key.clone(),
            is_scope: true,
        }
    }
}

fn lookup(scope: &ScopeRef, key: &Key) -> Option<ScopeSearchResult> {
    scope
        .get(key)
        .map(|value| ScopeSearchResult::binding(scope, key, value))
}

fn lookup_all(scopes: &[ScopeRef], key: &Key) -> Option<ScopeSearchResult> {
    scopes.iter().find_map(|scope| lookup(scope, key))
}

fn class_scope(class: &BoxClass, name: &Key) -> Option<ScopeRef> {
    if name == &*VARIABLES {
        Some(class.variables().clone())
    } else if name == &*THIS {
        Some(class.this().clone())
    } else if name == &*STATIC {
        Some(class.static_scope().clone())
    } else {
        None
    }
}

impl<'p> Context<'p> {
    /// Resolves a bare identifier. See the module docs for the search order.
    pub fn resolve(&self, key: &Key, default_scope: Option<&ScopeRef>) -> Result<ScopeSearchResult> {
        if is_scope_name(key) {
            return self
                .get_scope_nearby(key)
                .map(|scope| ScopeSearchResult::of_scope(scope, key));
        }

        if let Some(found) = self.find_nearby(key, false) {
            return Ok(found);
        }

        match default_scope {
            Some(scope) => Ok(ScopeSearchResult::binding(scope, key, Value::Null)),
            None => Err(RuntimeError::key_not_found(key)),
        }
    }

    /// Resolves a dotted path such as `session.cart.total`. The first segment
    /// is resolved like a bare identifier, the rest walk nested structs.
    pub fn resolve_path(&self, path: &str) -> Result<ScopeSearchResult> {
        let segments = split_path(path)?;
        let first = Key::of(segments[0]);
        let mut found = self.resolve(&first, None)?;
        for (i, segment) in segments.iter().enumerate().skip(1) {
            let container = match &found.value {
                Value::Struct(s) => s.clone(),
                _ => return Err(RuntimeError::key_not_found(segments[..=i].join("."))),
            };
            let key = Key::of(*segment);
            found = lookup(&container, &key)
                .ok_or_else(|| RuntimeError::key_not_found(segments[..=i].join(".")))?;
        }
        Ok(found)
    }

    /// The value a dotted path resolves to.
    pub fn resolve_value(&self, path: &str) -> Result<Value> {
        self.resolve_path(path).map(|found| found.value)
    }

    pub fn assign(&self, scope: &ScopeRef, key: &Key, value: impl Into<Value>) -> Result<()> {
        scope.put(key.clone(), value)?;
        Ok(())
    }

    /// Resolves `path` falling back to the default assignment scope, then
    /// writes `value`. Missing intermediate structs are created.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let segments = split_path(path)?;
        let first = Key::of(segments[0]);
        let default = self.default_assignment_scope();
        let found = self.resolve(&first, Some(&default))?;
        if segments.len() == 1 {
            return self.assign(&found.scope, &first, value);
        }

        let mut container = match found.value {
            Value::Struct(s) => s,
            Value::Null => {
                let created = Scope::new(first.clone());
                self.assign(&found.scope, &first, created.clone())?;
                created
            }
            _ => return Err(not_a_struct(segments[0])),
        };
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate().take(last).skip(1) {
            let key = Key::of(*segment);
            container = match container.get(&key) {
                Some(Value::Struct(s)) => s,
                None | Some(Value::Null) => {
                    let created = Scope::new(key.clone());
                    container.put(key, created.clone())?;
                    created
                }
                Some(_) => return Err(not_a_struct(&segments[..=i].join("."))),
            };
        }
        container.put(Key::of(segments[last]), value)?;
        Ok(())
    }

    /// Where a plain assignment lands when the name does not exist yet.
    pub fn default_assignment_scope(&self) -> ScopeRef {
        match &self.kind {
            ContextKind::Server(state) => state.scope.clone(),
            ContextKind::Application(app) => app.scope().clone(),
            ContextKind::Session(session) => session.scope().clone(),
            ContextKind::Request(state) => state.variables.clone(),
            ContextKind::Template { variables } => variables.clone(),
            ContextKind::Function(call) | ContextKind::Closure(call) | ContextKind::Lambda(call) => {
                call.local.clone()
            }
            ContextKind::Class(class) => class.variables().clone(),
        }
    }

    /// Qualified access to a scope from this context. Local scopes and the
    /// ones the context declares come first, then global scopes.
    pub fn get_scope_nearby(&self, name: &Key) -> Result<ScopeRef> {
        match &self.kind {
            ContextKind::Request(state) if name == &*VARIABLES => Ok(state.variables.clone()),
            ContextKind::Template { variables } if name == &*VARIABLES => Ok(variables.clone()),
            ContextKind::Function(call) | ContextKind::Closure(call) | ContextKind::Lambda(call)
                if name == &*LOCAL =>
            {
                Ok(call.local.clone())
            }
            ContextKind::Function(call) | ContextKind::Closure(call) | ContextKind::Lambda(call)
                if name == &*ARGUMENTS =>
            {
                Ok(call.arguments.clone())
            }
            ContextKind::Function(call) => match &call.class {
                Some(class) => match class_scope(class, name) {
                    Some(scope) => Ok(scope),
                    None => self.get_scope(name),
                },
                None => match self.parent {
                    Some(parent) => parent.get_scope_nearby(name),
                    None => Err(RuntimeError::scope_not_found(name)),
                },
            },
            ContextKind::Closure(call) => {
                let frame = call.function.frame();
                if let Some(scope) = frame
                    .and_then(|f| f.scopes().iter().find(|s| s.name() == name).cloned())
                {
                    return Ok(scope);
                }
                match call.class.as_ref().and_then(|c| class_scope(c, name)) {
                    Some(scope) => Ok(scope),
                    None => self.get_scope(name),
                }
            }
            ContextKind::Class(class) => match class_scope(class, name) {
                Some(scope) => Ok(scope),
                None => self.get_scope(name),
            },
            _ => self.get_scope(name),
        }
    }

    /// Access to the global scopes: request, session, application and server.
    /// Touching session or application may create and start them.
    pub fn get_scope(&self, name: &Key) -> Result<ScopeRef> {
        match &self.kind {
            ContextKind::Server(state) if name == &*SERVER => Ok(state.scope.clone()),
            ContextKind::Application(app) if name == &*APPLICATION => Ok(app.scope().clone()),
            ContextKind::Session(session) if name == &*SESSION => Ok(session.scope().clone()),
            ContextKind::Request(state) if name == &*REQUEST => Ok(state.request.clone()),
            ContextKind::Request(_) if name == &*APPLICATION => self
                .ensure_application()?
                .map(|app| app.scope().clone())
                .ok_or_else(|| RuntimeError::scope_not_found(name)),
            ContextKind::Request(_) if name == &*SESSION => self
                .ensure_session()?
                .map(|session| session.scope().clone())
                .ok_or_else(|| RuntimeError::scope_not_found(name)),
            _ => match self.parent {
                Some(parent) => parent.get_scope(name),
                None => Err(RuntimeError::scope_not_found(name)),
            },
        }
    }

    /// Unqualified search through this context's scopes. `shallow` stops
    /// before anything global.
    pub(crate) fn find_nearby(&self, key: &Key, shallow: bool) -> Option<ScopeSearchResult> {
        let (own, then_global) = match &self.kind {
            ContextKind::Request(state) => (lookup(&state.variables, key), true),
            ContextKind::Template { variables } => (lookup(variables, key), true),
            ContextKind::Class(class) => (lookup(class.variables(), key), true),
            ContextKind::Function(call) => {
                let own = lookup(&call.local, key).or_else(|| lookup(&call.arguments, key));
                match &call.class {
                    Some(class) => (own.or_else(|| lookup(class.variables(), key)), true),
                    None => {
                        return own.or_else(|| {
                            self.parent.and_then(|parent| parent.find_nearby(key, shallow))
                        })
                    }
                }
            }
            ContextKind::Closure(call) => {
                let own = lookup(&call.local, key)
                    .or_else(|| lookup(&call.arguments, key))
                    .or_else(|| {
                        call.function
                            .frame()
                            .and_then(|frame| lookup_all(frame.scopes(), key))
                    });
                (own, true)
            }
            ContextKind::Lambda(call) => (
                lookup(&call.local, key).or_else(|| lookup(&call.arguments, key)),
                false,
            ),
            ContextKind::Server(_) | ContextKind::Application(_) | ContextKind::Session(_) => {
                (None, false)
            }
        };
        if own.is_some() || shallow || !then_global {
            return own;
        }
        match &self.kind {
            ContextKind::Request(_) => self.find_global(key),
            _ => self.parent.and_then(|parent| parent.find_global(key)),
        }
    }

    /// The last unqualified stop: the request scope.
    pub(crate) fn find_global(&self, key: &Key) -> Option<ScopeSearchResult> {
        match &self.kind {
            ContextKind::Request(state) => lookup(&state.request, key),
            ContextKind::Server(_) | ContextKind::Application(_) | ContextKind::Session(_) => None,
            _ => self.parent.and_then(|parent| parent.find_global(key)),
        }
    }

    /// The scopes a closure declared here can see, flattened nearest first.
    pub fn capture_frame(&self) -> LexicalFrame {
        let mut frame = LexicalFrame::default();
        self.collect_frame(&mut frame);
        frame
    }

    fn collect_frame(&self, frame: &mut LexicalFrame) {
        match &self.kind {
            ContextKind::Request(state) => frame.scopes.push(state.variables.clone()),
            ContextKind::Template { variables } => frame.scopes.push(variables.clone()),
            ContextKind::Class(class) => {
                frame.scopes.push(class.variables().clone());
                frame.class.get_or_insert_with(|| Arc::downgrade(class));
            }
            ContextKind::Function(call) => {
                frame.scopes.push(call.local.clone());
                frame.scopes.push(call.arguments.clone());
                match &call.class {
                    Some(class) => {
                        frame.scopes.push(class.variables().clone());
                        frame.class.get_or_insert_with(|| Arc::downgrade(class));
                    }
                    None => {
                        if let Some(parent) = self.parent {
                            parent.collect_frame(frame);
                        }
                    }
                }
            }
            ContextKind::Closure(call) => {
                frame.scopes.push(call.local.clone());
                frame.scopes.push(call.arguments.clone());
                if let Some(outer) = call.function.frame() {
                    frame.scopes.extend(outer.scopes.iter().cloned());
                    if frame.class.is_none() {
                        frame.class = outer.class.clone();
                    }
                }
            }
            ContextKind::Lambda(call) => {
                frame.scopes.push(call.local.clone());
                frame.scopes.push(call.arguments.clone());
            }
            ContextKind::Server(_) | ContextKind::Application(_) | ContextKind::Session(_) => {}
        }
    }

    fn enclosing_class(&self) -> Option<Arc<BoxClass>> {
        match &self.kind {
            ContextKind::Class(class) => Some(class.clone()),
            ContextKind::Function(call) | ContextKind::Closure(call) => call.class.clone(),
            _ => None,
        }
    }

    /// Binds a function value to the place it is declared: closures capture
    /// the visible scopes, functions declared inside a class remember it.
    fn prepare_function(&self, mut function: Function) -> Function {
        match function.kind() {
            FunctionKind::Closure => function.frame = Some(self.capture_frame()),
            FunctionKind::Udf if function.class.is_none() => {
                function.class = self.enclosing_class().map(|c| Arc::downgrade(&c));
            }
            _ => {}
        }
        function
    }

    /// Creates a function value declared at this point, without storing it.
    pub fn bind_function(&self, function: Function) -> Arc<Function> {
        Arc::new(self.prepare_function(function))
    }

    /// Declares a named function here. Inside a class it becomes a method;
    /// otherwise it lands in the scope plain assignments use.
    pub fn register_function(&self, function: Function) -> Result<Arc<Function>> {
        let function = self.prepare_function(function);
        if let Some(class) = self.registering_class() {
            return class.define_method(function);
        }
        let function = Arc::new(function);
        self.registration_scope()
            .put(function.name().clone(), function.clone())?;
        Ok(function)
    }

    fn registering_class(&self) -> Option<Arc<BoxClass>> {
        match &self.kind {
            ContextKind::Class(class) => Some(class.clone()),
            ContextKind::Function(call) => call.class.clone(),
            _ => None,
        }
    }

    fn registration_scope(&self) -> ScopeRef {
        match (&self.kind, self.parent) {
            (ContextKind::Function(_), Some(parent)) => parent.registration_scope(),
            _ => self.default_assignment_scope(),
        }
    }

    /// Looks `name` up and calls it with `self` as the caller.
    pub fn invoke_function(&self, name: &str, args: Arguments) -> Result<Value> {
        match self.resolve_path(name)?.value {
            Value::Function(function) => function.invoke(self, args),
            _ => Err(RuntimeError::NotAFunction {
                name: name.to_string(),
            }),
        }
    }

    /// Every scope this context can currently see, nearest first. Session and
    /// application appear only when already spliced in; nothing is created.
    pub fn visible_scopes(&self) -> Vec<ScopeRef> {
        let mut scopes = self.capture_frame().scopes;
        if let Some(class) = self.enclosing_class() {
            scopes.push(class.this().clone());
            scopes.push(class.static_scope().clone());
        }
        if let Some(state) = self.request_context().and_then(|r| r.request_state()) {
            scopes.push(state.request.clone());
        }
        if let Some(session) = self.spliced_session() {
            scopes.push(session.scope().clone());
        }
        if let Some(app) = self.spliced_application() {
            scopes.push(app.scope().clone());
        }
        if let Some(server) = self.server_state() {
            scopes.push(server.scope.clone());
        }
        let mut unique: Vec<ScopeRef> = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if !unique.iter().any(|s| Arc::ptr_eq(s, &scope)) {
                unique.push(scope);
            }
        }
        unique
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RuntimeError::Runtime(format!("invalid identifier [{}]", path)));
    }
    Ok(segments)
}

fn not_a_struct(path: &str) -> RuntimeError {
    RuntimeError::Runtime(format!("cannot assign into [{}]: it is not a struct", path))
}
