//! Callable values: user-defined functions, closures and lambdas.
//!
//! The body of a function is supplied by the host as a Rust closure that
//! receives the call's own [`Context`]. Everything the body reads or writes
//! goes through that context, so the visibility rules of the function kind
//! apply to it exactly as they would to interpreted code.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::runner::context::Context;
use crate::runner::ds::class::BoxClass;
use crate::runner::ds::error::{Result, RuntimeError};
use crate::runner::ds::key::Key;
use crate::runner::ds::scope::{Scope, ScopeRef};
use crate::runner::ds::value::Value;

pub type FunctionBody = Arc<dyn Fn(&Context<'_>) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Udf,
    Closure,
    Lambda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Key,
    pub required: bool,
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Param {
            name: Key::of(name),
            required: false,
            default: None,
        }
    }

    pub fn required(name: &str) -> Self {
        Param {
            required: true,
            ..Param::new(name)
        }
    }

    pub fn with_default(name: &str, default: impl Into<Value>) -> Self {
        Param {
            default: Some(default.into()),
            ..Param::new(name)
        }
    }
}

/// Call-site arguments.
#[derive(Debug, Clone)]
pub enum Arguments {
    Positional(Vec<Value>),
    Named(IndexMap<Key, Value>),
}

impl Arguments {
    pub fn none() -> Self {
        Arguments::Positional(Vec::new())
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Arguments::Positional(values)
    }
}

/// Scopes visible where a closure was declared, flattened nearest first.
#[derive(Clone, Default)]
pub struct LexicalFrame {
    pub(crate) scopes: Vec<ScopeRef>,
    pub(crate) class: Option<Weak<BoxClass>>,
}

impl LexicalFrame {
    pub fn scopes(&self) -> &[ScopeRef] {
        &self.scopes
    }

    pub fn class(&self) -> Option<Arc<BoxClass>> {
        self.class.as_ref().and_then(Weak::upgrade)
    }
}

pub struct Function {
    name: Key,
    kind: FunctionKind,
    access: Access,
    params: Vec<Param>,
    body: FunctionBody,
    source: Option<PathBuf>,
    pub(crate) frame: Option<LexicalFrame>,
    pub(crate) class: Option<Weak<BoxClass>>,
}

impl Function {
    pub fn new<F>(kind: FunctionKind, name: &str, params: Vec<Param>, body: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Function {
            name: Key::of(name),
            kind,
            access: Access::Public,
            params,
            body: Arc::new(body),
            source: None,
            frame: None,
            class: None,
        }
    }

    pub fn udf<F>(name: &str, params: Vec<Param>, body: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Function::new(FunctionKind::Udf, name, params, body)
    }

    pub fn closure<F>(params: Vec<Param>, body: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Function::new(FunctionKind::Closure, "closure", params, body)
    }

    pub fn lambda<F>(params: Vec<Param>, body: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Function::new(FunctionKind::Lambda, "lambda", params, body)
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn name(&self) -> &Key {
        &self.name
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn frame(&self) -> Option<&LexicalFrame> {
        self.frame.as_ref()
    }

    /// The class this function belongs to, if that class is still alive.
    pub fn class(&self) -> Option<Arc<BoxClass>> {
        self.class.as_ref().and_then(Weak::upgrade)
    }

    /// Builds the `arguments` scope for one call. Declared parameters come
    /// first in declaration order, followed by any extras.
    pub fn bind_arguments(&self, args: Arguments) -> Result<ScopeRef> {
        let scope = Scope::new_arguments();
        match args {
            Arguments::Positional(values) => {
                for (i, param) in self.params.iter().enumerate() {
                    let value = match values.get(i) {
                        Some(v) => v.clone(),
                        None => self.missing(param)?,
                    };
                    scope.put(param.name.clone(), value)?;
                }
                for (i, value) in values.into_iter().enumerate().skip(self.params.len()) {
                    scope.put(Key::of_int(i as i64 + 1), value)?;
                }
            }
            Arguments::Named(mut values) => {
                for param in &self.params {
                    let value = match values.shift_remove(&param.name) {
                        Some(v) => v,
                        None => self.missing(param)?,
                    };
                    scope.put(param.name.clone(), value)?;
                }
                for (key, value) in values {
                    scope.put(key, value)?;
                }
            }
        }
        Ok(scope)
    }

    fn missing(&self, param: &Param) -> Result<Value> {
        if let Some(default) = &param.default {
            return Ok(default.duplicate());
        }
        if param.required {
            return Err(RuntimeError::MissingArgument {
                function: self.name.to_string(),
                argument: param.name.to_string(),
            });
        }
        Ok(Value::Null)
    }

    /// Runs the function with `caller` as the dynamic parent of the new call
    /// context.
    pub fn invoke(self: &Arc<Self>, caller: &Context<'_>, args: Arguments) -> Result<Value> {
        let arguments = self.bind_arguments(args)?;
        let ctx = caller.function_context(self.clone(), arguments);
        if let Some(path) = &self.source {
            ctx.push_template(path.clone());
        }
        (self.body)(&ctx)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("access", &self.access)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Function {
        Function::udf(
            "greet",
            vec![Param::required("name"), Param::with_default("greeting", "hi")],
            |_| Ok(Value::Null),
        )
    }

    #[test]
    fn test_positional_extras_get_numeric_keys() {
        let scope = noop()
            .bind_arguments(Arguments::Positional(vec![
                Value::from("bob"),
                Value::from("yo"),
                Value::from(3),
            ]))
            .unwrap();
        assert_eq!(scope.get(&Key::of("name")), Some(Value::from("bob")));
        assert_eq!(scope.get(&Key::of_int(3)), Some(Value::Integer(3)));
        assert_eq!(scope.len(), 3);
    }

    #[test]
    fn test_named_defaults_apply() {
        let mut named = IndexMap::new();
        named.insert(Key::of("NAME"), Value::from("amy"));
        let scope = noop().bind_arguments(Arguments::Named(named)).unwrap();
        assert_eq!(scope.get(&Key::of("greeting")), Some(Value::from("hi")));
        assert_eq!(scope.get(&Key::of_int(1)), Some(Value::from("amy")));
    }

    #[test]
    fn test_missing_required_argument() {
        let err = noop().bind_arguments(Arguments::none()).unwrap_err();
        assert!(matches!(err, RuntimeError::MissingArgument { .. }));
    }
}
