use std::fmt;
use std::sync::Arc;

use crate::runner::ds::error::Result;
use crate::runner::ds::function::{Access, Function, FunctionKind};
use crate::runner::ds::key::{Key, STATIC, THIS, VARIABLES};
use crate::runner::ds::scope::{Scope, ScopeRef};

/// A class instance: private `variables`, public `this` and the shared
/// `static` scope.
pub struct BoxClass {
    name: Key,
    variables: ScopeRef,
    this: ScopeRef,
    static_scope: ScopeRef,
}

impl BoxClass {
    pub fn new(name: &str) -> Arc<Self> {
        BoxClass::with_static(name, Scope::new(STATIC.clone()))
    }

    /// An instance sharing `static_scope` with its siblings.
    pub fn with_static(name: &str, static_scope: ScopeRef) -> Arc<Self> {
        Arc::new(BoxClass {
            name: Key::of(name),
            variables: Scope::new(VARIABLES.clone()),
            this: Scope::new(THIS.clone()),
            static_scope,
        })
    }

    pub fn name(&self) -> &Key {
        &self.name
    }

    pub fn variables(&self) -> &ScopeRef {
        &self.variables
    }

    pub fn this(&self) -> &ScopeRef {
        &self.this
    }

    pub fn static_scope(&self) -> &ScopeRef {
        &self.static_scope
    }

    /// Attaches `function` to this class. Every method lands in `variables`;
    /// public ones are also exposed on `this`. Closures and lambdas are stored
    /// as plain values and keep whatever binding they already carry.
    pub fn define_method(self: &Arc<Self>, mut function: Function) -> Result<Arc<Function>> {
        if function.kind() == FunctionKind::Udf {
            function.class = Some(Arc::downgrade(self));
        }
        let function = Arc::new(function);
        self.variables
            .put(function.name().clone(), function.clone())?;
        if function.access() == Access::Public {
            self.this.put(function.name().clone(), function.clone())?;
        }
        Ok(function)
    }
}

impl fmt::Debug for BoxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxClass")
            .field("name", &self.name)
            .field("this", &self.this.keys())
            .finish()
    }
}
