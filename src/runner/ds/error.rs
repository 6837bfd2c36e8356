use thiserror::Error;

/// Which lifecycle hook a [`RuntimeError::Lifecycle`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    ApplicationStart,
    SessionStart,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::ApplicationStart => write!(f, "onApplicationStart"),
            LifecyclePhase::SessionStart => write!(f, "onSessionStart"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Unqualified lookup exhausted every reachable scope and no default scope was given.
    #[error("the requested key [{key}] was not located in any scope or it's undefined")]
    KeyNotFound { key: String },

    #[error("the requested scope name [{scope}] was not located in any context")]
    ScopeNotFound { scope: String },

    #[error("configuration error: cannot modify locked key [{key}] in scope [{scope}]")]
    LockedKey { scope: String, key: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A start hook failed or refused to continue. The partially created
    /// instance has already been discarded when this surfaces.
    #[error("{phase} failed for [{name}]: {source}")]
    Lifecycle {
        phase: LifecyclePhase,
        name: String,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("required argument [{argument}] is missing for function [{function}]")]
    MissingArgument { function: String, argument: String },

    #[error("variable [{name}] is not a function")]
    NotAFunction { name: String },

    #[error("{0}")]
    Runtime(String),
}

impl RuntimeError {
    pub fn key_not_found(key: impl std::fmt::Display) -> Self {
        RuntimeError::KeyNotFound {
            key: key.to_string(),
        }
    }

    pub fn scope_not_found(scope: impl std::fmt::Display) -> Self {
        RuntimeError::ScopeNotFound {
            scope: scope.to_string(),
        }
    }

    pub fn lifecycle(phase: LifecyclePhase, name: impl std::fmt::Display, source: RuntimeError) -> Self {
        RuntimeError::Lifecycle {
            phase,
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    pub fn is_key_not_found(&self) -> bool {
        matches!(self, RuntimeError::KeyNotFound { .. })
    }

    pub fn is_scope_not_found(&self) -> bool {
        matches!(self, RuntimeError::ScopeNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
