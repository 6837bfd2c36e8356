//! The process-level object: server scope, application registry and
//! configuration.
//!
//! A `Runtime` is shared between threads (`Arc<Runtime>`). Contexts are not;
//! each thread asks for its own server context and opens requests under it.
//!
//! ```
//! use cfml_runtime::runner::config::{ApplicationSettings, RuntimeConfig};
//! use cfml_runtime::runner::runtime::Runtime;
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let server = runtime.server_context();
//! let request = server.request();
//! request.update_settings(ApplicationSettings::named("shop")).unwrap();
//! request.set("application.visits", 1).unwrap();
//! assert_eq!(runtime.registry().application_names(), vec!["shop".to_string()]);
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::runner::app::application::ShutdownReport;
use crate::runner::app::listener::{default_listener, ApplicationListener};
use crate::runner::app::registry::ApplicationRegistry;
use crate::runner::config::RuntimeConfig;
use crate::runner::context::Context;
use crate::runner::ds::error::Result;
use crate::runner::ds::key::{Key, COLDFUSION, OS, RUNTIME, SEPARATOR, SERVER};
use crate::runner::ds::scope::{Scope, ScopeRef};
use crate::runner::ds::value::Value;

pub const PRODUCT_NAME: &str = "cfml-runtime";
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Runtime {
    config: RuntimeConfig,
    server_scope: ScopeRef,
    registry: Arc<ApplicationRegistry>,
    listener: Arc<dyn ApplicationListener>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime::with_registry(config, Arc::new(ApplicationRegistry::new()))
    }

    /// A runtime over an existing registry, e.g. one shared with another
    /// runtime or inspected by a test.
    pub fn with_registry(config: RuntimeConfig, registry: Arc<ApplicationRegistry>) -> Self {
        Runtime {
            config,
            server_scope: server_scope(),
            registry,
            listener: default_listener(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Runtime::new(RuntimeConfig::load(path)?))
    }

    /// The listener new requests start with.
    pub fn with_listener(mut self, listener: Arc<dyn ApplicationListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ApplicationRegistry> {
        &self.registry
    }

    pub fn server_scope(&self) -> &ScopeRef {
        &self.server_scope
    }

    /// The root context for the calling thread.
    pub fn server_context(&self) -> Context<'static> {
        Context::server(
            self.server_scope.clone(),
            self.registry.clone(),
            self.config.application.clone(),
            self.listener.clone(),
        )
    }

    /// Shuts every application down.
    pub fn shutdown(&self) -> Vec<ShutdownReport> {
        let server = self.server_context();
        let reports = self.registry.shutdown_all(&server);
        info!(applications = reports.len(), "runtime shut down");
        reports
    }
}

fn info_struct(name: &Key, entries: Vec<(&str, Value)>) -> Value {
    let scope = Scope::new(name.clone());
    for (key, value) in entries {
        // a fresh generic scope has no locked keys
        let _ = scope.put(key, value);
    }
    Value::Struct(scope)
}

/// The server scope, with its product and platform keys locked.
fn server_scope() -> ScopeRef {
    let separator = if cfg!(windows) { "\\" } else { "/" };
    let path_separator = if cfg!(windows) { ";" } else { ":" };
    let entries = vec![
        (
            COLDFUSION.clone(),
            info_struct(
                &COLDFUSION,
                vec![
                    ("productName", Value::from(PRODUCT_NAME)),
                    ("productVersion", Value::from(PRODUCT_VERSION)),
                ],
            ),
        ),
        (
            OS.clone(),
            info_struct(
                &OS,
                vec![
                    ("name", Value::from(std::env::consts::OS)),
                    ("arch", Value::from(std::env::consts::ARCH)),
                    ("family", Value::from(std::env::consts::FAMILY)),
                ],
            ),
        ),
        (
            SEPARATOR.clone(),
            info_struct(
                &SEPARATOR,
                vec![
                    ("file", Value::from(separator)),
                    ("path", Value::from(path_separator)),
                    ("line", Value::from("\n")),
                ],
            ),
        ),
        (
            RUNTIME.clone(),
            info_struct(
                &RUNTIME,
                vec![
                    ("name", Value::from(PRODUCT_NAME)),
                    ("version", Value::from(PRODUCT_VERSION)),
                ],
            ),
        ),
    ];
    Scope::new_locked(SERVER.clone(), entries)
}
