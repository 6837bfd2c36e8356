//! # cfml-runtime - execution core for a CFML-like language
//!
//! The part of a dynamic-language runtime that sits between the evaluator
//! and the variables it reads and writes:
//! - Case-insensitive [`Key`](runner::ds::key::Key)s and thread-safe
//!   [`Scope`](runner::ds::scope::Scope)s
//! - A per-request tree of execution [`Context`](runner::context::Context)s
//! - Scope resolution for bare and scope-qualified identifiers, including
//!   closure and lambda capture rules
//! - Lazily created, process-wide applications and per-client sessions, with
//!   start/end lifecycle hooks
//!
//! ## Quick Start
//!
//! ```
//! use cfml_runtime::runner::config::RuntimeConfig;
//! use cfml_runtime::runner::ds::key::Key;
//! use cfml_runtime::runner::ds::value::Value;
//! use cfml_runtime::runner::runtime::Runtime;
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let server = runtime.server_context();
//! let request = server.request();
//!
//! // A plain assignment lands in `variables`
//! request.set("greeting", "hello").unwrap();
//!
//! let found = request.resolve(&Key::of("GREETING"), None).unwrap();
//! assert_eq!(found.value, Value::from("hello"));
//! assert_eq!(found.scope.name(), &Key::of("variables"));
//! ```
//!
//! ## Functions, Closures and Lambdas
//!
//! Function bodies are host closures that run against their own call
//! context. What they can see depends on the function kind:
//!
//! ```
//! use cfml_runtime::runner::config::RuntimeConfig;
//! use cfml_runtime::runner::ds::class::BoxClass;
//! use cfml_runtime::runner::ds::function::{Arguments, Function};
//! use cfml_runtime::runner::ds::value::Value;
//! use cfml_runtime::runner::runtime::Runtime;
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let server = runtime.server_context();
//! let request = server.request();
//!
//! let class = BoxClass::new("Counter");
//! class.variables().put("secret", 42).unwrap();
//! let class_ctx = request.class_context(class.clone());
//!
//! // A closure declared inside the class sees its variables...
//! let closure = class_ctx.bind_function(Function::closure(vec![], |ctx| ctx.resolve_value("secret")));
//! assert_eq!(closure.invoke(&class_ctx, Arguments::none()).unwrap(), Value::Integer(42));
//!
//! // ...a lambda in the same position does not.
//! let lambda = class_ctx.bind_function(Function::lambda(vec![], |ctx| ctx.resolve_value("secret")));
//! assert!(lambda.invoke(&class_ctx, Arguments::none()).is_err());
//! ```
//!
//! ## Applications and Sessions
//!
//! A request gets an application as soon as it has an application name and
//! touches the `application` scope; with session management on, touching
//! `session` does the same for the client's session. Creation is race-free:
//! any number of threads hitting a new name at once share one instance and
//! the start hook runs once.
//!
//! ```
//! use cfml_runtime::runner::config::{ApplicationSettings, RuntimeConfig};
//! use cfml_runtime::runner::ds::key::Key;
//! use cfml_runtime::runner::runtime::Runtime;
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let server = runtime.server_context();
//! let request = server.request();
//! request
//!     .update_settings(ApplicationSettings::named("shop").with_sessions(true))
//!     .unwrap();
//! request.set_session_id(Key::of("client-1")).unwrap();
//!
//! request.set("session.cart", 3).unwrap();
//! let app = runtime.registry().get(&Key::of("shop")).unwrap();
//! assert_eq!(app.session_count(), 1);
//!
//! let reports = runtime.shutdown();
//! assert_eq!(reports[0].sessions_closed, 1);
//! ```
//!
//! ## Architecture
//!
//! - **[`runner::ds`]** - Keys, values, scopes, functions, classes, errors
//! - **[`runner::context`]** - Context nodes, resolution, chain splicing
//! - **[`runner::app`]** - Applications, sessions, the registry, listeners
//! - **[`runner::config`]** - TOML configuration
//! - **[`runner::runtime`]** - The process-level entry point

#[macro_use]
extern crate lazy_static;

pub mod runner;
