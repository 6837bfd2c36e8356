pub mod app;
pub mod config;
pub mod context;
pub mod ds;
pub mod runtime;
