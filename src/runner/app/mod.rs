//! Applications, sessions and the hooks around their lifetimes.

pub mod application;
pub mod lifecycle;
pub mod listener;
pub mod registry;
pub mod session;
