//! The process-wide map of named applications.
//!
//! Lookups of live applications take only a shard read lock. Creation goes
//! through the map's entry lock so racing first requests all receive the
//! same instance; the start hook runs afterwards, outside that lock, under
//! the application's own start lock.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::runner::app::application::{Application, ShutdownReport};
use crate::runner::config::ApplicationSettings;
use crate::runner::context::Context;
use crate::runner::ds::key::Key;

#[derive(Default)]
pub struct ApplicationRegistry {
    applications: DashMap<Key, Arc<Application>>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        ApplicationRegistry {
            applications: DashMap::new(),
        }
    }

    /// The live application called `name`, created (but not started) when
    /// missing. A defunct instance under the name is replaced.
    pub fn get_application(&self, name: &Key, settings: &ApplicationSettings) -> Arc<Application> {
        if let Some(app) = self.applications.get(name) {
            if !app.is_defunct() {
                return app.value().clone();
            }
        }
        match self.applications.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_defunct() {
                    return entry.get().clone();
                }
                let fresh = Application::new(name.clone(), settings);
                entry.insert(fresh.clone());
                debug!(application = %name, "replacing defunct application");
                fresh
            }
            Entry::Vacant(entry) => {
                let fresh = Application::new(name.clone(), settings);
                entry.insert(fresh.clone());
                info!(application = %name, "application created");
                fresh
            }
        }
    }

    pub fn get(&self, name: &Key) -> Option<Arc<Application>> {
        self.applications.get(name).map(|a| a.value().clone())
    }

    pub fn has_application(&self, name: &Key) -> bool {
        self.applications
            .get(name)
            .map_or(false, |a| !a.value().is_defunct())
    }

    /// Registered names, sorted case-insensitively.
    pub fn application_names(&self) -> Vec<String> {
        let mut keys: Vec<Key> = self.applications.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.into_iter().map(|k| k.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Unregisters `name` without shutting it down.
    pub fn remove_application(&self, name: &Key) -> Option<Arc<Application>> {
        self.applications.remove(name).map(|(_, app)| app)
    }

    /// Unregisters `app` only if it is still the instance mapped under its
    /// name.
    pub fn discard(&self, app: &Arc<Application>) -> bool {
        let removed = self
            .applications
            .remove_if(app.name(), |_, current| Arc::ptr_eq(current, app))
            .is_some();
        if removed {
            debug!(application = %app.name(), "application discarded");
        }
        removed
    }

    /// Unregisters and shuts down `name`.
    pub fn shutdown_application(&self, name: &Key, server: &Context<'_>) -> Option<ShutdownReport> {
        let app = self.remove_application(name)?;
        Some(app.shutdown(server))
    }

    /// Shuts every registered application down.
    pub fn shutdown_all(&self, server: &Context<'_>) -> Vec<ShutdownReport> {
        let names: Vec<Key> = self.applications.iter().map(|e| e.key().clone()).collect();
        names
            .iter()
            .filter_map(|name| self.shutdown_application(name, server))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_lookup_only_reads() {
        let registry = ApplicationRegistry::new();
        let settings = ApplicationSettings::named("reader");
        let name = Key::of("reader");
        let first = registry.get_application(&name, &settings);

        // a held read guard would deadlock a write-locking lookup
        let held = registry.applications.get(&name);
        let again = registry.get_application(&name, &settings);
        drop(held);
        assert!(Arc::ptr_eq(&first, &again));
    }
}
