//! Request-side lifecycle: getting the application and session of a request
//! into its context chain.
//!
//! Nothing here runs eagerly. The first time code touches `application` or
//! `session`, the request asks the registry for the instance, splices a node
//! for it and runs the start hook. The spliced node is what later lookups
//! (and a start hook touching the same scope again) find, so a hook never
//! waits on its own start.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::runner::app::application::Application;
use crate::runner::app::listener::{default_listener, ApplicationListener};
use crate::runner::app::session::{new_session_id, Session};
use crate::runner::config::ApplicationSettings;
use crate::runner::context::{Context, ContextType, RequestState};
use crate::runner::ds::error::{Result, RuntimeError};
use crate::runner::ds::key::{Key, SESSION};
use crate::runner::ds::scope::CopyMap;

fn no_request() -> RuntimeError {
    RuntimeError::Runtime("no request context is active".to_string())
}

fn sessions_disabled() -> RuntimeError {
    RuntimeError::Runtime("session management is not enabled for this request".to_string())
}

impl<'p> Context<'p> {
    fn request_parts<'a>(&'a self) -> Option<(&'a Context<'a>, &'a RequestState)> {
        let request = self.request_context()?;
        let state = request.request_state()?;
        Some((request, state))
    }

    /// A request for running end hooks of `app`: the application is spliced
    /// in and session management is off.
    pub fn detached<'a>(server: &'a Context<'a>, app: Arc<Application>) -> Context<'a> {
        let ctx = server.new_request(true);
        if let Some(state) = ctx.request_state() {
            *state.settings.borrow_mut() = ApplicationSettings::named(app.name().name());
            if let Some(listener) = app.listener() {
                *state.listener.borrow_mut() = listener;
            }
            state
                .ancestors
                .borrow_mut()
                .push(Context::application_node(app));
        }
        ctx
    }

    /// The settings of the nearest request, or the server defaults.
    pub fn settings(&self) -> ApplicationSettings {
        match self.request_parts() {
            Some((_, state)) => state.settings.borrow().clone(),
            None => self
                .server_state()
                .map(|s| s.defaults.clone())
                .unwrap_or_default(),
        }
    }

    pub fn listener(&self) -> Arc<dyn ApplicationListener> {
        match self.request_parts() {
            Some((_, state)) => state.listener.borrow().clone(),
            None => self
                .server_state()
                .map(|s| s.listener.clone())
                .unwrap_or_else(default_listener),
        }
    }

    /// Sets the listener whose start hooks run for instances this request
    /// creates.
    pub fn set_listener(&self, listener: Arc<dyn ApplicationListener>) -> Result<()> {
        let (_, state) = self.request_parts().ok_or_else(no_request)?;
        *state.listener.borrow_mut() = listener;
        Ok(())
    }

    /// Replaces the request's settings and drops spliced nodes they no longer
    /// allow. New nodes are only created on the next touch.
    pub fn update_settings(&self, settings: ApplicationSettings) -> Result<()> {
        let (request, state) = self.request_parts().ok_or_else(no_request)?;
        *state.settings.borrow_mut() = settings.clone();

        if let Some(app) = request.spliced_application() {
            let same_app =
                settings.has_application() && *app.name() == Key::of(settings.name.trim());
            if same_app {
                app.apply_settings(&settings);
            } else {
                debug!(application = %app.name(), "application no longer configured for request");
                request.remove_parent_context(ContextType::Session);
                request.remove_parent_context(ContextType::Application);
            }
        }
        if !settings.session_management {
            request.remove_parent_context(ContextType::Session);
        }
        Ok(())
    }

    pub fn session_id(&self) -> Option<Key> {
        self.request_parts()
            .and_then(|(_, state)| state.session_id.borrow().clone())
    }

    /// Points the request at session `id`. A spliced session with another id
    /// is excised.
    pub fn set_session_id(&self, id: Key) -> Result<()> {
        let (request, state) = self.request_parts().ok_or_else(no_request)?;
        if let Some(session) = request.spliced_session() {
            if session.id() != &id {
                request.remove_parent_context(ContextType::Session);
            }
        }
        *state.session_id.borrow_mut() = Some(id);
        Ok(())
    }

    /// The request's application, created and started on first use. `None`
    /// when the request has no application name.
    pub fn ensure_application(&self) -> Result<Option<Arc<Application>>> {
        let (request, state) = match self.request_parts() {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let settings = state.settings.borrow().clone();
        if !settings.has_application() {
            return Ok(None);
        }
        let name = Key::of(settings.name.trim());

        if let Some(app) = request.spliced_application() {
            if app.name() == &name && (state.detached || !app.is_defunct()) {
                app.touch();
                return Ok(Some(app));
            }
            request.remove_parent_context(ContextType::Session);
            request.remove_parent_context(ContextType::Application);
        }

        let registry = request
            .registry()
            .ok_or_else(|| RuntimeError::Runtime("no server context is active".to_string()))?;
        let listener = state.listener.borrow().clone();
        loop {
            let app = registry.get_application(&name, &settings);
            if app.is_expired() {
                info!(application = %name, "application expired");
                if registry.discard(&app) {
                    if let Some(server) = request.get_parent_of_type(ContextType::Server) {
                        app.shutdown(&server);
                    }
                }
                continue;
            }
            app.touch();
            request.inject_parent_context(Context::application_node(app.clone()))?;
            match app.start(request, &listener, || {
                registry.discard(&app);
            }) {
                Ok(true) => return Ok(Some(app)),
                Ok(false) => {
                    request.remove_parent_context(ContextType::Application);
                }
                Err(e) => {
                    request.remove_parent_context(ContextType::Application);
                    return Err(e);
                }
            }
        }
    }

    /// The request's session, created and started on first use. `None` when
    /// session management is off or there is no application.
    pub fn ensure_session(&self) -> Result<Option<Arc<Session>>> {
        let (request, state) = match self.request_parts() {
            Some(parts) => parts,
            None => return Ok(None),
        };
        if !state.settings.borrow().session_management {
            return Ok(None);
        }
        let app = match request.ensure_application()? {
            Some(app) => app,
            None => return Ok(None),
        };
        let id = state
            .session_id
            .borrow_mut()
            .get_or_insert_with(new_session_id)
            .clone();

        if let Some(session) = request.spliced_session() {
            if session.id() == &id && session.application_name() == app.name() && !session.is_defunct()
            {
                session.touch();
                return Ok(Some(session));
            }
            request.remove_parent_context(ContextType::Session);
        }

        let listener = state.listener.borrow().clone();
        loop {
            let (session, stale) = match app.get_or_create_session(&id) {
                Some(found) => found,
                // shut down under us; a detached request must not start over
                None if state.detached => return Err(RuntimeError::scope_not_found(&*SESSION)),
                None => {
                    request.remove_parent_context(ContextType::Session);
                    request.remove_parent_context(ContextType::Application);
                    return request.ensure_session();
                }
            };
            if let Some(stale) = stale {
                request.end_session(&app, &stale);
            }
            request.inject_parent_context(Context::session_node(session.clone()))?;
            match session.start(request, &listener, || {
                app.discard_session(&session);
            }) {
                Ok(true) => {
                    session.touch();
                    return Ok(Some(session));
                }
                Ok(false) => {
                    request.remove_parent_context(ContextType::Session);
                }
                Err(e) => {
                    request.remove_parent_context(ContextType::Session);
                    return Err(e);
                }
            }
        }
    }

    /// Switches the request to session `id`, creating it if needed.
    pub fn initialize_session(&self, id: Key) -> Result<Arc<Session>> {
        self.set_session_id(id)?;
        self.ensure_session()?.ok_or_else(sessions_disabled)
    }

    /// Moves the current session's data to a fresh id. Keys are copied, not
    /// aliased, and never overwrite what the new session already holds. The
    /// old session is ended and can no longer be looked up.
    pub fn rotate_session(&self) -> Result<Arc<Session>> {
        let old = self.ensure_session()?.ok_or_else(sessions_disabled)?;
        let app = self.ensure_application()?.ok_or_else(sessions_disabled)?;

        let fresh = self.initialize_session(new_session_id())?;
        // references to the old scope itself now point at the new one
        let mut copies = CopyMap::new();
        copies.insert(Arc::as_ptr(old.scope()), fresh.scope().clone());
        for (key, value) in old.scope().snapshot() {
            fresh.scope().put_if_absent(key, value.duplicate_with(&mut copies))?;
        }
        app.discard_session(&old);
        self.end_session(&app, &old);
        info!(application = %app.name(), from = %old.id(), to = %fresh.id(), "session rotated");
        Ok(fresh)
    }

    /// Ends the current session and starts a new one under `new_id` (a
    /// random id when `None`).
    pub fn invalidate_session(&self, new_id: Option<Key>) -> Result<Arc<Session>> {
        if !self.settings().session_management {
            return Err(sessions_disabled());
        }
        let app = self.ensure_application()?.ok_or_else(sessions_disabled)?;
        let old = self
            .spliced_session()
            .or_else(|| self.session_id().and_then(|id| app.session(&id)));
        self.remove_parent_context(ContextType::Session);
        if let Some(old) = &old {
            app.discard_session(old);
            self.end_session(&app, old);
            info!(application = %app.name(), session = %old.id(), "session invalidated");
        }
        self.initialize_session(new_id.unwrap_or_else(new_session_id))
    }

    /// Runs the end hook of `session` in a detached request. Failures are
    /// logged, never raised.
    pub(crate) fn end_session(&self, app: &Arc<Application>, session: &Arc<Session>) {
        let listener = app.listener().unwrap_or_else(|| self.listener());
        let outcome = match self.get_parent_of_type(ContextType::Server) {
            Some(server) => {
                let ctx = Context::detached(&server, app.clone());
                session.shutdown(&ctx, listener.as_ref(), app.scope())
            }
            None => session.shutdown(self, listener.as_ref(), app.scope()),
        };
        if let Err(e) = outcome {
            error!(application = %app.name(), session = %session.id(), error = %e, "session end hook failed");
        }
    }
}
