//! Splicing Application and Session nodes above a request.
//!
//! The request owns these nodes, nearest first (Session before Application).
//! At most one node of each type exists in a chain: injecting a node whose
//! type is already present replaces it in place.

use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::runner::app::application::Application;
use crate::runner::app::session::Session;
use crate::runner::context::{Context, ContextKind, ContextType};
use crate::runner::ds::error::{Result, RuntimeError};

/// A context reached while walking towards the root: either a borrowed
/// ancestor or a node spliced into a request.
pub enum ContextRef<'a> {
    Borrowed(&'a Context<'a>),
    Spliced(Rc<Context<'static>>),
}

impl<'a> Deref for ContextRef<'a> {
    type Target = Context<'a>;

    fn deref(&self) -> &Context<'a> {
        match self {
            ContextRef::Borrowed(ctx) => ctx,
            ContextRef::Spliced(ctx) => &**ctx,
        }
    }
}

fn splice_rank(kind: ContextType) -> u8 {
    match kind {
        ContextType::Session => 0,
        _ => 1,
    }
}

impl<'p> Context<'p> {
    /// `self` and every context above it. A request's spliced nodes come
    /// right after the request itself.
    pub fn lineage<'a>(&'a self) -> Vec<ContextRef<'a>> {
        let mut out = Vec::new();
        let mut cur: Option<&'a Context<'a>> = Some(self);
        while let Some(ctx) = cur {
            out.push(ContextRef::Borrowed(ctx));
            if let Some(state) = ctx.request_state() {
                out.extend(
                    state
                        .ancestors
                        .borrow()
                        .iter()
                        .cloned()
                        .map(ContextRef::Spliced),
                );
            }
            cur = ctx.parent;
        }
        out
    }

    /// Splices `node` into the nearest request. Only Application and Session
    /// nodes can be spliced.
    pub fn inject_parent_context(&self, node: Rc<Context<'static>>) -> Result<()> {
        let kind = node.context_type();
        if kind != ContextType::Application && kind != ContextType::Session {
            return Err(RuntimeError::Runtime(format!(
                "cannot splice a {:?} context into a request",
                kind
            )));
        }
        let state = self
            .request_context()
            .and_then(|r| r.request_state())
            .ok_or_else(|| RuntimeError::Runtime("no request context to splice into".to_string()))?;

        let mut ancestors = state.ancestors.borrow_mut();
        match ancestors.iter_mut().find(|n| n.context_type() == kind) {
            Some(slot) => {
                debug!(kind = ?kind, "replacing spliced context");
                *slot = node;
            }
            None => {
                debug!(kind = ?kind, "splicing context into request");
                ancestors.push(node);
                ancestors.sort_by_key(|n| splice_rank(n.context_type()));
            }
        }
        Ok(())
    }

    /// Excises the spliced node of type `kind`, if any.
    pub fn remove_parent_context(&self, kind: ContextType) -> Option<Rc<Context<'static>>> {
        let state = self.request_context()?.request_state()?;
        let mut ancestors = state.ancestors.borrow_mut();
        let idx = ancestors.iter().position(|n| n.context_type() == kind)?;
        debug!(kind = ?kind, "excising spliced context");
        Some(ancestors.remove(idx))
    }

    /// The nearest context of type `kind`, `self` included.
    pub fn get_parent_of_type(&self, kind: ContextType) -> Option<ContextRef<'_>> {
        self.lineage()
            .into_iter()
            .find(|ctx| ctx.context_type() == kind)
    }

    pub fn has_parent_type(&self, kind: ContextType) -> bool {
        self.get_parent_of_type(kind).is_some()
    }

    /// The application currently spliced into this request, if any.
    pub fn spliced_application(&self) -> Option<Arc<Application>> {
        self.spliced_nodes().iter().find_map(|n| match &n.kind {
            ContextKind::Application(app) => Some(app.clone()),
            _ => None,
        })
    }

    /// The session currently spliced into this request, if any.
    pub fn spliced_session(&self) -> Option<Arc<Session>> {
        self.spliced_nodes().iter().find_map(|n| match &n.kind {
            ContextKind::Session(session) => Some(session.clone()),
            _ => None,
        })
    }

    fn spliced_nodes(&self) -> Vec<Rc<Context<'static>>> {
        self.request_context()
            .and_then(|r| r.request_state())
            .map(|state| state.ancestors.borrow().clone())
            .unwrap_or_default()
    }
}
