//! The scope tree.
//!
//! A [`Bus`] is a handle to one scope of a tree. Every scope of a tree shares
//! the router, the resolution cache and the context pool; each owns its
//! middleware lists and the chains built from them. A child scope starts
//! with a copy of its parent's middleware, so later changes on either side
//! stay local.
//!
//! Scopes live in an arena owned by the tree and are addressed by
//! [`ScopeId`]. Handles are cheap to clone.

use crate::command::{Action, Query};
use crate::config::BusConfig;
use crate::context::CallContext;
use crate::engine;
use crate::error::BusError;
use crate::handler::{Endpoint, Handler, Route, Routes};
use crate::key::{OpKind, TypeKey};
use crate::middleware::{self, CallKind, MiddlewareLink, Next};
use crate::pool::ContextPool;
use crate::router::Router;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Position of a scope in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Default)]
struct Middlewares {
    command: Vec<MiddlewareLink>,
    dispatch: Vec<MiddlewareLink>,
    query: Vec<MiddlewareLink>,
}

#[derive(Default)]
struct ScopeState {
    parent: Option<ScopeId>,
    stack: Middlewares,
    dispatch_chain: Option<Next>,
    query_chain: Option<Next>,
    /// Indexed by [`OpKind::slot`].
    command_chains: [Option<Next>; 2],
}

pub(crate) struct Shared {
    router: RwLock<Router<Arc<Route>>>,
    resolved: DashMap<(OpKind, TypeKey), Arc<Route>>,
    scopes: RwLock<Vec<ScopeState>>,
    pub(crate) pool: Arc<ContextPool>,
    pub(crate) config: BusConfig,
}

/// Handle to one scope of a command bus.
///
/// Registration (`register`, `on_*`, `use_*`, `group`) is a setup step and
/// is expected to finish before calls are made concurrently.
#[derive(Clone)]
pub struct Bus {
    pub(crate) shared: Arc<Shared>,
    pub(crate) scope: ScopeId,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// A new tree with default configuration. The handle is its root.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let shared = Shared {
            router: RwLock::new(Router::new()),
            resolved: DashMap::new(),
            scopes: RwLock::new(vec![ScopeState::default()]),
            pool: Arc::new(ContextPool::new(&config.pool)),
            config,
        };
        Self {
            shared: Arc::new(shared),
            scope: ScopeId::ROOT,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.scope
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    pub fn root(&self) -> Bus {
        self.at(ScopeId::ROOT)
    }

    pub fn parent(&self) -> Option<Bus> {
        let parent = self.shared.scopes.read()[self.scope.0].parent?;
        Some(self.at(parent))
    }

    /// A call context bound to this scope.
    ///
    /// Calls made with it run the per-call middleware of this scope, not
    /// the root's. A child scope copied its parent's per-call middleware
    /// when it was created, so parent middleware added later is skipped by
    /// calls made through the child.
    pub fn context(&self) -> CallContext {
        CallContext::new().with_bus(self)
    }

    /// The scope bound to `call`.
    pub fn from_context(call: &CallContext) -> Result<Bus, BusError> {
        call.bus().cloned().ok_or(BusError::ContextMissing)
    }

    /// Number of handlers registered anywhere in the tree.
    pub fn handler_count(&self) -> usize {
        self.shared.router.read().len()
    }

    /// Create a child scope, configure it, and return it.
    pub fn group(&self, configure: impl FnOnce(&Bus)) -> Bus {
        let id = {
            let mut scopes = self.shared.scopes.write();
            let stack = scopes[self.scope.0].stack.clone();
            let id = ScopeId(scopes.len());
            scopes.push(ScopeState {
                parent: Some(self.scope),
                stack,
                ..ScopeState::default()
            });
            id
        };
        debug!(parent = %self.scope, scope = %id, "scope created");

        let child = self.at(id);
        configure(&child);
        child
    }

    /// Register every endpoint `handler` declares, owned by this scope.
    ///
    /// # Panics
    ///
    /// If a handler is already registered anywhere in the tree for one of
    /// the same commands under the same kind.
    pub fn register<H: Handler>(&self, handler: H) -> &Self {
        let mut routes = Routes::new(handler);
        H::routes(&mut routes);
        for endpoint in routes.endpoints {
            self.insert(endpoint);
        }
        self.prepare_call_chains();
        self
    }

    /// Register a closure handling action `A`.
    pub fn on_action<A, F>(&self, handler: F) -> &Self
    where
        A: Action,
        F: Fn(&CallContext, &mut A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(Endpoint::action(handler));
        self.prepare_call_chains();
        self
    }

    /// Register a closure answering query `Q`.
    pub fn on_query<Q, F>(&self, handler: F) -> &Self
    where
        Q: Query,
        F: Fn(&CallContext, &mut Q) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(Endpoint::query(handler));
        self.prepare_call_chains();
        self
    }

    /// Add per-command middleware for the given kinds.
    ///
    /// # Panics
    ///
    /// If this scope already ran a command of an intersecting kind: its
    /// command chain is built once and never rebuilt.
    pub fn use_middleware<M>(&self, kind: OpKind, middleware: M) -> &Self
    where
        M: Fn(Next) -> Next + Send + Sync + 'static,
    {
        let mut scopes = self.shared.scopes.write();
        let state = &mut scopes[self.scope.0];
        let built = [OpKind::ACTION, OpKind::QUERY]
            .into_iter()
            .zip(&state.command_chains)
            .any(|(op, chain)| chain.is_some() && kind.intersects(op));
        if built {
            drop(scopes);
            error!(scope = %self.scope, %kind, "middleware added after first use");
            panic!(
                "{kind} middleware added to scope {} after its command chain was built",
                self.scope
            );
        }
        state.stack.command.push(MiddlewareLink::new(kind, middleware));
        self
    }

    /// Add middleware run once around every `dispatch` through this scope.
    pub fn use_dispatch<M>(&self, middleware: M) -> &Self
    where
        M: Fn(Next) -> Next + Send + Sync + 'static,
    {
        let mut scopes = self.shared.scopes.write();
        let state = &mut scopes[self.scope.0];
        state
            .stack
            .dispatch
            .push(MiddlewareLink::new(OpKind::ACTION, middleware));
        state.dispatch_chain = None;
        self
    }

    /// Add middleware run once around every `query` or `query_async` through
    /// this scope.
    pub fn use_query<M>(&self, middleware: M) -> &Self
    where
        M: Fn(Next) -> Next + Send + Sync + 'static,
    {
        let mut scopes = self.shared.scopes.write();
        let state = &mut scopes[self.scope.0];
        state
            .stack
            .query
            .push(MiddlewareLink::new(OpKind::QUERY, middleware));
        state.query_chain = None;
        self
    }

    fn at(&self, scope: ScopeId) -> Bus {
        Bus {
            shared: Arc::clone(&self.shared),
            scope,
        }
    }

    fn insert(&self, endpoint: Endpoint) {
        let Endpoint { kind, key, invoke } = endpoint;
        let route = Arc::new(Route::new(kind, key, self.scope, invoke));
        self.shared
            .router
            .write()
            .insert(kind, route.key().as_bytes(), Arc::clone(&route));
        debug!(%kind, key = %route.key(), scope = %self.scope, "handler registered");
    }

    /// Build the per-call chains of this scope and every ancestor.
    fn prepare_call_chains(&self) {
        let mut next = Some(self.scope);
        while let Some(scope) = next {
            self.call_chain_at(scope, CallKind::Dispatch);
            self.call_chain_at(scope, CallKind::Query);
            next = self.shared.scopes.read()[scope.0].parent;
        }
    }

    /// Find the handler for `(kind, key)`, caching hits.
    pub(crate) fn resolve(&self, kind: OpKind, key: &TypeKey) -> Result<Arc<Route>, BusError> {
        if let Some(route) = self.shared.resolved.get(&(kind, key.clone())) {
            return Ok(Arc::clone(route.value()));
        }

        let route = self
            .shared
            .router
            .read()
            .find_route(kind, key.as_bytes())
            .cloned()
            .ok_or_else(|| BusError::HandlerNotFound {
                kind,
                key: key.clone(),
            })?;
        self.shared
            .resolved
            .insert((kind, key.clone()), Arc::clone(&route));
        Ok(route)
    }

    /// The per-command chain of `scope` for `kind`, built on first use.
    pub(crate) fn command_chain(&self, scope: ScopeId, kind: OpKind) -> Next {
        let slot = kind.slot().expect("routes are stored under a single kind");
        {
            let scopes = self.shared.scopes.read();
            if let Some(chain) = &scopes[scope.0].command_chains[slot] {
                return chain.clone();
            }
        }

        let mut scopes = self.shared.scopes.write();
        let ScopeState {
            stack,
            command_chains,
            ..
        } = &mut scopes[scope.0];
        command_chains[slot]
            .get_or_insert_with(|| {
                trace!(%scope, %kind, links = stack.command.len(), "building command chain");
                let terminal = Next::new(|ctx| ctx.invoke_current());
                middleware::chain(kind, &stack.command, terminal)
            })
            .clone()
    }

    /// The per-call chain of this scope.
    pub(crate) fn call_chain(&self, kind: CallKind) -> Next {
        self.call_chain_at(self.scope, kind)
    }

    fn call_chain_at(&self, scope: ScopeId, kind: CallKind) -> Next {
        {
            let scopes = self.shared.scopes.read();
            let state = &scopes[scope.0];
            let cached = match kind {
                CallKind::Dispatch => &state.dispatch_chain,
                CallKind::Query => &state.query_chain,
            };
            if let Some(chain) = cached {
                return chain.clone();
            }
        }

        let mut scopes = self.shared.scopes.write();
        let ScopeState {
            stack,
            dispatch_chain,
            query_chain,
            ..
        } = &mut scopes[scope.0];
        let (links, chain) = match kind {
            CallKind::Dispatch => (&stack.dispatch, dispatch_chain),
            CallKind::Query => (&stack.query, query_chain),
        };
        chain
            .get_or_insert_with(|| {
                trace!(%scope, %kind, links = links.len(), "building call chain");
                middleware::exec(Arc::from(links.as_slice()), Next::new(engine::run_work))
            })
            .clone()
    }
}

impl PartialEq for Bus {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.scope == other.scope
    }
}

impl Eq for Bus {}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("scope", &self.scope)
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}
