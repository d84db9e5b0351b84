//! Handler registration.
//!
//! A handler object declares what it serves by implementing [`Handler`]: its
//! [`routes`](Handler::routes) hook lists one endpoint per command type, each
//! bound to one of its methods. Every endpoint becomes a [`Route`] in the
//! shared router, tagged with the scope that registered it.

use crate::command::{Action, Command, Query};
use crate::context::CallContext;
use crate::error::BusError;
use crate::key::{OpKind, TypeKey};
use crate::scope::ScopeId;
use std::fmt;
use std::sync::Arc;

/// Type-erased handler entry point.
pub(crate) type InvokeFn =
    dyn Fn(&CallContext, &mut dyn Command) -> Result<(), BusError> + Send + Sync;

/// A registered handler: what it serves, where it was registered, and how to
/// call it.
pub struct Route {
    kind: OpKind,
    key: TypeKey,
    scope: ScopeId,
    invoke: Arc<InvokeFn>,
}

impl Route {
    pub(crate) fn new(kind: OpKind, key: TypeKey, scope: ScopeId, invoke: Arc<InvokeFn>) -> Self {
        Self {
            kind,
            key,
            scope,
            invoke,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    /// Scope whose per-command middleware wraps this handler.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub(crate) fn invoke(
        &self,
        call: &CallContext,
        command: &mut dyn Command,
    ) -> Result<(), BusError> {
        (self.invoke)(call, command)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// An unregistered `(kind, key, invocable)` triple.
pub(crate) struct Endpoint {
    pub(crate) kind: OpKind,
    pub(crate) key: TypeKey,
    pub(crate) invoke: Arc<InvokeFn>,
}

impl Endpoint {
    pub(crate) fn action<A, F>(handler: F) -> Self
    where
        A: Action,
        F: Fn(&CallContext, &mut A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::typed(OpKind::ACTION, handler)
    }

    pub(crate) fn query<Q, F>(handler: F) -> Self
    where
        Q: Query,
        F: Fn(&CallContext, &mut Q) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::typed(OpKind::QUERY, handler)
    }

    fn typed<C, F>(kind: OpKind, handler: F) -> Self
    where
        C: Command,
        F: Fn(&CallContext, &mut C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = C::key();
        let expected = key.clone();
        let invoke = move |call: &CallContext, command: &mut dyn Command| -> Result<(), BusError> {
            let command = command
                .downcast_mut::<C>()
                .ok_or_else(|| BusError::TypeMismatch {
                    key: expected.clone(),
                })?;
            // Bus errors from nested calls keep their class.
            handler(call, command)
                .map_err(|err| err.downcast::<BusError>().unwrap_or_else(BusError::Handler))
        };
        Self {
            kind,
            key,
            invoke: Arc::new(invoke),
        }
    }
}

/// Collects the endpoints of one handler object.
pub struct Routes<H> {
    handler: Arc<H>,
    pub(crate) endpoints: Vec<Endpoint>,
}

impl<H: Send + Sync + 'static> Routes<H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            endpoints: Vec::new(),
        }
    }

    /// Serve action `A` with `method`.
    pub fn action<A, F>(&mut self, method: F) -> &mut Self
    where
        A: Action,
        F: Fn(&H, &CallContext, &mut A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::clone(&self.handler);
        self.endpoints
            .push(Endpoint::action(move |call, action: &mut A| {
                method(&handler, call, action)
            }));
        self
    }

    /// Serve query `Q` with `method`. The method writes its answer into the
    /// query.
    pub fn query<Q, F>(&mut self, method: F) -> &mut Self
    where
        Q: Query,
        F: Fn(&H, &CallContext, &mut Q) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::clone(&self.handler);
        self.endpoints
            .push(Endpoint::query(move |call, query: &mut Q| {
                method(&handler, call, query)
            }));
        self
    }
}

/// An object serving one or more command types.
///
/// ```ignore
/// struct Users { store: UserStore }
///
/// impl Handler for Users {
///     fn routes(routes: &mut Routes<Self>) {
///         routes
///             .action(Users::create)
///             .query(Users::find);
///     }
/// }
///
/// bus.register(Users { store });
/// ```
pub trait Handler: Send + Sync + Sized + 'static {
    fn routes(routes: &mut Routes<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CreateUser {
        name: String,
        id: Option<u64>,
    }
    impl Command for CreateUser {}
    impl Action for CreateUser {}

    struct FindUser {
        id: u64,
        name: Option<String>,
    }
    impl Command for FindUser {}
    impl Query for FindUser {}

    struct Users {
        created: AtomicUsize,
    }

    impl Users {
        fn create(&self, _call: &CallContext, cmd: &mut CreateUser) -> anyhow::Result<()> {
            anyhow::ensure!(!cmd.name.is_empty(), "name is required");
            let id = self.created.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            cmd.id = Some(id);
            Ok(())
        }

        fn find(&self, _call: &CallContext, query: &mut FindUser) -> anyhow::Result<()> {
            query.name = Some(format!("user-{}", query.id));
            Ok(())
        }
    }

    impl Handler for Users {
        fn routes(routes: &mut Routes<Self>) {
            routes.action(Users::create).query(Users::find);
        }
    }

    fn endpoints() -> Vec<Endpoint> {
        let mut routes = Routes::new(Users {
            created: AtomicUsize::new(0),
        });
        Users::routes(&mut routes);
        routes.endpoints
    }

    #[test]
    fn routes_yield_one_endpoint_per_method() {
        let endpoints = endpoints();
        let triples: Vec<_> = endpoints.iter().map(|e| (e.kind, e.key.clone())).collect();
        assert_eq!(
            triples,
            vec![
                (OpKind::ACTION, TypeKey::of::<CreateUser>()),
                (OpKind::QUERY, TypeKey::of::<FindUser>()),
            ]
        );
    }

    #[test]
    fn endpoints_share_the_handler_object() {
        let endpoints = endpoints();
        let call = CallContext::new();

        for expected in 1..=2 {
            let mut cmd = CreateUser {
                name: "john".into(),
                id: None,
            };
            (endpoints[0].invoke)(&call, &mut cmd).unwrap();
            assert_eq!(cmd.id, Some(expected));
        }

        let mut query = FindUser { id: 7, name: None };
        (endpoints[1].invoke)(&call, &mut query).unwrap();
        assert_eq!(query.name.as_deref(), Some("user-7"));
    }

    #[test]
    fn handler_errors_are_wrapped_and_mismatches_reported() {
        let endpoints = endpoints();
        let call = CallContext::new();

        let mut cmd = CreateUser {
            name: String::new(),
            id: None,
        };
        let err = (endpoints[0].invoke)(&call, &mut cmd).unwrap_err();
        assert!(matches!(err, BusError::Handler(_)));
        assert_eq!(err.to_string(), "name is required");

        let mut query = FindUser { id: 1, name: None };
        let err = (endpoints[0].invoke)(&call, &mut query).unwrap_err();
        assert!(matches!(err, BusError::TypeMismatch { .. }));
    }
}
