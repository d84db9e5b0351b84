//! Middleware composition.
//!
//! A middleware is a function from the next step of a chain to a new step
//! that wraps it. Two chain shapes are built from the same links:
//!
//! - per-command chains wrap each handler invocation and are composed eagerly
//!   with [`chain`], after filtering links by operation kind;
//! - per-call chains wrap a whole external call and are driven by the
//!   execution context's cursor with [`exec`], so the chain resumes where it
//!   left off instead of restarting.
//!
//! Both run in onion order: links registered `[a, b]` run `a` before `b` on
//! the way in and after it on the way out.

use crate::context::Context;
use crate::error::BusError;
use crate::key::OpKind;
use std::fmt;
use std::sync::Arc;

type StepFn = dyn Fn(&mut Context<'_>) -> Result<(), BusError> + Send + Sync;

/// The rest of a chain, as seen from inside a middleware.
#[derive(Clone)]
pub struct Next(Arc<StepFn>);

impl Next {
    pub fn new<F>(step: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), BusError> + Send + Sync + 'static,
    {
        Self(Arc::new(step))
    }

    pub fn run(&self, ctx: &mut Context<'_>) -> Result<(), BusError> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

/// Build a middleware from a function that receives the context and the rest
/// of the chain.
///
/// ```ignore
/// bus.use_middleware(OpKind::ALL, from_fn(|ctx, next| {
///     let started = Instant::now();
///     let result = next.run(ctx);
///     tracing::info!(key = ?ctx.type_key(), elapsed = ?started.elapsed());
///     result
/// }));
/// ```
pub fn from_fn<F>(f: F) -> impl Fn(Next) -> Next + Send + Sync + 'static
where
    F: Fn(&mut Context<'_>, &Next) -> Result<(), BusError> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |next: Next| {
        let f = Arc::clone(&f);
        Next::new(move |ctx| f(ctx, &next))
    }
}

type WrapFn = dyn Fn(Next) -> Next + Send + Sync;

/// A middleware together with the operation kinds it applies to.
#[derive(Clone)]
pub(crate) struct MiddlewareLink {
    kind: OpKind,
    wrap: Arc<WrapFn>,
}

impl MiddlewareLink {
    pub(crate) fn new<M>(kind: OpKind, middleware: M) -> Self
    where
        M: Fn(Next) -> Next + Send + Sync + 'static,
    {
        Self {
            kind,
            wrap: Arc::new(middleware),
        }
    }

    pub(crate) fn applies_to(&self, kind: OpKind) -> bool {
        self.kind.intersects(kind)
    }

    fn wrap(&self, next: Next) -> Next {
        (self.wrap)(next)
    }
}

/// The two per-call chains of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Dispatch,
    Query,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => f.write_str("dispatch"),
            Self::Query => f.write_str("query"),
        }
    }
}

/// Wrap `terminal` in every link applying to `kind`, first link outermost.
pub(crate) fn chain(kind: OpKind, links: &[MiddlewareLink], terminal: Next) -> Next {
    links
        .iter()
        .rev()
        .filter(|link| link.applies_to(kind))
        .fold(terminal, |next, link| link.wrap(next))
}

/// Cursor-driven chain: each run enters the link at the context's cursor,
/// advancing it first, and runs `terminal` once every link was entered.
pub(crate) fn exec(links: Arc<[MiddlewareLink]>, terminal: Next) -> Next {
    Next::new(move |ctx| {
        let cursor = ctx.frame.cursor;
        match links.get(cursor) {
            Some(link) => {
                ctx.frame.cursor = cursor + 1;
                link.wrap(exec(Arc::clone(&links), terminal.clone())).run(ctx)
            }
            None => terminal.run(ctx),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::engine::Work;
    use crate::pool::ContextPool;
    use crate::scope::Bus;
    use parking_lot::Mutex;

    fn recording(
        trail: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(Next) -> Next + Send + Sync + 'static {
        let trail = Arc::clone(trail);
        from_fn(move |ctx, next| {
            trail.lock().push(format!("{label}-before"));
            let result = next.run(ctx);
            trail.lock().push(format!("{label}-after"));
            result
        })
    }

    fn terminal(trail: &Arc<Mutex<Vec<String>>>) -> Next {
        let trail = Arc::clone(trail);
        Next::new(move |_| {
            trail.lock().push("handler".into());
            Ok(())
        })
    }

    fn with_context<R>(f: impl FnOnce(&mut Context<'_>) -> R) -> R {
        let pool = Arc::new(ContextPool::new(&PoolConfig::default()));
        let mut ctx = Context::new(Bus::new(), pool.acquire(), Work::Idle);
        f(&mut ctx)
    }

    #[test]
    fn chain_runs_in_onion_order() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let links = [
            MiddlewareLink::new(OpKind::ALL, recording(&trail, "A")),
            MiddlewareLink::new(OpKind::ALL, recording(&trail, "B")),
        ];

        let next = chain(OpKind::ACTION, &links, terminal(&trail));
        with_context(|ctx| next.run(ctx)).unwrap();

        assert_eq!(
            *trail.lock(),
            ["A-before", "B-before", "handler", "B-after", "A-after"]
        );
    }

    #[test]
    fn chain_skips_links_for_other_kinds() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let links = [
            MiddlewareLink::new(OpKind::QUERY, recording(&trail, "Q")),
            MiddlewareLink::new(OpKind::ACTION, recording(&trail, "A")),
            MiddlewareLink::new(OpKind::ALL, recording(&trail, "*")),
        ];

        let next = chain(OpKind::ACTION, &links, terminal(&trail));
        with_context(|ctx| next.run(ctx)).unwrap();

        assert_eq!(
            *trail.lock(),
            ["A-before", "*-before", "handler", "*-after", "A-after"]
        );
    }

    #[test]
    fn exec_enters_each_link_once_and_leaves_the_cursor_exhausted() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let links: Arc<[MiddlewareLink]> = Arc::from(vec![
            MiddlewareLink::new(OpKind::ALL, recording(&trail, "A")),
            MiddlewareLink::new(OpKind::ALL, recording(&trail, "B")),
        ]);

        let next = exec(links, terminal(&trail));
        with_context(|ctx| {
            next.run(ctx).unwrap();
            assert_eq!(ctx.frame.cursor, 2);

            // Re-entering with an exhausted cursor goes straight to the end.
            next.run(ctx).unwrap();
        });

        assert_eq!(
            *trail.lock(),
            ["A-before", "B-before", "handler", "B-after", "A-after", "handler"]
        );
    }

    #[test]
    fn middleware_can_short_circuit() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let deny = from_fn(|_, _| Err(BusError::Handler(anyhow::anyhow!("denied"))));
        let links = [
            MiddlewareLink::new(OpKind::ALL, deny),
            MiddlewareLink::new(OpKind::ALL, recording(&trail, "A")),
        ];

        let next = chain(OpKind::QUERY, &links, terminal(&trail));
        let err = with_context(|ctx| next.run(ctx)).unwrap_err();

        assert_eq!(err.to_string(), "denied");
        assert!(trail.lock().is_empty());
    }
}
