//! Dispatch, query and fan-out.
//!
//! A call resolves every command up front, takes a context from the pool,
//! and runs the caller scope's per-call chain once. The chain's terminal
//! processes the batch: sequentially for `dispatch` and `query`, on one
//! thread per query for `query_async`. Each command runs through the
//! per-command chain of the scope that registered its handler.

use crate::command::{Action, Command, CommandKey, Query};
use crate::context::{CallContext, Context};
use crate::error::BusError;
use crate::handler::Route;
use crate::key::OpKind;
use crate::middleware::CallKind;
use crate::scope::Bus;
use smallvec::{smallvec, SmallVec};
use std::panic;
use std::sync::Arc;
use std::{mem, thread};
use tracing::{debug, debug_span, Span};
use uuid::Uuid;

pub(crate) enum Target<'a> {
    Action(&'a mut dyn Action),
    Query(&'a mut dyn Query),
}

/// A resolved command waiting to run.
pub(crate) struct Item<'a> {
    target: Target<'a>,
    route: Arc<Route>,
}

/// The batch a per-call chain's terminal processes.
#[derive(Default)]
pub(crate) enum Work<'a> {
    /// Nothing left: taken by the terminal, or never set.
    #[default]
    Idle,
    Sequential(SmallVec<[Item<'a>; 4]>),
    FanOut(Vec<Item<'a>>),
}

impl Work<'_> {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Idle => 0,
            Self::Sequential(items) => items.len(),
            Self::FanOut(items) => items.len(),
        }
    }
}

/// Run a batch of actions in order through the bus bound to `call`.
///
/// Stops at the first failing action; later actions do not run. An action
/// whose [`validate`](Action::validate) fails never reaches its handler and
/// yields [`BusError::Validation`].
pub fn dispatch(call: &CallContext, actions: &mut [&mut dyn Action]) -> Result<(), BusError> {
    if actions.is_empty() {
        return Ok(());
    }
    let bus = Bus::from_context(call)?;

    let mut items = SmallVec::with_capacity(actions.len());
    for action in actions.iter_mut() {
        let route = bus.resolve(OpKind::ACTION, &action.type_key())?;
        items.push(Item {
            target: Target::Action(&mut **action),
            route,
        });
    }

    bus.run_call(call, CallKind::Dispatch, Work::Sequential(items))
}

/// Run one query and hand it back with its result filled in.
pub fn query<Q: Query>(call: &CallContext, mut query: Q) -> Result<Q, BusError> {
    let bus = Bus::from_context(call)?;
    let route = bus.resolve(OpKind::QUERY, &query.type_key())?;

    let item = Item {
        target: Target::Query(&mut query),
        route,
    };
    bus.run_call(call, CallKind::Query, Work::Sequential(smallvec![item]))?;
    Ok(query)
}

/// Run independent queries concurrently, one thread each.
///
/// Per-call query middleware run once around the whole batch. Every query
/// runs to completion; failures are collected into one error (see
/// [`BusError::FanOut`]). Results are written into the queries.
pub fn query_async(call: &CallContext, queries: &mut [&mut dyn Query]) -> Result<(), BusError> {
    if queries.is_empty() {
        return Ok(());
    }
    let bus = Bus::from_context(call)?;

    let mut items = Vec::with_capacity(queries.len());
    for query in queries.iter_mut() {
        let route = bus.resolve(OpKind::QUERY, &query.type_key())?;
        items.push(Item {
            target: Target::Query(&mut **query),
            route,
        });
    }

    bus.run_call(call, CallKind::Query, Work::FanOut(items))
}

impl Bus {
    fn run_call(&self, call: &CallContext, kind: CallKind, work: Work<'_>) -> Result<(), BusError> {
        let chain = self.call_chain(kind);
        let call_id = Uuid::new_v4();
        let span = debug_span!("bus.call", %kind, %call_id, scope = %self.scope, commands = work.len());
        let _enter = span.enter();

        let mut frame = self.shared.pool.acquire();
        frame.call = call.clone();
        frame.call.bind(self.clone(), call_id);

        let mut ctx = Context::new(self.clone(), frame, work);
        let result = chain.run(&mut ctx);
        if let Err(err) = &result {
            debug!(error = %err, "call failed");
        }
        result
    }
}

/// Terminal of every per-call chain.
pub(crate) fn run_work(ctx: &mut Context<'_>) -> Result<(), BusError> {
    match mem::take(&mut ctx.work) {
        Work::Idle => Ok(()),
        Work::Sequential(items) => items.into_iter().try_for_each(|item| ctx.process(item)),
        Work::FanOut(items) => fan_out(ctx, items),
    }
}

impl<'a> Context<'a> {
    fn process(&mut self, item: Item<'a>) -> Result<(), BusError> {
        let Item { target, route } = item;
        let command: &'a mut dyn Command = match target {
            Target::Action(action) => {
                action
                    .validate(&self.frame.call)
                    .map_err(BusError::Validation)?;
                action.as_command_mut()
            }
            Target::Query(query) => query.as_command_mut(),
        };
        let chain = self.bus.command_chain(route.scope(), route.kind());

        // Values added for this command must not reach the next one.
        let saved = self.frame.call.clone();
        self.frame.route = Some(route);
        self.command = Some(command);
        let result = chain.run(self);
        self.command = None;
        self.frame.route = None;
        self.frame.call = saved;
        result
    }
}

fn fan_out(ctx: &mut Context<'_>, items: Vec<Item<'_>>) -> Result<(), BusError> {
    let config = &ctx.bus.shared.config.fan_out;
    let parent = Span::current();
    let call = &ctx.frame.call;
    let cursor = ctx.frame.cursor;
    let bus = &ctx.bus;

    thread::scope(|s| {
        let mut errors = Vec::new();
        let mut branches = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let mut builder = thread::Builder::new().name(format!("{}-{index}", config.thread_name));
            if let Some(size) = config.stack_size {
                builder = builder.stack_size(size);
            }

            let parent = parent.clone();
            let spawned = builder.spawn_scoped(s, move || {
                let _enter = parent.enter();
                let mut frame = bus.shared.pool.acquire();
                frame.call = call.clone();
                frame.cursor = cursor;
                Context::new(bus.clone(), frame, Work::Idle).process(item)
            });
            match spawned {
                Ok(branch) => branches.push(branch),
                Err(err) => errors.push(BusError::Spawn(err)),
            }
        }

        let mut panicked = None;
        for branch in branches {
            match branch.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(payload) => {
                    panicked.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }

        BusError::join(errors)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{actions, queries};

    struct Rename {
        name: String,
    }
    impl Command for Rename {}
    impl Action for Rename {
        fn validate(&self, _call: &CallContext) -> anyhow::Result<()> {
            anyhow::ensure!(!self.name.is_empty(), "name is required");
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Lookup {
        id: u32,
        found: Option<String>,
    }
    impl Command for Lookup {}
    impl Query for Lookup {}

    fn bus() -> Bus {
        let bus = Bus::new();
        bus.on_action(|_, cmd: &mut Rename| {
            cmd.name = cmd.name.to_uppercase();
            Ok(())
        });
        bus.on_query(|_, q: &mut Lookup| {
            anyhow::ensure!(q.id != 0, "no such id");
            q.found = Some(format!("item-{}", q.id));
            Ok(())
        });
        bus
    }

    #[test]
    fn batch_runs_in_order_and_stops_at_the_first_failure() {
        let bus = bus();
        let mut first = Rename { name: "a".into() };
        let mut invalid = Rename { name: String::new() };
        let mut last = Rename { name: "c".into() };

        let err = dispatch(
            &bus.context(),
            &mut actions![&mut first, &mut invalid, &mut last],
        )
        .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(first.name, "A");
        assert_eq!(last.name, "c");
    }

    #[test]
    fn context_is_returned_to_the_pool_on_failure() {
        let bus = bus();
        let before = bus.shared.pool.idle();

        let err = query(&bus.context(), Lookup { id: 0, found: None }).unwrap_err();
        assert_eq!(err.to_string(), "no such id");
        assert_eq!(bus.shared.pool.idle(), before.max(1));

        let found = query(&bus.context(), Lookup { id: 3, found: None }).unwrap();
        assert_eq!(found.found.as_deref(), Some("item-3"));
    }

    #[test]
    fn fan_out_fills_every_query() {
        let bus = bus();
        let mut a = Lookup { id: 1, found: None };
        let mut b = Lookup { id: 2, found: None };

        query_async(&bus.context(), &mut queries![&mut a, &mut b]).unwrap();

        assert_eq!(a.found.as_deref(), Some("item-1"));
        assert_eq!(b.found.as_deref(), Some("item-2"));
    }

    #[test]
    fn fan_out_threads_are_named_from_config() {
        let bus = Bus::new();
        bus.on_query(|_, q: &mut Lookup| {
            q.found = thread::current().name().map(str::to_owned);
            Ok(())
        });
        let mut a = Lookup { id: 1, found: None };
        let mut b = Lookup { id: 2, found: None };

        query_async(&bus.context(), &mut queries![&mut a, &mut b]).unwrap();

        assert_eq!(a.found.as_deref(), Some("switchyard-fanout-0"));
        assert_eq!(b.found.as_deref(), Some("switchyard-fanout-1"));
    }

    #[test]
    fn unresolved_command_fails_before_anything_runs() {
        struct Unrouted;
        impl Command for Unrouted {}
        impl Action for Unrouted {}

        let bus = bus();
        let mut rename = Rename { name: "a".into() };
        let mut unrouted = Unrouted;

        let err = dispatch(&bus.context(), &mut actions![&mut rename, &mut unrouted]).unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(rename.name, "a");
    }

    #[test]
    fn work_len_counts_pending_items() {
        assert_eq!(Work::Idle.len(), 0);
        assert_eq!(Work::FanOut(Vec::new()).len(), 0);
    }
}
