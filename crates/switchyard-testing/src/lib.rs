//! Testing utilities for the Switchyard command bus.
//!
//! Fixtures for asserting what middleware and handlers did:
//!
//! - [`Trail`] records labelled events in order, and can hand out middleware
//!   that records entry and exit around the rest of a chain.
//! - [`Counter`] counts how often a middleware ran.
//! - [`Probe`] records what each middleware invocation saw in the context.
//!
//! ```ignore
//! let trail = Trail::new();
//! bus.use_middleware(OpKind::ALL, trail.around("A"));
//! bus.use_middleware(OpKind::ALL, trail.around("B"));
//! // ... dispatch ...
//! assert_eq!(trail.entries(), ["A-before", "B-before", "H", "B-after", "A-after"]);
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchyard_core::{from_fn, CommandKey, Next, TypeKey};

/// Ordered log of labelled events, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct Trail {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Middleware recording `{label}-before` and `{label}-after` around the
    /// rest of the chain. The exit entry is recorded on errors too.
    pub fn around(&self, label: &'static str) -> impl Fn(Next) -> Next + Send + Sync + 'static {
        let trail = self.clone();
        from_fn(move |ctx, next| {
            trail.push(format!("{label}-before"));
            let result = next.run(ctx);
            trail.push(format!("{label}-after"));
            result
        })
    }
}

/// Thread-safe invocation counter.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    count: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Middleware counting every time it is entered.
    pub fn middleware(&self) -> impl Fn(Next) -> Next + Send + Sync + 'static {
        let counter = self.clone();
        from_fn(move |ctx, next| {
            counter.increment();
            next.run(ctx)
        })
    }
}

/// What a middleware saw when it was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Key of the command in flight, `None` outside per-command chains.
    pub command: Option<TypeKey>,
    /// Name of the thread the middleware ran on.
    pub thread: Option<String>,
}

/// Records one [`Sighting`] per invocation.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    sightings: Arc<Mutex<Vec<Sighting>>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sightings(&self) -> Vec<Sighting> {
        self.sightings.lock().clone()
    }

    /// Keys of the commands seen, in order.
    pub fn commands(&self) -> Vec<Option<TypeKey>> {
        self.sightings
            .lock()
            .iter()
            .map(|sighting| sighting.command.clone())
            .collect()
    }

    pub fn middleware(&self) -> impl Fn(Next) -> Next + Send + Sync + 'static {
        let probe = self.clone();
        from_fn(move |ctx, next| {
            probe.sightings.lock().push(Sighting {
                command: ctx.command().map(|command| command.type_key()),
                thread: std::thread::current().name().map(str::to_owned),
            });
            next.run(ctx)
        })
    }
}
