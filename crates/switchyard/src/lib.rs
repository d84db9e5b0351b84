//! # Switchyard
//!
//! An in-process command bus: typed actions and queries are routed to
//! exactly one registered handler each, through layers of cross-cutting
//! middleware.
//!
//! ## Core Concepts
//!
//! Switchyard separates **writes** from **reads**:
//! - [`Action`] = a command that changes state, validated before it runs
//! - [`Query`] = a command that only reads, answered by filling in its own fields
//!
//! Handlers are registered on a [`Bus`]. A bus is one scope of a tree:
//! [`Bus::group`] creates a child scope sharing the handler table but owning
//! its own copy of the middleware.
//!
//! ## Middleware
//!
//! Two tiers wrap every call:
//! - **Per-call** middleware ([`Bus::use_dispatch`], [`Bus::use_query`]) run
//!   once around a whole `dispatch`, `query` or `query_async`, however many
//!   commands it carries.
//! - **Per-command** middleware ([`Bus::use_middleware`]) run around each
//!   handler invocation, filtered by [`OpKind`]. A command always runs
//!   through the chain of the scope that registered its handler.
//!
//! Both tiers run in onion order.
//!
//! ## Architecture
//!
//! ```text
//! dispatch(&call, actions) / query(&call, q) / query_async(&call, queries)
//!     │
//!     ▼ resolve each command (TypeKey, OpKind)
//! Router (prefix trie, shared by the tree) ──► Route { handler, owning scope }
//!     │
//!     ▼ acquire Context from the pool
//! per-call chain of the calling scope ──── runs once ────┐
//!     │                                                  │
//!     ├─► command 1 ─► validate ─► per-command chain ─► handler
//!     ├─► command 2 ─► validate ─► per-command chain ─► handler
//!     │                      (query_async: one thread per query)
//!     ▼                                                  │
//! Context released ◄─────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Ordered batches**: `dispatch` runs actions in submission order and
//!   stops at the first failure
//! - **Independent fan-out**: every `query_async` branch runs to completion;
//!   all failures are reported together
//! - **No leaks between calls**: pooled contexts are blanked on acquire and
//!   on release, including on error paths
//!
//! Cancellation and deadlines travel in the [`CallContext`] to every
//! middleware and handler. The bus itself never checks them.
//!
//! ## Example
//!
//! ```ignore
//! use switchyard_core::{actions, dispatch, query, Action, Bus, CallContext, Command, Handler, Query, Routes};
//!
//! struct CreateUser { name: String, id: Option<u64> }
//! impl Command for CreateUser {}
//! impl Action for CreateUser {
//!     fn validate(&self, _call: &CallContext) -> anyhow::Result<()> {
//!         anyhow::ensure!(!self.name.is_empty(), "name is required");
//!         Ok(())
//!     }
//! }
//!
//! struct FindUser { id: u64, name: Option<String> }
//! impl Command for FindUser {}
//! impl Query for FindUser {}
//!
//! struct Users { store: UserStore }
//!
//! impl Users {
//!     fn create(&self, _call: &CallContext, cmd: &mut CreateUser) -> anyhow::Result<()> {
//!         cmd.id = Some(self.store.insert(&cmd.name)?);
//!         Ok(())
//!     }
//!
//!     fn find(&self, _call: &CallContext, q: &mut FindUser) -> anyhow::Result<()> {
//!         q.name = self.store.name(q.id)?;
//!         Ok(())
//!     }
//! }
//!
//! impl Handler for Users {
//!     fn routes(routes: &mut Routes<Self>) {
//!         routes.action(Users::create).query(Users::find);
//!     }
//! }
//!
//! let bus = Bus::new();
//! bus.register(Users { store });
//!
//! let call = bus.context();
//! let mut create = CreateUser { name: "john".into(), id: None };
//! dispatch(&call, &mut actions![&mut create])?;
//!
//! let found = query(&call, FindUser { id: create.id.unwrap(), name: None })?;
//! ```

mod command;
mod command_macro;
mod config;
mod context;
mod engine;
mod error;
mod handler;
mod key;
mod middleware;
mod pool;
mod router;
mod scope;


// Commands
pub use command::{Action, AsAny, AsCommand, Command, CommandKey, Query};

// Routing
pub use key::{OpKind, TypeKey};
pub use router::Router;

// Handlers
pub use handler::{Handler, Route, Routes};

// Contexts
pub use context::{CallContext, Context};

// Middleware
pub use middleware::{from_fn, Next};

// Scopes
pub use scope::{Bus, ScopeId};

// Calls
pub use engine::{dispatch, query, query_async};

// Errors
pub use error::BusError;

// Configuration
pub use config::{BusConfig, FanOutConfig, PoolConfig};

// Re-export for callers building cancellable contexts
pub use tokio_util::sync::CancellationToken;
