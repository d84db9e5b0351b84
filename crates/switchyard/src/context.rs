//! Call and execution contexts.
//!
//! [`CallContext`] is what the caller hands in and what handlers receive:
//! cancellation, deadline, typed values and the bus the call runs on.
//! [`Context`] is the per-call execution record middleware sees. It wraps a
//! pooled frame and additionally tracks the command currently in flight.

use crate::command::Command;
use crate::engine::Work;
use crate::error::BusError;
use crate::key::{OpKind, TypeKey};
use crate::pool::Pooled;
use crate::scope::Bus;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Caller-visible context of a dispatch or query.
///
/// Cheap to clone: values are shared and copied on write. The engine
/// propagates it to every middleware and handler but never checks the
/// cancellation token or deadline itself.
#[derive(Clone, Default)]
pub struct CallContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    values: Option<Arc<Values>>,
    bus: Option<Bus>,
    call_id: Option<Uuid>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the bus that `dispatch` and `query` route through.
    pub fn with_bus(mut self, bus: &Bus) -> Self {
        self.bus = Some(bus.clone());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_value<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Store a value keyed by its type, replacing any previous one.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        let values = self.values.get_or_insert_with(Default::default);
        Arc::make_mut(values).insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        let value = self.values.as_ref()?.get(&TypeId::of::<T>())?;
        (**value).downcast_ref::<T>()
    }

    pub fn bus(&self) -> Option<&Bus> {
        self.bus.as_ref()
    }

    /// Correlation id of the external call, assigned when the call starts.
    pub fn call_id(&self) -> Option<Uuid> {
        self.call_id
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    pub(crate) fn bind(&mut self, bus: Bus, call_id: Uuid) {
        self.bus = Some(bus);
        self.call_id = Some(call_id);
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.cancel.is_none()
            && self.deadline.is_none()
            && self.values.is_none()
            && self.bus.is_none()
            && self.call_id.is_none()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("call_id", &self.call_id)
            .field("bus", &self.bus)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.is_cancelled())
            .field("values", &self.values.as_ref().map_or(0, |values| values.len()))
            .finish()
    }
}

/// Execution context of one external call, as seen by middleware.
///
/// Per-call middleware run before any command is picked up, so
/// [`command`](Context::command) is `None` there. Per-command middleware see
/// the command being processed.
pub struct Context<'a> {
    pub(crate) bus: Bus,
    pub(crate) frame: Pooled,
    pub(crate) command: Option<&'a mut dyn Command>,
    pub(crate) work: Work<'a>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(bus: Bus, frame: Pooled, work: Work<'a>) -> Self {
        Self {
            bus,
            frame,
            command: None,
            work,
        }
    }

    /// The scope whose per-call chain is running.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn call(&self) -> &CallContext {
        &self.frame.call
    }

    pub fn call_mut(&mut self) -> &mut CallContext {
        &mut self.frame.call
    }

    /// Add a value visible to inner middleware and the handler.
    pub fn with_value<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.frame.call.insert(value);
        self
    }

    pub fn command(&self) -> Option<&dyn Command> {
        self.command.as_deref()
    }

    pub fn command_as<T: Command>(&self) -> Option<&T> {
        self.command()?.downcast_ref::<T>()
    }

    pub fn command_mut(&mut self) -> Option<&mut dyn Command> {
        match &mut self.command {
            Some(command) => Some(&mut **command),
            None => None,
        }
    }

    /// Key of the command being processed.
    pub fn type_key(&self) -> Option<&TypeKey> {
        self.frame.route.as_deref().map(|route| route.key())
    }

    pub fn kind(&self) -> Option<OpKind> {
        self.frame.route.as_deref().map(|route| route.kind())
    }

    /// Run the handler of the command in flight.
    pub(crate) fn invoke_current(&mut self) -> Result<(), BusError> {
        let route = self
            .frame
            .route
            .clone()
            .ok_or(BusError::NoActiveCommand)?;
        let command = self
            .command
            .as_deref_mut()
            .ok_or(BusError::NoActiveCommand)?;
        route.invoke(&self.frame.call, command)
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("call", &self.frame.call)
            .field("cursor", &self.frame.cursor)
            .field("type_key", &self.type_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[derive(Debug, PartialEq)]
    struct Locale(&'static str);

    #[test]
    fn values_are_typed_and_copied_on_write() {
        let parent = CallContext::new().with_value(Tenant("acme"));
        let mut child = parent.clone();
        child.insert(Locale("en"));
        child.insert(Tenant("globex"));

        assert_eq!(parent.get::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(parent.get::<Locale>(), None);
        assert_eq!(child.get::<Tenant>(), Some(&Tenant("globex")));
        assert_eq!(child.get::<Locale>(), Some(&Locale("en")));
    }

    #[test]
    fn cancellation_and_deadline_are_reported_not_enforced() {
        let token = CancellationToken::new();
        let call = CallContext::new()
            .with_cancellation(token.clone())
            .with_timeout(Duration::from_secs(60));

        assert!(!call.is_done());
        assert!(call.remaining().is_some_and(|left| left > Duration::from_secs(59)));
        token.cancel();
        assert!(call.is_cancelled());
        assert!(call.is_done());

        let expired = CallContext::new().with_deadline(Instant::now());
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn default_context_is_blank() {
        let call = CallContext::default();
        assert!(call.is_blank());
        assert!(call.bus().is_none());
        assert!(!call.is_done());
        assert!(!call.with_value(Tenant("acme")).is_blank());
    }
}
