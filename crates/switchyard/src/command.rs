//! Command traits.
//!
//! A [`Command`] is any payload the bus can route. It is either an
//! [`Action`] (mutates state, validated before its handler runs) or a
//! [`Query`] (reads state and writes its answer into its own fields).

use crate::context::CallContext;
use crate::key::TypeKey;
use std::any::Any;

/// Erased access to the concrete command behind a trait object.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A routable payload.
///
/// Handlers are registered and resolved under [`key`](Command::key), the
/// fully qualified type name unless overridden.
pub trait Command: AsAny + CommandKey + Send + Sync + 'static {
    fn key() -> TypeKey
    where
        Self: Sized,
    {
        TypeKey::of::<Self>()
    }
}

/// Routing key of a command value.
///
/// Implemented for every [`Command`] from [`Command::key`] and cannot be
/// implemented by hand, so a value always resolves under the key its
/// handler was registered with.
pub trait CommandKey {
    fn type_key(&self) -> TypeKey;
}

impl<T: Command> CommandKey for T {
    fn type_key(&self) -> TypeKey {
        T::key()
    }
}

impl<'a> dyn Command + 'a {
    /// Downcast to the concrete command type.
    pub fn downcast_ref<T: Command>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Command>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// View of a concrete action or query as a plain [`Command`].
pub trait AsCommand {
    fn as_command(&self) -> &dyn Command;
    fn as_command_mut(&mut self) -> &mut dyn Command;
}

impl<T: Command> AsCommand for T {
    fn as_command(&self) -> &dyn Command {
        self
    }

    fn as_command_mut(&mut self) -> &mut dyn Command {
        self
    }
}

/// A state-mutating command.
pub trait Action: Command + AsCommand + 'static {
    /// Reject malformed payloads before the handler runs.
    fn validate(&self, _call: &CallContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A read-only command. Results are written into the query itself.
pub trait Query: Command + AsCommand + 'static {}
