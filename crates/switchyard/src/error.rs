//! Error types returned by the bus.
//!
//! Every failure a caller can react to is a [`BusError`] variant, so callers
//! branch on the failure class with `match` instead of comparing strings.
//! Errors raised by user code (validators, handlers, middleware) stay
//! reachable through [`BusError::find`].

use crate::key::{OpKind, TypeKey};
use std::error::Error as StdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// No handler is registered for the command's key under this kind.
    #[error("no {kind} handler registered for `{key}`")]
    HandlerNotFound { kind: OpKind, key: TypeKey },

    /// An action rejected its own payload.
    #[error("validation failed: {0}")]
    Validation(#[source] anyhow::Error),

    /// Returned by a handler or middleware, passed through unchanged.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    /// Several fanned-out queries failed. Holds every branch error.
    #[error("{} fanned-out queries failed", .0.len())]
    FanOut(Vec<BusError>),

    /// The call context carries no bus to route through.
    #[error("no bus bound to the call context")]
    ContextMissing,

    /// A handler was reached with a command of another type sharing its key.
    #[error("handler for `{key}` received a command of a different type")]
    TypeMismatch { key: TypeKey },

    /// The per-command terminal ran with no command in the context.
    #[error("no command is being processed")]
    NoActiveCommand,

    /// A fan-out worker thread could not be started.
    #[error("failed to spawn fan-out worker")]
    Spawn(#[source] std::io::Error),
}

impl BusError {
    /// Wrap any error returned from user code.
    pub fn handler<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Handler(anyhow::Error::new(error))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HandlerNotFound { .. })
    }

    /// Iterate the leaf errors: the members of a fan-out error, or `self`.
    pub fn errors(&self) -> Box<dyn Iterator<Item = &BusError> + '_> {
        match self {
            Self::FanOut(errors) => Box::new(errors.iter().flat_map(BusError::errors)),
            other => Box::new(std::iter::once(other)),
        }
    }

    /// Find an error of type `E` anywhere in this error: among fan-out
    /// members and along the cause chain of wrapped errors.
    pub fn find<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.errors().find_map(|error| match error {
            Self::Validation(cause) | Self::Handler(cause) => cause.chain().find_map(|c| {
                c.downcast_ref::<E>()
                    .or_else(|| c.downcast_ref::<BusError>().and_then(BusError::find::<E>))
            }),
            Self::Spawn(cause) => (cause as &(dyn StdError + 'static)).downcast_ref::<E>(),
            _ => None,
        })
    }

    pub fn contains<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.find::<E>().is_some()
    }

    /// Fold the errors of independent branches: none is success, one is
    /// returned as is, more become [`BusError::FanOut`].
    pub(crate) fn join(mut errors: Vec<BusError>) -> Result<(), BusError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::FanOut(errors)),
        }
    }
}
