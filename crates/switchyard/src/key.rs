//! Routing keys.
//!
//! A [`TypeKey`] names the shape of a payload and an [`OpKind`] says whether
//! the payload mutates state or only reads it. Together they address exactly
//! one handler in the router.

use bitflags::bitflags;
use std::borrow::Cow;
use std::fmt;

/// Stable string identity of a command type.
///
/// The router treats it as an opaque byte sequence. Keys compare
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey(Cow<'static, str>);

impl TypeKey {
    /// Build a key from an explicit name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The key the bus derives for `T`: its fully qualified type name.
    pub fn of<T: ?Sized>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TypeKey {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

bitflags! {
    /// Operation kind of a command.
    ///
    /// Used both as the routing discriminator (a handler is stored under a
    /// single kind) and as the applicability mask of per-command middleware,
    /// where [`OpKind::ALL`] matches both.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpKind: u8 {
        /// A command that modifies state.
        const ACTION = 1;
        /// A command that only reads state.
        const QUERY = 1 << 1;
        const ALL = Self::ACTION.bits() | Self::QUERY.bits();
    }
}

impl OpKind {
    /// Index of a single kind in per-kind storage. `None` for masks.
    pub(crate) fn slot(self) -> Option<usize> {
        if self == Self::ACTION {
            Some(0)
        } else if self == Self::QUERY {
            Some(1)
        } else {
            None
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if *self == Self::ACTION {
            "action"
        } else if *self == Self::QUERY {
            "query"
        } else if *self == Self::ALL {
            "all"
        } else {
            "none"
        };
        f.write_str(name)
    }
}
