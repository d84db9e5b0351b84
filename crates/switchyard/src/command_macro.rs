//! Macros for building heterogeneous command batches.

/// Build a batch of actions for [`dispatch`](crate::dispatch).
///
/// Each expression must be a `&mut` borrow of a type implementing
/// [`Action`](crate::Action); the macro erases them to one element type.
///
/// # Example
///
/// ```ignore
/// use switchyard_core::{actions, dispatch};
///
/// let mut user = CreateUser { name: "john".into(), result: None };
/// let mut post = CreatePost { title: "hello".into(), result: None };
///
/// dispatch(&bus.context(), &mut actions![&mut user, &mut post])?;
/// ```
#[macro_export]
macro_rules! actions {
    ($($action:expr),* $(,)?) => {
        [$($action as &mut dyn $crate::Action),*]
    };
}

/// Build a batch of queries for [`query_async`](crate::query_async).
///
/// ```ignore
/// let mut user = FindUser { id: 1, result: None };
/// let mut post = FindPost { id: 1, result: None };
///
/// query_async(&bus.context(), &mut queries![&mut user, &mut post])?;
/// assert!(user.result.is_some());
/// ```
#[macro_export]
macro_rules! queries {
    ($($query:expr),* $(,)?) => {
        [$($query as &mut dyn $crate::Query),*]
    };
}
