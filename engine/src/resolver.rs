//! Conflict resolution policies.
//!
//! A conflict arises when a row edited while offline still exists on the
//! remote at reconciliation time. The resolver sees every conflict of one
//! reconciliation at once and returns one decision per conflict, in the same
//! order. The engine re-stamps each decision with its conflict's primary key,
//! so a policy cannot move a decision onto another row.

/// The two versions of a row edited while offline.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict<T> {
    /// The local working copy.
    pub local: T,
    /// The row as currently stored on the remote.
    pub server: T,
}

impl<T> Conflict<T> {
    pub fn new(local: T, server: T) -> Self {
        Self { local, server }
    }
}

/// Decides the surviving version of each conflicting row.
pub trait ConflictResolver<T> {
    /// Return exactly one record per conflict, index for index.
    fn resolve(&self, conflicts: Vec<Conflict<T>>) -> Vec<T>;
}

/// Keep the local version (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl<T> ConflictResolver<T> for LocalWins {
    fn resolve(&self, conflicts: Vec<Conflict<T>>) -> Vec<T> {
        conflicts.into_iter().map(|c| c.local).collect()
    }
}

/// Keep the remote version.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl<T> ConflictResolver<T> for ServerWins {
    fn resolve(&self, conflicts: Vec<Conflict<T>>) -> Vec<T> {
        conflicts.into_iter().map(|c| c.server).collect()
    }
}

/// Resolver backed by a closure.
///
/// ```
/// use replist_engine::{Conflict, ConflictResolver, FnResolver};
///
/// let longest = FnResolver::new(|conflicts: Vec<Conflict<String>>| {
///     conflicts
///         .into_iter()
///         .map(|c| if c.local.len() >= c.server.len() { c.local } else { c.server })
///         .collect()
/// });
///
/// let decided = longest.resolve(vec![Conflict::new("ab".to_string(), "abc".to_string())]);
/// assert_eq!(decided, vec!["abc".to_string()]);
/// ```
pub struct FnResolver<F>(F);

impl<F> FnResolver<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F> ConflictResolver<T> for FnResolver<F>
where
    F: Fn(Vec<Conflict<T>>) -> Vec<T>,
{
    fn resolve(&self, conflicts: Vec<Conflict<T>>) -> Vec<T> {
        (self.0)(conflicts)
    }
}
