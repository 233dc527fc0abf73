//! Functor interning.
//!
//! Engines that require atoms and functors to be registered before use hand
//! out small integer handles for `(name, arity)` pairs. [`FunctorRegistry`]
//! is that table: interning is idempotent, lookups go both ways, and a reset
//! starts a new epoch so handles from a previous session stop resolving
//! instead of silently pointing at whatever was interned next.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexSet;

use crate::error::{Error, Result};
use crate::term::Functor;

/// Opaque handle for an interned functor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctorId {
    index: u32,
    epoch: u32,
}

impl FunctorId {
    /// Position of the functor in its registry.
    #[must_use]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for FunctorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.epoch)
    }
}

/// Source of epochs; unique across every registry in the process.
static NEXT_EPOCH: AtomicU32 = AtomicU32::new(0);

fn next_epoch() -> u32 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

/// Bidirectional `(name, arity)` ↔ [`FunctorId`] table.
///
/// Not internally synchronized: it belongs to exactly one engine session,
/// which already serializes access.
#[derive(Debug)]
pub struct FunctorRegistry {
    functors: IndexSet<Functor>,
    epoch: u32,
}

impl Default for FunctorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functors: IndexSet::new(),
            epoch: next_epoch(),
        }
    }

    /// Intern `name/arity`, returning the existing handle if already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] for an empty name, or
    /// [`Error::Engine`] if the table is full.
    pub fn intern(&mut self, name: &str, arity: usize) -> Result<FunctorId> {
        self.intern_functor(&Functor::new(name, arity)?)
    }

    /// Intern an already constructed functor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the table is full.
    pub fn intern_functor(&mut self, functor: &Functor) -> Result<FunctorId> {
        let index = match self.functors.get_index_of(functor) {
            Some(index) => index,
            None => self.functors.insert_full(functor.clone()).0,
        };
        let index = u32::try_from(index)
            .map_err(|_| Error::engine("functor table exhausted"))?;
        Ok(FunctorId {
            index,
            epoch: self.epoch,
        })
    }

    /// Look up an interned functor without inserting it.
    #[must_use]
    pub fn lookup(&self, name: &str, arity: usize) -> Option<FunctorId> {
        let functor = Functor::new(name, arity).ok()?;
        let index = self.functors.get_index_of(&functor)?;
        Some(FunctorId {
            index: u32::try_from(index).ok()?,
            epoch: self.epoch,
        })
    }

    /// The functor behind a handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFunctor`] if the handle was not issued by this
    /// registry in its current epoch.
    pub fn resolve(&self, id: FunctorId) -> Result<&Functor> {
        if id.epoch != self.epoch {
            return Err(Error::UnknownFunctor(id.to_string()));
        }
        self.functors
            .get_index(id.index())
            .ok_or_else(|| Error::UnknownFunctor(id.to_string()))
    }

    /// Drop every entry and start a new epoch.
    pub fn clear(&mut self) {
        self.functors.clear();
        self.epoch = next_epoch();
    }

    /// Number of interned functors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functors.len()
    }

    /// True if nothing has been interned in this epoch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut registry = FunctorRegistry::new();
        let a = registry.intern("foo", 2).unwrap();
        let b = registry.intern("foo", 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_arity_distinguishes_handles() {
        let mut registry = FunctorRegistry::new();
        let two = registry.intern("foo", 2).unwrap();
        let three = registry.intern("foo", 3).unwrap();
        assert_ne!(two, three);
        assert_eq!(registry.resolve(three).unwrap().arity(), 3);
        assert_eq!(registry.resolve(two).unwrap().name(), "foo");
    }

    #[test]
    fn test_lookup_does_not_insert() {
        let mut registry = FunctorRegistry::new();
        assert!(registry.lookup("bar", 1).is_none());
        let id = registry.intern("bar", 1).unwrap();
        assert_eq!(registry.lookup("bar", 1), Some(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear_invalidates_old_handles() {
        let mut registry = FunctorRegistry::new();
        let old = registry.intern("foo", 2).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(matches!(registry.resolve(old), Err(Error::UnknownFunctor(_))));

        let new = registry.intern("foo", 2).unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.resolve(new).unwrap().name(), "foo");
    }

    #[test]
    fn test_resolve_rejects_foreign_handles() {
        let mut a = FunctorRegistry::new();
        let b = FunctorRegistry::new();
        let id = a.intern("x", 0).unwrap();
        assert!(matches!(b.resolve(id), Err(Error::UnknownFunctor(_))));
    }

    #[test]
    fn test_handles_do_not_cross_registries() {
        let mut a = FunctorRegistry::new();
        let mut b = FunctorRegistry::new();
        let from_a = a.intern("parent", 2).unwrap();
        b.intern("child", 1).unwrap();
        assert_eq!(from_a.index(), 0);
        assert!(matches!(b.resolve(from_a), Err(Error::UnknownFunctor(_))));
        assert_eq!(b.lookup("child", 1).map(FunctorId::index), Some(0));
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let mut registry = FunctorRegistry::new();
        assert!(matches!(registry.intern("", 0), Err(Error::InvalidTerm(_))));
    }
}
