//! The native engine boundary.
//!
//! [`Engine`] is the minimal capability set a Prolog engine has to provide
//! to be driven by a [`Session`](crate::Session): lifecycle, functor
//! interning, term construction, term inspection and a one-query-at-a-time
//! solving protocol. Handles are only meaningful to the engine that issued
//! them and only until the query they were created for is closed.

use std::fmt;
use std::hash::Hash;

use smallvec::SmallVec;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::functor::FunctorId;
use crate::term::Functor;

/// Arguments read back from a compound term.
pub type Args<H> = SmallVec<[H; 4]>;

/// The tag of a native term after dereferencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NativeType {
    /// Unbound variable.
    Variable,
    /// Integer.
    Integer,
    /// Float.
    Float,
    /// Atom.
    Atom,
    /// Compound term other than a list cell.
    Compound,
    /// List cell (`[H|T]`).
    List,
    /// Empty list.
    Nil,
}

/// A native logic engine.
///
/// Every `read_*` method and [`Engine::type_of`] dereference bound
/// variables first. Implementations enforce nothing about query nesting;
/// that is the session's job.
pub trait Engine {
    /// Engine-native term reference.
    type Handle: Copy + Eq + Hash + fmt::Debug;

    /// Engine name used in diagnostics.
    fn name(&self) -> &str;

    /// Bring the engine up.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be initialised.
    fn start(&mut self, config: &SessionConfig) -> Result<()>;

    /// Shut the engine down, releasing everything it holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to shut down cleanly.
    fn stop(&mut self) -> Result<()>;

    /// Discard the database and every interned functor.
    ///
    /// # Errors
    ///
    /// Returns an error if a query is still open.
    fn reset(&mut self) -> Result<()>;

    /// Intern `name/arity`.
    ///
    /// # Errors
    ///
    /// Returns an error for names the engine cannot register.
    fn intern_functor(&mut self, name: &str, arity: usize) -> Result<FunctorId>;

    /// The functor behind an interned handle.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFunctor` for handles not issued in this session.
    fn functor(&self, id: FunctorId) -> Result<Functor>;

    /// Allocate an atom.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot allocate.
    fn make_atom(&mut self, name: &str) -> Result<Self::Handle>;

    /// Allocate an integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot allocate.
    fn make_integer(&mut self, value: i64) -> Result<Self::Handle>;

    /// Allocate a float.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedTermShape` on engines without native floats.
    fn make_float(&mut self, value: f64) -> Result<Self::Handle>;

    /// Allocate a fresh unbound variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot allocate.
    fn make_variable(&mut self) -> Result<Self::Handle>;

    /// Allocate a compound term.
    ///
    /// # Errors
    ///
    /// Returns an error if the functor is unknown or its arity does not
    /// match `args`.
    fn make_compound(&mut self, functor: FunctorId, args: &[Self::Handle]) -> Result<Self::Handle>;

    /// Allocate the empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot allocate.
    fn make_nil(&mut self) -> Result<Self::Handle>;

    /// Allocate a list cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot allocate.
    fn make_list(&mut self, head: Self::Handle, tail: Self::Handle) -> Result<Self::Handle>;

    /// Follow variable bindings to the term a handle currently stands for.
    ///
    /// # Errors
    ///
    /// Returns an error for stale or foreign handles.
    fn deref(&self, term: Self::Handle) -> Result<Self::Handle>;

    /// Tag of the dereferenced term.
    ///
    /// # Errors
    ///
    /// Returns an error for stale or foreign handles.
    fn type_of(&self, term: Self::Handle) -> Result<NativeType>;

    /// Value of an integer term.
    ///
    /// # Errors
    ///
    /// Returns an error if the term is not an integer.
    fn read_integer(&self, term: Self::Handle) -> Result<i64>;

    /// Value of a float term.
    ///
    /// # Errors
    ///
    /// Returns an error if the term is not a float.
    fn read_float(&self, term: Self::Handle) -> Result<f64>;

    /// Name of an atom term.
    ///
    /// # Errors
    ///
    /// Returns an error if the term is not an atom.
    fn read_atom_name(&self, term: Self::Handle) -> Result<String>;

    /// Head of a list cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the term is not a list cell.
    fn read_list_head(&self, term: Self::Handle) -> Result<Self::Handle>;

    /// Tail of a list cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the term is not a list cell.
    fn read_list_tail(&self, term: Self::Handle) -> Result<Self::Handle>;

    /// Functor and arguments of a compound term.
    ///
    /// # Errors
    ///
    /// Returns an error if the term is not compound.
    fn read_compound(&self, term: Self::Handle) -> Result<(FunctorId, Args<Self::Handle>)>;

    /// Submit `functor(args...)` as a goal.
    ///
    /// # Errors
    ///
    /// Returns an error if a query is already open or the goal is not callable.
    fn open_query(&mut self, functor: FunctorId, args: &[Self::Handle]) -> Result<()>;

    /// Search for the next solution of the open query.
    ///
    /// Returns `Ok(false)` once no further solutions exist.
    ///
    /// # Errors
    ///
    /// Returns `Engine` for errors raised while solving.
    fn next_solution(&mut self) -> Result<bool>;

    /// Close the open query, undoing its bindings and releasing every term
    /// created since the previous query was closed. A no-op with no open query.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to release resources.
    fn close_query(&mut self) -> Result<()>;

    /// Release terms created since the previous query was closed without
    /// opening a query, e.g. after a failed lowering.
    ///
    /// # Errors
    ///
    /// Returns an error if a query is open.
    fn release_terms(&mut self) -> Result<()>;
}
