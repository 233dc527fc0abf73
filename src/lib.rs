//! # Logterm
//!
//! A logic-term model and a query-iteration protocol for driving Prolog-style
//! engines from Rust.
//!
//! ## Features
//!
//! - Immutable [`Term`] values with identity-carrying [`Var`]iables
//! - An interned [`FunctorRegistry`] shared with the engine
//! - A [`Converter`] that lowers terms into engine handles and lifts them back
//! - A [`Session`] that enforces one open query per engine at a time
//! - [`Machine`], a reference engine implementing [`Engine`]
//! - A text reader behind the `parsing` feature
//!
//! ## Example
//!
//! ```rust
//! use logterm::{Machine, Session, SessionConfig, Term};
//!
//! let session = Session::start(Machine::new(), SessionConfig::default()).unwrap();
//! let x = Term::var("X");
//! let goal = Term::compound(
//!     "append",
//!     vec![x.clone(), Term::list(vec![Term::integer(3)]), Term::list(vec![
//!         Term::integer(1),
//!         Term::integer(2),
//!         Term::integer(3),
//!     ])],
//! )
//! .unwrap();
//!
//! let mut solutions = session.query(&goal).unwrap();
//! let first = solutions.next_solution().unwrap().unwrap();
//! assert_eq!(first.get_by_name("X").unwrap().to_string(), "[1,2]");
//! ```

/// Session limits.
pub mod config;
/// Lowering terms into engine handles and lifting them back.
pub mod convert;
/// The engine contract.
pub mod engine;
/// Error types.
pub mod error;
/// Functor interning.
pub mod functor;
/// The reference engine.
pub mod machine;
/// Reading terms and clauses from text.
#[cfg(feature = "parsing")]
pub mod parse;
/// Sessions and query iteration.
pub mod query;
/// The term model.
pub mod term;

pub use config::SessionConfig;
pub use convert::Converter;
pub use engine::{Args, Engine, NativeType};
pub use error::{Error, Result};
pub use functor::{FunctorId, FunctorRegistry};
pub use machine::{Machine, MachineTerm};
pub use query::{QueryIterator, QueryState, Session, Solution};
pub use term::{Atom, Functor, List, Structure, Term, Var};
