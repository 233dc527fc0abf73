//! Engine sessions and the query iterator protocol.
//!
//! A [`Session`] owns one running [`Engine`] behind a mutex and hands out
//! [`QueryIterator`]s. At most one iterator may have a query open on a
//! session at a time; a second `open` fails with [`Error::EngineBusy`]
//! instead of corrupting the engine's global state.
//!
//! ```text
//! Idle --open--> Open --next--> HasSolution --next--> ... --> Exhausted
//!   \              \               \                            \
//!    `--------------`---------------`--------- close -----------`--> Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use smallvec::SmallVec;

use crate::config::SessionConfig;
use crate::convert::Converter;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::term::{Functor, Term, Var};

/// Where a [`QueryIterator`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueryState {
    /// Created, nothing submitted yet.
    Idle,
    /// A goal was submitted; no solution has been requested.
    Open,
    /// The last `next` produced a solution.
    HasSolution,
    /// The engine reported no further solutions.
    Exhausted,
    /// Closed by the caller or after a failure.
    Closed,
}

#[derive(Debug)]
struct Shared<E> {
    engine: E,
    active: Option<u64>,
    stopped: bool,
}

/// One running engine with single-writer discipline.
///
/// `Session` is `Sync` whenever the engine is `Send`, so it can be shared
/// between threads; every engine call is serialized through its lock.
#[derive(Debug)]
pub struct Session<E: Engine> {
    shared: Mutex<Shared<E>>,
    config: SessionConfig,
    next_ticket: AtomicU64,
}

impl<E: Engine> Session<E> {
    /// Start `engine` and wrap it in a session.
    ///
    /// # Errors
    ///
    /// Returns whatever the engine reports while starting.
    pub fn start(mut engine: E, config: SessionConfig) -> Result<Self> {
        engine.start(&config)?;
        debug!("session started on engine `{}`", engine.name());
        Ok(Self {
            shared: Mutex::new(Shared {
                engine,
                active: None,
                stopped: false,
            }),
            config,
            next_ticket: AtomicU64::new(1),
        })
    }

    /// The limits this session was started with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared<E>>> {
        self.shared
            .lock()
            .map_err(|e| Error::engine(format!("session lock poisoned: {e}")))
    }

    /// A fresh iterator in [`QueryState::Idle`].
    #[must_use]
    pub fn iter(&self) -> QueryIterator<'_, E> {
        QueryIterator {
            session: self,
            state: QueryState::Idle,
            ticket: None,
            converter: Converter::new(&self.config),
            variables: IndexSet::new(),
        }
    }

    /// Open an iterator on a callable goal term.
    ///
    /// # Errors
    ///
    /// See [`QueryIterator::open`].
    pub fn query(&self, goal: &Term) -> Result<QueryIterator<'_, E>> {
        let mut iter = self.iter();
        iter.open_goal(goal)?;
        Ok(iter)
    }

    /// Up to `max_solutions` solutions (all of them for `None`) of the
    /// conjunction of `goals`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineBusy`] if another query is open, or any error
    /// raised while solving or lifting.
    pub fn query_all(&self, goals: &[Term], max_solutions: Option<usize>) -> Result<Vec<Solution>> {
        let mut iter = self.query(&conjunction(goals)?)?;
        let mut solutions = Vec::new();
        while max_solutions.map_or(true, |max| solutions.len() < max) {
            match iter.next_solution()? {
                Some(solution) => solutions.push(solution),
                None => break,
            }
        }
        iter.close()?;
        Ok(solutions)
    }

    /// True if the conjunction of `goals` has at least one solution.
    ///
    /// # Errors
    ///
    /// As for [`Session::query_all`].
    pub fn has_solution(&self, goals: &[Term]) -> Result<bool> {
        Ok(!self.query_all(goals, Some(1))?.is_empty())
    }

    /// Add a clause after the existing clauses of its predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineBusy`] if a query is open, or the engine's
    /// error for clauses it refuses.
    pub fn assertz(&self, clause: &Term) -> Result<()> {
        self.run_once("assertz", clause)
    }

    /// Add a clause before the existing clauses of its predicate.
    ///
    /// # Errors
    ///
    /// As for [`Session::assertz`].
    pub fn asserta(&self, clause: &Term) -> Result<()> {
        self.run_once("asserta", clause)
    }

    /// Remove the first clause unifying with `clause`. Returns false if none
    /// did.
    ///
    /// # Errors
    ///
    /// As for [`Session::assertz`].
    pub fn retract(&self, clause: &Term) -> Result<bool> {
        let goal = Term::compound("retract", vec![clause.clone()])?;
        self.has_solution(&[goal])
    }

    fn run_once(&self, name: &str, clause: &Term) -> Result<()> {
        let goal = Term::compound(name, vec![clause.clone()])?;
        if self.has_solution(&[goal])? {
            Ok(())
        } else {
            Err(Error::engine(format!("{name}({clause}) failed")))
        }
    }

    /// Read clauses from `text` and assert them in order. Directives
    /// (`:- Goal.`) are run once when reached. Returns the number of clauses
    /// added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] for unreadable text, or the first error
    /// raised by an assertion or directive.
    #[cfg(feature = "parsing")]
    pub fn consult_str(&self, text: &str) -> Result<usize> {
        let mut added = 0;
        for clause in crate::parse::parse_clauses(text)? {
            match &clause {
                Term::Structure(s) if s.name() == ":-" && s.arguments().len() == 1 => {
                    if !self.has_solution(s.arguments())? {
                        warn!("directive {} failed", s.arguments()[0]);
                    }
                }
                _ => {
                    self.assertz(&clause)?;
                    added += 1;
                }
            }
        }
        debug!("consulted {added} clauses");
        Ok(added)
    }

    /// Read and assert the clauses of a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as for
    /// [`Session::consult_str`].
    #[cfg(feature = "parsing")]
    pub fn consult(&self, path: impl AsRef<std::path::Path>) -> Result<usize> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!("consulting {}", path.as_ref().display());
        self.consult_str(&text)
    }

    /// Discard the engine's database and interned functors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineBusy`] while a query is open.
    pub fn reset(&self) -> Result<()> {
        let mut shared = self.lock()?;
        if let Some(active) = shared.active {
            return Err(Error::EngineBusy { active });
        }
        shared.engine.reset()?;
        debug!("session reset");
        Ok(())
    }

    /// True while some iterator has a query open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the session lock is poisoned.
    pub fn is_busy(&self) -> Result<bool> {
        Ok(self.lock()?.active.is_some())
    }

    /// Run `f` against the engine, e.g. to reach engine-specific inspection
    /// methods.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the session lock is poisoned.
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> Result<R> {
        Ok(f(&self.lock()?.engine))
    }

    /// Run `f` with exclusive access to the engine, e.g. to register host
    /// predicates on a running session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineBusy`] while a query is open.
    pub fn with_engine_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> Result<R> {
        let mut shared = self.lock()?;
        if let Some(active) = shared.active {
            return Err(Error::EngineBusy { active });
        }
        Ok(f(&mut shared.engine))
    }

    /// Stop the engine and consume the session.
    ///
    /// # Errors
    ///
    /// Returns whatever the engine reports while stopping.
    pub fn stop(self) -> Result<()> {
        let mut shared = self.lock()?;
        shared.stopped = true;
        shared.engine.stop()?;
        debug!("session stopped");
        Ok(())
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        if let Ok(shared) = self.shared.get_mut() {
            if !shared.stopped {
                shared.stopped = true;
                if let Err(e) = shared.engine.stop() {
                    warn!("failed to stop engine `{}`: {e}", shared.engine.name());
                }
            }
        }
    }
}

/// Join goals with `,/2`; no goals at all is `true`.
fn conjunction(goals: &[Term]) -> Result<Term> {
    let mut goals = goals.iter().rev();
    let Some(last) = goals.next() else {
        return Ok(Term::atom("true"));
    };
    goals.try_fold(last.clone(), |rest, goal| {
        Term::compound(",", vec![goal.clone(), rest])
    })
}

/// Pulls the solutions of one goal out of a [`Session`].
///
/// Dropping an iterator with a query still open closes it (and logs a
/// warning), so the session is always left able to accept the next `open`.
#[derive(Debug)]
pub struct QueryIterator<'s, E: Engine> {
    session: &'s Session<E>,
    state: QueryState,
    ticket: Option<u64>,
    converter: Converter<E::Handle>,
    variables: IndexSet<Var>,
}

impl<'s, E: Engine> QueryIterator<'s, E> {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Submit `functor(args...)` to the engine.
    ///
    /// # Errors
    ///
    /// - [`Error::EngineBusy`] if this iterator or any other is already open
    ///   on the session.
    /// - [`Error::NotOpen`] if this iterator was exhausted or closed.
    /// - [`Error::InvalidTerm`] if `args` does not match the functor's arity.
    /// - Conversion and engine errors; in that case nothing stays allocated
    ///   and the iterator is still `Idle`.
    pub fn open(&mut self, functor: &Functor, args: &[Term]) -> Result<()> {
        match self.state {
            QueryState::Idle => {}
            QueryState::Open | QueryState::HasSolution => {
                return Err(Error::EngineBusy {
                    active: self.ticket.unwrap_or_default(),
                });
            }
            state => {
                return Err(Error::NotOpen {
                    operation: "open",
                    state,
                })
            }
        }
        if functor.arity() != args.len() {
            return Err(Error::invalid(format!(
                "goal functor {functor} applied to {} arguments",
                args.len()
            )));
        }

        let session = self.session;
        let mut shared = session.lock()?;
        if let Some(active) = shared.active {
            return Err(Error::EngineBusy { active });
        }
        if let Err(err) = self.submit(&mut shared.engine, functor, args) {
            self.converter.clear();
            if let Err(release) = shared.engine.release_terms() {
                warn!("failed to release terms after a failed open: {release}");
            }
            return Err(err);
        }

        let ticket = session.next_ticket.fetch_add(1, Ordering::Relaxed);
        shared.active = Some(ticket);
        self.ticket = Some(ticket);
        self.variables = args.iter().flat_map(Term::variables).collect();
        self.state = QueryState::Open;
        debug!("query #{ticket} opened: {functor}");
        Ok(())
    }

    /// Submit a callable term: an atom or a structure.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTerm`] for anything else, otherwise as for
    /// [`QueryIterator::open`].
    pub fn open_goal(&mut self, goal: &Term) -> Result<()> {
        match goal {
            Term::Atom(atom) => self.open(&Functor::new(atom.name(), 0)?, &[]),
            Term::Structure(s) => self.open(s.functor(), s.arguments()),
            other => Err(Error::invalid(format!("{other} is not a callable goal"))),
        }
    }

    fn submit(&mut self, engine: &mut E, functor: &Functor, args: &[Term]) -> Result<()> {
        let id = engine.intern_functor(functor.name(), functor.arity())?;
        let handles = args
            .iter()
            .map(|arg| self.converter.lower(engine, arg))
            .collect::<Result<SmallVec<[E::Handle; 4]>>>()?;
        engine.open_query(id, &handles)
    }

    /// Ask for the next solution.
    ///
    /// Returns `Ok(None)` exactly once, when the engine has no more
    /// solutions; the engine-side query is released at that point.
    ///
    /// # Errors
    ///
    /// - [`Error::IteratorExhausted`] after `Ok(None)` was returned.
    /// - [`Error::NotOpen`] if nothing was opened or the iterator is closed.
    /// - Engine and lifting errors; the query is closed before returning.
    pub fn next_solution(&mut self) -> Result<Option<Solution>> {
        match self.state {
            QueryState::Open | QueryState::HasSolution => {}
            QueryState::Exhausted => return Err(Error::IteratorExhausted),
            state => {
                return Err(Error::NotOpen {
                    operation: "advance",
                    state,
                })
            }
        }

        let session = self.session;
        let mut shared = session.lock()?;
        let outcome = match shared.engine.next_solution() {
            Ok(true) => self.solution(&shared.engine).map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(Some(solution)) => {
                self.state = QueryState::HasSolution;
                trace!("query #{} solution: {solution}", self.ticket.unwrap_or_default());
                Ok(Some(solution))
            }
            Ok(None) => {
                debug!("query #{} exhausted", self.ticket.unwrap_or_default());
                self.release(&mut shared)?;
                self.state = QueryState::Exhausted;
                Ok(None)
            }
            Err(err) => {
                debug!("query #{} failed: {err}", self.ticket.unwrap_or_default());
                if let Err(release) = self.release(&mut shared) {
                    warn!("failed to close query after an error: {release}");
                }
                self.state = QueryState::Closed;
                Err(err)
            }
        }
    }

    fn solution(&mut self, engine: &E) -> Result<Solution> {
        self.converter.begin_solution();
        let mut bindings = IndexMap::with_capacity(self.variables.len());
        for var in &self.variables {
            let handle = self
                .converter
                .handle_of(var)
                .ok_or_else(|| Error::engine(format!("variable {var} was never lowered")))?;
            bindings.insert(var.clone(), self.converter.lift(engine, handle)?);
        }
        Ok(Solution { bindings })
    }

    /// Give the engine query back to the session.
    fn release(&mut self, shared: &mut Shared<E>) -> Result<()> {
        self.converter.clear();
        let Some(ticket) = self.ticket.take() else {
            return Ok(());
        };
        if shared.active == Some(ticket) {
            shared.active = None;
            shared.engine.close_query()?;
        }
        Ok(())
    }

    /// Discard any remaining solutions and release the engine query.
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if it fails to release the query; the
    /// iterator is closed either way.
    pub fn close(&mut self) -> Result<()> {
        let was = self.state;
        self.state = QueryState::Closed;
        match was {
            QueryState::Idle | QueryState::Exhausted | QueryState::Closed => Ok(()),
            QueryState::Open | QueryState::HasSolution => {
                let session = self.session;
                let mut shared = session.lock()?;
                debug!("query #{} closed", self.ticket.unwrap_or_default());
                self.release(&mut shared)
            }
        }
    }
}

impl<E: Engine> Drop for QueryIterator<'_, E> {
    fn drop(&mut self) {
        if matches!(self.state, QueryState::Open | QueryState::HasSolution) {
            warn!(
                "query #{} dropped while open; closing it",
                self.ticket.unwrap_or_default()
            );
            if let Err(e) = self.close() {
                warn!("failed to close dropped query: {e}");
            }
        }
    }
}

/// Solutions as an iterator of results.
///
/// Unlike [`QueryIterator::next_solution`], the iterator adaptor is fused:
/// it yields `None` after exhaustion instead of an error.
impl<E: Engine> Iterator for QueryIterator<'_, E> {
    type Item = Result<Solution>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            QueryState::Open | QueryState::HasSolution => self.next_solution().transpose(),
            QueryState::Idle | QueryState::Exhausted | QueryState::Closed => None,
        }
    }
}

/// Bindings of a goal's variables for one solution, in the order the
/// variables first occur in the goal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    bindings: IndexMap<Var, Term>,
}

impl Solution {
    /// The binding of `var`.
    #[must_use]
    pub fn get(&self, var: &Var) -> Option<&Term> {
        self.bindings.get(var)
    }

    /// The binding of the first variable displayed as `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Term> {
        self.bindings
            .iter()
            .find(|(var, _)| var.name() == Some(name))
            .map(|(_, term)| term)
    }

    /// Every binding in goal order.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.bindings.iter()
    }

    /// Number of variables in the goal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True for goals without variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings worth showing: named, not `_`-prefixed, and not bound to
    /// themselves.
    fn shown(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.bindings.iter().filter(|(var, term)| {
            var.name().is_some_and(|name| !name.starts_with('_'))
                && !matches!(term, Term::Variable(v) if v == *var)
        })
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut empty = true;
        for (var, term) in self.shown() {
            if !empty {
                f.write_str(", ")?;
            }
            write!(f, "{var} = {term}")?;
            empty = false;
        }
        if empty {
            f.write_str("true")?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Solution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.bindings.len()))?;
        for (var, term) in &self.bindings {
            map.serialize_entry(&var.to_string(), term)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    fn session() -> Session<Machine> {
        let _ = env_logger::builder().is_test(true).try_init();
        Session::start(Machine::new(), SessionConfig::default()).unwrap()
    }

    fn c(name: &str, args: Vec<Term>) -> Term {
        Term::compound(name, args).unwrap()
    }

    fn ints(values: &[i64]) -> Term {
        Term::list(values.iter().copied().map(Term::integer).collect())
    }

    #[test]
    fn test_append_prefix_then_exhausted() {
        let session = session();
        let x = Var::new("X");
        let append = Functor::new("append", 3).unwrap();
        let mut iter = session.iter();
        iter.open(&append, &[Term::from(&x), ints(&[2, 3]), ints(&[1, 2, 3])])
            .unwrap();
        assert_eq!(iter.state(), QueryState::Open);

        let first = iter.next_solution().unwrap().unwrap();
        assert_eq!(iter.state(), QueryState::HasSolution);
        assert_eq!(first.get(&x), Some(&ints(&[1])));
        assert_eq!(first.to_string(), "X = [1]");

        assert!(iter.next_solution().unwrap().is_none());
        assert_eq!(iter.state(), QueryState::Exhausted);
        assert!(matches!(iter.next_solution(), Err(Error::IteratorExhausted)));
        iter.close().unwrap();
    }

    #[test]
    fn test_open_twice_is_busy() {
        let session = session();
        let mut iter = session.query(&c("member", vec![Term::var("X"), ints(&[1, 2])])).unwrap();
        let member = Functor::new("member", 2).unwrap();
        assert!(matches!(
            iter.open(&member, &[Term::var("Y"), ints(&[3])]),
            Err(Error::EngineBusy { .. })
        ));

        let mut other = session.iter();
        assert!(matches!(
            other.open(&member, &[Term::var("Y"), ints(&[3])]),
            Err(Error::EngineBusy { .. })
        ));
        assert_eq!(other.state(), QueryState::Idle);
        assert!(session.is_busy().unwrap());
        iter.close().unwrap();
        assert!(!session.is_busy().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let session = session();
        let mut iter = session.query(&Term::atom("true")).unwrap();
        iter.close().unwrap();
        iter.close().unwrap();
        assert_eq!(iter.state(), QueryState::Closed);
        assert!(matches!(
            iter.next_solution(),
            Err(Error::NotOpen { operation: "advance", state: QueryState::Closed })
        ));
        let mut idle = session.iter();
        idle.close().unwrap();
        assert!(matches!(
            idle.open_goal(&Term::atom("true")),
            Err(Error::NotOpen { operation: "open", .. })
        ));
    }

    #[test]
    fn test_abandoned_query_frees_the_session() {
        let session = session();
        let goal = c("member", vec![Term::var("X"), ints(&[1, 2, 3])]);
        let mut iter = session.query(&goal).unwrap();
        assert!(iter.next_solution().unwrap().is_some());
        iter.close().unwrap();

        let mut next = session.query(&goal).unwrap();
        assert!(next.next_solution().unwrap().is_some());
        drop(next);
        assert!(!session.is_busy().unwrap());
        assert_eq!(session.query_all(&[goal], None).unwrap().len(), 3);
    }

    #[test]
    fn test_exhaustion_frees_the_session_before_close() {
        let session = session();
        let mut iter = session.query(&Term::atom("fail")).unwrap();
        assert!(iter.next_solution().unwrap().is_none());
        assert!(!session.is_busy().unwrap());
        assert!(session.has_solution(&[Term::atom("true")]).unwrap());
    }

    #[test]
    fn test_variables_do_not_leak_between_queries() {
        let session = session();
        let x = Var::new("X");
        let goal = c("=", vec![Term::from(&x), Term::integer(1)]);
        let first = session.query_all(&[goal.clone()], None).unwrap();
        assert_eq!(first[0].get(&x), Some(&Term::integer(1)));

        let unbound = session.query_all(&[c("var", vec![Term::from(&x)])], None).unwrap();
        assert_eq!(unbound.len(), 1);
        assert_eq!(unbound[0].get(&x), Some(&Term::Variable(x.clone())));
        assert_eq!(unbound[0].to_string(), "true");
    }

    #[test]
    fn test_shared_variables_bind_together() {
        let session = session();
        let x = Var::new("X");
        let goals = [
            c("=", vec![Term::from(&x), Term::var("Y")]),
            c("member", vec![Term::from(&x), ints(&[7])]),
        ];
        let solutions = session.query_all(&goals, None).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].get_by_name("Y"), Some(&Term::integer(7)));
        assert_eq!(solutions[0].to_string(), "X = 7, Y = 7");
    }

    #[test]
    fn test_engine_error_closes_the_query() {
        let session = session();
        let mut iter = session.query(&c("missing", vec![Term::integer(1)])).unwrap();
        assert!(matches!(iter.next_solution(), Err(Error::Engine(_))));
        assert_eq!(iter.state(), QueryState::Closed);
        assert!(!session.is_busy().unwrap());
    }

    #[test]
    fn test_failed_open_leaves_iterator_idle() {
        let session = Session::start(Machine::without_floats(), SessionConfig::default()).unwrap();
        let mut iter = session.iter();
        let eq = Functor::new("=", 2).unwrap();
        assert!(matches!(
            iter.open(&eq, &[Term::var("X"), Term::decimal(0.5)]),
            Err(Error::UnsupportedTermShape { .. })
        ));
        assert_eq!(iter.state(), QueryState::Idle);
        iter.open(&eq, &[Term::var("X"), Term::integer(1)]).unwrap();
        assert!(iter.next_solution().unwrap().is_some());
    }

    #[test]
    fn test_arity_mismatch_and_non_callable_goals() {
        let session = session();
        let mut iter = session.iter();
        let f = Functor::new("append", 3).unwrap();
        assert!(matches!(iter.open(&f, &[Term::nil()]), Err(Error::InvalidTerm(_))));
        assert!(matches!(iter.open_goal(&Term::integer(3)), Err(Error::InvalidTerm(_))));
        assert_eq!(iter.state(), QueryState::Idle);
    }

    #[test]
    fn test_iterator_adaptor_is_fused() {
        let session = session();
        let x = Var::new("X");
        let iter = session
            .query(&c("member", vec![Term::from(&x), ints(&[1, 2, 3])]))
            .unwrap();
        let values: Vec<Term> = iter
            .map(|solution| solution.unwrap().get(&x).cloned().unwrap())
            .collect();
        assert_eq!(values, vec![Term::integer(1), Term::integer(2), Term::integer(3)]);
    }

    #[test]
    fn test_assert_retract_and_reset() {
        let session = session();
        session.assertz(&c("colour", vec![Term::atom("red")])).unwrap();
        session.assertz(&c("colour", vec![Term::atom("blue")])).unwrap();
        session.asserta(&c("colour", vec![Term::atom("green")])).unwrap();
        let all = session
            .query_all(&[c("colour", vec![Term::var("C")])], None)
            .unwrap();
        let names: Vec<String> = all.iter().map(|s| s.get_by_name("C").unwrap().to_string()).collect();
        assert_eq!(names, ["green", "red", "blue"]);

        assert!(session.retract(&c("colour", vec![Term::atom("red")])).unwrap());
        assert!(!session.retract(&c("colour", vec![Term::atom("red")])).unwrap());
        assert_eq!(session.with_engine(|m| m.clause_count("colour", 1)).unwrap(), 2);

        let open = session.query(&Term::atom("true")).unwrap();
        assert!(matches!(session.reset(), Err(Error::EngineBusy { .. })));
        drop(open);
        session.reset().unwrap();
        assert!(matches!(
            session.has_solution(&[c("colour", vec![Term::var("C")])]),
            Err(Error::Engine(_))
        ));
    }

    #[test]
    fn test_inference_limit_surfaces_as_engine_error() {
        let config = SessionConfig::new().with_inference_limit(1_000);
        let session = Session::start(Machine::new(), config).unwrap();
        session
            .assertz(&c(":-", vec![Term::atom("loop"), Term::atom("loop")]))
            .unwrap();
        let err = session.has_solution(&[Term::atom("loop")]).unwrap_err();
        assert!(matches!(err, Error::Engine(msg) if msg.contains("inference limit")));
        assert!(session.has_solution(&[Term::atom("true")]).unwrap());
    }

    #[test]
    fn test_time_limit_surfaces_as_engine_error() {
        use std::time::{Duration, Instant};

        let config = SessionConfig::new().with_time_limit(Duration::from_millis(50));
        let session = Session::start(Machine::new(), config).unwrap();
        session
            .assertz(&c(":-", vec![Term::atom("spin"), Term::atom("spin")]))
            .unwrap();

        let started = Instant::now();
        let mut iter = session.query(&Term::atom("spin")).unwrap();
        let err = iter.next_solution().unwrap_err();
        assert!(matches!(err, Error::Engine(ref msg) if msg.contains("time limit")), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(iter.state(), QueryState::Closed);
        drop(iter);

        assert!(!session.is_busy().unwrap());
        let x = Term::var("X");
        let solutions = session
            .query_all(&[c("=", vec![x, Term::integer(1)])], None)
            .unwrap();
        assert_eq!(solutions[0].to_string(), "X = 1");
    }

    #[test]
    fn test_foreign_predicates_are_callable() {
        let mut machine = Machine::new();
        machine
            .register_foreign("even", 1, |args| match &args[0] {
                Term::Integer(n) => Ok(n % 2 == 0),
                other => Err(Error::InvalidTerm(format!("integer expected, got {other}"))),
            })
            .unwrap();
        let session = Session::start(machine, SessionConfig::default()).unwrap();

        let x = Term::var("X");
        let goals = [
            c("member", vec![x.clone(), ints(&[1, 2, 3, 4])]),
            c("even", vec![x]),
        ];
        let found: Vec<String> = session
            .query_all(&goals, None)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(found, ["X = 2", "X = 4"]);

        let err = session
            .query_all(&[c("even", vec![Term::atom("a")])], None)
            .unwrap_err();
        assert!(matches!(err, Error::Engine(ref msg) if msg.contains("even/1")), "{err}");
        assert!(!session.is_busy().unwrap());
        assert!(session.assertz(&c("even", vec![Term::integer(1)])).is_err());

        session
            .with_engine_mut(|machine| {
                machine.register_foreign("shout", 1, |args| Ok(matches!(args[0], Term::Atom(_))))
            })
            .unwrap()
            .unwrap();
        session.reset().unwrap();
        assert!(session.has_solution(&[c("shout", vec![Term::atom("hey")])]).unwrap());
        assert!(!session.has_solution(&[c("shout", vec![Term::integer(1)])]).unwrap());
    }

    #[test]
    fn test_threads_serialize_on_the_session() {
        let session = session();
        std::thread::scope(|scope| {
            for n in 0..4 {
                let session = &session;
                scope.spawn(move || {
                    let goal = c("length", vec![Term::var("L"), Term::integer(n)]);
                    loop {
                        match session.query_all(&[goal.clone()], None) {
                            Ok(solutions) => {
                                assert_eq!(solutions.len(), 1);
                                break;
                            }
                            Err(Error::EngineBusy { .. }) => std::thread::yield_now(),
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                });
            }
        });
        assert!(!session.is_busy().unwrap());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_solution_serializes_by_variable_name() {
        let session = session();
        let solutions = session
            .query_all(&[c("=", vec![Term::var("X"), ints(&[1, 2])])], None)
            .unwrap();
        let json = serde_json::to_string(&solutions[0]).unwrap();
        assert_eq!(json, r#"{"X":[1,2]}"#);
    }

    #[cfg(feature = "parsing")]
    #[test]
    fn test_consult_str() {
        let session = session();
        let added = session
            .consult_str(
                "parent(tom, bob).\nparent(bob, ann).\n\
                 grandparent(X, Z) :- parent(X, Y), parent(Y, Z).\n\
                 :- assertz(parent(ann, joe)).\n",
            )
            .unwrap();
        assert_eq!(added, 3);
        let goal = crate::parse::parse_term("grandparent(tom, Who)").unwrap();
        let solutions = session.query_all(&[goal], None).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].to_string(), "Who = ann");
    }
}
