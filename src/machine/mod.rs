//! An in-memory SLD-resolution engine.
//!
//! [`Machine`] implements [`Engine`] without any native library behind it.
//! Terms live on a heap of cells, bindings are recorded on a trail, and
//! choice points remember how far to roll both back. Continuations are
//! persistent linked lists, so a choice point captures "what to do next" by
//! sharing a pointer rather than copying a goal stack.

mod arith;
mod prelude;
mod store;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use log::{debug, trace};
use smallvec::SmallVec;

use crate::config::SessionConfig;
use crate::convert::Converter;
use crate::engine::{Args, Engine, NativeType};
use crate::error::{Error, Result};
use crate::functor::{FunctorId, FunctorRegistry};
use crate::term::{Functor, Term};

use arith::Num;
use store::{Cell, CellRef, Node, Store, Template};

/// Name reported in errors raised by [`Machine`].
const ENGINE_NAME: &str = "machine";

/// How often the wall clock is consulted, in inferences.
const CLOCK_INTERVAL: u64 = 4096;

/// Predicates implemented natively; clauses for them are rejected.
const BUILTINS: &[(&str, usize)] = &[
    ("true", 0),
    ("fail", 0),
    ("false", 0),
    ("!", 0),
    (",", 2),
    (";", 2),
    ("->", 2),
    ("\\+", 1),
    ("not", 1),
    ("=", 2),
    ("\\=", 2),
    ("==", 2),
    ("\\==", 2),
    ("var", 1),
    ("nonvar", 1),
    ("atom", 1),
    ("number", 1),
    ("integer", 1),
    ("float", 1),
    ("atomic", 1),
    ("compound", 1),
    ("callable", 1),
    ("is_list", 1),
    ("is", 2),
    ("=:=", 2),
    ("=\\=", 2),
    ("<", 2),
    (">", 2),
    ("=<", 2),
    (">=", 2),
    ("copy_term", 2),
    ("assertz", 1),
    ("assert", 1),
    ("asserta", 1),
    ("retract", 1),
    ("throw", 1),
];

fn unsupported_float() -> Error {
    Error::UnsupportedTermShape {
        engine: ENGINE_NAME.to_string(),
        shape: "decimal".to_string(),
    }
}

fn is_builtin(name: &str, arity: usize) -> bool {
    (name == "call" && (1..=8).contains(&arity)) || BUILTINS.contains(&(name, arity))
}

/// A host predicate: called with the goal's arguments lifted to terms,
/// reports success or failure.
type ForeignFn = dyn Fn(&[Term]) -> Result<bool> + Send + Sync;

#[derive(Clone)]
struct Foreign(Arc<ForeignFn>);

impl fmt::Debug for Foreign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Foreign(..)")
    }
}

/// A term handle issued by a [`Machine`].
///
/// Handles are stamped with the generation they were created in; once the
/// query they belong to is closed they stop resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineTerm {
    cell: CellRef,
    generation: u32,
}

#[derive(Debug)]
enum Instr {
    Call { goal: CellRef, barrier: usize },
    Cut(usize),
    Fail,
}

#[derive(Debug)]
struct Frame {
    instr: Instr,
    next: Cont,
}

impl Drop for Frame {
    fn drop(&mut self) {
        let mut next = self.next.0.take();
        while let Some(frame) = next {
            match Arc::try_unwrap(frame) {
                Ok(mut frame) => next = frame.next.0.take(),
                Err(_) => break,
            }
        }
    }
}

/// What remains to be proved, innermost first.
#[derive(Debug, Clone, Default)]
struct Cont(Option<Arc<Frame>>);

impl Cont {
    fn push(self, instr: Instr) -> Self {
        Self(Some(Arc::new(Frame { instr, next: self })))
    }

    fn call(self, goal: CellRef, barrier: usize) -> Self {
        self.push(Instr::Call { goal, barrier })
    }
}

#[derive(Debug)]
struct Clause {
    template: Template,
    head: usize,
    body: Option<usize>,
}

type Clauses = Arc<Vec<Arc<Clause>>>;

#[derive(Debug)]
enum Alternative {
    Resume(Cont),
    Clauses {
        goal: CellRef,
        clauses: Clauses,
        next: usize,
        cont: Cont,
    },
}

#[derive(Debug)]
struct ChoicePoint {
    heap_len: usize,
    trail_len: usize,
    alt: Alternative,
}

#[derive(Debug)]
struct ActiveQuery {
    goal: CellRef,
    started: bool,
    exhausted: bool,
    inferences: u64,
    deadline: Option<Instant>,
}

/// The reference engine.
///
/// # Example
///
/// ```rust
/// use logterm::{Engine, Machine, SessionConfig};
///
/// let mut machine = Machine::new();
/// machine.start(&SessionConfig::default()).unwrap();
/// let x = machine.make_variable().unwrap();
/// let one = machine.make_integer(1).unwrap();
/// let eq = machine.intern_functor("=", 2).unwrap();
/// machine.open_query(eq, &[x, one]).unwrap();
/// assert!(machine.next_solution().unwrap());
/// assert_eq!(machine.read_integer(x).unwrap(), 1);
/// machine.close_query().unwrap();
/// ```
#[derive(Debug)]
pub struct Machine {
    registry: FunctorRegistry,
    store: Store,
    db: IndexMap<FunctorId, Clauses>,
    foreign: IndexMap<Functor, Foreign>,
    choices: Vec<ChoicePoint>,
    cont: Cont,
    query: Option<ActiveQuery>,
    config: SessionConfig,
    generation: u32,
    floats: bool,
    running: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// A stopped engine with float support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: FunctorRegistry::new(),
            store: Store::default(),
            db: IndexMap::new(),
            foreign: IndexMap::new(),
            choices: Vec::new(),
            cont: Cont::default(),
            query: None,
            config: SessionConfig::default(),
            generation: 0,
            floats: true,
            running: false,
        }
    }

    /// An engine without first-class floats: floats can be neither built nor
    /// produced by arithmetic.
    #[must_use]
    pub fn without_floats() -> Self {
        Self {
            floats: false,
            ..Self::new()
        }
    }

    /// Number of clauses currently stored for `name/arity`.
    #[must_use]
    pub fn clause_count(&self, name: &str, arity: usize) -> usize {
        self.registry
            .lookup(name, arity)
            .and_then(|f| self.db.get(&f))
            .map_or(0, |clauses| clauses.len())
    }

    /// Register a host predicate `name/arity`.
    ///
    /// Calls to it receive the goal's arguments lifted to [`Term`]s (unbound
    /// arguments as fresh variables) and succeed at most once. An `Err` from
    /// the predicate aborts the query with [`Error::Engine`]. Registrations
    /// survive `reset` and replace an earlier predicate of the same name and
    /// arity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] for an empty name, or [`Error::Engine`]
    /// if `name/arity` is a builtin or already has clauses.
    ///
    /// # Example
    ///
    /// ```rust
    /// use logterm::{Machine, Session, SessionConfig, Term};
    ///
    /// let mut machine = Machine::new();
    /// machine
    ///     .register_foreign("positive", 1, |args| Ok(args[0].as_integer().is_some_and(|n| n > 0)))
    ///     .unwrap();
    /// let session = Session::start(machine, SessionConfig::default()).unwrap();
    /// let goal = Term::compound("positive", vec![Term::integer(3)]).unwrap();
    /// assert!(session.has_solution(&[goal]).unwrap());
    /// ```
    pub fn register_foreign<F>(&mut self, name: &str, arity: usize, predicate: F) -> Result<()>
    where
        F: Fn(&[Term]) -> Result<bool> + Send + Sync + 'static,
    {
        let functor = Functor::new(name, arity)?;
        if is_builtin(name, arity) || self.clause_count(name, arity) > 0 {
            return Err(Error::engine(format!(
                "permission error: cannot redefine procedure {functor}"
            )));
        }
        debug!("registered foreign predicate {functor}");
        self.foreign.insert(functor, Foreign(Arc::new(predicate)));
        Ok(())
    }

    fn call_foreign(&mut self, functor: &Functor, args: &[CellRef]) -> Result<bool> {
        let Some(Foreign(predicate)) = self.foreign.get(functor).cloned() else {
            return Err(Error::engine(format!("unknown procedure {functor}")));
        };
        let mut converter = Converter::new(&self.config);
        let terms = args
            .iter()
            .map(|&arg| converter.lift(&*self, self.handle(arg)))
            .collect::<Result<Vec<_>>>()?;
        predicate(&terms)
            .map_err(|e| Error::engine(format!("foreign predicate {functor} failed: {e}")))
    }

    fn handle(&self, cell: CellRef) -> MachineTerm {
        MachineTerm {
            cell,
            generation: self.generation,
        }
    }

    fn cell(&self, term: MachineTerm) -> Result<CellRef> {
        if term.generation != self.generation || !self.store.contains(term.cell) {
            return Err(Error::engine(format!(
                "stale term handle {:?} (current generation {})",
                term, self.generation
            )));
        }
        Ok(term.cell)
    }

    /// Drop every heap cell and invalidate outstanding handles.
    fn release(&mut self) {
        self.choices.clear();
        self.cont = Cont::default();
        self.store.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    fn load_prelude(&mut self) -> Result<()> {
        for clause in prelude::clauses()? {
            let template = Template::from_term(&clause, &mut self.registry)?;
            self.add_clause(template, false)?;
        }
        Ok(())
    }

    fn named(&self, f: FunctorId, name: &str, arity: usize) -> bool {
        self.registry
            .resolve(f)
            .is_ok_and(|functor| functor.name() == name && functor.arity() == arity)
    }

    fn add_clause(&mut self, template: Template, front: bool) -> Result<()> {
        let root = template.root();
        let (head, body) = match template.node(root) {
            Node::Str(f, ..) if self.named(f, ":-", 2) => {
                let children = template.children(root);
                (children[0] as usize, Some(children[1] as usize))
            }
            _ => (root, None),
        };
        let body = body.filter(|&b| !matches!(template.node(b), Node::Atom(f) if self.named(f, "true", 0)));
        let key = match template.node(head) {
            Node::Atom(f) | Node::Str(f, ..) => f,
            Node::Var(_) => return Err(Error::engine("instantiation error: clause head is unbound")),
            _ => return Err(Error::engine("type error: clause head is not callable")),
        };
        let functor = self.registry.resolve(key)?;
        if is_builtin(functor.name(), functor.arity()) || self.foreign.contains_key(functor) {
            return Err(Error::engine(format!(
                "permission error: cannot modify static procedure {functor}"
            )));
        }
        let clause = Arc::new(Clause { template, head, body });
        let clauses = Arc::make_mut(self.db.entry(key).or_default());
        if front {
            clauses.insert(0, clause);
        } else {
            clauses.push(clause);
        }
        Ok(())
    }

    /// Best-effort rendering of a heap term for error messages.
    fn describe(&self, cell: CellRef) -> String {
        let limits = SessionConfig::new()
            .with_max_list_length(32)
            .with_max_term_size(128);
        Converter::new(&limits)
            .lift(self, self.handle(cell))
            .map_or_else(|_| "<term>".to_string(), |term| term.to_string())
    }

    fn count_inference(&mut self) -> Result<()> {
        let Some(query) = self.query.as_mut() else {
            return Ok(());
        };
        query.inferences += 1;
        if let Some(limit) = self.config.inference_limit {
            if query.inferences > limit {
                return Err(Error::engine(format!(
                    "resource error: inference limit of {limit} exceeded"
                )));
            }
        }
        if query.inferences % CLOCK_INTERVAL == 0 {
            if let Some(deadline) = query.deadline {
                if Instant::now() >= deadline {
                    return Err(Error::engine("resource error: time limit exceeded"));
                }
            }
        }
        Ok(())
    }

    /// Run the current continuation until it is empty (a solution) or every
    /// alternative is used up.
    fn solve(&mut self) -> Result<bool> {
        loop {
            let Some(frame) = self.cont.0.clone() else {
                return Ok(true);
            };
            self.cont = frame.next.clone();
            let ok = match &frame.instr {
                Instr::Call { goal, barrier } => self.call(*goal, *barrier)?,
                Instr::Cut(height) => {
                    self.choices.truncate(*height);
                    true
                }
                Instr::Fail => false,
            };
            if !ok && !self.backtrack()? {
                return Ok(false);
            }
        }
    }

    /// Resume the most recent alternative. Returns false when none is left.
    fn backtrack(&mut self) -> Result<bool> {
        while let Some(choice) = self.choices.pop() {
            self.store.restore(choice.heap_len, choice.trail_len);
            match choice.alt {
                Alternative::Resume(cont) => {
                    self.cont = cont;
                    return Ok(true);
                }
                Alternative::Clauses {
                    goal,
                    clauses,
                    next,
                    cont,
                } => {
                    if self.try_clauses(goal, &clauses, next, cont)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn try_clauses(&mut self, goal: CellRef, clauses: &Clauses, start: usize, cont: Cont) -> Result<bool> {
        let barrier = self.choices.len();
        for (index, clause) in clauses.iter().enumerate().skip(start) {
            let (heap_len, trail_len) = (self.store.len(), self.store.trail_len());
            let refs = self.store.instantiate(&clause.template)?;
            if self.store.unify(refs[clause.head], goal) {
                if index + 1 < clauses.len() {
                    self.choices.push(ChoicePoint {
                        heap_len,
                        trail_len,
                        alt: Alternative::Clauses {
                            goal,
                            clauses: Arc::clone(clauses),
                            next: index + 1,
                            cont: cont.clone(),
                        },
                    });
                }
                self.cont = match clause.body {
                    Some(body) => cont.call(refs[body], barrier),
                    None => cont,
                };
                return Ok(true);
            }
            self.store.restore(heap_len, trail_len);
        }
        Ok(false)
    }

    fn push_choice(&mut self, alt: Alternative) {
        self.choices.push(ChoicePoint {
            heap_len: self.store.len(),
            trail_len: self.store.trail_len(),
            alt,
        });
    }

    fn call(&mut self, goal: CellRef, barrier: usize) -> Result<bool> {
        self.count_inference()?;
        let goal = self.store.deref(goal);
        let (f, args): (FunctorId, SmallVec<[CellRef; 4]>) = match self.store.cell(goal) {
            Cell::Atom(f) => (*f, SmallVec::new()),
            Cell::Str(f, args) => (*f, args.iter().copied().collect()),
            Cell::Ref(_) => return Err(Error::engine("instantiation error: goal is unbound")),
            _ => {
                return Err(Error::engine(format!(
                    "type error: callable expected, got {}",
                    self.describe(goal)
                )))
            }
        };
        let functor = self.registry.resolve(f)?.clone();
        trace!("call {functor}");

        match (functor.name(), args.as_slice()) {
            ("true", []) => Ok(true),
            ("fail" | "false", []) => Ok(false),
            ("!", []) => {
                self.choices.truncate(barrier);
                Ok(true)
            }
            (",", [a, b]) => {
                let cont = std::mem::take(&mut self.cont);
                self.cont = cont.call(*b, barrier).call(*a, barrier);
                Ok(true)
            }
            (";", [lhs, rhs]) => {
                let branch = match self.store.cell(self.store.deref(*lhs)) {
                    Cell::Str(g, parts) if self.named(*g, "->", 2) => Some((parts[0], parts[1])),
                    _ => None,
                };
                let height = self.choices.len();
                let cont = std::mem::take(&mut self.cont);
                self.push_choice(Alternative::Resume(cont.clone().call(*rhs, barrier)));
                self.cont = match branch {
                    Some((cond, then)) => cont
                        .call(then, barrier)
                        .push(Instr::Cut(height))
                        .call(cond, height + 1),
                    None => cont.call(*lhs, barrier),
                };
                Ok(true)
            }
            ("->", [cond, then]) => {
                let height = self.choices.len();
                let cont = std::mem::take(&mut self.cont);
                self.cont = cont
                    .call(*then, barrier)
                    .push(Instr::Cut(height))
                    .call(*cond, height);
                Ok(true)
            }
            ("\\+" | "not", [inner]) => {
                let height = self.choices.len();
                let cont = std::mem::take(&mut self.cont);
                self.push_choice(Alternative::Resume(cont));
                self.cont = Cont::default()
                    .push(Instr::Fail)
                    .push(Instr::Cut(height))
                    .call(*inner, height + 1);
                Ok(true)
            }
            ("call", [target, extra @ ..]) => {
                let goal = self.add_args(*target, extra)?;
                let height = self.choices.len();
                let cont = std::mem::take(&mut self.cont);
                self.cont = cont.call(goal, height);
                Ok(true)
            }
            (name, args) if is_builtin(name, args.len()) => self.builtin(name, args),
            _ if self.foreign.contains_key(&functor) => self.call_foreign(&functor, &args),
            (_, _) => {
                let Some(clauses) = self.db.get(&f).cloned() else {
                    return Err(Error::engine(format!("unknown procedure {functor}")));
                };
                let cont = std::mem::take(&mut self.cont);
                self.try_clauses(goal, &clauses, 0, cont)
            }
        }
    }

    /// `call/N`: append `extra` to the arguments of `target`.
    fn add_args(&mut self, target: CellRef, extra: &[CellRef]) -> Result<CellRef> {
        let target = self.store.deref(target);
        if extra.is_empty() {
            return Ok(target);
        }
        let (name, mut args) = match self.store.cell(target) {
            Cell::Atom(f) => (self.registry.resolve(*f)?.name().to_string(), Vec::new()),
            Cell::Str(f, args) => (self.registry.resolve(*f)?.name().to_string(), args.to_vec()),
            Cell::Ref(_) => return Err(Error::engine("instantiation error: goal is unbound")),
            _ => {
                return Err(Error::engine(format!(
                    "type error: callable expected, got {}",
                    self.describe(target)
                )))
            }
        };
        args.extend_from_slice(extra);
        let f = self.registry.intern(&name, args.len())?;
        self.store.alloc(Cell::Str(f, args.into()))
    }

    fn eval(&self, expr: CellRef) -> Result<Num> {
        arith::eval(&self.store, &self.registry, expr, self.config.max_term_size)
    }

    fn compare(&self, lhs: CellRef, rhs: CellRef) -> Result<Option<Ordering>> {
        Ok(self.eval(lhs)?.compare(self.eval(rhs)?))
    }

    fn builtin(&mut self, name: &str, args: &[CellRef]) -> Result<bool> {
        let tag = |machine: &Self| machine.store.cell(machine.store.deref(args[0])).clone();
        Ok(match (name, args) {
            ("=", [a, b]) => self.store.unify(*a, *b),
            ("\\=", [a, b]) => {
                let mark = self.store.trail_len();
                let unified = self.store.unify(*a, *b);
                self.store.undo_to(mark);
                !unified
            }
            ("==", [a, b]) => self.store.identical(*a, *b),
            ("\\==", [a, b]) => !self.store.identical(*a, *b),
            ("var", [_]) => matches!(tag(self), Cell::Ref(_)),
            ("nonvar", [_]) => !matches!(tag(self), Cell::Ref(_)),
            ("atom", [_]) => matches!(tag(self), Cell::Atom(_) | Cell::Nil),
            ("number", [_]) => matches!(tag(self), Cell::Int(_) | Cell::Float(_)),
            ("integer", [_]) => matches!(tag(self), Cell::Int(_)),
            ("float", [_]) => matches!(tag(self), Cell::Float(_)),
            ("atomic", [_]) => matches!(
                tag(self),
                Cell::Atom(_) | Cell::Int(_) | Cell::Float(_) | Cell::Nil
            ),
            ("compound", [_]) => matches!(tag(self), Cell::Str(..) | Cell::Cons(..)),
            ("callable", [_]) => matches!(tag(self), Cell::Atom(_) | Cell::Str(..)),
            ("is_list", [list]) => self.is_list(*list),
            ("is", [result, expr]) => {
                let value = match self.eval(*expr)? {
                    Num::Int(i) => Cell::Int(i),
                    Num::Float(_) if !self.floats => return Err(unsupported_float()),
                    Num::Float(x) => Cell::Float(x),
                };
                let value = self.store.alloc(value)?;
                self.store.unify(*result, value)
            }
            ("=:=", [a, b]) => self.compare(*a, *b)? == Some(Ordering::Equal),
            ("=\\=", [a, b]) => {
                matches!(self.compare(*a, *b)?, Some(Ordering::Less | Ordering::Greater))
            }
            ("<", [a, b]) => self.compare(*a, *b)? == Some(Ordering::Less),
            (">", [a, b]) => self.compare(*a, *b)? == Some(Ordering::Greater),
            ("=<", [a, b]) => {
                matches!(self.compare(*a, *b)?, Some(Ordering::Less | Ordering::Equal))
            }
            (">=", [a, b]) => {
                matches!(self.compare(*a, *b)?, Some(Ordering::Greater | Ordering::Equal))
            }
            ("copy_term", [original, copy]) => {
                let template = self.store.to_template(*original, self.config.max_term_size)?;
                let refs = self.store.instantiate(&template)?;
                self.store.unify(refs[template.root()], *copy)
            }
            ("assertz" | "assert", [clause]) => {
                let template = self.store.to_template(*clause, self.config.max_term_size)?;
                self.add_clause(template, false)?;
                true
            }
            ("asserta", [clause]) => {
                let template = self.store.to_template(*clause, self.config.max_term_size)?;
                self.add_clause(template, true)?;
                true
            }
            ("retract", [clause]) => self.retract(*clause)?,
            ("throw", [ball]) => {
                return Err(Error::engine(format!("unhandled exception: {}", self.describe(*ball))));
            }
            _ => return Err(Error::engine(format!("unknown procedure {name}/{}", args.len()))),
        })
    }

    fn is_list(&self, list: CellRef) -> bool {
        let mut cell = list;
        for _ in 0..=self.config.max_list_length {
            match self.store.cell(self.store.deref(cell)) {
                Cell::Nil => return true,
                Cell::Cons(_, tail) => cell = *tail,
                _ => return false,
            }
        }
        false
    }

    /// Remove the first clause unifying with `clause`, keeping its bindings.
    fn retract(&mut self, clause: CellRef) -> Result<bool> {
        let clause = self.store.deref(clause);
        let (head, body) = match self.store.cell(clause) {
            Cell::Str(f, parts) if self.named(*f, ":-", 2) => (parts[0], Some(parts[1])),
            _ => (clause, None),
        };
        let key = match self.store.cell(self.store.deref(head)) {
            Cell::Atom(f) | Cell::Str(f, _) => *f,
            Cell::Ref(_) => return Err(Error::engine("instantiation error: clause head is unbound")),
            _ => return Err(Error::engine("type error: clause head is not callable")),
        };
        let Some(clauses) = self.db.get(&key).cloned() else {
            return Ok(false);
        };
        let truth = self.registry.intern("true", 0)?;
        for stored in clauses.iter() {
            let (heap_len, trail_len) = (self.store.len(), self.store.trail_len());
            let refs = self.store.instantiate(&stored.template)?;
            let stored_body = match stored.body {
                Some(b) => refs[b],
                None => self.store.alloc(Cell::Atom(truth))?,
            };
            let body = match body {
                Some(b) => b,
                None => self.store.alloc(Cell::Atom(truth))?,
            };
            if self.store.unify(refs[stored.head], head) && self.store.unify(stored_body, body) {
                if let Some(list) = self.db.get_mut(&key) {
                    Arc::make_mut(list).retain(|c| !Arc::ptr_eq(c, stored));
                }
                return Ok(true);
            }
            self.store.restore(heap_len, trail_len);
        }
        Ok(false)
    }
}

impl Engine for Machine {
    type Handle = MachineTerm;

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn start(&mut self, config: &SessionConfig) -> Result<()> {
        if self.running {
            return Err(Error::engine("engine is already running"));
        }
        self.config = *config;
        self.load_prelude()?;
        self.running = true;
        debug!(
            "machine started: {} prelude predicates, floats {}",
            self.db.len(),
            if self.floats { "on" } else { "off" }
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.query = None;
        self.release();
        self.db.clear();
        self.registry.clear();
        self.running = false;
        debug!("machine stopped");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if self.query.is_some() {
            return Err(Error::engine("cannot reset while a query is open"));
        }
        self.release();
        self.db.clear();
        self.registry.clear();
        self.load_prelude()?;
        debug!("machine reset");
        Ok(())
    }

    fn intern_functor(&mut self, name: &str, arity: usize) -> Result<FunctorId> {
        self.registry.intern(name, arity)
    }

    fn functor(&self, id: FunctorId) -> Result<Functor> {
        self.registry.resolve(id).cloned()
    }

    fn make_atom(&mut self, name: &str) -> Result<MachineTerm> {
        let f = self.registry.intern(name, 0)?;
        let cell = self.store.alloc(Cell::Atom(f))?;
        Ok(self.handle(cell))
    }

    fn make_integer(&mut self, value: i64) -> Result<MachineTerm> {
        let cell = self.store.alloc(Cell::Int(value))?;
        Ok(self.handle(cell))
    }

    fn make_float(&mut self, value: f64) -> Result<MachineTerm> {
        if !self.floats {
            return Err(unsupported_float());
        }
        let cell = self.store.alloc(Cell::Float(value))?;
        Ok(self.handle(cell))
    }

    fn make_variable(&mut self) -> Result<MachineTerm> {
        let cell = self.store.new_var()?;
        Ok(self.handle(cell))
    }

    fn make_compound(&mut self, functor: FunctorId, args: &[MachineTerm]) -> Result<MachineTerm> {
        let arity = self.registry.resolve(functor)?.arity();
        if arity != args.len() {
            return Err(Error::invalid(format!(
                "functor {} expects {arity} arguments, got {}",
                self.registry.resolve(functor)?,
                args.len()
            )));
        }
        let args = args
            .iter()
            .map(|&arg| self.cell(arg))
            .collect::<Result<Box<[CellRef]>>>()?;
        let cell = self.store.alloc(Cell::Str(functor, args))?;
        Ok(self.handle(cell))
    }

    fn make_nil(&mut self) -> Result<MachineTerm> {
        let cell = self.store.alloc(Cell::Nil)?;
        Ok(self.handle(cell))
    }

    fn make_list(&mut self, head: MachineTerm, tail: MachineTerm) -> Result<MachineTerm> {
        let cell = Cell::Cons(self.cell(head)?, self.cell(tail)?);
        let cell = self.store.alloc(cell)?;
        Ok(self.handle(cell))
    }

    fn deref(&self, term: MachineTerm) -> Result<MachineTerm> {
        let cell = self.store.deref(self.cell(term)?);
        Ok(self.handle(cell))
    }

    fn type_of(&self, term: MachineTerm) -> Result<NativeType> {
        let cell = self.store.deref(self.cell(term)?);
        Ok(match self.store.cell(cell) {
            Cell::Ref(_) => NativeType::Variable,
            Cell::Atom(_) => NativeType::Atom,
            Cell::Int(_) => NativeType::Integer,
            Cell::Float(_) => NativeType::Float,
            Cell::Str(..) => NativeType::Compound,
            Cell::Nil => NativeType::Nil,
            Cell::Cons(..) => NativeType::List,
        })
    }

    fn read_integer(&self, term: MachineTerm) -> Result<i64> {
        match self.store.cell(self.store.deref(self.cell(term)?)) {
            Cell::Int(i) => Ok(*i),
            other => Err(Error::engine(format!("expected an integer, found {other:?}"))),
        }
    }

    fn read_float(&self, term: MachineTerm) -> Result<f64> {
        match self.store.cell(self.store.deref(self.cell(term)?)) {
            Cell::Float(x) => Ok(*x),
            other => Err(Error::engine(format!("expected a float, found {other:?}"))),
        }
    }

    fn read_atom_name(&self, term: MachineTerm) -> Result<String> {
        match self.store.cell(self.store.deref(self.cell(term)?)) {
            Cell::Atom(f) => Ok(self.registry.resolve(*f)?.name().to_string()),
            other => Err(Error::engine(format!("expected an atom, found {other:?}"))),
        }
    }

    fn read_list_head(&self, term: MachineTerm) -> Result<MachineTerm> {
        match self.store.cell(self.store.deref(self.cell(term)?)) {
            Cell::Cons(head, _) => Ok(self.handle(*head)),
            other => Err(Error::engine(format!("expected a list cell, found {other:?}"))),
        }
    }

    fn read_list_tail(&self, term: MachineTerm) -> Result<MachineTerm> {
        match self.store.cell(self.store.deref(self.cell(term)?)) {
            Cell::Cons(_, tail) => Ok(self.handle(*tail)),
            other => Err(Error::engine(format!("expected a list cell, found {other:?}"))),
        }
    }

    fn read_compound(&self, term: MachineTerm) -> Result<(FunctorId, Args<MachineTerm>)> {
        match self.store.cell(self.store.deref(self.cell(term)?)) {
            Cell::Str(f, args) => Ok((*f, args.iter().map(|&a| self.handle(a)).collect())),
            other => Err(Error::engine(format!("expected a compound, found {other:?}"))),
        }
    }

    fn open_query(&mut self, functor: FunctorId, args: &[MachineTerm]) -> Result<()> {
        if !self.running {
            return Err(Error::engine("engine is not running"));
        }
        if self.query.is_some() {
            return Err(Error::engine("a query is already open"));
        }
        let arity = self.registry.resolve(functor)?.arity();
        if arity != args.len() {
            return Err(Error::invalid(format!(
                "goal functor {} expects {arity} arguments, got {}",
                self.registry.resolve(functor)?,
                args.len()
            )));
        }
        let goal = if args.is_empty() {
            self.store.alloc(Cell::Atom(functor))?
        } else {
            let args = args
                .iter()
                .map(|&arg| self.cell(arg))
                .collect::<Result<Box<[CellRef]>>>()?;
            self.store.alloc(Cell::Str(functor, args))?
        };
        trace!("open query {}", self.registry.resolve(functor)?);
        self.query = Some(ActiveQuery {
            goal,
            started: false,
            exhausted: false,
            inferences: 0,
            deadline: self.config.time_limit.map(|limit| Instant::now() + limit),
        });
        Ok(())
    }

    fn next_solution(&mut self) -> Result<bool> {
        let Some(query) = self.query.as_mut() else {
            return Err(Error::engine("no open query"));
        };
        if query.exhausted {
            return Ok(false);
        }
        let (started, goal) = (query.started, query.goal);
        query.started = true;
        let outcome = if started {
            match self.backtrack() {
                Ok(true) => self.solve(),
                other => other,
            }
        } else {
            self.cont = Cont::default().call(goal, 0);
            self.solve()
        };
        if !matches!(outcome, Ok(true)) {
            if let Some(query) = self.query.as_mut() {
                query.exhausted = true;
            }
        }
        outcome
    }

    fn close_query(&mut self) -> Result<()> {
        if let Some(query) = self.query.take() {
            trace!("close query after {} inferences", query.inferences);
        }
        self.release();
        Ok(())
    }

    fn release_terms(&mut self) -> Result<()> {
        if self.query.is_some() {
            return Err(Error::engine("cannot release terms while a query is open"));
        }
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;

    fn started() -> Machine {
        let mut machine = Machine::new();
        machine.start(&SessionConfig::default()).unwrap();
        machine
    }

    /// Lower a goal, collect every solution as lifted goal instances.
    fn solve_all(machine: &mut Machine, goal: &Term) -> Result<Vec<Term>> {
        let mut converter = Converter::new(&SessionConfig::default());
        let handle = converter.lower(machine, goal)?;
        let (functor, args) = match machine.type_of(handle)? {
            NativeType::Atom => {
                let name = machine.read_atom_name(handle)?;
                (machine.intern_functor(&name, 0)?, Args::new())
            }
            _ => machine.read_compound(handle)?,
        };
        machine.open_query(functor, &args)?;
        let mut out = Vec::new();
        let result = loop {
            match machine.next_solution() {
                Ok(true) => match converter.lift(machine, handle) {
                    Ok(term) => out.push(term),
                    Err(e) => break Err(e),
                },
                Ok(false) => break Ok(out),
                Err(e) => break Err(e),
            }
        };
        machine.close_query()?;
        result
    }

    fn c(name: &str, args: Vec<Term>) -> Term {
        Term::compound(name, args).unwrap()
    }

    fn ints(values: &[i64]) -> Term {
        Term::list(values.iter().copied().map(Term::integer).collect())
    }

    #[test]
    fn test_append_enumerates_splits() {
        let mut machine = started();
        let goal = c("append", vec![Term::var("X"), Term::var("Y"), ints(&[1, 2])]);
        let solutions = solve_all(&mut machine, &goal).unwrap();
        assert_eq!(solutions.len(), 3);
        assert_eq!(solutions[0].arguments()[0], Term::nil());
        assert_eq!(solutions[2].arguments()[0], ints(&[1, 2]));
    }

    #[test]
    fn test_append_finds_prefix() {
        let mut machine = started();
        let goal = c("append", vec![Term::var("X"), ints(&[2, 3]), ints(&[1, 2, 3])]);
        let solutions = solve_all(&mut machine, &goal).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].arguments()[0], ints(&[1]));
    }

    #[test]
    fn test_prelude_predicates() {
        let mut machine = started();
        let length = solve_all(&mut machine, &c("length", vec![ints(&[4, 5, 6]), Term::var("N")])).unwrap();
        assert_eq!(length[0].arguments()[1], Term::integer(3));

        let generated = solve_all(&mut machine, &c("length", vec![Term::var("L"), Term::integer(2)])).unwrap();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].arguments()[0].as_list().unwrap().items().len(), 2);

        let reverse = solve_all(&mut machine, &c("reverse", vec![ints(&[1, 2, 3]), Term::var("R")])).unwrap();
        assert_eq!(reverse[0].arguments()[1], ints(&[3, 2, 1]));

        let nth = solve_all(&mut machine, &c("nth0", vec![Term::integer(1), ints(&[7, 8, 9]), Term::var("E")])).unwrap();
        assert_eq!(nth[0].arguments()[2], Term::integer(8));

        let last = solve_all(&mut machine, &c("last", vec![ints(&[7, 8, 9]), Term::var("E")])).unwrap();
        assert_eq!(last[0].arguments()[1], Term::integer(9));

        let members = solve_all(&mut machine, &c("member", vec![Term::var("M"), ints(&[1, 2, 3])])).unwrap();
        assert_eq!(members.len(), 3);
        let chk = solve_all(&mut machine, &c("memberchk", vec![Term::var("M"), ints(&[1, 2, 3])])).unwrap();
        assert_eq!(chk.len(), 1);
    }

    #[test]
    fn test_cut_commits_to_first_clause() {
        let mut machine = started();
        let x = Term::var("X");
        let clause = c(":-", vec![c("first", vec![x.clone()]), c(",", vec![c("member", vec![x, ints(&[1, 2])]), Term::atom("!")])]);
        solve_all(&mut machine, &c("assertz", vec![clause])).unwrap();
        let solutions = solve_all(&mut machine, &c("first", vec![Term::var("Y")])).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].arguments()[0], Term::integer(1));
    }

    #[test]
    fn test_if_then_else_and_negation() {
        let mut machine = started();
        let x = Term::var("X");
        let ite = c(
            ";",
            vec![
                c("->", vec![c("member", vec![Term::integer(5), ints(&[1, 2])]), c("=", vec![x.clone(), Term::atom("yes")])]),
                c("=", vec![x, Term::atom("no")]),
            ],
        );
        let solutions = solve_all(&mut machine, &ite).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].arguments()[0].arguments()[1].arguments()[0], Term::atom("no"));

        let not_member = c("\\+", vec![c("member", vec![Term::integer(5), ints(&[1, 2])])]);
        assert_eq!(solve_all(&mut machine, &not_member).unwrap().len(), 1);
        let member = c("\\+", vec![c("member", vec![Term::integer(1), ints(&[1, 2])])]);
        assert!(solve_all(&mut machine, &member).unwrap().is_empty());
    }

    #[test]
    fn test_disjunction_yields_both_branches() {
        let mut machine = started();
        let x = Term::var("X");
        let goal = c(";", vec![c("=", vec![x.clone(), Term::integer(1)]), c("=", vec![x, Term::integer(2)])]);
        assert_eq!(solve_all(&mut machine, &goal).unwrap().len(), 2);
    }

    #[test]
    fn test_call_with_extra_arguments() {
        let mut machine = started();
        let goal = c("call", vec![c("append", vec![ints(&[1])]), ints(&[2]), Term::var("L")]);
        let solutions = solve_all(&mut machine, &goal).unwrap();
        assert_eq!(solutions[0].arguments()[2], ints(&[1, 2]));
    }

    #[test]
    fn test_arithmetic() {
        let mut machine = started();
        let goal = c("is", vec![Term::var("X"), c("+", vec![Term::integer(2), c("*", vec![Term::integer(3), Term::integer(4)])])]);
        let solutions = solve_all(&mut machine, &goal).unwrap();
        assert_eq!(solutions[0].arguments()[0], Term::integer(14));
        assert_eq!(solve_all(&mut machine, &c("<", vec![Term::integer(1), Term::decimal(1.5)])).unwrap().len(), 1);
        let err = solve_all(&mut machine, &c("is", vec![Term::var("X"), c("/", vec![Term::integer(1), Term::integer(0)])]));
        assert!(matches!(err, Err(Error::Engine(_))));
    }

    #[test]
    fn test_unknown_procedure_is_an_engine_error() {
        let mut machine = started();
        let err = solve_all(&mut machine, &c("nope", vec![Term::integer(1)])).unwrap_err();
        match err {
            Error::Engine(msg) => assert!(msg.contains("unknown procedure nope/1"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_assert_and_retract() {
        let mut machine = started();
        for n in 1..=3 {
            solve_all(&mut machine, &c("assertz", vec![c("fact", vec![Term::integer(n)])])).unwrap();
        }
        solve_all(&mut machine, &c("asserta", vec![c("fact", vec![Term::integer(0)])])).unwrap();
        assert_eq!(machine.clause_count("fact", 1), 4);

        let first = solve_all(&mut machine, &c("fact", vec![Term::var("X")])).unwrap();
        assert_eq!(first[0].arguments()[0], Term::integer(0));

        let retracted = solve_all(&mut machine, &c("retract", vec![c("fact", vec![Term::integer(2)])])).unwrap();
        assert_eq!(retracted.len(), 1);
        assert_eq!(machine.clause_count("fact", 1), 3);
        assert!(solve_all(&mut machine, &c("retract", vec![c("fact", vec![Term::integer(9)])])).unwrap().is_empty());
    }

    #[test]
    fn test_builtins_are_static() {
        let mut machine = started();
        let err = solve_all(&mut machine, &c("assertz", vec![c("=", vec![Term::integer(1), Term::integer(1)])]));
        assert!(matches!(err, Err(Error::Engine(msg)) if msg.contains("permission")));
    }

    #[test]
    fn test_throw_surfaces_the_ball() {
        let mut machine = started();
        let err = solve_all(&mut machine, &c("throw", vec![c("oops", vec![Term::integer(1)])])).unwrap_err();
        assert!(matches!(err, Error::Engine(msg) if msg.contains("oops(1)")));
    }

    #[test]
    fn test_cyclic_terms_are_rejected_not_looped_on() {
        let mut machine = started();
        let x = Term::var("X");
        let bind = c("=", vec![x.clone(), c("f", vec![x.clone()])]);

        for then in [
            c("copy_term", vec![x.clone(), Term::var("Y")]),
            c("assertz", vec![c("p", vec![x.clone()])]),
        ] {
            let goal = c(",", vec![bind.clone(), then]);
            let err = solve_all(&mut machine, &goal).unwrap_err();
            assert!(matches!(err, Error::Engine(ref m) if m.contains("cyclic")), "{err}");
        }
        assert_eq!(machine.clause_count("p", 1), 0);

        let y = Term::var("Y");
        let goal = c(
            ",",
            vec![
                c("=", vec![y.clone(), c("+", vec![y.clone(), Term::integer(1)])]),
                c("is", vec![Term::var("Z"), y]),
            ],
        );
        let err = solve_all(&mut machine, &goal).unwrap_err();
        assert!(matches!(err, Error::Engine(ref m) if m.contains("cyclic")), "{err}");
    }

    #[test]
    fn test_handles_go_stale_after_close() {
        let mut machine = started();
        let x = machine.make_variable().unwrap();
        let f = machine.intern_functor("true", 0).unwrap();
        machine.open_query(f, &[]).unwrap();
        assert!(machine.next_solution().unwrap());
        machine.close_query().unwrap();
        assert!(matches!(machine.type_of(x), Err(Error::Engine(_))));
    }

    #[test]
    fn test_second_open_query_is_rejected() {
        let mut machine = started();
        let f = machine.intern_functor("true", 0).unwrap();
        machine.open_query(f, &[]).unwrap();
        assert!(machine.open_query(f, &[]).is_err());
        assert!(machine.reset().is_err());
        machine.close_query().unwrap();
        machine.reset().unwrap();
    }

    #[test]
    fn test_exhausted_query_keeps_reporting_false() {
        let mut machine = started();
        let f = machine.intern_functor("fail", 0).unwrap();
        machine.open_query(f, &[]).unwrap();
        assert!(!machine.next_solution().unwrap());
        assert!(!machine.next_solution().unwrap());
        machine.close_query().unwrap();
    }

    #[test]
    fn test_without_floats() {
        let mut machine = Machine::without_floats();
        machine.start(&SessionConfig::default()).unwrap();
        assert!(matches!(
            machine.make_float(1.5),
            Err(Error::UnsupportedTermShape { .. })
        ));
        let err = solve_all(&mut machine, &c("is", vec![Term::var("X"), c("/", vec![Term::integer(1), Term::integer(2)])]));
        assert!(matches!(err, Err(Error::UnsupportedTermShape { .. })));
    }

    #[test]
    fn test_inference_limit() {
        let mut machine = Machine::new();
        machine
            .start(&SessionConfig::new().with_inference_limit(100))
            .unwrap();
        let looping = c(":-", vec![Term::atom("spin"), Term::atom("spin")]);
        solve_all(&mut machine, &c("assertz", vec![looping])).unwrap();
        let err = solve_all(&mut machine, &Term::atom("spin")).unwrap_err();
        assert!(matches!(err, Error::Engine(msg) if msg.contains("inference limit")));
    }

    #[test]
    fn test_reset_forgets_clauses_and_functors() {
        let mut machine = started();
        let old = machine.intern_functor("fact", 1).unwrap();
        solve_all(&mut machine, &c("assertz", vec![c("fact", vec![Term::integer(1)])])).unwrap();
        machine.reset().unwrap();
        assert_eq!(machine.clause_count("fact", 1), 0);
        assert!(matches!(machine.functor(old), Err(Error::UnknownFunctor(_))));
        assert!(machine.clause_count("append", 3) > 0);
    }

    #[test]
    fn test_deep_recursion_does_not_overflow() {
        let mut machine = started();
        let goal = c("length", vec![Term::var("L"), Term::integer(100_000)]);
        let solutions = solve_all(&mut machine, &goal).unwrap();
        assert_eq!(solutions[0].arguments()[0].as_list().unwrap().items().len(), 100_000);
    }
}
