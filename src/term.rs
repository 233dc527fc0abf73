//! Immutable logic terms.
//!
//! A [`Term`] is a closed sum over the shapes a Prolog engine can hand back:
//! atoms, integers, decimals, variables, compound structures and lists.
//! Terms never change after construction. Compound payloads live behind
//! [`Arc`], so cloning a term is cheap and terms can be shared across threads.
//!
//! Walking a term (equality, hashing, printing, dropping) uses an explicit
//! stack, so arbitrarily deep terms produced by recursive predicates do not
//! exhaust the call stack.

use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::{Error, Result};

/// Name of the cons functor when a list is printed or read in functional form.
pub const LIST_CONS: &str = "[|]";

static NEXT_VAR: AtomicU64 = AtomicU64::new(1);

/// A named constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(Arc<str>);

impl Atom {
    /// Create an atom. Any string is a valid atom name, including the empty one.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The atom's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A logic variable.
///
/// Variables have identity, not value: two variables are equal only when
/// they are the same slot, even if they carry the same display name.
#[derive(Debug, Clone)]
pub struct Var {
    id: u64,
    name: Option<Arc<str>>,
}

impl Var {
    /// Create a fresh variable with a display name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            id: NEXT_VAR.fetch_add(1, Ordering::Relaxed),
            name: Some(Arc::from(name)),
        }
    }

    /// Create a fresh anonymous variable.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            id: NEXT_VAR.fetch_add(1, Ordering::Relaxed),
            name: None,
        }
    }

    /// Opaque identity of this variable.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "_G{}", self.id),
        }
    }
}

/// The `name/arity` identity of a compound term's head.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Functor {
    name: Arc<str>,
    arity: usize,
}

impl Functor {
    /// Create a functor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] if `name` is empty.
    pub fn new(name: &str, arity: usize) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::invalid(format!(
                "functor name must not be empty (arity {arity})"
            )));
        }
        Ok(Self {
            name: Arc::from(name),
            arity,
        })
    }

    /// The functor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments structures with this functor carry.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for Functor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_atom(f, &self.name)?;
        write!(f, "/{}", self.arity)
    }
}

/// A functor applied to exactly `arity` arguments.
#[derive(Debug, Clone)]
pub struct Structure {
    functor: Functor,
    args: Arc<[Term]>,
}

impl Structure {
    /// Build a structure, checking the argument count against the functor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] if `args.len() != functor.arity()`.
    pub fn new(functor: Functor, args: Vec<Term>) -> Result<Self> {
        if args.len() != functor.arity() {
            return Err(Error::invalid(format!(
                "{functor} applied to {} arguments",
                args.len()
            )));
        }
        Ok(Self {
            functor,
            args: args.into(),
        })
    }

    /// The head functor.
    #[must_use]
    pub fn functor(&self) -> &Functor {
        &self.functor
    }

    /// The functor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.functor.name()
    }

    /// The arguments, in order.
    #[must_use]
    pub fn arguments(&self) -> &[Term] {
        &self.args
    }
}

/// A list: the empty list, or a head term followed by a tail.
///
/// Elements are stored flat and shared, so [`List::tail`] is a cheap view
/// rather than a copy. A list produced by an engine may be *partial*
/// (`[a|T]` with `T` unbound) or *improper* (`[a|b]`); such lists expose
/// their remainder through [`List::open_tail`] and refuse
/// [`List::elements`].
#[derive(Debug, Clone)]
pub struct List {
    items: Arc<[Term]>,
    start: usize,
    tail: Option<Arc<Term>>,
}

impl List {
    /// The empty list.
    #[must_use]
    pub fn nil() -> Self {
        Self {
            items: Arc::from(Vec::new()),
            start: 0,
            tail: None,
        }
    }

    /// A proper list of the given elements.
    #[must_use]
    pub fn from_vec(items: Vec<Term>) -> Self {
        Self {
            items: items.into(),
            start: 0,
            tail: None,
        }
    }

    /// A list of `items` followed by `tail`, i.e. `[i1, ..., in | tail]`.
    ///
    /// A list-valued tail is spliced in, so `[a | [b]]` is the proper list
    /// `[a, b]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] if `items` is empty and `tail` is not a
    /// list: such a value would not be a list at all.
    pub fn with_tail(mut items: Vec<Term>, tail: Term) -> Result<Self> {
        match tail {
            Term::List(rest) => {
                items.extend_from_slice(rest.items());
                Ok(Self {
                    items: items.into(),
                    start: 0,
                    tail: rest.tail.clone(),
                })
            }
            other if items.is_empty() => Err(Error::invalid(format!(
                "a list needs at least one element before the tail {other}"
            ))),
            other => Ok(Self {
                items: items.into(),
                start: 0,
                tail: Some(Arc::new(other)),
            }),
        }
    }

    /// True for `[]`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items().is_empty() && self.tail.is_none()
    }

    /// True if the list ends in `[]`.
    #[must_use]
    pub fn is_proper(&self) -> bool {
        self.tail.is_none()
    }

    /// Elements before the tail, whether or not the list is proper.
    #[must_use]
    pub fn items(&self) -> &[Term] {
        &self.items[self.start..]
    }

    /// The non-list remainder of a partial or improper list.
    #[must_use]
    pub fn open_tail(&self) -> Option<&Term> {
        self.tail.as_deref()
    }

    /// All elements of a proper list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedList`] for partial or improper lists.
    pub fn elements(&self) -> Result<&[Term]> {
        match &self.tail {
            None => Ok(self.items()),
            Some(tail) => Err(Error::MalformedList(format!(
                "{} is not a proper list (tail {tail})",
                Term::List(self.clone())
            ))),
        }
    }

    /// The first element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyList`] on `[]`.
    pub fn head(&self) -> Result<&Term> {
        self.items().first().ok_or(Error::EmptyList("head"))
    }

    /// Everything after the first element, as a list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyList`] on `[]`, and [`Error::MalformedList`] if
    /// the remainder is an open tail rather than a list.
    pub fn tail(&self) -> Result<List> {
        if self.items().is_empty() {
            return Err(Error::EmptyList("tail"));
        }
        if self.items().len() == 1 {
            if let Some(tail) = &self.tail {
                return Err(Error::MalformedList(format!("tail {tail} is not a list")));
            }
        }
        Ok(Self {
            items: Arc::clone(&self.items),
            start: self.start + 1,
            tail: self.tail.clone(),
        })
    }

    /// Everything after the first element, as a term (a list or an open tail).
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyList`] on `[]`.
    pub fn rest(&self) -> Result<Term> {
        if self.items().is_empty() {
            return Err(Error::EmptyList("tail"));
        }
        match (&self.tail, self.items().len()) {
            (Some(tail), 1) => Ok(Term::clone(tail)),
            _ => self.tail().map(Term::List),
        }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::nil()
    }
}

/// A logic term.
#[derive(Debug, Clone)]
pub enum Term {
    /// A named constant, e.g. `foo`.
    Atom(Atom),
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit float.
    Decimal(f64),
    /// A variable, unbound from the caller's point of view.
    Variable(Var),
    /// A compound term, e.g. `f(a, X)`.
    Structure(Structure),
    /// A list, e.g. `[1, 2 | T]`.
    List(List),
}

impl Term {
    /// An atom.
    #[must_use]
    pub fn atom(name: &str) -> Self {
        Self::Atom(Atom::new(name))
    }

    /// An integer.
    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    /// A decimal.
    #[must_use]
    pub fn decimal(value: f64) -> Self {
        Self::Decimal(value)
    }

    /// A fresh variable with a display name.
    #[must_use]
    pub fn var(name: &str) -> Self {
        Self::Variable(Var::new(name))
    }

    /// A compound term whose arity is the number of arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] if `name` is empty.
    pub fn compound(name: &str, args: Vec<Term>) -> Result<Self> {
        let functor = Functor::new(name, args.len())?;
        Structure::new(functor, args).map(Self::Structure)
    }

    /// A proper list.
    #[must_use]
    pub fn list(items: Vec<Term>) -> Self {
        Self::List(List::from_vec(items))
    }

    /// The empty list.
    #[must_use]
    pub fn nil() -> Self {
        Self::List(List::nil())
    }

    /// Name of an atom or a structure's functor.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Atom(atom) => Some(atom.name()),
            Self::Structure(s) => Some(s.name()),
            _ => None,
        }
    }

    /// Arguments of a structure; empty for every other shape.
    #[must_use]
    pub fn arguments(&self) -> &[Term] {
        match self {
            Self::Structure(s) => s.arguments(),
            _ => &[],
        }
    }

    /// The integer value, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The float value, if this is a decimal.
    #[must_use]
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// The list, if this is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Atoms and structures can be called as goals.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Atom(_) | Self::Structure(_))
    }

    /// True if no variable occurs anywhere in the term.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.variables().is_empty()
    }

    /// Distinct variables of the term in left-to-right first-occurrence order.
    #[must_use]
    pub fn variables(&self) -> IndexSet<Var> {
        let mut found = IndexSet::new();
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            match term {
                Self::Variable(v) => {
                    found.insert(v.clone());
                }
                Self::Structure(s) => stack.extend(s.arguments().iter().rev()),
                Self::List(l) => {
                    if let Some(tail) = l.open_tail() {
                        stack.push(tail);
                    }
                    stack.extend(l.items().iter().rev());
                }
                Self::Atom(_) | Self::Integer(_) | Self::Decimal(_) => {}
            }
        }
        found
    }

    fn is_nested(&self) -> bool {
        matches!(self, Self::Structure(_) | Self::List(_))
    }

    /// Move this term's nested children into `out`, leaving leaves behind.
    fn detach_children(&mut self, out: &mut Vec<Term>) {
        match self {
            Self::Structure(s) => detach_all(&mut s.args, out),
            Self::List(l) => {
                detach_all(&mut l.items, out);
                if let Some(tail) = l.tail.as_mut().and_then(Arc::get_mut) {
                    if tail.is_nested() {
                        out.push(mem::replace(tail, Term::Integer(0)));
                    }
                }
            }
            _ => {}
        }
    }
}

fn detach_all(items: &mut Arc<[Term]>, out: &mut Vec<Term>) {
    if let Some(items) = Arc::get_mut(items) {
        for item in items.iter_mut().filter(|t| t.is_nested()) {
            out.push(mem::replace(item, Term::Integer(0)));
        }
    }
}

fn dismantle(mut pending: Vec<Term>) {
    while let Some(mut term) = pending.pop() {
        term.detach_children(&mut pending);
    }
}

impl Drop for Structure {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_all(&mut self.args, &mut pending);
        dismantle(pending);
    }
}

impl Drop for List {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_all(&mut self.items, &mut pending);
        if let Some(tail) = self.tail.take().and_then(|t| Arc::try_unwrap(t).ok()) {
            pending.push(tail);
        }
        dismantle(pending);
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some(pair) = stack.pop() {
            match pair {
                (Self::Atom(a), Self::Atom(b)) if a == b => {}
                (Self::Integer(a), Self::Integer(b)) if a == b => {}
                (Self::Decimal(a), Self::Decimal(b)) if a.to_bits() == b.to_bits() => {}
                (Self::Variable(a), Self::Variable(b)) if a == b => {}
                (Self::Structure(a), Self::Structure(b)) if a.functor == b.functor => {
                    if !Arc::ptr_eq(&a.args, &b.args) {
                        stack.extend(a.arguments().iter().zip(b.arguments()));
                    }
                }
                (Self::List(a), Self::List(b)) if a.items().len() == b.items().len() => {
                    match (a.open_tail(), b.open_tail()) {
                        (None, None) => {}
                        (Some(x), Some(y)) => stack.push((x, y)),
                        _ => return false,
                    }
                    stack.extend(a.items().iter().zip(b.items()));
                }
                _ => return false,
            }
        }
        true
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            mem::discriminant(term).hash(state);
            match term {
                Self::Atom(a) => a.hash(state),
                Self::Integer(i) => i.hash(state),
                Self::Decimal(d) => d.to_bits().hash(state),
                Self::Variable(v) => v.hash(state),
                Self::Structure(s) => {
                    s.functor.hash(state);
                    stack.extend(s.arguments());
                }
                Self::List(l) => {
                    l.items().len().hash(state);
                    l.open_tail().is_some().hash(state);
                    stack.extend(l.items());
                    stack.extend(l.open_tail());
                }
            }
        }
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.functor == other.functor && self.arguments() == other.arguments()
    }
}

impl Eq for Structure {}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.items() == other.items() && self.open_tail() == other.open_tail()
    }
}

impl Eq for List {}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<&str> for Term {
    fn from(name: &str) -> Self {
        Self::atom(name)
    }
}

impl From<Atom> for Term {
    fn from(atom: Atom) -> Self {
        Self::Atom(atom)
    }
}

impl From<Var> for Term {
    fn from(var: Var) -> Self {
        Self::Variable(var)
    }
}

impl From<&Var> for Term {
    fn from(var: &Var) -> Self {
        Self::Variable(var.clone())
    }
}

impl From<Structure> for Term {
    fn from(s: Structure) -> Self {
        Self::Structure(s)
    }
}

impl From<List> for Term {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl FromIterator<Term> for List {
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

pub(crate) fn is_symbol_char(c: char) -> bool {
    "+-*/\\^<>=~:.?@#&$".contains(c)
}

/// True if `name` can be written without quotes.
pub(crate) fn is_plain_atom(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        Some(_) if name.chars().all(is_symbol_char) => name != "." && !name.contains("/*"),
        Some(_) => matches!(name, "[]" | "!" | ";" | "{}"),
        None => false,
    }
}

fn write_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_plain_atom(name) {
        return f.write_str(name);
    }
    f.write_char('\'')?;
    for c in name.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('\'')
}

fn write_decimal(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        return f.write_str("1.5NaN");
    }
    if value.is_infinite() {
        return f.write_str(if value > 0.0 { "1.0Inf" } else { "-1.0Inf" });
    }
    let text = format!("{value:?}");
    match text.find('e') {
        Some(pos) if !text[..pos].contains('.') => {
            write!(f, "{}.0{}", &text[..pos], &text[pos..])
        }
        _ => f.write_str(&text),
    }
}

enum Piece<'a> {
    Term(&'a Term),
    Text(&'static str),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Piece::Term(self)];
        while let Some(piece) = stack.pop() {
            let term = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Term(term) => term,
            };
            match term {
                Self::Atom(a) => write_atom(f, a.name())?,
                Self::Integer(i) => write!(f, "{i}")?,
                Self::Decimal(d) => write_decimal(f, *d)?,
                Self::Variable(v) => write!(f, "{v}")?,
                Self::Structure(s) => {
                    write_atom(f, s.name())?;
                    f.write_char('(')?;
                    stack.push(Piece::Text(")"));
                    push_separated(&mut stack, s.arguments());
                }
                Self::List(l) => {
                    f.write_char('[')?;
                    stack.push(Piece::Text("]"));
                    if let Some(tail) = l.open_tail() {
                        stack.push(Piece::Term(tail));
                        stack.push(Piece::Text("|"));
                    }
                    push_separated(&mut stack, l.items());
                }
            }
        }
        Ok(())
    }
}

fn push_separated<'a>(stack: &mut Vec<Piece<'a>>, terms: &'a [Term]) {
    for (i, term) in terms.iter().enumerate().rev() {
        stack.push(Piece::Term(term));
        if i > 0 {
            stack.push(Piece::Text(","));
        }
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Term::List(self.clone()), f)
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Term::Structure(self.clone()), f)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_atom(f, self.name())
    }
}

#[cfg(feature = "serde")]
mod ser {
    use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

    use super::{List, Term};

    impl Serialize for Term {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Term::Atom(a) => serializer.serialize_str(a.name()),
                Term::Integer(i) => serializer.serialize_i64(*i),
                Term::Decimal(d) => serializer.serialize_f64(*d),
                Term::Variable(v) => {
                    let mut map = serializer.serialize_map(Some(1))?;
                    map.serialize_entry("var", &v.to_string())?;
                    map.end()
                }
                Term::Structure(s) => {
                    let mut map = serializer.serialize_map(Some(2))?;
                    map.serialize_entry("functor", s.name())?;
                    map.serialize_entry("args", s.arguments())?;
                    map.end()
                }
                Term::List(l) => l.serialize(serializer),
            }
        }
    }

    impl Serialize for List {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self.open_tail() {
                None => {
                    let mut seq = serializer.serialize_seq(Some(self.items().len()))?;
                    for item in self.items() {
                        seq.serialize_element(item)?;
                    }
                    seq.end()
                }
                Some(tail) => {
                    let mut map = serializer.serialize_map(Some(2))?;
                    map.serialize_entry("items", self.items())?;
                    map.serialize_entry("tail", tail)?;
                    map.end()
                }
            }
        }
    }
}
