//! Conversion between model terms and engine handles.
//!
//! Lowering builds an engine term from a [`Term`]; lifting reads an engine
//! term back into a [`Term`]. Both directions walk the term with an explicit
//! task stack, so the depth of the input never touches the call stack.
//!
//! A [`Converter`] remembers which engine variable each model variable was
//! lowered to. Lifting an unbound engine variable that came from a model
//! variable yields that same model variable; any other unbound engine
//! variable becomes a fresh [`Var`] that stays stable for one solution.

use std::hash::Hash;

use indexmap::IndexMap;
use log::trace;

use crate::config::SessionConfig;
use crate::engine::{Engine, NativeType};
use crate::error::{Error, Result};
use crate::functor::FunctorId;
use crate::term::{Functor, List, Structure, Term, Var};

enum Lower<'a> {
    Visit(&'a Term),
    Compound(FunctorId, usize),
    List(usize, bool),
}

enum Lift<H> {
    Visit(H),
    Compound(Functor),
    List(usize, bool),
}

/// Bidirectional term converter for one engine session.
#[derive(Debug)]
pub struct Converter<H> {
    max_list_length: usize,
    max_term_size: usize,
    bound: IndexMap<Var, H>,
    origin: IndexMap<H, Var>,
    fresh: IndexMap<H, Var>,
}

impl<H: Copy + Eq + Hash> Converter<H> {
    /// A converter enforcing the limits of `config`.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            max_list_length: config.max_list_length,
            max_term_size: config.max_term_size,
            bound: IndexMap::new(),
            origin: IndexMap::new(),
            fresh: IndexMap::new(),
        }
    }

    /// Build `term` inside the engine.
    ///
    /// Every occurrence of the same [`Var`] maps to the same engine variable,
    /// including occurrences in earlier `lower` calls on this converter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedTermShape`] if the engine cannot represent
    /// part of the term, or any error the engine reports while allocating.
    pub fn lower<E>(&mut self, engine: &mut E, term: &Term) -> Result<H>
    where
        E: Engine<Handle = H>,
    {
        let mut tasks = vec![Lower::Visit(term)];
        let mut results: Vec<H> = Vec::new();
        while let Some(task) = tasks.pop() {
            let handle = match task {
                Lower::Visit(Term::Atom(atom)) => engine.make_atom(atom.name())?,
                Lower::Visit(Term::Integer(i)) => engine.make_integer(*i)?,
                Lower::Visit(Term::Decimal(x)) => engine.make_float(*x)?,
                Lower::Visit(Term::Variable(var)) => match self.bound.get(var) {
                    Some(&handle) => handle,
                    None => {
                        let handle = engine.make_variable()?;
                        self.bound.insert(var.clone(), handle);
                        self.origin.insert(handle, var.clone());
                        handle
                    }
                },
                Lower::Visit(Term::Structure(s)) => {
                    let functor = engine.intern_functor(s.name(), s.arguments().len())?;
                    tasks.push(Lower::Compound(functor, s.arguments().len()));
                    tasks.extend(s.arguments().iter().rev().map(Lower::Visit));
                    continue;
                }
                Lower::Visit(Term::List(list)) => {
                    tasks.push(Lower::List(list.items().len(), list.open_tail().is_some()));
                    if let Some(tail) = list.open_tail() {
                        tasks.push(Lower::Visit(tail));
                    }
                    tasks.extend(list.items().iter().rev().map(Lower::Visit));
                    continue;
                }
                Lower::Compound(functor, arity) => {
                    let args = results.split_off(results.len() - arity);
                    engine.make_compound(functor, &args)?
                }
                Lower::List(count, open) => {
                    let mut acc = if open {
                        pop(&mut results)?
                    } else {
                        engine.make_nil()?
                    };
                    let items = results.split_off(results.len() - count);
                    for &item in items.iter().rev() {
                        acc = engine.make_list(item, acc)?;
                    }
                    acc
                }
            };
            results.push(handle);
        }
        trace!("lowered {term}");
        pop(&mut results)
    }

    /// Read the engine term behind `handle` into a model term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListTooLong`] when a list runs past the configured
    /// length (cyclic lists included), [`Error::TermTooLarge`] when the term
    /// has more nodes than the configured budget (cyclic compounds included),
    /// or any error the engine reports while reading.
    pub fn lift<E>(&mut self, engine: &E, handle: H) -> Result<Term>
    where
        E: Engine<Handle = H>,
    {
        let mut tasks = vec![Lift::Visit(handle)];
        let mut results: Vec<Term> = Vec::new();
        let mut nodes = 0usize;
        while let Some(task) = tasks.pop() {
            let term = match task {
                Lift::Visit(handle) => {
                    nodes += 1;
                    if nodes > self.max_term_size {
                        return Err(Error::TermTooLarge {
                            limit: self.max_term_size,
                        });
                    }
                    let handle = engine.deref(handle)?;
                    match engine.type_of(handle)? {
                        NativeType::Variable => Term::Variable(self.variable(handle)),
                        NativeType::Integer => Term::Integer(engine.read_integer(handle)?),
                        NativeType::Float => Term::Decimal(engine.read_float(handle)?),
                        NativeType::Atom => Term::atom(&engine.read_atom_name(handle)?),
                        NativeType::Nil => Term::nil(),
                        NativeType::Compound => {
                            let (functor, args) = engine.read_compound(handle)?;
                            tasks.push(Lift::Compound(engine.functor(functor)?));
                            tasks.extend(args.into_iter().rev().map(Lift::Visit));
                            continue;
                        }
                        NativeType::List => {
                            let (items, tail) = self.walk_list(engine, handle)?;
                            tasks.push(Lift::List(items.len(), tail.is_some()));
                            tasks.extend(tail.map(Lift::Visit));
                            tasks.extend(items.into_iter().rev().map(Lift::Visit));
                            continue;
                        }
                    }
                }
                Lift::Compound(functor) => {
                    let args = results.split_off(results.len() - functor.arity());
                    Term::Structure(Structure::new(functor, args)?)
                }
                Lift::List(count, open) => {
                    let tail = if open { Some(pop(&mut results)?) } else { None };
                    let items = results.split_off(results.len() - count);
                    match tail {
                        Some(tail) => Term::List(List::with_tail(items, tail)?),
                        None => Term::List(List::from_vec(items)),
                    }
                }
            };
            results.push(term);
        }
        let term = pop(&mut results)?;
        trace!("lifted {term}");
        Ok(term)
    }

    /// Collect the heads of a chain of list cells, stopping at `[]` or at the
    /// first tail that is not a list cell.
    fn walk_list<E>(&self, engine: &E, handle: H) -> Result<(Vec<H>, Option<H>)>
    where
        E: Engine<Handle = H>,
    {
        let mut items = Vec::new();
        let mut cell = handle;
        loop {
            if items.len() >= self.max_list_length {
                return Err(Error::ListTooLong {
                    limit: self.max_list_length,
                });
            }
            items.push(engine.read_list_head(cell)?);
            cell = engine.deref(engine.read_list_tail(cell)?)?;
            match engine.type_of(cell)? {
                NativeType::List => {}
                NativeType::Nil => return Ok((items, None)),
                _ => return Ok((items, Some(cell))),
            }
        }
    }

    fn variable(&mut self, handle: H) -> Var {
        if let Some(var) = self.origin.get(&handle) {
            return var.clone();
        }
        self.fresh.entry(handle).or_insert_with(Var::fresh).clone()
    }

    /// The engine variable a model variable was lowered to.
    #[must_use]
    pub fn handle_of(&self, var: &Var) -> Option<H> {
        self.bound.get(var).copied()
    }

    /// Model variables lowered so far, in first-lowered order.
    pub fn variables(&self) -> impl Iterator<Item = &Var> {
        self.bound.keys()
    }

    /// Forget the fresh variables handed out for the previous solution.
    pub fn begin_solution(&mut self) {
        self.fresh.clear();
    }

    /// Forget every mapping; needed once the engine releases its terms.
    pub fn clear(&mut self) {
        self.bound.clear();
        self.origin.clear();
        self.fresh.clear();
    }
}

fn pop<T>(results: &mut Vec<T>) -> Result<T> {
    results
        .pop()
        .ok_or_else(|| Error::engine("term conversion stack underflow"))
}
