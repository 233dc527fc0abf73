//! Heap cells, the binding trail, unification and clause templates.

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::functor::{FunctorId, FunctorRegistry};
use crate::term::Term;

/// Index of a heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CellRef(u32);

impl CellRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One heap cell. An unbound variable is a `Ref` pointing at itself.
#[derive(Debug, Clone)]
pub(crate) enum Cell {
    Ref(CellRef),
    Atom(FunctorId),
    Int(i64),
    Float(f64),
    Str(FunctorId, Box<[CellRef]>),
    Nil,
    Cons(CellRef, CellRef),
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    cells: Vec<Cell>,
    trail: Vec<CellRef>,
}

impl Store {
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn trail_len(&self) -> usize {
        self.trail.len()
    }

    /// Drop every cell and binding.
    pub(crate) fn clear(&mut self) {
        self.cells.clear();
        self.trail.clear();
    }

    pub(crate) fn contains(&self, cell: CellRef) -> bool {
        cell.index() < self.cells.len()
    }

    pub(crate) fn cell(&self, cell: CellRef) -> &Cell {
        &self.cells[cell.index()]
    }

    pub(crate) fn alloc(&mut self, cell: Cell) -> Result<CellRef> {
        let index = u32::try_from(self.cells.len())
            .map_err(|_| Error::engine("heap exhausted"))?;
        self.cells.push(cell);
        Ok(CellRef(index))
    }

    pub(crate) fn new_var(&mut self) -> Result<CellRef> {
        let index = u32::try_from(self.cells.len())
            .map_err(|_| Error::engine("heap exhausted"))?;
        self.cells.push(Cell::Ref(CellRef(index)));
        Ok(CellRef(index))
    }

    pub(crate) fn deref(&self, mut cell: CellRef) -> CellRef {
        while let Cell::Ref(next) = self.cells[cell.index()] {
            if next == cell {
                break;
            }
            cell = next;
        }
        cell
    }

    pub(crate) fn is_unbound(&self, cell: CellRef) -> bool {
        matches!(self.cell(self.deref(cell)), Cell::Ref(_))
    }

    fn bind(&mut self, var: CellRef, value: CellRef) {
        self.cells[var.index()] = Cell::Ref(value);
        self.trail.push(var);
    }

    /// Undo bindings made after the trail had `mark` entries.
    pub(crate) fn undo_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(var) = self.trail.pop() {
                self.cells[var.index()] = Cell::Ref(var);
            }
        }
    }

    /// Undo bindings and discard cells allocated after a choice point.
    pub(crate) fn restore(&mut self, heap_len: usize, trail_len: usize) {
        self.undo_to(trail_len);
        self.cells.truncate(heap_len);
    }

    /// Unify two terms, recording every binding on the trail. On failure the
    /// caller is expected to undo to its own mark.
    pub(crate) fn unify(&mut self, a: CellRef, b: CellRef) -> bool {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let a = self.deref(a);
            let b = self.deref(b);
            if a == b {
                continue;
            }
            let (var, value) = match (self.cell(a), self.cell(b)) {
                // Bind the younger variable so references point downwards.
                (Cell::Ref(_), Cell::Ref(_)) => {
                    if a > b {
                        (a, b)
                    } else {
                        (b, a)
                    }
                }
                (Cell::Ref(_), _) => (a, b),
                (_, Cell::Ref(_)) => (b, a),
                (Cell::Atom(x), Cell::Atom(y)) if x == y => continue,
                (Cell::Int(x), Cell::Int(y)) if x == y => continue,
                (Cell::Float(x), Cell::Float(y)) if x.to_bits() == y.to_bits() => continue,
                (Cell::Nil, Cell::Nil) => continue,
                (Cell::Cons(h1, t1), Cell::Cons(h2, t2)) => {
                    pending.push((*t1, *t2));
                    pending.push((*h1, *h2));
                    continue;
                }
                (Cell::Str(f, xs), Cell::Str(g, ys)) if f == g && xs.len() == ys.len() => {
                    pending.extend(xs.iter().copied().zip(ys.iter().copied()).rev());
                    continue;
                }
                _ => return false,
            };
            self.bind(var, value);
        }
        true
    }

    /// Structural identity (`==`): variables match only themselves.
    pub(crate) fn identical(&self, a: CellRef, b: CellRef) -> bool {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let a = self.deref(a);
            let b = self.deref(b);
            if a == b {
                continue;
            }
            match (self.cell(a), self.cell(b)) {
                (Cell::Atom(x), Cell::Atom(y)) if x == y => {}
                (Cell::Int(x), Cell::Int(y)) if x == y => {}
                (Cell::Float(x), Cell::Float(y)) if x.to_bits() == y.to_bits() => {}
                (Cell::Nil, Cell::Nil) => {}
                (Cell::Cons(h1, t1), Cell::Cons(h2, t2)) => {
                    pending.push((*t1, *t2));
                    pending.push((*h1, *h2));
                }
                (Cell::Str(f, xs), Cell::Str(g, ys)) if f == g && xs.len() == ys.len() => {
                    pending.extend(xs.iter().copied().zip(ys.iter().copied()));
                }
                _ => return false,
            }
        }
        true
    }

    /// Copy a heap term into a heap-independent template.
    ///
    /// Fails with [`Error::TermTooLarge`] if the copy would exceed `limit`
    /// nodes, and with an engine error if the term is cyclic.
    pub(crate) fn to_template(&self, root: CellRef, limit: usize) -> Result<Template> {
        let mut out = Template::default();
        let mut vars: IndexMap<CellRef, u32> = IndexMap::new();
        let mut results: Vec<u32> = Vec::new();
        // Compound cells whose children are still being copied.
        let mut path: IndexSet<CellRef> = IndexSet::new();
        let mut visited = 0usize;
        let mut stack = vec![(root, false)];
        while let Some((cell, expanded)) = stack.pop() {
            let cell = self.deref(cell);
            if !expanded {
                visited += 1;
                if visited > limit {
                    return Err(Error::TermTooLarge { limit });
                }
            }
            let node = match (self.cell(cell), expanded) {
                (Cell::Str(f, xs), true) => {
                    path.pop();
                    let start = results.len() - xs.len();
                    let (offset, len) = out.push_args(results.drain(start..))?;
                    Node::Str(*f, offset, len)
                }
                (Cell::Cons(..), true) => {
                    path.pop();
                    let tail = results.pop().unwrap_or_default();
                    let head = results.pop().unwrap_or_default();
                    Node::Cons(head, tail)
                }
                (Cell::Str(..) | Cell::Cons(..), false) if !path.insert(cell) => {
                    return Err(Error::engine("type error: cannot copy a cyclic term"));
                }
                (Cell::Str(_, xs), false) => {
                    stack.push((cell, true));
                    stack.extend(xs.iter().rev().map(|&x| (x, false)));
                    continue;
                }
                (Cell::Cons(h, t), false) => {
                    stack.push((cell, true));
                    stack.push((*t, false));
                    stack.push((*h, false));
                    continue;
                }
                (Cell::Ref(_), _) => {
                    let next = u32::try_from(vars.len())
                        .map_err(|_| Error::engine("too many variables in clause"))?;
                    Node::Var(*vars.entry(cell).or_insert(next))
                }
                (Cell::Atom(f), _) => Node::Atom(*f),
                (Cell::Int(i), _) => Node::Int(*i),
                (Cell::Float(x), _) => Node::Float(*x),
                (Cell::Nil, _) => Node::Nil,
            };
            results.push(out.push_node(node)?);
        }
        out.vars = u32::try_from(vars.len()).map_err(|_| Error::engine("too many variables"))?;
        Ok(out)
    }

    /// Allocate a fresh copy of a template, returning the cell for every node.
    pub(crate) fn instantiate(&mut self, template: &Template) -> Result<Vec<CellRef>> {
        let mut vars: Vec<Option<CellRef>> = vec![None; template.vars as usize];
        let mut refs: Vec<CellRef> = Vec::with_capacity(template.nodes.len());
        for node in &template.nodes {
            let cell = match *node {
                Node::Var(slot) => match vars[slot as usize] {
                    Some(cell) => cell,
                    None => {
                        let cell = self.new_var()?;
                        vars[slot as usize] = Some(cell);
                        cell
                    }
                },
                Node::Atom(f) => self.alloc(Cell::Atom(f))?,
                Node::Int(i) => self.alloc(Cell::Int(i))?,
                Node::Float(x) => self.alloc(Cell::Float(x))?,
                Node::Nil => self.alloc(Cell::Nil)?,
                Node::Cons(h, t) => self.alloc(Cell::Cons(refs[h as usize], refs[t as usize]))?,
                Node::Str(f, offset, len) => {
                    let args = template.args(offset, len).iter().map(|&i| refs[i as usize]).collect();
                    self.alloc(Cell::Str(f, args))?
                }
            };
            refs.push(cell);
        }
        Ok(refs)
    }
}

/// A template node. Children always precede their parent, so a template can
/// be instantiated in one forward pass.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Node {
    Var(u32),
    Atom(FunctorId),
    Int(i64),
    Float(f64),
    Str(FunctorId, u32, u32),
    Nil,
    Cons(u32, u32),
}

/// A term stored outside the heap, e.g. a database clause.
#[derive(Debug, Clone, Default)]
pub(crate) struct Template {
    nodes: Vec<Node>,
    args: Vec<u32>,
    vars: u32,
}

impl Template {
    /// Build a template straight from a model term.
    pub(crate) fn from_term(term: &Term, registry: &mut FunctorRegistry) -> Result<Self> {
        enum Task<'a> {
            Visit(&'a Term),
            Build(FunctorId, usize),
            Cons(usize, bool),
        }

        let mut out = Self::default();
        let mut vars: IndexMap<u64, u32> = IndexMap::new();
        let mut results: Vec<u32> = Vec::new();
        let mut tasks = vec![Task::Visit(term)];
        while let Some(task) = tasks.pop() {
            let node = match task {
                Task::Visit(Term::Atom(a)) => Node::Atom(registry.intern(a.name(), 0)?),
                Task::Visit(Term::Integer(i)) => Node::Int(*i),
                Task::Visit(Term::Decimal(x)) => Node::Float(*x),
                Task::Visit(Term::Variable(v)) => {
                    let next = u32::try_from(vars.len())
                        .map_err(|_| Error::engine("too many variables in clause"))?;
                    Node::Var(*vars.entry(v.id()).or_insert(next))
                }
                Task::Visit(Term::Structure(s)) => {
                    let f = registry.intern_functor(s.functor())?;
                    tasks.push(Task::Build(f, s.arguments().len()));
                    tasks.extend(s.arguments().iter().rev().map(Task::Visit));
                    continue;
                }
                Task::Visit(Term::List(l)) => {
                    tasks.push(Task::Cons(l.items().len(), l.open_tail().is_some()));
                    if let Some(tail) = l.open_tail() {
                        tasks.push(Task::Visit(tail));
                    }
                    tasks.extend(l.items().iter().rev().map(Task::Visit));
                    continue;
                }
                Task::Build(f, arity) => {
                    let start = results.len() - arity;
                    let (offset, len) = out.push_args(results.drain(start..))?;
                    Node::Str(f, offset, len)
                }
                Task::Cons(count, open) => {
                    let mut acc = if open {
                        results.pop().unwrap_or_default()
                    } else {
                        out.push_node(Node::Nil)?
                    };
                    let start = results.len() - count;
                    let items: Vec<u32> = results.drain(start..).collect();
                    for &item in items.iter().rev() {
                        acc = out.push_node(Node::Cons(item, acc))?;
                    }
                    results.push(acc);
                    continue;
                }
            };
            results.push(out.push_node(node)?);
        }
        out.vars = u32::try_from(vars.len()).map_err(|_| Error::engine("too many variables"))?;
        Ok(out)
    }

    fn push_node(&mut self, node: Node) -> Result<u32> {
        let index = u32::try_from(self.nodes.len())
            .map_err(|_| Error::engine("template too large"))?;
        self.nodes.push(node);
        Ok(index)
    }

    fn push_args(&mut self, args: impl Iterator<Item = u32>) -> Result<(u32, u32)> {
        let offset = self.args.len();
        self.args.extend(args);
        let len = self.args.len() - offset;
        let offset = u32::try_from(offset).map_err(|_| Error::engine("template too large"))?;
        let len = u32::try_from(len).map_err(|_| Error::engine("template too large"))?;
        Ok((offset, len))
    }

    fn args(&self, offset: u32, len: u32) -> &[u32] {
        &self.args[offset as usize..(offset + len) as usize]
    }

    /// Index of the root node.
    pub(crate) fn root(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub(crate) fn node(&self, index: usize) -> Node {
        self.nodes[index]
    }

    /// Argument node indices of a `Str` node.
    pub(crate) fn children(&self, index: usize) -> &[u32] {
        match self.nodes[index] {
            Node::Str(_, offset, len) => self.args(offset, len),
            _ => &[],
        }
    }
}
