//! Arithmetic evaluation for `is/2` and the numeric comparisons.

use std::cmp::Ordering;

use indexmap::IndexSet;

use crate::error::{Error, Result};
use crate::functor::{FunctorId, FunctorRegistry};

use super::store::{Cell, CellRef, Store};

/// An evaluated number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(x) => x,
        }
    }

    pub(crate) fn compare(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

fn overflow() -> Error {
    Error::engine("evaluation error: integer overflow")
}

fn zero_divisor() -> Error {
    Error::engine("evaluation error: zero divisor")
}

fn need_int(op: &str, n: Num) -> Result<i64> {
    match n {
        Num::Int(i) => Ok(i),
        Num::Float(x) => Err(Error::engine(format!(
            "type error: `{op}` expects an integer, got {x}"
        ))),
    }
}

fn unary(op: &str, x: Num) -> Result<Num> {
    Ok(match (op, x) {
        ("-", Num::Int(i)) => Num::Int(i.checked_neg().ok_or_else(overflow)?),
        ("-", Num::Float(f)) => Num::Float(-f),
        ("+", n) => n,
        ("abs", Num::Int(i)) => Num::Int(i.checked_abs().ok_or_else(overflow)?),
        ("abs", Num::Float(f)) => Num::Float(f.abs()),
        ("sign", Num::Int(i)) => Num::Int(i.signum()),
        ("sign", Num::Float(f)) => Num::Float(if f == 0.0 { 0.0 } else { f.signum() }),
        ("float", n) => Num::Float(n.as_f64()),
        ("integer", Num::Int(i)) | ("truncate", Num::Int(i)) => Num::Int(i),
        ("integer", Num::Float(f)) => Num::Int(float_to_int(f.round())?),
        ("truncate", Num::Float(f)) => Num::Int(float_to_int(f.trunc())?),
        ("sqrt", n) => Num::Float(n.as_f64().sqrt()),
        _ => return Err(Error::engine(format!("type error: {op}/1 is not evaluable"))),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(f: f64) -> Result<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(overflow())
    }
}

fn binary(op: &str, a: Num, b: Num) -> Result<Num> {
    use Num::{Float, Int};
    Ok(match (op, a, b) {
        ("+", Int(x), Int(y)) => Int(x.checked_add(y).ok_or_else(overflow)?),
        ("-", Int(x), Int(y)) => Int(x.checked_sub(y).ok_or_else(overflow)?),
        ("*", Int(x), Int(y)) => Int(x.checked_mul(y).ok_or_else(overflow)?),
        ("+", x, y) => Float(x.as_f64() + y.as_f64()),
        ("-", x, y) => Float(x.as_f64() - y.as_f64()),
        ("*", x, y) => Float(x.as_f64() * y.as_f64()),
        ("/", _, Int(0)) => return Err(zero_divisor()),
        ("/", Int(x), Int(y)) if x.checked_rem(y) == Some(0) => {
            Int(x.checked_div(y).ok_or_else(overflow)?)
        }
        ("/", x, y) => Float(x.as_f64() / y.as_f64()),
        ("//", x, y) => {
            let (x, y) = (need_int(op, x)?, need_int(op, y)?);
            if y == 0 {
                return Err(zero_divisor());
            }
            Int(x.checked_div(y).ok_or_else(overflow)?)
        }
        ("mod", x, y) => {
            let (x, y) = (need_int(op, x)?, need_int(op, y)?);
            if y == 0 {
                return Err(zero_divisor());
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            Int(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
        }
        ("rem", x, y) => {
            let (x, y) = (need_int(op, x)?, need_int(op, y)?);
            if y == 0 {
                return Err(zero_divisor());
            }
            Int(x.checked_rem(y).ok_or_else(overflow)?)
        }
        ("min", x, y) => match x.compare(y) {
            Some(Ordering::Greater) => y,
            _ => x,
        },
        ("max", x, y) => match x.compare(y) {
            Some(Ordering::Less) => y,
            _ => x,
        },
        ("^", Int(x), Int(y)) => {
            let exp = u32::try_from(y).map_err(|_| {
                Error::engine(format!("evaluation error: {x}^{y} is not an integer"))
            })?;
            Int(x.checked_pow(exp).ok_or_else(overflow)?)
        }
        ("^" | "**", x, y) => Float(x.as_f64().powf(y.as_f64())),
        _ => return Err(Error::engine(format!("type error: {op}/2 is not evaluable"))),
    })
}

enum Task {
    Eval(CellRef),
    Apply(FunctorId, usize),
}

/// Evaluate an arithmetic expression held on the heap, visiting at most
/// `limit` nodes.
pub(crate) fn eval(
    store: &Store,
    registry: &FunctorRegistry,
    expr: CellRef,
    limit: usize,
) -> Result<Num> {
    let mut tasks = vec![Task::Eval(expr)];
    let mut values: Vec<Num> = Vec::new();
    // Operators whose arguments are still being evaluated.
    let mut path: IndexSet<CellRef> = IndexSet::new();
    let mut visited = 0usize;
    while let Some(task) = tasks.pop() {
        match task {
            Task::Eval(cell) => {
                visited += 1;
                if visited > limit {
                    return Err(Error::TermTooLarge { limit });
                }
                let cell = store.deref(cell);
                match store.cell(cell) {
                    Cell::Int(i) => values.push(Num::Int(*i)),
                    Cell::Float(x) => values.push(Num::Float(*x)),
                    Cell::Ref(_) => {
                        return Err(Error::engine("instantiation error in arithmetic"));
                    }
                    Cell::Atom(f) => {
                        let name = registry.resolve(*f)?.name();
                        values.push(match name {
                            "pi" => Num::Float(std::f64::consts::PI),
                            "e" => Num::Float(std::f64::consts::E),
                            "inf" => Num::Float(f64::INFINITY),
                            "nan" => Num::Float(f64::NAN),
                            other => {
                                return Err(Error::engine(format!(
                                    "type error: {other}/0 is not evaluable"
                                )))
                            }
                        });
                    }
                    Cell::Str(..) if path.contains(&cell) => {
                        return Err(Error::engine("type error: cyclic arithmetic expression"));
                    }
                    Cell::Str(f, args) if matches!(args.len(), 1 | 2) => {
                        path.insert(cell);
                        tasks.push(Task::Apply(*f, args.len()));
                        tasks.extend(args.iter().rev().map(|&a| Task::Eval(a)));
                    }
                    Cell::Str(f, _) => {
                        return Err(Error::engine(format!(
                            "type error: {} is not evaluable",
                            registry.resolve(*f)?
                        )));
                    }
                    Cell::Nil | Cell::Cons(..) => {
                        return Err(Error::engine("type error: lists are not evaluable"));
                    }
                }
            }
            Task::Apply(f, arity) => {
                path.pop();
                let name = registry.resolve(f)?.name();
                let result = if arity == 1 {
                    let x = values.pop().ok_or_else(|| Error::engine("arithmetic stack underflow"))?;
                    unary(name, x)?
                } else {
                    let y = values.pop().ok_or_else(|| Error::engine("arithmetic stack underflow"))?;
                    let x = values.pop().ok_or_else(|| Error::engine("arithmetic stack underflow"))?;
                    binary(name, x, y)?
                };
                values.push(result);
            }
        }
    }
    values
        .pop()
        .ok_or_else(|| Error::engine("empty arithmetic expression"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(build: impl FnOnce(&mut Store, &mut FunctorRegistry) -> CellRef) -> Result<Num> {
        let mut store = Store::default();
        let mut registry = FunctorRegistry::new();
        let expr = build(&mut store, &mut registry);
        eval(&store, &registry, expr, 1_000)
    }

    fn op(store: &mut Store, registry: &mut FunctorRegistry, name: &str, args: &[CellRef]) -> CellRef {
        let f = registry.intern(name, args.len()).unwrap();
        store.alloc(Cell::Str(f, args.into())).unwrap()
    }

    #[test]
    fn test_integer_arithmetic() {
        let n = eval_str(|s, r| {
            let a = s.alloc(Cell::Int(6)).unwrap();
            let b = s.alloc(Cell::Int(7)).unwrap();
            let c = s.alloc(Cell::Int(2)).unwrap();
            let mul = op(s, r, "*", &[a, b]);
            op(s, r, "-", &[mul, c])
        })
        .unwrap();
        assert_eq!(n, Num::Int(40));
    }

    #[test]
    fn test_division_prefers_exact_integers() {
        let exact = eval_str(|s, r| {
            let a = s.alloc(Cell::Int(8)).unwrap();
            let b = s.alloc(Cell::Int(2)).unwrap();
            op(s, r, "/", &[a, b])
        });
        assert_eq!(exact.unwrap(), Num::Int(4));
        assert_eq!(binary("/", Num::Int(7), Num::Int(2)).unwrap(), Num::Float(3.5));
    }

    #[test]
    fn test_mod_follows_divisor_sign() {
        assert_eq!(binary("mod", Num::Int(-7), Num::Int(2)).unwrap(), Num::Int(1));
        assert_eq!(binary("rem", Num::Int(-7), Num::Int(2)).unwrap(), Num::Int(-1));
    }

    #[test]
    fn test_errors() {
        assert!(binary("/", Num::Int(1), Num::Int(0)).is_err());
        assert!(binary("+", Num::Int(i64::MAX), Num::Int(1)).is_err());
        assert!(binary("mod", Num::Float(1.0), Num::Int(2)).is_err());
        assert!(unary("foo", Num::Int(1)).is_err());
        let unbound = eval_str(|s, _| s.new_var().unwrap());
        assert!(matches!(unbound, Err(Error::Engine(_))));
    }

    #[test]
    fn test_cyclic_expression_is_an_error() {
        // Y = Y + 1
        let cyclic = eval_str(|s, r| {
            let y = s.new_var().unwrap();
            let one = s.alloc(Cell::Int(1)).unwrap();
            let plus = op(s, r, "+", &[y, one]);
            assert!(s.unify(y, plus));
            plus
        });
        assert!(matches!(cyclic, Err(Error::Engine(ref m)) if m.contains("cyclic")));
    }

    #[test]
    fn test_shared_subexpressions_are_not_cycles() {
        let n = eval_str(|s, r| {
            let two = s.alloc(Cell::Int(2)).unwrap();
            let sq = op(s, r, "*", &[two, two]);
            op(s, r, "+", &[sq, sq])
        })
        .unwrap();
        assert_eq!(n, Num::Int(8));
    }

    #[test]
    fn test_node_limit() {
        let mut store = Store::default();
        let mut registry = FunctorRegistry::new();
        let mut expr = store.alloc(Cell::Int(1)).unwrap();
        for _ in 0..10 {
            let one = store.alloc(Cell::Int(1)).unwrap();
            expr = op(&mut store, &mut registry, "+", &[expr, one]);
        }
        assert!(matches!(
            eval(&store, &registry, expr, 5),
            Err(Error::TermTooLarge { limit: 5 })
        ));
        assert_eq!(eval(&store, &registry, expr, 100).unwrap(), Num::Int(11));
    }
}
