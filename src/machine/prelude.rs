//! List predicates every session starts with.

use indexmap::IndexMap;

use crate::error::Result;
use crate::term::{List, Term, Var};

/// Variables scoped to one clause.
#[derive(Default)]
struct Scope(IndexMap<&'static str, Var>);

impl Scope {
    fn v(&mut self, name: &'static str) -> Term {
        Term::Variable(self.0.entry(name).or_insert_with(|| Var::new(name)).clone())
    }

    fn anon(&mut self) -> Term {
        Term::Variable(Var::fresh())
    }
}

fn s(name: &str, args: Vec<Term>) -> Result<Term> {
    Term::compound(name, args)
}

fn cons(head: Term, tail: Term) -> Result<Term> {
    List::with_tail(vec![head], tail).map(Term::List)
}

fn rule(head: Term, body: Vec<Term>) -> Result<Term> {
    let mut goals = body.into_iter().rev();
    let Some(last) = goals.next() else {
        return Ok(head);
    };
    let body = goals.try_fold(last, |rest, goal| s(",", vec![goal, rest]))?;
    s(":-", vec![head, body])
}

/// `append/3`, `member/2`, `memberchk/2`, `length/2`, `reverse/2`,
/// `nth0/3` and `last/2`, with their `$`-prefixed helpers.
pub(crate) fn clauses() -> Result<Vec<Term>> {
    let mut out = Vec::new();

    // append([], L, L).
    let mut c = Scope::default();
    out.push(s("append", vec![Term::nil(), c.v("L"), c.v("L")])?);

    // append([H|T], L, [H|R]) :- append(T, L, R).
    let mut c = Scope::default();
    out.push(rule(
        s(
            "append",
            vec![cons(c.v("H"), c.v("T"))?, c.v("L"), cons(c.v("H"), c.v("R"))?],
        )?,
        vec![s("append", vec![c.v("T"), c.v("L"), c.v("R")])?],
    )?);

    // member(X, [X|_]).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(s("member", vec![c.v("X"), cons(c.v("X"), anon)?])?);

    // member(X, [_|T]) :- member(X, T).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(rule(
        s("member", vec![c.v("X"), cons(anon, c.v("T"))?])?,
        vec![s("member", vec![c.v("X"), c.v("T")])?],
    )?);

    // memberchk(X, L) :- member(X, L), !.
    let mut c = Scope::default();
    out.push(rule(
        s("memberchk", vec![c.v("X"), c.v("L")])?,
        vec![s("member", vec![c.v("X"), c.v("L")])?, Term::atom("!")],
    )?);

    // length(L, N) :- integer(N), !, N >= 0, '$make_list'(N, L).
    let mut c = Scope::default();
    out.push(rule(
        s("length", vec![c.v("L"), c.v("N")])?,
        vec![
            s("integer", vec![c.v("N")])?,
            Term::atom("!"),
            s(">=", vec![c.v("N"), Term::integer(0)])?,
            s("$make_list", vec![c.v("N"), c.v("L")])?,
        ],
    )?);

    // length(L, N) :- '$length'(L, 0, N).
    let mut c = Scope::default();
    out.push(rule(
        s("length", vec![c.v("L"), c.v("N")])?,
        vec![s("$length", vec![c.v("L"), Term::integer(0), c.v("N")])?],
    )?);

    // '$make_list'(0, []) :- !.
    out.push(rule(
        s("$make_list", vec![Term::integer(0), Term::nil()])?,
        vec![Term::atom("!")],
    )?);

    // '$make_list'(N, [_|T]) :- M is N - 1, '$make_list'(M, T).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(rule(
        s("$make_list", vec![c.v("N"), cons(anon, c.v("T"))?])?,
        vec![
            s("is", vec![c.v("M"), s("-", vec![c.v("N"), Term::integer(1)])?])?,
            s("$make_list", vec![c.v("M"), c.v("T")])?,
        ],
    )?);

    // '$length'([], N, N).
    let mut c = Scope::default();
    out.push(s("$length", vec![Term::nil(), c.v("N"), c.v("N")])?);

    // '$length'([_|T], N0, N) :- N1 is N0 + 1, '$length'(T, N1, N).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(rule(
        s("$length", vec![cons(anon, c.v("T"))?, c.v("N0"), c.v("N")])?,
        vec![
            s("is", vec![c.v("N1"), s("+", vec![c.v("N0"), Term::integer(1)])?])?,
            s("$length", vec![c.v("T"), c.v("N1"), c.v("N")])?,
        ],
    )?);

    // reverse(L, R) :- '$reverse'(L, [], R).
    let mut c = Scope::default();
    out.push(rule(
        s("reverse", vec![c.v("L"), c.v("R")])?,
        vec![s("$reverse", vec![c.v("L"), Term::nil(), c.v("R")])?],
    )?);

    // '$reverse'([], A, A).
    let mut c = Scope::default();
    out.push(s("$reverse", vec![Term::nil(), c.v("A"), c.v("A")])?);

    // '$reverse'([H|T], A, R) :- '$reverse'(T, [H|A], R).
    let mut c = Scope::default();
    out.push(rule(
        s("$reverse", vec![cons(c.v("H"), c.v("T"))?, c.v("A"), c.v("R")])?,
        vec![s("$reverse", vec![c.v("T"), cons(c.v("H"), c.v("A"))?, c.v("R")])?],
    )?);

    // nth0(I, L, E) :- '$nth'(L, 0, I, E).
    let mut c = Scope::default();
    out.push(rule(
        s("nth0", vec![c.v("I"), c.v("L"), c.v("E")])?,
        vec![s("$nth", vec![c.v("L"), Term::integer(0), c.v("I"), c.v("E")])?],
    )?);

    // '$nth'([E|_], I, I, E).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(s("$nth", vec![cons(c.v("E"), anon)?, c.v("I"), c.v("I"), c.v("E")])?);

    // '$nth'([_|T], I0, I, E) :- I1 is I0 + 1, '$nth'(T, I1, I, E).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(rule(
        s("$nth", vec![cons(anon, c.v("T"))?, c.v("I0"), c.v("I"), c.v("E")])?,
        vec![
            s("is", vec![c.v("I1"), s("+", vec![c.v("I0"), Term::integer(1)])?])?,
            s("$nth", vec![c.v("T"), c.v("I1"), c.v("I"), c.v("E")])?,
        ],
    )?);

    // last([X|Xs], L) :- '$last'(Xs, X, L).
    let mut c = Scope::default();
    out.push(rule(
        s("last", vec![cons(c.v("X"), c.v("Xs"))?, c.v("L")])?,
        vec![s("$last", vec![c.v("Xs"), c.v("X"), c.v("L")])?],
    )?);

    // '$last'([], L, L).
    let mut c = Scope::default();
    out.push(s("$last", vec![Term::nil(), c.v("L"), c.v("L")])?);

    // '$last'([X|Xs], _, L) :- '$last'(Xs, X, L).
    let mut c = Scope::default();
    let anon = c.anon();
    out.push(rule(
        s("$last", vec![cons(c.v("X"), c.v("Xs"))?, anon, c.v("L")])?,
        vec![s("$last", vec![c.v("Xs"), c.v("X"), c.v("L")])?],
    )?);

    Ok(out)
}
