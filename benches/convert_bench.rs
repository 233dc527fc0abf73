#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use logterm::{Converter, Engine, Machine, SessionConfig, Term};

fn started() -> Machine {
    let mut machine = Machine::new();
    machine
        .start(&SessionConfig::default())
        .expect("machine starts");
    machine
}

fn nested(depth: i64) -> Term {
    let mut term = Term::atom("leaf");
    for i in 0..depth {
        term = Term::compound("node", vec![Term::integer(i), term]).expect("valid functor");
    }
    term
}

/// Benchmark for lowering a long ground list
fn bench_lower_list(c: &mut Criterion) {
    let list = Term::list((0..10_000).map(Term::integer).collect());
    c.bench_function("lower_list_10k", |b| {
        b.iter(|| {
            let mut machine = started();
            let mut converter = Converter::new(&SessionConfig::default());
            black_box(converter.lower(&mut machine, black_box(&list)).expect("lowered"))
        });
    });
}

/// Benchmark for lowering and lifting a deeply nested structure
fn bench_round_trip_nested(c: &mut Criterion) {
    let term = nested(5_000);
    c.bench_function("round_trip_nested_5k", |b| {
        b.iter(|| {
            let mut machine = started();
            let mut converter = Converter::new(&SessionConfig::default());
            let handle = converter.lower(&mut machine, black_box(&term)).expect("lowered");
            black_box(converter.lift(&machine, handle).expect("lifted"))
        });
    });
}

/// Benchmark for lifting a term with many shared variables
fn bench_lift_variables(c: &mut Criterion) {
    let vars: Vec<Term> = (0..100).map(|i| Term::var(&format!("V{i}"))).collect();
    let term = Term::compound("f", vars.iter().chain(vars.iter()).cloned().collect())
        .expect("valid functor");
    let mut machine = started();
    let mut converter = Converter::new(&SessionConfig::default());
    let handle = converter.lower(&mut machine, &term).expect("lowered");
    c.bench_function("lift_shared_variables", |b| {
        b.iter(|| {
            converter.begin_solution();
            black_box(converter.lift(&machine, black_box(handle)).expect("lifted"))
        });
    });
}

criterion_group!(
    benches,
    bench_lower_list,
    bench_round_trip_nested,
    bench_lift_variables
);
criterion_main!(benches);
