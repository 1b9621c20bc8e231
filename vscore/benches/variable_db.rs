use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vscore::{
    VariableDb,
    variable_db::GcInfo,
    vsterms::{Term, TermTable, TypeId},
};

fn fresh_terms(n: usize) -> Vec<Term> {
    let mut table = TermTable::new();
    (0..n)
        .map(|_| table.new_uninterpreted_term(TypeId::BOOL))
        .collect::<Result<_, _>>()
        .unwrap()
}

fn bench_lookup(c: &mut Criterion) {
    let terms = fresh_terms(10_000);
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let queries: Vec<Term> = (0..10_000)
        .map(|_| terms[rng.random_range(0..terms.len())])
        .collect();

    c.bench_function("get_variable/allocate", |b| {
        b.iter(|| {
            let mut db = VariableDb::new();
            for &t in &terms {
                black_box(db.get_variable(t));
            }
        })
    });

    let mut db = VariableDb::new();
    for &t in &terms {
        db.get_variable(t);
    }
    c.bench_function("get_variable/existing", |b| {
        b.iter(|| {
            for &t in &queries {
                black_box(db.get_variable(t));
            }
        })
    });
}

fn bench_sweep(c: &mut Criterion) {
    let terms = fresh_terms(10_000);
    let mut rng = ChaCha8Rng::seed_from_u64(0xc011ec7);

    c.bench_function("gc_sweep/half", |b| {
        b.iter_batched(
            || {
                let mut db = VariableDb::new();
                let mut gc = GcInfo::new();
                for &t in &terms {
                    let v = db.get_variable(t);
                    if rng.random_bool(0.5) {
                        gc.mark(v);
                    }
                }
                (db, gc)
            },
            |(mut db, gc)| black_box(db.gc_sweep(&gc)),
            BatchSize::LargeInput,
        )
    });

    c.bench_function("get_variable/recycled", |b| {
        b.iter_batched(
            || {
                let mut db = VariableDb::new();
                for &t in &terms[..5_000] {
                    db.get_variable(t);
                }
                db.gc_sweep(&GcInfo::new());
                db
            },
            |mut db| {
                for &t in &terms[5_000..] {
                    black_box(db.get_variable(t));
                }
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_lookup, bench_sweep);
criterion_main!(benches);
