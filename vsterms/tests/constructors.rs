use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vsterms::{
    Term, TermConstructor, TermTable, TypeId,
    terms::{bv_mask, bv_signed},
};

#[test]
fn constant_folding_matches_machine_arithmetic() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut table = TermTable::new();

    for _ in 0..200 {
        let width = rng.random_range(1..=64u32);
        let a: u64 = rng.random::<u64>() & bv_mask(width);
        let b: u64 = rng.random::<u64>() & bv_mask(width);
        let ta = table.bv_const(width, a).unwrap();
        let tb = table.bv_const(width, b).unwrap();

        let sum = table.bv_add(ta, tb).unwrap();
        assert_eq!(table.bv_const_value(sum).unwrap(), a.wrapping_add(b) & bv_mask(width));

        let prod = table.bv_mul(ta, tb).unwrap();
        assert_eq!(table.bv_const_value(prod).unwrap(), a.wrapping_mul(b) & bv_mask(width));

        let diff = table.bv_sub(ta, tb).unwrap();
        assert_eq!(table.bv_const_value(diff).unwrap(), a.wrapping_sub(b) & bv_mask(width));

        let ge = table.bv_ge(ta, tb).unwrap();
        assert_eq!(ge == Term::TRUE, a >= b);

        let sge = table.bv_sge(ta, tb).unwrap();
        assert_eq!(sge == Term::TRUE, bv_signed(width, a) >= bv_signed(width, b));
    }
}

#[test]
fn repeated_construction_is_idempotent() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut table = TermTable::new();
    let atoms: Vec<Term> = (0..8)
        .map(|_| table.new_uninterpreted_term(TypeId::BOOL).unwrap())
        .collect();

    for _ in 0..100 {
        let n = rng.random_range(2..6);
        let mut args: Vec<Term> = (0..n)
            .map(|_| {
                let t = atoms[rng.random_range(0..atoms.len())];
                if rng.random_bool(0.5) { !t } else { t }
            })
            .collect();
        let first = table.or(&args).unwrap();
        let count = table.num_terms();
        args.reverse();
        let second = table.or(&args).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.num_terms(), count);
    }
}

#[test]
fn exploration_walks_children() {
    let mut table = TermTable::new();
    let bv8 = table.types_mut().bv_type(8).unwrap();
    let x = table.new_uninterpreted_term(bv8).unwrap();
    let y = table.new_uninterpreted_term(bv8).unwrap();
    let sum = table.bv_add(x, y).unwrap();
    let bit = table.bit_select(sum, 3).unwrap();

    assert_eq!(table.constructor(bit).unwrap(), TermConstructor::BitSelect);
    assert!(table.is_projection(bit).unwrap());
    assert_eq!(table.projection_index(bit).unwrap(), 3);
    assert_eq!(table.child(bit, 0).unwrap(), sum);
    assert!(table.is_sum(sum).unwrap());
    assert_eq!(table.num_children(sum).unwrap(), 2);
    assert!(table.is_atomic(x).unwrap());
    assert!(table.is_composite(!bit).unwrap());
    assert_eq!(table.child(!bit, 0).unwrap(), bit);
    assert!(table.child(x, 0).is_err());
}
