use vscore::{
    ContextConfig, ContextMode, Engine, Status, VsError,
    vsterms::{ErrorCode, Term, TypeId},
};

fn bits_to_u64(bits: &[bool]) -> u64 {
    bits.iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| if b { acc | 1 << i } else { acc })
}

#[test]
fn eliminated_sum_is_recovered_through_substitutions() {
    let mut engine = Engine::new();
    let bv4 = engine.build(|t| t.types_mut().bv_type(4)).unwrap();
    let x = engine.build(|t| t.new_uninterpreted_term(bv4)).unwrap();
    let y = engine.build(|t| t.new_uninterpreted_term(bv4)).unwrap();
    let z = engine.build(|t| t.new_uninterpreted_term(bv4)).unwrap();
    engine.build(|t| t.set_term_name(x, "x")).unwrap();

    let sum = engine.build(|t| t.bv_add(y, z)).unwrap();
    let def = engine.build(|t| t.eq(x, sum)).unwrap();
    let zero = engine.build(|t| t.bv_zero(4)).unwrap();
    let y_pos = engine.build(|t| t.bv_gt(y, zero)).unwrap();
    let z_pos = engine.build(|t| t.bv_gt(z, zero)).unwrap();

    let ctx = engine.new_context(ContextConfig::default());
    engine.assert_formulas(ctx, &[def, y_pos, z_pos]).unwrap();
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Sat);

    let with_subst = engine.get_model(ctx, true).unwrap();
    let xv = bits_to_u64(&engine.get_bv_value(with_subst, x).unwrap());
    let yv = bits_to_u64(&engine.get_bv_value(with_subst, y).unwrap());
    let zv = bits_to_u64(&engine.get_bv_value(with_subst, z).unwrap());
    assert!(yv > 0 && zv > 0);
    assert_eq!(xv, (yv + zv) & 0xf);
    assert!(engine.formulas_true(with_subst, &[def, y_pos, z_pos]).unwrap());
    assert!(engine.model_to_string(with_subst, 80).unwrap().contains("(= x 0b"));

    let without = engine.get_model(ctx, false).unwrap();
    assert!(matches!(
        engine.get_bv_value(without, x),
        Err(VsError::EvalUnknownTerm(_))
    ));
    assert_eq!(engine.error().code, ErrorCode::EvalUnknownTerm);
    assert_eq!(engine.error().term1, Some(x));
    // The remaining summands keep the values they had with the substitutions.
    let y_without = bits_to_u64(&engine.get_bv_value(without, y).unwrap());
    let z_without = bits_to_u64(&engine.get_bv_value(without, z).unwrap());
    assert_eq!((y_without, z_without), (yv, zv));
}

#[test]
fn pop_restores_satisfiability() {
    let mut engine = Engine::new();
    let p = engine.build(|t| t.new_uninterpreted_term(TypeId::BOOL)).unwrap();
    let q = engine.build(|t| t.new_uninterpreted_term(TypeId::BOOL)).unwrap();
    let ctx = engine.new_context(ContextConfig::default());

    engine.assert_formula(ctx, p).unwrap();
    let live = engine.context(ctx).unwrap().vars().size();

    engine.push(ctx).unwrap();
    let pq = engine.build(|t| t.or2(!p, q)).unwrap();
    engine.assert_formulas(ctx, &[pq, !q]).unwrap();
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Unsat);
    // Push is refused while unsat; pop is not.
    assert!(matches!(engine.push(ctx), Err(VsError::InvalidOperation(Status::Unsat))));

    engine.pop(ctx).unwrap();
    assert_eq!(engine.context_status(ctx).unwrap(), Status::Idle);
    assert_eq!(engine.context(ctx).unwrap().num_assertions(), 1);
    assert_eq!(engine.context(ctx).unwrap().vars().size(), live);
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Sat);

    let model = engine.get_model(ctx, false).unwrap();
    assert!(engine.get_bool_value(model, p).unwrap());
}

#[test]
fn trivially_unsat_scope_is_undone_by_pop() {
    let mut engine = Engine::new();
    let ctx = engine.new_context(ContextConfig::default());
    engine.push(ctx).unwrap();
    engine.assert_formula(ctx, Term::FALSE).unwrap();
    assert_eq!(engine.context_status(ctx).unwrap(), Status::Unsat);
    engine.pop(ctx).unwrap();
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Sat);
}

#[test]
fn blocking_clauses_enumerate_bitvector_values() {
    let mut engine = Engine::new();
    let bv2 = engine.build(|t| t.types_mut().bv_type(2)).unwrap();
    let x = engine.build(|t| t.new_uninterpreted_term(bv2)).unwrap();
    let one = engine.build(|t| t.bv_one(2)).unwrap();
    let ge = engine.build(|t| t.bv_ge(x, one)).unwrap();

    let ctx = engine.new_context(ContextConfig::default());
    engine.assert_formula(ctx, ge).unwrap();

    let mut seen = Vec::new();
    while engine.check(ctx, None).unwrap() == Status::Sat {
        let model = engine.get_model(ctx, false).unwrap();
        seen.push(bits_to_u64(&engine.get_bv_value(model, x).unwrap()));
        engine.free_model(model).unwrap();
        engine.assert_blocking_clause(ctx).unwrap();
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3]);
}

#[test]
fn errors_do_not_change_the_context() {
    let mut engine = Engine::new();
    let s = engine.build(|t| Ok(t.types_mut().new_uninterpreted())).unwrap();
    let a = engine.build(|t| t.new_uninterpreted_term(s)).unwrap();
    let x = engine.build(|t| t.new_variable(s)).unwrap();
    let open = engine.build(|t| t.eq(x, a)).unwrap();

    let ctx = engine.new_context(ContextConfig::default());
    assert!(engine.assert_formula(ctx, open).is_err());
    assert_eq!(engine.error().code, ErrorCode::CtxFreeVarInFormula);
    assert_eq!(engine.context(ctx).unwrap().num_assertions(), 0);

    // A later success keeps the record.
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Sat);
    assert_eq!(engine.error().code, ErrorCode::CtxFreeVarInFormula);

    assert!(engine.enable_option(ctx, "no-such-option").is_err());
    assert_eq!(engine.error().code, ErrorCode::CtxUnknownParameter);
}

#[test]
fn modes_gate_incremental_operations() {
    let mut engine = Engine::new();
    let p = engine.build(|t| t.new_uninterpreted_term(TypeId::BOOL)).unwrap();
    let config = ContextConfig {
        mode: ContextMode::MultiChecks,
        ..Default::default()
    };
    let ctx = engine.new_context(config);
    assert!(matches!(engine.push(ctx), Err(VsError::OperationNotSupported)));
    assert_eq!(engine.error().code, ErrorCode::CtxOperationNotSupported);

    engine.assert_formula(ctx, p).unwrap();
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Sat);
    engine.assert_formula(ctx, !p).unwrap();
    assert_eq!(engine.context_status(ctx).unwrap(), Status::Unsat);
    assert_eq!(engine.check(ctx, None).unwrap(), Status::Unsat);
}

#[test]
fn reset_empties_the_context() {
    let mut engine = Engine::new();
    let p = engine.build(|t| t.new_uninterpreted_term(TypeId::BOOL)).unwrap();
    let ctx = engine.new_context(ContextConfig::default());
    engine.disable_option(ctx, "flatten").unwrap();
    engine.assert_formulas(ctx, &[p, !p]).unwrap();
    assert_eq!(engine.context_status(ctx).unwrap(), Status::Unsat);

    engine.reset_context(ctx).unwrap();
    let c = engine.context(ctx).unwrap();
    assert_eq!(c.status(), Status::Idle);
    assert_eq!(c.num_assertions(), 0);
    assert!(!c.options().contains(vscore::ContextOptions::FLATTEN));
}
