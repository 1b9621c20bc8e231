//! Validation and top-level simplification of asserted formulas.

use either::Either;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use vsterms::{Term, TermDesc, TermTable, TypeDesc, TypeId};

use crate::{
    search::Literal,
    theory::quant::QuantSolver,
    utils::{
        conf::ContextOptions,
        error::{VsError, VsResult},
    },
};

use super::Context;

/// Result of looking for an elimination: a definition `x := v`, or the formula itself.
type Elimination = Either<(Term, Term), Term>;

fn is_function_type(terms: &TermTable, ty: TypeId) -> bool {
    matches!(terms.types().desc(ty), TypeDesc::Function { .. })
}

fn is_uninterpreted_sort(terms: &TermTable, ty: TypeId) -> bool {
    terms.types().is_uninterpreted(ty)
}

impl Context {
    /// Parts of `t` that count as top level: `t` itself, or the conjuncts of `t` when
    /// conjunctions are flattened.
    fn top_level_parts(&self, terms: &TermTable, t: Term, parts: &mut Vec<Term>) {
        if self.options.contains(ContextOptions::FLATTEN)
            && t.is_negated()
            && let TermDesc::Or(args) = terms.desc(t.positive())
        {
            for &a in args {
                self.top_level_parts(terms, !a, parts);
            }
            return;
        }
        parts.push(t);
    }

    /// Reject formulas the context cannot handle, before anything is modified.
    pub(super) fn validate(&self, terms: &TermTable, t: Term) -> VsResult<()> {
        terms.check_bool(t)?;
        let mut parts = Vec::new();
        self.top_level_parts(terms, t, &mut parts);
        for part in parts {
            if let TermDesc::Forall(vars, body) = terms.desc(part.positive()) {
                if let Some(&v) = vars.iter().find(|&&v| !is_uninterpreted_sort(terms, terms.ty(v))) {
                    return Err(VsError::FormulaNotSupported(v));
                }
                self.validate_body(terms, part, *body, vars)?;
            } else {
                self.validate_body(terms, part, part, &[])?;
            }
        }
        Ok(())
    }

    fn validate_body(&self, terms: &TermTable, root: Term, body: Term, bound: &[Term]) -> VsResult<()> {
        let mut visited: FxHashSet<(Term, bool)> = FxHashSet::default();
        // The flag allows uninterpreted-sort if-then-else, which is only lifted
        // directly under an equality.
        let mut stack = vec![(body.positive(), false)];
        while let Some((u, ite_ok)) = stack.pop() {
            if !visited.insert((u, ite_ok)) {
                continue;
            }
            match terms.desc(u) {
                TermDesc::Variable { .. } => {
                    if !bound.contains(&u) {
                        return Err(VsError::FreeVarInFormula(root));
                    }
                }
                TermDesc::Forall(..) => return Err(VsError::QuantifierNotTopLevel(u)),
                TermDesc::App(_, args) => {
                    let range = terms.ty(u);
                    if terms.bv_width(u).is_some() || is_function_type(terms, range) {
                        return Err(VsError::FormulaNotSupported(u));
                    }
                    for &a in args {
                        if !is_uninterpreted_sort(terms, terms.ty(a)) {
                            return Err(VsError::FormulaNotSupported(u));
                        }
                        stack.push((a.positive(), false));
                    }
                }
                TermDesc::Eq(a, b) => {
                    let ty = terms.ty(*a);
                    if is_function_type(terms, ty) {
                        return Err(VsError::FormulaNotSupported(u));
                    }
                    let lift = is_uninterpreted_sort(terms, ty);
                    stack.push((a.positive(), lift));
                    stack.push((b.positive(), lift));
                }
                TermDesc::Ite(c, a, b) => {
                    let ty = terms.ty(u);
                    if is_function_type(terms, ty) || (is_uninterpreted_sort(terms, ty) && !ite_ok) {
                        return Err(VsError::FormulaNotSupported(u));
                    }
                    stack.push((c.positive(), false));
                    stack.push((a.positive(), ite_ok));
                    stack.push((b.positive(), ite_ok));
                }
                desc => stack.extend(desc.children().into_iter().map(|c| (c.positive(), false))),
            }
        }
        Ok(())
    }

    /// Simplify and internalize one formula.
    pub(super) fn process_assertion(&mut self, terms: &mut TermTable, t: Term) -> VsResult<()> {
        let t = terms.subst(&self.subst, t)?;
        if t == Term::TRUE {
            return Ok(());
        }
        let scope = self.scope();
        if t == Term::FALSE {
            self.core.add_clause(&[], scope);
            return Ok(());
        }

        let p = t.positive();
        match terms.desc(p).clone() {
            TermDesc::Or(args) if t.is_negated() && self.options.contains(ContextOptions::FLATTEN) => {
                for a in args {
                    self.process_assertion(terms, !a)?;
                }
                return Ok(());
            }
            TermDesc::Forall(..) if !t.is_negated() => {
                let quant = self
                    .registry
                    .satellite_mut::<QuantSolver>()
                    .ok_or(VsError::OperationNotSupported)?;
                return quant.add_constraint(terms, t, &[]);
            }
            TermDesc::Forall(vars, body) => {
                let instance = self.skolemize(terms, &vars, body)?;
                return self.process_assertion(terms, !instance);
            }
            _ => {}
        }

        let t = match self.eliminate(terms, t)? {
            Either::Left((x, v)) => {
                debug!("context: eliminated {:?}", x);
                self.subst.insert(x, v);
                self.subst_log.push(x);
                return Ok(());
            }
            Either::Right(t) => t,
        };

        if !t.is_negated()
            && self.options.contains(ContextOptions::FLATTEN)
            && let TermDesc::Or(args) = terms.desc(t)
        {
            let mut leaves = Vec::new();
            flatten_or(terms, args, &mut leaves);
            let mut clause: SmallVec<[Literal; 8]> = SmallVec::with_capacity(leaves.len());
            for leaf in leaves {
                clause.push(self.literal_of(terms, leaf)?);
            }
            self.core.add_clause(&clause, scope);
            return Ok(());
        }

        let l = self.literal_of(terms, t)?;
        self.core.add_clause(&[l], scope);
        Ok(())
    }

    /// Replace the bound variables of `forall vars. body` by fresh constants.
    fn skolemize(&mut self, terms: &mut TermTable, vars: &[Term], body: Term) -> VsResult<Term> {
        let mut map = FxHashMap::default();
        for &v in vars {
            let ty = terms.ty(v);
            map.insert(v, terms.new_uninterpreted_term(ty)?);
        }
        Ok(terms.subst(&map, body)?)
    }

    /// Look for a definition `x := v` equivalent to the top-level formula `t`.
    fn eliminate(&self, terms: &mut TermTable, t: Term) -> VsResult<Elimination> {
        let p = t.positive();
        match terms.desc(p).clone() {
            // x <=> b is stored as the negation of xor(x, b).
            TermDesc::Xor(a, b) if self.options.contains(ContextOptions::VAR_ELIM) => {
                let negate = !t.is_negated();
                for (x, v) in [(a, b), (b, a)] {
                    let v = v.with_polarity(v.is_negated() ^ negate);
                    if self.can_eliminate(terms, x, v) {
                        return Ok(Either::Left((x, v)));
                    }
                }
            }
            TermDesc::Eq(a, b) if !t.is_negated() => {
                if self.options.contains(ContextOptions::VAR_ELIM) {
                    for (x, v) in [(a, b), (b, a)] {
                        if self.can_eliminate(terms, x, v) {
                            return Ok(Either::Left((x, v)));
                        }
                    }
                }
                if self.options.contains(ContextOptions::BVARITH_ELIM) && terms.bv_width(a).is_some() {
                    for (s, r) in [(a, b), (b, a)] {
                        if let Some(def) = self.solve_sum(terms, s, r)? {
                            return Ok(Either::Left(def));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(Either::Right(t))
    }

    /// Solve `s = r` for a summand of `s` that occurs exactly once.
    fn solve_sum(&self, terms: &mut TermTable, s: Term, r: Term) -> VsResult<Option<(Term, Term)>> {
        let TermDesc::BvSum(args) = terms.desc(s).clone() else {
            return Ok(None);
        };
        for (i, &x) in args.iter().enumerate() {
            if args.iter().filter(|&&a| terms.occurs(x, a)).count() != 1 || terms.occurs(x, r) {
                continue;
            }
            let rest: SmallVec<[Term; 4]> = args
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &a)| a)
                .collect();
            if !self.can_eliminate(terms, x, r) {
                continue;
            }
            let rest = terms.bv_sum(&rest)?;
            let v = terms.bv_sub(r, rest)?;
            return Ok(Some((x, v)));
        }
        Ok(None)
    }

    fn can_eliminate(&self, terms: &TermTable, x: Term, v: Term) -> bool {
        if x.is_negated() || !matches!(terms.desc(x), TermDesc::Uninterpreted { .. }) {
            return false;
        }
        if is_function_type(terms, terms.ty(x)) || self.subst.contains_key(&x) || self.is_internalized(x) {
            return false;
        }
        if terms.occurs(x, v) || self.subst.values().any(|&w| terms.occurs(x, w)) {
            return false;
        }
        if is_uninterpreted_sort(terms, terms.ty(x)) && contains_sorted_ite(terms, v) {
            return false;
        }
        !self
            .registry
            .satellite::<QuantSolver>()
            .is_some_and(|q| q.mentions(terms, x))
    }

    fn is_internalized(&self, x: Term) -> bool {
        self.vars.has_variable(x)
            || self.bits.contains_key(&x)
            || self.registry.egraph().node_of_term(x).is_some()
    }
}

/// Whether `t` contains an if-then-else over an uninterpreted sort.
fn contains_sorted_ite(terms: &TermTable, t: Term) -> bool {
    terms
        .subterms(t)
        .into_iter()
        .any(|u| matches!(terms.desc(u), TermDesc::Ite(..)) && is_uninterpreted_sort(terms, terms.ty(u)))
}

/// Leaves of nested positive disjunctions.
fn flatten_or(terms: &TermTable, args: &[Term], leaves: &mut Vec<Term>) {
    for &a in args {
        match terms.desc(a) {
            TermDesc::Or(inner) if !a.is_negated() => flatten_or(terms, inner, leaves),
            _ => leaves.push(a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::Status,
        utils::conf::{ContextConfig, SearchParams},
    };

    #[test]
    fn quantifier_below_top_level_is_rejected() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let q = terms.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let x = terms.new_variable(s).unwrap();
        let px = terms.application(p, &[x]).unwrap();
        let all = terms.forall(&[x], px).unwrap();
        let f = terms.or2(q, all).unwrap();

        let mut ctx = Context::new(ContextConfig::default());
        assert!(matches!(
            ctx.assert_formula(&mut terms, f),
            Err(VsError::QuantifierNotTopLevel(_))
        ));
        assert_eq!(ctx.num_assertions(), 0);
        assert_eq!(ctx.status(), Status::Idle);
    }

    #[test]
    fn free_variable_is_rejected() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let a = terms.new_uninterpreted_term(s).unwrap();
        let x = terms.new_variable(s).unwrap();
        let f = terms.eq(x, a).unwrap();

        let mut ctx = Context::new(ContextConfig::default());
        assert!(matches!(
            ctx.assert_formula(&mut terms, f),
            Err(VsError::FreeVarInFormula(_))
        ));
    }

    #[test]
    fn batch_is_validated_before_processing() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let a = terms.new_uninterpreted_term(s).unwrap();
        let x = terms.new_variable(s).unwrap();
        let p = terms.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let bad = terms.eq(x, a).unwrap();

        let mut ctx = Context::new(ContextConfig::default());
        assert!(ctx.assert_formulas(&mut terms, &[p, bad]).is_err());
        assert_eq!(ctx.num_assertions(), 0);
        assert!(!ctx.vars().has_variable(p));
    }

    #[test]
    fn equality_with_fresh_constant_is_eliminated() {
        let mut terms = TermTable::new();
        let bv4 = terms.types_mut().bv_type(4).unwrap();
        let x = terms.new_uninterpreted_term(bv4).unwrap();
        let y = terms.new_uninterpreted_term(bv4).unwrap();
        let f = terms.eq(x, y).unwrap();

        let mut ctx = Context::new(ContextConfig::default());
        ctx.assert_formula(&mut terms, f).unwrap();
        assert_eq!(ctx.subst.len(), 1);
        assert!(ctx.bits.is_empty());

        ctx.disable_option("var-elim").unwrap();
        ctx.disable_option("bvarith-elim").unwrap();
        let z = terms.new_uninterpreted_term(bv4).unwrap();
        let g = terms.eq(y, z).unwrap();
        ctx.assert_formula(&mut terms, g).unwrap();
        assert_eq!(ctx.subst.len(), 1);
        assert!(ctx.bits.contains_key(&z));
    }

    #[test]
    fn negated_forall_is_skolemized() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let x = terms.new_variable(s).unwrap();
        let px = terms.application(p, &[x]).unwrap();
        let all = terms.forall(&[x], px).unwrap();

        let mut ctx = Context::new(ContextConfig::default());
        ctx.assert_formula(&mut terms, !all).unwrap();
        let quant = ctx.registry().satellite::<QuantSolver>().unwrap();
        assert!(quant.quantifiers().is_empty());
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Sat);
    }
}
