//! Translation of formulas into clauses over search variables.
//!
//! Boolean structure gets one variable per composite term. Equalities over uninterpreted
//! sorts and uninterpreted predicates become egraph atoms. Bitvector terms are
//! bit-blasted: every bit is a literal, and arithmetic is expanded into gate circuits
//! whose outputs are fresh auxiliary variables.

use vsterms::{Term, TermDesc, TermTable, TypeId};

use crate::{
    search::Literal,
    utils::error::{VsError, VsResult},
};

use super::{Cached, Context};

impl Context {
    /// Literal equivalent to the boolean term `t`.
    pub(super) fn literal_of(&mut self, terms: &mut TermTable, t: Term) -> VsResult<Literal> {
        let p = t.positive();
        let l = match self.lits.get(&p) {
            Some(&l) => l,
            None => {
                let l = self.internalize_bool(terms, p)?;
                self.lits.insert(p, l);
                self.cache_log.push(Cached::Lit(p));
                l
            }
        };
        Ok(if t.is_negated() { !l } else { l })
    }

    fn atom_lit(&mut self, t: Term) -> Literal {
        Literal::positive(self.vars.get_variable(t))
    }

    fn clause(&mut self, lits: &[Literal]) {
        let scope = self.scope();
        self.core.add_clause(lits, scope);
    }

    fn internalize_bool(&mut self, terms: &mut TermTable, p: Term) -> VsResult<Literal> {
        let desc = terms.desc(p).clone();
        Ok(match desc {
            TermDesc::True => self.true_lit,
            TermDesc::Uninterpreted { .. } => self.atom_lit(p),
            TermDesc::App(..) => {
                let l = self.atom_lit(p);
                self.registry.egraph_mut().add_pred_atom(l.var(), p, terms);
                l
            }
            TermDesc::Eq(a, b) => self.internalize_eq(terms, p, a, b)?,
            TermDesc::Or(args) => {
                let mut lits = Vec::with_capacity(args.len());
                for a in args {
                    lits.push(self.literal_of(terms, a)?);
                }
                let out = self.atom_lit(p);
                self.def_or(out, &lits);
                out
            }
            TermDesc::Xor(a, b) => {
                let (la, lb) = (self.literal_of(terms, a)?, self.literal_of(terms, b)?);
                let out = self.atom_lit(p);
                self.def_xor(out, la, lb);
                out
            }
            TermDesc::Ite(c, a, b) => {
                let lc = self.literal_of(terms, c)?;
                let (la, lb) = (self.literal_of(terms, a)?, self.literal_of(terms, b)?);
                let out = self.atom_lit(p);
                self.def_ite(out, lc, la, lb);
                out
            }
            TermDesc::BitSelect(x, i) => {
                let bits = self.blast(terms, x)?;
                bits[i as usize]
            }
            TermDesc::BvGe(a, b) => {
                let (ba, bb) = (self.blast(terms, a)?, self.blast(terms, b)?);
                self.uge(terms, &ba, &bb)?
            }
            TermDesc::BvSge(a, b) => {
                let (mut ba, mut bb) = (self.blast(terms, a)?, self.blast(terms, b)?);
                // Signed order is unsigned order with the sign bits flipped.
                if let (Some(x), Some(y)) = (ba.last_mut(), bb.last_mut()) {
                    *x = !*x;
                    *y = !*y;
                }
                self.uge(terms, &ba, &bb)?
            }
            TermDesc::Variable { .. } => return Err(VsError::FreeVarInFormula(p)),
            TermDesc::Forall(..) => return Err(VsError::QuantifierNotTopLevel(p)),
            TermDesc::BvConstant { .. } | TermDesc::BvNeg(_) | TermDesc::BvSum(_) | TermDesc::BvProduct(_) => {
                return Err(VsError::FormulaNotSupported(p));
            }
        })
    }

    fn internalize_eq(&mut self, terms: &mut TermTable, p: Term, a: Term, b: Term) -> VsResult<Literal> {
        let ty = terms.ty(a);
        if terms.bv_width(a).is_some() {
            let (ba, bb) = (self.blast(terms, a)?, self.blast(terms, b)?);
            return self.bv_eq(terms, &ba, &bb);
        }
        if ty == TypeId::BOOL {
            let (la, lb) = (self.literal_of(terms, a)?, self.literal_of(terms, b)?);
            return Ok(!self.xor(terms, la, lb)?);
        }
        if !terms.types().is_uninterpreted(ty) {
            return Err(VsError::FormulaNotSupported(p));
        }

        // (ite c x y) = b  becomes  ite(c, x = b, y = b)
        let lifted = match (terms.desc(a).clone(), terms.desc(b).clone()) {
            (TermDesc::Ite(c, x, y), _) => Some((c, x, y, b)),
            (_, TermDesc::Ite(c, x, y)) => Some((c, x, y, a)),
            _ => None,
        };
        if let Some((c, x, y, other)) = lifted {
            let then_eq = terms.eq(x, other)?;
            let else_eq = terms.eq(y, other)?;
            let f = terms.ite(c, then_eq, else_eq)?;
            return self.literal_of(terms, f);
        }

        let l = self.atom_lit(p);
        self.registry.egraph_mut().add_eq_atom(l.var(), a, b, terms);
        Ok(l)
    }

    // ---------------------------------------------------------------------------------
    // Gate definitions
    // ---------------------------------------------------------------------------------

    fn is_const(&self, l: Literal) -> Option<bool> {
        if l == self.true_lit {
            Some(true)
        } else if l == !self.true_lit {
            Some(false)
        } else {
            None
        }
    }

    fn fresh(&mut self, terms: &mut TermTable) -> VsResult<Literal> {
        let t = terms.new_uninterpreted_term(TypeId::BOOL)?;
        self.aux.insert(t);
        Ok(self.atom_lit(t))
    }

    /// out <=> (l1 or ... or ln)
    fn def_or(&mut self, out: Literal, lits: &[Literal]) {
        let mut long = Vec::with_capacity(lits.len() + 1);
        long.push(!out);
        for &l in lits {
            long.push(l);
            self.clause(&[out, !l]);
        }
        self.clause(&long);
    }

    /// out <=> (a xor b)
    fn def_xor(&mut self, out: Literal, a: Literal, b: Literal) {
        self.clause(&[!out, a, b]);
        self.clause(&[!out, !a, !b]);
        self.clause(&[out, !a, b]);
        self.clause(&[out, a, !b]);
    }

    /// out <=> (c ? a : b)
    fn def_ite(&mut self, out: Literal, c: Literal, a: Literal, b: Literal) {
        self.clause(&[!c, !a, out]);
        self.clause(&[!c, a, !out]);
        self.clause(&[c, !b, out]);
        self.clause(&[c, b, !out]);
        self.clause(&[!a, !b, out]);
        self.clause(&[a, b, !out]);
    }

    /// out <=> at least two of a, b, c
    fn def_maj(&mut self, out: Literal, a: Literal, b: Literal, c: Literal) {
        self.clause(&[!a, !b, out]);
        self.clause(&[!a, !c, out]);
        self.clause(&[!b, !c, out]);
        self.clause(&[a, b, !out]);
        self.clause(&[a, c, !out]);
        self.clause(&[b, c, !out]);
    }

    fn and2(&mut self, terms: &mut TermTable, a: Literal, b: Literal) -> VsResult<Literal> {
        match (self.is_const(a), self.is_const(b)) {
            (Some(false), _) | (_, Some(false)) => return Ok(!self.true_lit),
            (Some(true), _) => return Ok(b),
            (_, Some(true)) => return Ok(a),
            _ => {}
        }
        if a == b {
            return Ok(a);
        }
        if a == !b {
            return Ok(!self.true_lit);
        }
        let out = self.fresh(terms)?;
        self.def_or(!out, &[!a, !b]);
        Ok(out)
    }

    fn or2(&mut self, terms: &mut TermTable, a: Literal, b: Literal) -> VsResult<Literal> {
        Ok(!self.and2(terms, !a, !b)?)
    }

    fn xor(&mut self, terms: &mut TermTable, a: Literal, b: Literal) -> VsResult<Literal> {
        match (self.is_const(a), self.is_const(b)) {
            (Some(x), _) => return Ok(if x { !b } else { b }),
            (_, Some(y)) => return Ok(if y { !a } else { a }),
            _ => {}
        }
        if a == b {
            return Ok(!self.true_lit);
        }
        if a == !b {
            return Ok(self.true_lit);
        }
        let out = self.fresh(terms)?;
        self.def_xor(out, a, b);
        Ok(out)
    }

    fn ite(&mut self, terms: &mut TermTable, c: Literal, a: Literal, b: Literal) -> VsResult<Literal> {
        match self.is_const(c) {
            Some(true) => return Ok(a),
            Some(false) => return Ok(b),
            None => {}
        }
        if a == b {
            return Ok(a);
        }
        let out = self.fresh(terms)?;
        self.def_ite(out, c, a, b);
        Ok(out)
    }

    fn maj(&mut self, terms: &mut TermTable, a: Literal, b: Literal, c: Literal) -> VsResult<Literal> {
        for (x, y, z) in [(a, b, c), (b, a, c), (c, a, b)] {
            match self.is_const(x) {
                Some(true) => return self.or2(terms, y, z),
                Some(false) => return self.and2(terms, y, z),
                None => {}
            }
        }
        if a == b || a == c {
            return Ok(a);
        }
        if b == c {
            return Ok(b);
        }
        let out = self.fresh(terms)?;
        self.def_maj(out, a, b, c);
        Ok(out)
    }

    // ---------------------------------------------------------------------------------
    // Bit-blasting
    // ---------------------------------------------------------------------------------

    /// Bits of the bitvector term `t`, least significant first.
    pub(super) fn blast(&mut self, terms: &mut TermTable, t: Term) -> VsResult<Vec<Literal>> {
        if let Some(bits) = self.bits.get(&t) {
            return Ok(bits.clone());
        }
        let bits = self.blast_node(terms, t)?;
        self.bits.insert(t, bits.clone());
        self.cache_log.push(Cached::Bits(t));
        Ok(bits)
    }

    fn blast_node(&mut self, terms: &mut TermTable, t: Term) -> VsResult<Vec<Literal>> {
        let width = terms.bv_width(t).ok_or(VsError::FormulaNotSupported(t))?;
        let desc = terms.desc(t).clone();
        match desc {
            TermDesc::BvConstant { value, .. } => Ok((0..width)
                .map(|i| if value >> i & 1 == 1 { self.true_lit } else { !self.true_lit })
                .collect()),
            TermDesc::Uninterpreted { .. } => {
                let mut bits = Vec::with_capacity(width as usize);
                for i in 0..width {
                    let b = terms.bit_select(t, i)?;
                    bits.push(self.atom_lit(b));
                }
                Ok(bits)
            }
            TermDesc::Ite(c, a, b) => {
                let lc = self.literal_of(terms, c)?;
                let (ba, bb) = (self.blast(terms, a)?, self.blast(terms, b)?);
                ba.into_iter()
                    .zip(bb)
                    .map(|(x, y)| self.ite(terms, lc, x, y))
                    .collect()
            }
            TermDesc::BvNeg(a) => {
                let ba = self.blast(terms, a)?;
                let inverted: Vec<Literal> = ba.iter().map(|&l| !l).collect();
                let zero = vec![!self.true_lit; inverted.len()];
                let one = self.true_lit;
                self.adder(terms, &inverted, &zero, one)
            }
            TermDesc::BvSum(args) => {
                let mut acc = self.blast(terms, args[0])?;
                for &a in &args[1..] {
                    let ba = self.blast(terms, a)?;
                    let zero = !self.true_lit;
                    acc = self.adder(terms, &acc, &ba, zero)?;
                }
                Ok(acc)
            }
            TermDesc::BvProduct(args) => {
                let mut acc = self.blast(terms, args[0])?;
                for &a in &args[1..] {
                    let ba = self.blast(terms, a)?;
                    acc = self.multiplier(terms, &acc, &ba)?;
                }
                Ok(acc)
            }
            TermDesc::Variable { .. } => Err(VsError::FreeVarInFormula(t)),
            _ => Err(VsError::FormulaNotSupported(t)),
        }
    }

    /// Ripple-carry adder; the final carry is dropped.
    fn adder(&mut self, terms: &mut TermTable, a: &[Literal], b: &[Literal], carry: Literal) -> VsResult<Vec<Literal>> {
        let mut carry = carry;
        let mut sum = Vec::with_capacity(a.len());
        for i in 0..a.len() {
            let half = self.xor(terms, a[i], b[i])?;
            sum.push(self.xor(terms, half, carry)?);
            if i + 1 < a.len() {
                carry = self.maj(terms, a[i], b[i], carry)?;
            }
        }
        Ok(sum)
    }

    /// Shift-and-add multiplier, truncated to the operand width.
    fn multiplier(&mut self, terms: &mut TermTable, a: &[Literal], b: &[Literal]) -> VsResult<Vec<Literal>> {
        let width = a.len();
        let zero = !self.true_lit;
        let mut acc = vec![zero; width];
        for i in 0..width {
            if self.is_const(b[i]) == Some(false) {
                continue;
            }
            let mut partial = vec![zero; width];
            for j in i..width {
                partial[j] = self.and2(terms, a[j - i], b[i])?;
            }
            acc = self.adder(terms, &acc, &partial, zero)?;
        }
        Ok(acc)
    }

    fn bv_eq(&mut self, terms: &mut TermTable, a: &[Literal], b: &[Literal]) -> VsResult<Literal> {
        let mut acc = self.true_lit;
        for (&x, &y) in a.iter().zip(b) {
            let diff = self.xor(terms, x, y)?;
            acc = self.and2(terms, acc, !diff)?;
        }
        Ok(acc)
    }

    /// Unsigned a >= b: the carry out of a + !b + 1.
    fn uge(&mut self, terms: &mut TermTable, a: &[Literal], b: &[Literal]) -> VsResult<Literal> {
        let mut carry = self.true_lit;
        for (&x, &y) in a.iter().zip(b) {
            carry = self.maj(terms, x, !y, carry)?;
        }
        Ok(carry)
    }
}

#[cfg(test)]
mod tests {
    use vsterms::TermTable;

    use crate::{
        context::{Context, Status},
        utils::conf::{ContextConfig, SearchParams},
    };

    fn no_elim() -> ContextConfig {
        ContextConfig {
            var_elim: false,
            bvarith_elim: false,
            ..Default::default()
        }
    }

    fn solve(terms: &mut TermTable, ctx: &mut Context) -> Status {
        ctx.check(terms, &SearchParams::default()).unwrap()
    }

    #[test]
    fn addition_wraps_around() {
        let mut terms = TermTable::new();
        let bv4 = terms.types_mut().bv_type(4).unwrap();
        let x = terms.new_uninterpreted_term(bv4).unwrap();
        let nine = terms.bv_const(4, 9).unwrap();
        let ten = terms.bv_const(4, 10).unwrap();
        let sum = terms.bv_add(x, nine).unwrap();
        let three = terms.bv_const(4, 3).unwrap();
        let f = terms.eq(sum, three).unwrap();
        let g = terms.bv_le(x, ten).unwrap();

        let mut ctx = Context::new(no_elim());
        ctx.assert_formulas(&mut terms, &[f, g]).unwrap();
        assert_eq!(solve(&mut terms, &mut ctx), Status::Sat);
        let model = ctx.build_model(&terms, false).unwrap();
        // x + 9 = 3 (mod 16)
        assert_eq!(model.get_bv_value(&terms, x).unwrap(), vec![false, true, false, true]);
    }

    #[test]
    fn product_and_signed_order() {
        let mut terms = TermTable::new();
        let bv4 = terms.types_mut().bv_type(4).unwrap();
        let x = terms.new_uninterpreted_term(bv4).unwrap();
        let two = terms.bv_const(4, 2).unwrap();
        let zero = terms.bv_const(4, 0).unwrap();
        let prod = terms.bv_mul(x, two).unwrap();
        let four = terms.bv_const(4, 4).unwrap();
        let f = terms.eq(prod, four).unwrap();
        // x is negative as a signed value
        let g = terms.bv_slt(x, zero).unwrap();

        let mut ctx = Context::new(no_elim());
        ctx.assert_formulas(&mut terms, &[f, g]).unwrap();
        assert_eq!(solve(&mut terms, &mut ctx), Status::Sat);
        let model = ctx.build_model(&terms, false).unwrap();
        // 2x = 4 (mod 16) has the solutions 2 and 10; only 10 is negative.
        assert_eq!(model.get_bv_value(&terms, x).unwrap(), vec![false, true, false, true]);
    }

    #[test]
    fn unsigned_bounds_conflict() {
        let mut terms = TermTable::new();
        let bv3 = terms.types_mut().bv_type(3).unwrap();
        let x = terms.new_uninterpreted_term(bv3).unwrap();
        let five = terms.bv_const(3, 5).unwrap();
        let four = terms.bv_const(3, 4).unwrap();
        let f = terms.bv_gt(x, five).unwrap();
        let g = terms.bv_lt(x, four).unwrap();

        let mut ctx = Context::new(no_elim());
        ctx.assert_formulas(&mut terms, &[f, g]).unwrap();
        assert_eq!(solve(&mut terms, &mut ctx), Status::Unsat);
    }

    #[test]
    fn uninterpreted_ite_is_lifted() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let a = terms.new_uninterpreted_term(s).unwrap();
        let b = terms.new_uninterpreted_term(s).unwrap();
        let c = terms.new_uninterpreted_term(s).unwrap();
        let p = terms.new_uninterpreted_term(vsterms::TypeId::BOOL).unwrap();
        let ite = terms.ite(p, a, b).unwrap();
        let f = terms.eq(ite, c).unwrap();
        let g = terms.neq(a, c).unwrap();
        let h = terms.neq(b, c).unwrap();

        let mut ctx = Context::new(no_elim());
        ctx.assert_formulas(&mut terms, &[f, g, h]).unwrap();
        assert_eq!(solve(&mut terms, &mut ctx), Status::Unsat);
    }
}
