//! Models: values of uninterpreted terms, function tables, and evaluation.

use std::io::Write;

use pretty::RcDoc;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use termcolor::WriteColor;
use vsterms::{
    Term, TermDesc, TermTable, TypeDesc, TypeId,
    pretty::{Doc, bv_literal, constant, op, render_plain, render_to, sexp},
    terms::{bv_mask, bv_signed},
};

use crate::utils::error::{VsError, VsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Bool(bool),
    BitVector { width: u32, value: u64 },
    /// The `index`-th element of an uninterpreted sort.
    Abstract { ty: TypeId, index: u32 },
}

impl Value {
    /// Value of an application missing from its function table.
    pub fn default_for(terms: &TermTable, ty: TypeId) -> Value {
        match terms.types().desc(ty) {
            TypeDesc::BitVector(width) => Value::BitVector {
                width: *width,
                value: 0,
            },
            TypeDesc::Bool => Value::Bool(false),
            _ => Value::Abstract { ty, index: 0 },
        }
    }

    pub fn doc(&self, terms: &TermTable) -> Doc {
        match *self {
            Value::Bool(b) => constant(if b { "true" } else { "false" }),
            Value::BitVector { width, value } => constant(bv_literal(width, value)),
            Value::Abstract { ty, index } => {
                let sort = match terms.get_type_name(ty) {
                    Some(name) => name.to_owned(),
                    None => format!("tau!{}", ty.raw()),
                };
                constant(format!("@{}!{}", sort, index))
            }
        }
    }
}

pub type FunctionTable = FxHashMap<SmallVec<[Value; 4]>, Value>;

#[derive(Debug, Clone, Default)]
pub struct Model {
    values: FxHashMap<Term, Value>,
    functions: FxHashMap<Term, FunctionTable>,
    /// Definitions of eliminated terms, kept when the model was built with them.
    substitutions: FxHashMap<Term, Term>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, t: Term, value: Value) {
        self.values.insert(t, value);
    }

    pub fn set_function_entry(&mut self, f: Term, args: SmallVec<[Value; 4]>, value: Value) {
        self.functions.entry(f).or_default().insert(args, value);
    }

    pub fn set_substitutions(&mut self, substitutions: FxHashMap<Term, Term>) {
        self.substitutions = substitutions;
    }

    pub fn value(&self, t: Term) -> Option<Value> {
        self.values.get(&t).copied()
    }

    pub fn function(&self, f: Term) -> Option<&FunctionTable> {
        self.functions.get(&f)
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn has_substitutions(&self) -> bool {
        !self.substitutions.is_empty()
    }

    /// Terms this model refers to.
    pub fn gc_roots(&self, roots: &mut Vec<Term>) {
        roots.extend(self.values.keys().copied());
        roots.extend(self.functions.keys().copied());
        for (&x, &v) in &self.substitutions {
            roots.push(x);
            roots.push(v);
        }
    }

    // ---------------------------------------------------------------------------------
    // Evaluation
    // ---------------------------------------------------------------------------------

    pub fn eval(&self, terms: &TermTable, t: Term) -> VsResult<Value> {
        terms.check(t)?;
        let mut cache = FxHashMap::default();
        self.eval_rec(terms, t, &mut cache)
    }

    fn eval_rec(&self, terms: &TermTable, t: Term, cache: &mut FxHashMap<Term, Value>) -> VsResult<Value> {
        let p = t.positive();
        let v = match cache.get(&p) {
            Some(&v) => v,
            None => {
                let v = self.eval_node(terms, p, cache)?;
                cache.insert(p, v);
                v
            }
        };
        match v {
            Value::Bool(b) if t.is_negated() => Ok(Value::Bool(!b)),
            _ if t.is_negated() => Err(VsError::EvalFailed(t)),
            _ => Ok(v),
        }
    }

    fn eval_bool(&self, terms: &TermTable, t: Term, cache: &mut FxHashMap<Term, Value>) -> VsResult<bool> {
        match self.eval_rec(terms, t, cache)? {
            Value::Bool(b) => Ok(b),
            _ => Err(VsError::EvalFailed(t)),
        }
    }

    fn eval_bv(&self, terms: &TermTable, t: Term, cache: &mut FxHashMap<Term, Value>) -> VsResult<(u32, u64)> {
        match self.eval_rec(terms, t, cache)? {
            Value::BitVector { width, value } => Ok((width, value)),
            _ => Err(VsError::EvalFailed(t)),
        }
    }

    fn eval_node(&self, terms: &TermTable, p: Term, cache: &mut FxHashMap<Term, Value>) -> VsResult<Value> {
        Ok(match terms.desc(p) {
            TermDesc::True => Value::Bool(true),
            &TermDesc::BvConstant { width, value } => Value::BitVector { width, value },
            TermDesc::Uninterpreted { .. } => {
                if let Some(&v) = self.values.get(&p) {
                    v
                } else if let Some(&def) = self.substitutions.get(&p) {
                    self.eval_rec(terms, def, cache)?
                } else {
                    return Err(VsError::EvalUnknownTerm(p));
                }
            }
            TermDesc::Variable { .. } => return Err(VsError::EvalFreeVar(p)),
            TermDesc::Forall(..) => return Err(VsError::EvalQuantifier(p)),
            &TermDesc::Ite(c, a, b) => {
                let branch = if self.eval_bool(terms, c, cache)? { a } else { b };
                self.eval_rec(terms, branch, cache)?
            }
            &TermDesc::Eq(a, b) => Value::Bool(self.eval_rec(terms, a, cache)? == self.eval_rec(terms, b, cache)?),
            TermDesc::Or(args) => {
                let mut any = false;
                for &a in args {
                    if self.eval_bool(terms, a, cache)? {
                        any = true;
                        break;
                    }
                }
                Value::Bool(any)
            }
            &TermDesc::Xor(a, b) => Value::Bool(self.eval_bool(terms, a, cache)? != self.eval_bool(terms, b, cache)?),
            TermDesc::App(f, args) => {
                let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len());
                for &a in args {
                    values.push(self.eval_rec(terms, a, cache)?);
                }
                self.functions
                    .get(f)
                    .and_then(|table| table.get(&values))
                    .copied()
                    .unwrap_or_else(|| Value::default_for(terms, terms.ty(p)))
            }
            &TermDesc::BitSelect(x, i) => {
                let (_, value) = self.eval_bv(terms, x, cache)?;
                Value::Bool(value >> i & 1 == 1)
            }
            &TermDesc::BvGe(a, b) => {
                let (_, x) = self.eval_bv(terms, a, cache)?;
                let (_, y) = self.eval_bv(terms, b, cache)?;
                Value::Bool(x >= y)
            }
            &TermDesc::BvSge(a, b) => {
                let (width, x) = self.eval_bv(terms, a, cache)?;
                let (_, y) = self.eval_bv(terms, b, cache)?;
                Value::Bool(bv_signed(width, x) >= bv_signed(width, y))
            }
            &TermDesc::BvNeg(a) => {
                let (width, x) = self.eval_bv(terms, a, cache)?;
                Value::BitVector {
                    width,
                    value: x.wrapping_neg() & bv_mask(width),
                }
            }
            TermDesc::BvSum(args) | TermDesc::BvProduct(args) => {
                let sum = matches!(terms.desc(p), TermDesc::BvSum(_));
                let width = terms.bv_width(p).ok_or(VsError::EvalFailed(p))?;
                let mut acc = if sum { 0u64 } else { 1u64 };
                for &a in args {
                    let (_, x) = self.eval_bv(terms, a, cache)?;
                    acc = if sum { acc.wrapping_add(x) } else { acc.wrapping_mul(x) };
                }
                Value::BitVector {
                    width,
                    value: acc & bv_mask(width),
                }
            }
        })
    }

    // ---------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------

    pub fn get_bool_value(&self, terms: &TermTable, t: Term) -> VsResult<bool> {
        terms.check_bool(t)?;
        match self.eval(terms, t)? {
            Value::Bool(b) => Ok(b),
            _ => Err(VsError::EvalFailed(t)),
        }
    }

    /// Bits of a bitvector term, least significant first.
    pub fn get_bv_value(&self, terms: &TermTable, t: Term) -> VsResult<Vec<bool>> {
        terms.check(t)?;
        if terms.bv_width(t).is_none() {
            return Err(vsterms::TermError::BitvectorRequired(t).into());
        }
        match self.eval(terms, t)? {
            Value::BitVector { width, value } => Ok((0..width).map(|i| value >> i & 1 == 1).collect()),
            _ => Err(VsError::EvalFailed(t)),
        }
    }

    pub fn formula_true(&self, terms: &TermTable, f: Term) -> VsResult<bool> {
        self.get_bool_value(terms, f)
    }

    pub fn formulas_true(&self, terms: &TermTable, fs: &[Term]) -> VsResult<bool> {
        for &f in fs {
            if !self.formula_true(terms, f)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------------------
    // Printing
    // ---------------------------------------------------------------------------------

    /// One `(= name value)` line per named term, then the tables of named functions.
    pub fn doc(&self, terms: &TermTable) -> Doc {
        let mut entries: Vec<(String, Doc)> = Vec::new();
        for (&t, v) in &self.values {
            if let Some(name) = terms.get_term_name(t) {
                entries.push((name.to_owned(), sexp(op("="), vec![terms.term_doc(t), v.doc(terms)], 0)));
            }
        }
        for &x in self.substitutions.keys() {
            if self.values.contains_key(&x) {
                continue;
            }
            if let (Some(name), Ok(v)) = (terms.get_term_name(x), self.eval(terms, x)) {
                entries.push((name.to_owned(), sexp(op("="), vec![terms.term_doc(x), v.doc(terms)], 0)));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut functions: Vec<(String, Doc)> = Vec::new();
        for (&f, table) in &self.functions {
            let Some(name) = terms.get_term_name(f) else {
                continue;
            };
            let mut rows: Vec<(String, Doc)> = table
                .iter()
                .map(|(args, value)| {
                    let call = sexp(terms.term_doc(f), args.iter().map(|a| a.doc(terms)).collect(), 1);
                    let row = sexp(op("="), vec![call, value.doc(terms)], 1);
                    (render_plain(&row, usize::MAX), row)
                })
                .collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            let mut args = vec![terms.term_doc(f)];
            args.extend(rows.into_iter().map(|(_, row)| row));
            functions.push((name.to_owned(), sexp(op("function"), args, 0)));
        }
        functions.sort_by(|a, b| a.0.cmp(&b.0));

        RcDoc::intersperse(
            entries.into_iter().chain(functions).map(|(_, doc)| doc),
            RcDoc::hardline(),
        )
    }

    pub fn to_string(&self, terms: &TermTable, width: usize) -> String {
        render_plain(&self.doc(terms), width)
    }

    pub fn print_to<W: WriteColor + Write>(&self, terms: &TermTable, width: usize, out: &mut W) -> VsResult<()> {
        render_to(&self.doc(terms), width, out)?;
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_arithmetic_through_substitutions() {
        let mut terms = TermTable::new();
        let bv4 = terms.types_mut().bv_type(4).unwrap();
        let x = terms.new_uninterpreted_term(bv4).unwrap();
        let y = terms.new_uninterpreted_term(bv4).unwrap();
        let z = terms.new_uninterpreted_term(bv4).unwrap();
        let sum = terms.bv_add(y, z).unwrap();

        let mut model = Model::new();
        model.set_value(y, Value::BitVector { width: 4, value: 9 });
        model.set_value(z, Value::BitVector { width: 4, value: 8 });
        assert!(matches!(model.eval(&terms, x), Err(VsError::EvalUnknownTerm(_))));

        let mut subst = FxHashMap::default();
        subst.insert(x, sum);
        model.set_substitutions(subst);
        assert_eq!(model.eval(&terms, x).unwrap(), Value::BitVector { width: 4, value: 1 });
        assert_eq!(model.get_bv_value(&terms, x).unwrap(), vec![true, false, false, false]);

        let ge = terms.bv_sge(y, z).unwrap();
        // -7 >= -8
        assert!(model.formula_true(&terms, ge).unwrap());
    }

    #[test]
    fn missing_function_entries_use_defaults() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let a = terms.new_uninterpreted_term(s).unwrap();
        let b = terms.new_uninterpreted_term(s).unwrap();
        let pa = terms.application(p, &[a]).unwrap();
        let pb = terms.application(p, &[b]).unwrap();

        let mut model = Model::new();
        model.set_value(a, Value::Abstract { ty: s, index: 0 });
        model.set_value(b, Value::Abstract { ty: s, index: 1 });
        model.set_function_entry(p, SmallVec::from_slice(&[Value::Abstract { ty: s, index: 0 }]), Value::Bool(true));

        assert!(model.get_bool_value(&terms, pa).unwrap());
        assert!(!model.get_bool_value(&terms, pb).unwrap());
        assert!(!model.formulas_true(&terms, &[pa, pb]).unwrap());
    }

    #[test]
    fn quantifiers_and_variables_do_not_evaluate() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let x = terms.new_variable(s).unwrap();
        let px = terms.application(p, &[x]).unwrap();
        let all = terms.forall(&[x], px).unwrap();

        let model = Model::new();
        assert!(matches!(model.eval(&terms, px), Err(VsError::EvalFreeVar(_))));
        assert!(matches!(model.eval(&terms, all), Err(VsError::EvalQuantifier(_))));
    }

    #[test]
    fn prints_named_values() {
        let mut terms = TermTable::new();
        let bv4 = terms.types_mut().bv_type(4).unwrap();
        let x = terms.new_uninterpreted_term(bv4).unwrap();
        let p = terms.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let hidden = terms.new_uninterpreted_term(TypeId::BOOL).unwrap();
        terms.set_term_name(x, "x").unwrap();
        terms.set_term_name(p, "p").unwrap();

        let mut model = Model::new();
        model.set_value(x, Value::BitVector { width: 4, value: 5 });
        model.set_value(p, Value::Bool(true));
        model.set_value(hidden, Value::Bool(false));
        assert_eq!(model.to_string(&terms, 80), "(= p true)\n(= x 0b0101)");
    }
}
