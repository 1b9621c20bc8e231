//! Hash-consed term table.
//!
//! Every term is a node in an arena addressed by a dense index. Structurally equal nodes
//! share their index, so comparing two [`Term`]s compares their structure. Boolean terms
//! carry a polarity bit; `!t` is the negation of `t` and never allocates.
//!
//! Constructors perform light normalization (constant folding, operand ordering,
//! flattening of sums and products) so that obviously equivalent terms often share an
//! identity. They never allocate on failure.

use std::ops::Not;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{SmallVec, smallvec};
use strum::{Display, EnumIs, FromRepr};

use crate::{
    error::{TermError, TermResult},
    names::SymbolTable,
    oom,
    types::{TypeDesc, TypeId, TypeTable},
};

/// Largest number of factors in a bitvector product.
pub const MAX_DEGREE: u64 = 1024;

/// A term identity: `index << 1 | negated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term(u32);

impl Term {
    pub const TRUE: Term = Term(2);
    pub const FALSE: Term = Term(3);

    pub(crate) const fn new(index: u32, negated: bool) -> Self {
        Term(index << 1 | negated as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        Term(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 >> 1
    }

    pub fn is_negated(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn is_positive(self) -> bool {
        !self.is_negated()
    }

    pub fn positive(self) -> Term {
        Term(self.0 & !1)
    }

    /// Flip the polarity when `negated` holds.
    pub fn with_polarity(self, negated: bool) -> Term {
        Term(self.0 ^ negated as u32)
    }
}

impl Not for Term {
    type Output = Term;

    fn not(self) -> Term {
        Term(self.0 ^ 1)
    }
}

/// Structure of a positive term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermDesc {
    True,
    BvConstant { width: u32, value: u64 },
    Uninterpreted { ty: TypeId, serial: u32 },
    /// Bound variable, only meaningful under a quantifier.
    Variable { ty: TypeId, serial: u32 },
    Ite(Term, Term, Term),
    Eq(Term, Term),
    Or(SmallVec<[Term; 4]>),
    Xor(Term, Term),
    App(Term, SmallVec<[Term; 4]>),
    Forall(SmallVec<[Term; 2]>, Term),
    BitSelect(Term, u32),
    BvGe(Term, Term),
    BvSge(Term, Term),
    BvNeg(Term),
    BvSum(SmallVec<[Term; 4]>),
    BvProduct(SmallVec<[Term; 4]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIs)]
pub enum TermKind {
    Constant,
    Uninterpreted,
    Variable,
    Composite,
    Projection,
    Sum,
    Product,
}

/// Fine-grained constructor of a term, as exposed to term exploration.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
pub enum TermConstructor {
    BoolConstant = 0,
    BvConstant,
    Uninterpreted,
    Variable,
    Not,
    Ite,
    Eq,
    Or,
    Xor,
    App,
    Forall,
    BitSelect,
    BvGe,
    BvSge,
    BvNeg,
    BvSum,
    BvProduct,
}

impl TermDesc {
    pub fn kind(&self) -> TermKind {
        match self {
            TermDesc::True | TermDesc::BvConstant { .. } => TermKind::Constant,
            TermDesc::Uninterpreted { .. } => TermKind::Uninterpreted,
            TermDesc::Variable { .. } => TermKind::Variable,
            TermDesc::BitSelect(..) => TermKind::Projection,
            TermDesc::BvSum(_) => TermKind::Sum,
            TermDesc::BvProduct(_) => TermKind::Product,
            _ => TermKind::Composite,
        }
    }

    pub fn constructor(&self) -> TermConstructor {
        match self {
            TermDesc::True => TermConstructor::BoolConstant,
            TermDesc::BvConstant { .. } => TermConstructor::BvConstant,
            TermDesc::Uninterpreted { .. } => TermConstructor::Uninterpreted,
            TermDesc::Variable { .. } => TermConstructor::Variable,
            TermDesc::Ite(..) => TermConstructor::Ite,
            TermDesc::Eq(..) => TermConstructor::Eq,
            TermDesc::Or(_) => TermConstructor::Or,
            TermDesc::Xor(..) => TermConstructor::Xor,
            TermDesc::App(..) => TermConstructor::App,
            TermDesc::Forall(..) => TermConstructor::Forall,
            TermDesc::BitSelect(..) => TermConstructor::BitSelect,
            TermDesc::BvGe(..) => TermConstructor::BvGe,
            TermDesc::BvSge(..) => TermConstructor::BvSge,
            TermDesc::BvNeg(_) => TermConstructor::BvNeg,
            TermDesc::BvSum(_) => TermConstructor::BvSum,
            TermDesc::BvProduct(_) => TermConstructor::BvProduct,
        }
    }

    /// Direct subterms, in a fixed order.
    pub fn children(&self) -> SmallVec<[Term; 4]> {
        match self {
            TermDesc::True
            | TermDesc::BvConstant { .. }
            | TermDesc::Uninterpreted { .. }
            | TermDesc::Variable { .. } => SmallVec::new(),
            TermDesc::Ite(c, a, b) => smallvec![*c, *a, *b],
            TermDesc::Eq(a, b) | TermDesc::Xor(a, b) | TermDesc::BvGe(a, b) | TermDesc::BvSge(a, b) => {
                smallvec![*a, *b]
            }
            TermDesc::Or(args) | TermDesc::BvSum(args) | TermDesc::BvProduct(args) => args.clone(),
            TermDesc::App(f, args) => std::iter::once(*f).chain(args.iter().copied()).collect(),
            TermDesc::Forall(vars, body) => vars.iter().copied().chain(std::iter::once(*body)).collect(),
            TermDesc::BitSelect(x, _) | TermDesc::BvNeg(x) => smallvec![*x],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TermNode {
    pub(crate) desc: TermDesc,
    pub(crate) ty: TypeId,
}

pub fn bv_mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

/// Interpret the low `width` bits of `value` as a two's complement integer.
pub fn bv_signed(width: u32, value: u64) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

#[derive(Debug)]
pub struct TermTable {
    pub(crate) types: TypeTable,
    pub(crate) nodes: Vec<Option<TermNode>>,
    pub(crate) index: FxHashMap<TermDesc, u32>,
    pub(crate) free_list: Vec<u32>,
    pub(crate) refcounts: FxHashMap<u32, u32>,
    next_serial: u32,
    pub(crate) term_names: SymbolTable<Term>,
    pub(crate) type_names: SymbolTable<TypeId>,
}

impl Default for TermTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TermTable {
    pub fn new() -> Self {
        let mut table = Self {
            types: TypeTable::new(),
            nodes: vec![None],
            index: FxHashMap::default(),
            free_list: Vec::new(),
            refcounts: FxHashMap::default(),
            next_serial: 0,
            term_names: SymbolTable::new(),
            type_names: SymbolTable::new(),
        };
        let t = table.intern(TermDesc::True, TypeId::BOOL);
        debug_assert_eq!(t, Term::TRUE);
        table
    }

    fn intern(&mut self, desc: TermDesc, ty: TypeId) -> Term {
        if let Some(&i) = self.index.get(&desc) {
            return Term::new(i, false);
        }

        let node = TermNode {
            desc: desc.clone(),
            ty,
        };
        let i = match self.free_list.pop() {
            Some(i) => {
                self.nodes[i as usize] = Some(node);
                i
            }
            None => {
                oom::reserve(&mut self.nodes, 1);
                self.nodes.push(Some(node));
                self.nodes.len() as u32 - 1
            }
        };
        self.index.insert(desc, i);
        Term::new(i, false)
    }

    fn fresh_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeTable {
        &mut self.types
    }

    /// Number of live terms (the boolean constant included).
    pub fn num_terms(&self) -> usize {
        self.nodes.len() - self.free_list.len() - 1
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub(crate) fn node(&self, t: Term) -> Option<&TermNode> {
        self.nodes.get(t.index() as usize).and_then(Option::as_ref)
    }

    /// Only boolean terms may carry a negative polarity.
    pub fn is_valid(&self, t: Term) -> bool {
        match self.node(t) {
            Some(node) => t.is_positive() || node.ty == TypeId::BOOL,
            None => false,
        }
    }

    pub fn check(&self, t: Term) -> TermResult<()> {
        if self.is_valid(t) {
            Ok(())
        } else {
            Err(TermError::InvalidTerm(t))
        }
    }

    pub fn type_of(&self, t: Term) -> TermResult<TypeId> {
        self.check(t)?;
        Ok(self.ty(t))
    }

    /// Type of a term known to be valid.
    pub fn ty(&self, t: Term) -> TypeId {
        match self.node(t) {
            Some(node) => node.ty,
            None => panic!("invalid term {:?}", t),
        }
    }

    /// Structure of the positive node of a valid term.
    pub fn desc(&self, t: Term) -> &TermDesc {
        match self.node(t) {
            Some(node) => &node.desc,
            None => panic!("invalid term {:?}", t),
        }
    }

    /// Look a node up without creating it.
    pub fn find(&self, desc: &TermDesc) -> Option<Term> {
        self.index.get(desc).map(|&i| Term::new(i, false))
    }

    pub fn is_bool(&self, t: Term) -> bool {
        self.ty(t) == TypeId::BOOL
    }

    pub fn bv_width(&self, t: Term) -> Option<u32> {
        self.types.bv_width(self.ty(t))
    }

    pub fn check_bool(&self, t: Term) -> TermResult<()> {
        if self.type_of(t)? != TypeId::BOOL {
            return Err(TermError::TypeMismatch {
                term: t,
                expected: TypeId::BOOL,
            });
        }
        Ok(())
    }

    fn check_bv(&self, t: Term) -> TermResult<u32> {
        let ty = self.type_of(t)?;
        self.types.bv_width(ty).ok_or(TermError::BitvectorRequired(t))
    }

    fn check_same_width(&self, a: Term, b: Term) -> TermResult<u32> {
        let wa = self.check_bv(a)?;
        let wb = self.check_bv(b)?;
        if wa != wb {
            return Err(TermError::IncompatibleBvSizes {
                left: a,
                left_type: self.ty(a),
                right: b,
                right_type: self.ty(b),
            });
        }
        Ok(wa)
    }

    fn check_same_type(&self, a: Term, b: Term) -> TermResult<TypeId> {
        let ta = self.type_of(a)?;
        let tb = self.type_of(b)?;
        if ta != tb {
            return Err(TermError::IncompatibleTypes {
                left: a,
                left_type: ta,
                right: b,
                right_type: tb,
            });
        }
        Ok(ta)
    }

    // ---------------------------------------------------------------------------------
    // Exploration
    // ---------------------------------------------------------------------------------

    pub fn kind(&self, t: Term) -> TermResult<TermKind> {
        self.check(t)?;
        Ok(self.desc(t).kind())
    }

    pub fn constructor(&self, t: Term) -> TermResult<TermConstructor> {
        self.check(t)?;
        if t.is_negated() {
            return Ok(TermConstructor::Not);
        }
        Ok(self.desc(t).constructor())
    }

    pub fn children(&self, t: Term) -> TermResult<SmallVec<[Term; 4]>> {
        self.check(t)?;
        if t.is_negated() {
            return Ok(smallvec![t.positive()]);
        }
        Ok(self.desc(t).children())
    }

    pub fn num_children(&self, t: Term) -> TermResult<usize> {
        Ok(self.children(t)?.len())
    }

    pub fn child(&self, t: Term, i: usize) -> TermResult<Term> {
        self.children(t)?
            .get(i)
            .copied()
            .ok_or(TermError::InvalidTermOp(t))
    }

    pub fn is_atomic(&self, t: Term) -> TermResult<bool> {
        let kind = self.kind(t)?;
        Ok(t.is_positive()
            && matches!(kind, TermKind::Constant | TermKind::Uninterpreted | TermKind::Variable))
    }

    pub fn is_composite(&self, t: Term) -> TermResult<bool> {
        let kind = self.kind(t)?;
        Ok(t.is_negated() || kind == TermKind::Composite)
    }

    pub fn is_projection(&self, t: Term) -> TermResult<bool> {
        Ok(t.is_positive() && self.kind(t)? == TermKind::Projection)
    }

    pub fn is_sum(&self, t: Term) -> TermResult<bool> {
        Ok(self.kind(t)? == TermKind::Sum)
    }

    pub fn is_product(&self, t: Term) -> TermResult<bool> {
        Ok(self.kind(t)? == TermKind::Product)
    }

    pub fn bool_const_value(&self, t: Term) -> TermResult<bool> {
        self.check(t)?;
        match self.desc(t) {
            TermDesc::True => Ok(t.is_positive()),
            _ => Err(TermError::InvalidTermOp(t)),
        }
    }

    pub fn bv_const_value(&self, t: Term) -> TermResult<u64> {
        self.check(t)?;
        match self.desc(t) {
            TermDesc::BvConstant { value, .. } => Ok(*value),
            _ => Err(TermError::InvalidTermOp(t)),
        }
    }

    fn const_value(&self, t: Term) -> Option<u64> {
        match self.desc(t) {
            TermDesc::BvConstant { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn projection_index(&self, t: Term) -> TermResult<u32> {
        self.check(t)?;
        match self.desc(t) {
            TermDesc::BitSelect(_, i) if t.is_positive() => Ok(*i),
            _ => Err(TermError::InvalidTermOp(t)),
        }
    }

    /// Every distinct positive subterm of `t` (itself included), children first.
    pub fn subterms(&self, t: Term) -> Vec<Term> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![(t.positive(), false)];
        while let Some((u, expanded)) = stack.pop() {
            if expanded {
                order.push(u);
                continue;
            }
            if !visited.insert(u) {
                continue;
            }
            stack.push((u, true));
            for c in self.desc(u).children() {
                if !visited.contains(&c.positive()) {
                    stack.push((c.positive(), false));
                }
            }
        }
        order
    }

    /// Whether `x` occurs in `t`.
    pub fn occurs(&self, x: Term, t: Term) -> bool {
        let x = x.positive();
        let mut visited = FxHashSet::default();
        let mut stack = vec![t.positive()];
        while let Some(u) = stack.pop() {
            if u == x {
                return true;
            }
            if visited.insert(u) {
                stack.extend(self.desc(u).children().into_iter().map(Term::positive));
            }
        }
        false
    }

    /// Whether `t` contains no bound variable.
    pub fn is_ground(&self, t: Term) -> bool {
        self.subterms(t)
            .iter()
            .all(|&u| !matches!(self.desc(u), TermDesc::Variable { .. }))
    }

    // ---------------------------------------------------------------------------------
    // Atoms
    // ---------------------------------------------------------------------------------

    pub fn new_uninterpreted_term(&mut self, ty: TypeId) -> TermResult<Term> {
        self.types.check(ty)?;
        let serial = self.fresh_serial();
        Ok(self.intern(TermDesc::Uninterpreted { ty, serial }, ty))
    }

    pub fn new_variable(&mut self, ty: TypeId) -> TermResult<Term> {
        self.types.check(ty)?;
        let serial = self.fresh_serial();
        Ok(self.intern(TermDesc::Variable { ty, serial }, ty))
    }

    // ---------------------------------------------------------------------------------
    // Boolean structure
    // ---------------------------------------------------------------------------------

    pub fn not(&self, t: Term) -> TermResult<Term> {
        self.check_bool(t)?;
        Ok(!t)
    }

    pub fn or(&mut self, args: &[Term]) -> TermResult<Term> {
        for &t in args {
            self.check_bool(t)?;
        }

        let mut kept: SmallVec<[Term; 4]> = SmallVec::new();
        for &t in args {
            if t == Term::TRUE {
                return Ok(Term::TRUE);
            }
            if t != Term::FALSE {
                kept.push(t);
            }
        }
        kept.sort_unstable();
        kept.dedup();
        // After sorting, a term and its negation are adjacent.
        if kept.windows(2).any(|w| w[0] == !w[1]) {
            return Ok(Term::TRUE);
        }

        Ok(match kept.len() {
            0 => Term::FALSE,
            1 => kept[0],
            _ => self.intern(TermDesc::Or(kept), TypeId::BOOL),
        })
    }

    pub fn and(&mut self, args: &[Term]) -> TermResult<Term> {
        for &t in args {
            self.check_bool(t)?;
        }
        let negated: SmallVec<[Term; 4]> = args.iter().map(|&t| !t).collect();
        Ok(!self.or(&negated)?)
    }

    pub fn or2(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.or(&[a, b])
    }

    pub fn and2(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.and(&[a, b])
    }

    pub fn implies(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.check_bool(a)?;
        self.or(&[!a, b])
    }

    pub fn xor2(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.check_bool(a)?;
        self.check_bool(b)?;

        // xor(!a, b) == !xor(a, b)
        let parity = a.is_negated() ^ b.is_negated();
        let (mut a, mut b) = (a.positive(), b.positive());
        let result = if a == b {
            Term::FALSE
        } else if a == Term::TRUE {
            !b
        } else if b == Term::TRUE {
            !a
        } else {
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            self.intern(TermDesc::Xor(a, b), TypeId::BOOL)
        };
        Ok(result.with_polarity(parity))
    }

    pub fn xor(&mut self, args: &[Term]) -> TermResult<Term> {
        let mut acc = Term::FALSE;
        for &t in args {
            acc = self.xor2(acc, t)?;
        }
        Ok(acc)
    }

    pub fn iff(&mut self, a: Term, b: Term) -> TermResult<Term> {
        Ok(!self.xor2(a, b)?)
    }

    pub fn ite(&mut self, c: Term, a: Term, b: Term) -> TermResult<Term> {
        self.check_bool(c)?;
        let ty = self.check_same_type(a, b)?;

        if c == Term::TRUE || a == b {
            return Ok(a);
        }
        if c == Term::FALSE {
            return Ok(b);
        }
        if c.is_negated() {
            return self.ite(!c, b, a);
        }

        if ty == TypeId::BOOL {
            if a == Term::TRUE {
                return self.or2(c, b);
            }
            if a == Term::FALSE {
                return self.and2(!c, b);
            }
            if b == Term::TRUE {
                return self.or2(!c, a);
            }
            if b == Term::FALSE {
                return self.and2(c, a);
            }
            if a == !b {
                return self.iff(c, a);
            }
            if a.is_negated() && b.is_negated() {
                return Ok(!self.intern(TermDesc::Ite(c, !a, !b), ty));
            }
        }
        Ok(self.intern(TermDesc::Ite(c, a, b), ty))
    }

    pub fn eq(&mut self, a: Term, b: Term) -> TermResult<Term> {
        let ty = self.check_same_type(a, b)?;
        if a == b {
            return Ok(Term::TRUE);
        }
        if ty == TypeId::BOOL {
            return self.iff(a, b);
        }
        if let (Some(x), Some(y)) = (self.const_value(a), self.const_value(b)) {
            return Ok(if x == y { Term::TRUE } else { Term::FALSE });
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        Ok(self.intern(TermDesc::Eq(a, b), TypeId::BOOL))
    }

    pub fn neq(&mut self, a: Term, b: Term) -> TermResult<Term> {
        Ok(!self.eq(a, b)?)
    }

    pub fn distinct(&mut self, args: &[Term]) -> TermResult<Term> {
        if args.is_empty() {
            return Err(TermError::PosIntRequired(0));
        }
        let mut diseqs = Vec::new();
        for i in 0..args.len() {
            for j in i + 1..args.len() {
                diseqs.push(self.neq(args[i], args[j])?);
            }
        }
        self.and(&diseqs)
    }

    // ---------------------------------------------------------------------------------
    // Uninterpreted functions and quantifiers
    // ---------------------------------------------------------------------------------

    pub fn application(&mut self, f: Term, args: &[Term]) -> TermResult<Term> {
        let fty = self.type_of(f)?;
        let (domain, range) = match self.types.desc(fty) {
            TypeDesc::Function { domain, range } => (domain.clone(), *range),
            _ => return Err(TermError::FunctionRequired(f)),
        };
        if args.is_empty() {
            return Err(TermError::PosIntRequired(0));
        }
        if args.len() != domain.len() {
            return Err(TermError::WrongNumberOfArguments {
                function: f,
                expected: domain.len() as u32,
                got: args.len() as u32,
            });
        }
        for (&arg, &expected) in args.iter().zip(domain.iter()) {
            if self.type_of(arg)? != expected {
                return Err(TermError::TypeMismatch { term: arg, expected });
            }
        }
        Ok(self.intern(TermDesc::App(f, args.into()), range))
    }

    pub fn forall(&mut self, vars: &[Term], body: Term) -> TermResult<Term> {
        if vars.is_empty() {
            return Err(TermError::PosIntRequired(0));
        }
        for (i, &v) in vars.iter().enumerate() {
            self.check(v)?;
            if v.is_negated() || !matches!(self.desc(v), TermDesc::Variable { .. }) {
                return Err(TermError::VariableRequired(v));
            }
            if vars[..i].contains(&v) {
                return Err(TermError::DuplicateVariable(v));
            }
        }
        self.check_bool(body)?;
        if body == Term::TRUE || body == Term::FALSE {
            return Ok(body);
        }
        Ok(self.intern(TermDesc::Forall(vars.into(), body), TypeId::BOOL))
    }

    pub fn exists(&mut self, vars: &[Term], body: Term) -> TermResult<Term> {
        self.check_bool(body)?;
        Ok(!self.forall(vars, !body)?)
    }

    // ---------------------------------------------------------------------------------
    // Bitvectors
    // ---------------------------------------------------------------------------------

    pub fn bv_const(&mut self, width: u32, value: u64) -> TermResult<Term> {
        let ty = self.types.bv_type(width)?;
        Ok(self.intern(
            TermDesc::BvConstant {
                width,
                value: value & bv_mask(width),
            },
            ty,
        ))
    }

    /// Constant from little-endian bits.
    pub fn bv_const_from_bits(&mut self, bits: &[bool]) -> TermResult<Term> {
        let width = u32::try_from(bits.len()).map_err(|_| TermError::MaxBvSizeExceeded(bits.len() as u64))?;
        let value = bits
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| if b && i < 64 { acc | 1 << i } else { acc });
        self.bv_const(width, value)
    }

    pub fn bv_zero(&mut self, width: u32) -> TermResult<Term> {
        self.bv_const(width, 0)
    }

    pub fn bv_one(&mut self, width: u32) -> TermResult<Term> {
        self.bv_const(width, 1)
    }

    fn check_bv_args(&self, args: &[Term]) -> TermResult<u32> {
        let Some(&first) = args.first() else {
            return Err(TermError::PosIntRequired(0));
        };
        let width = self.check_bv(first)?;
        for &t in &args[1..] {
            self.check_same_width(first, t)?;
        }
        Ok(width)
    }

    pub fn bv_sum(&mut self, args: &[Term]) -> TermResult<Term> {
        let width = self.check_bv_args(args)?;

        let mut constant = 0u64;
        let mut rest: SmallVec<[Term; 4]> = SmallVec::new();
        let mut pending: Vec<Term> = args.to_vec();
        while let Some(t) = pending.pop() {
            match self.desc(t) {
                TermDesc::BvConstant { value, .. } => constant = constant.wrapping_add(*value),
                TermDesc::BvSum(inner) => pending.extend(inner.iter().copied()),
                _ => rest.push(t),
            }
        }
        constant &= bv_mask(width);

        if rest.is_empty() {
            return self.bv_const(width, constant);
        }
        if constant != 0 {
            rest.push(self.bv_const(width, constant)?);
        }
        if rest.len() == 1 {
            return Ok(rest[0]);
        }
        rest.sort_unstable();
        let ty = self.ty(args[0]);
        Ok(self.intern(TermDesc::BvSum(rest), ty))
    }

    pub fn bv_add(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.bv_sum(&[a, b])
    }

    pub fn bv_neg(&mut self, a: Term) -> TermResult<Term> {
        let width = self.check_bv(a)?;
        match self.desc(a) {
            TermDesc::BvConstant { value, .. } => {
                let value = value.wrapping_neg();
                self.bv_const(width, value)
            }
            TermDesc::BvNeg(x) => Ok(*x),
            _ => {
                let ty = self.ty(a);
                Ok(self.intern(TermDesc::BvNeg(a), ty))
            }
        }
    }

    pub fn bv_sub(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.check_same_width(a, b)?;
        let nb = self.bv_neg(b)?;
        self.bv_sum(&[a, nb])
    }

    pub fn bv_product(&mut self, args: &[Term]) -> TermResult<Term> {
        let width = self.check_bv_args(args)?;

        let mut constant = 1u64;
        let mut rest: SmallVec<[Term; 4]> = SmallVec::new();
        let mut pending: Vec<Term> = args.to_vec();
        while let Some(t) = pending.pop() {
            match self.desc(t) {
                TermDesc::BvConstant { value, .. } => constant = constant.wrapping_mul(*value),
                TermDesc::BvProduct(inner) => pending.extend(inner.iter().copied()),
                _ => rest.push(t),
            }
        }
        constant &= bv_mask(width);

        if constant == 0 || rest.is_empty() {
            return self.bv_const(width, constant);
        }
        if rest.len() as u64 > MAX_DEGREE {
            return Err(TermError::DegreeOverflow(rest.len() as u64));
        }
        if constant != 1 {
            rest.push(self.bv_const(width, constant)?);
        }
        if rest.len() == 1 {
            return Ok(rest[0]);
        }
        rest.sort_unstable();
        let ty = self.ty(args[0]);
        Ok(self.intern(TermDesc::BvProduct(rest), ty))
    }

    pub fn bv_mul(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.bv_product(&[a, b])
    }

    pub fn bv_power(&mut self, a: Term, degree: u64) -> TermResult<Term> {
        let width = self.check_bv(a)?;
        if degree > MAX_DEGREE {
            return Err(TermError::DegreeOverflow(degree));
        }
        if degree == 0 {
            return self.bv_one(width);
        }
        let factors = vec![a; degree as usize];
        self.bv_product(&factors)
    }

    /// Unsigned `a >= b`.
    pub fn bv_ge(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.check_same_width(a, b)?;
        if a == b {
            return Ok(Term::TRUE);
        }
        match (self.const_value(a), self.const_value(b)) {
            (Some(x), Some(y)) => return Ok(if x >= y { Term::TRUE } else { Term::FALSE }),
            (_, Some(0)) => return Ok(Term::TRUE),
            _ => {}
        }
        Ok(self.intern(TermDesc::BvGe(a, b), TypeId::BOOL))
    }

    pub fn bv_gt(&mut self, a: Term, b: Term) -> TermResult<Term> {
        Ok(!self.bv_ge(b, a)?)
    }

    pub fn bv_le(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.bv_ge(b, a)
    }

    pub fn bv_lt(&mut self, a: Term, b: Term) -> TermResult<Term> {
        Ok(!self.bv_ge(a, b)?)
    }

    /// Signed `a >= b`.
    pub fn bv_sge(&mut self, a: Term, b: Term) -> TermResult<Term> {
        let width = self.check_same_width(a, b)?;
        if a == b {
            return Ok(Term::TRUE);
        }
        match (self.const_value(a), self.const_value(b)) {
            (Some(x), Some(y)) => {
                let ge = bv_signed(width, x) >= bv_signed(width, y);
                return Ok(if ge { Term::TRUE } else { Term::FALSE });
            }
            (_, Some(y)) if y == 1u64 << (width - 1) => return Ok(Term::TRUE),
            _ => {}
        }
        Ok(self.intern(TermDesc::BvSge(a, b), TypeId::BOOL))
    }

    pub fn bv_sgt(&mut self, a: Term, b: Term) -> TermResult<Term> {
        Ok(!self.bv_sge(b, a)?)
    }

    pub fn bv_sle(&mut self, a: Term, b: Term) -> TermResult<Term> {
        self.bv_sge(b, a)
    }

    pub fn bv_slt(&mut self, a: Term, b: Term) -> TermResult<Term> {
        Ok(!self.bv_sge(a, b)?)
    }

    /// Bit `index` of `t` (bit 0 is the least significant).
    pub fn bit_select(&mut self, t: Term, index: u32) -> TermResult<Term> {
        let width = self.check_bv(t)?;
        if index >= width {
            return Err(TermError::InvalidBitExtract { term: t, index });
        }
        if let Some(value) = self.const_value(t) {
            return Ok(if value >> index & 1 == 1 { Term::TRUE } else { Term::FALSE });
        }
        Ok(self.intern(TermDesc::BitSelect(t, index), TypeId::BOOL))
    }

    // ---------------------------------------------------------------------------------
    // Substitution
    // ---------------------------------------------------------------------------------

    /// Replace each `(x, v)` of `pairs` by `v` in `t`. Every `x` must be an
    /// uninterpreted term or a variable, and `v` must have the type of `x`.
    pub fn subst_term(&mut self, pairs: &[(Term, Term)], t: Term) -> TermResult<Term> {
        self.check(t)?;
        let mut map = FxHashMap::default();
        for &(x, v) in pairs {
            self.check(x)?;
            if x.is_negated()
                || !matches!(
                    self.desc(x),
                    TermDesc::Uninterpreted { .. } | TermDesc::Variable { .. }
                )
            {
                return Err(TermError::VariableRequired(x));
            }
            let expected = self.ty(x);
            if self.type_of(v)? != expected {
                return Err(TermError::TypeMismatch { term: v, expected });
            }
            map.insert(x, v);
        }
        self.subst(&map, t)
    }

    /// Apply `map` (keyed by positive atoms) to `t`, rebuilding through the
    /// simplifying constructors.
    pub fn subst(&mut self, map: &FxHashMap<Term, Term>, t: Term) -> TermResult<Term> {
        if map.is_empty() {
            return Ok(t);
        }
        let mut cache = FxHashMap::default();
        self.subst_rec(map, t, &mut cache)
    }

    fn subst_rec(
        &mut self,
        map: &FxHashMap<Term, Term>,
        t: Term,
        cache: &mut FxHashMap<Term, Term>,
    ) -> TermResult<Term> {
        let p = t.positive();
        let r = if let Some(&r) = map.get(&p) {
            r
        } else if let Some(&r) = cache.get(&p) {
            r
        } else {
            let r = self.subst_node(map, p, cache)?;
            cache.insert(p, r);
            r
        };
        Ok(r.with_polarity(t.is_negated()))
    }

    fn subst_node(
        &mut self,
        map: &FxHashMap<Term, Term>,
        p: Term,
        cache: &mut FxHashMap<Term, Term>,
    ) -> TermResult<Term> {
        let desc = self.desc(p).clone();
        let mut rec = |table: &mut Self, u: Term| table.subst_rec(map, u, cache);
        match desc {
            TermDesc::True
            | TermDesc::BvConstant { .. }
            | TermDesc::Uninterpreted { .. }
            | TermDesc::Variable { .. } => Ok(p),
            TermDesc::Ite(c, a, b) => {
                let (c, a, b) = (rec(self, c)?, rec(self, a)?, rec(self, b)?);
                self.ite(c, a, b)
            }
            TermDesc::Eq(a, b) => {
                let (a, b) = (rec(self, a)?, rec(self, b)?);
                self.eq(a, b)
            }
            TermDesc::Xor(a, b) => {
                let (a, b) = (rec(self, a)?, rec(self, b)?);
                self.xor2(a, b)
            }
            TermDesc::BvGe(a, b) => {
                let (a, b) = (rec(self, a)?, rec(self, b)?);
                self.bv_ge(a, b)
            }
            TermDesc::BvSge(a, b) => {
                let (a, b) = (rec(self, a)?, rec(self, b)?);
                self.bv_sge(a, b)
            }
            TermDesc::BvNeg(a) => {
                let a = rec(self, a)?;
                self.bv_neg(a)
            }
            TermDesc::BitSelect(x, i) => {
                let x = rec(self, x)?;
                self.bit_select(x, i)
            }
            TermDesc::Or(args) => {
                let args = args.iter().map(|&u| rec(self, u)).collect::<TermResult<Vec<_>>>()?;
                self.or(&args)
            }
            TermDesc::BvSum(args) => {
                let args = args.iter().map(|&u| rec(self, u)).collect::<TermResult<Vec<_>>>()?;
                self.bv_sum(&args)
            }
            TermDesc::BvProduct(args) => {
                let args = args.iter().map(|&u| rec(self, u)).collect::<TermResult<Vec<_>>>()?;
                self.bv_product(&args)
            }
            TermDesc::App(f, args) => {
                let f = rec(self, f)?;
                let args = args.iter().map(|&u| rec(self, u)).collect::<TermResult<Vec<_>>>()?;
                self.application(f, &args)
            }
            TermDesc::Forall(vars, body) => {
                if vars.iter().any(|v| map.contains_key(v)) {
                    // Bound variables shadow the substitution.
                    let mut inner = map.clone();
                    for v in &vars {
                        inner.remove(v);
                    }
                    let body = self.subst(&inner, body)?;
                    self.forall(&vars, body)
                } else {
                    let body = rec(self, body)?;
                    self.forall(&vars, body)
                }
            }
        }
    }

    // ---------------------------------------------------------------------------------
    // Reference counts and names
    // ---------------------------------------------------------------------------------

    pub fn incref_term(&mut self, t: Term) -> TermResult<()> {
        self.check(t)?;
        *self.refcounts.entry(t.index()).or_insert(0) += 1;
        Ok(())
    }

    pub fn decref_term(&mut self, t: Term) -> TermResult<()> {
        self.check(t)?;
        match self.refcounts.get_mut(&t.index()) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.refcounts.remove(&t.index());
            }
            None => return Err(TermError::BadTermDecref(t)),
        }
        Ok(())
    }

    pub fn term_refcount(&self, t: Term) -> u32 {
        self.refcounts.get(&t.index()).copied().unwrap_or(0)
    }

    pub fn set_term_name(&mut self, t: Term, name: &str) -> TermResult<()> {
        self.check(t)?;
        debug!("Binding name '{}' to {:?}", name, t);
        self.term_names.set_name(name, t);
        Ok(())
    }

    pub fn remove_term_name(&mut self, name: &str) -> Option<Term> {
        self.term_names.remove_name(name)
    }

    pub fn get_term_by_name(&self, name: &str) -> Option<Term> {
        self.term_names.get_by_name(name)
    }

    pub fn get_term_name(&self, t: Term) -> Option<&str> {
        self.term_names.get_name(t)
    }

    pub fn clear_term_name(&mut self, t: Term) -> TermResult<()> {
        self.check(t)?;
        self.term_names.clear_name(t);
        Ok(())
    }

    pub fn set_type_name(&mut self, ty: TypeId, name: &str) -> TermResult<()> {
        self.types.check(ty)?;
        self.type_names.set_name(name, ty);
        Ok(())
    }

    pub fn remove_type_name(&mut self, name: &str) -> Option<TypeId> {
        self.type_names.remove_name(name)
    }

    pub fn get_type_by_name(&self, name: &str) -> Option<TypeId> {
        self.type_names.get_by_name(name)
    }

    pub fn get_type_name(&self, ty: TypeId) -> Option<&str> {
        self.type_names.get_name(ty)
    }

    pub fn clear_type_name(&mut self, ty: TypeId) -> TermResult<()> {
        self.types.check(ty)?;
        self.type_names.clear_name(ty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bv4(table: &mut TermTable) -> TypeId {
        table.types_mut().bv_type(4).unwrap()
    }

    #[test]
    fn constants_and_polarity() {
        let table = TermTable::new();
        assert_eq!(!Term::TRUE, Term::FALSE);
        assert_eq!(table.bool_const_value(Term::FALSE), Ok(false));
        assert_eq!(table.num_terms(), 1);
        assert!(!table.is_valid(Term::from_raw(0)));
    }

    #[test]
    fn hash_consing_shares_structure() {
        let mut table = TermTable::new();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let q = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let a = table.or2(p, q).unwrap();
        let b = table.or2(q, p).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.constructor(a), Ok(TermConstructor::Or));
        assert_eq!(table.constructor(!a), Ok(TermConstructor::Not));
    }

    #[test]
    fn boolean_simplifications() {
        let mut table = TermTable::new();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let q = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        assert_eq!(table.or2(p, !p).unwrap(), Term::TRUE);
        assert_eq!(table.and2(p, !p).unwrap(), Term::FALSE);
        assert_eq!(table.or2(p, Term::FALSE).unwrap(), p);
        assert_eq!(table.xor2(p, p).unwrap(), Term::FALSE);
        assert_eq!(table.xor2(!p, q).unwrap(), !table.xor2(p, q).unwrap());
        assert_eq!(table.eq(p, q).unwrap(), table.iff(q, p).unwrap());
        assert_eq!(table.ite(Term::TRUE, p, q).unwrap(), p);
        assert_eq!(table.ite(p, Term::TRUE, Term::FALSE).unwrap(), p);
        assert_eq!(table.or(&[]).unwrap(), Term::FALSE);
        assert_eq!(table.and(&[]).unwrap(), Term::TRUE);
    }

    #[test]
    fn type_errors_are_reported() {
        let mut table = TermTable::new();
        let ty = bv4(&mut table);
        let x = table.new_uninterpreted_term(ty).unwrap();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        assert_eq!(
            table.or2(p, x),
            Err(TermError::TypeMismatch {
                term: x,
                expected: TypeId::BOOL
            })
        );
        assert!(matches!(table.eq(p, x), Err(TermError::IncompatibleTypes { .. })));
        assert_eq!(table.bv_add(p, x), Err(TermError::BitvectorRequired(p)));
        assert_eq!(table.not(x), Err(TermError::TypeMismatch { term: x, expected: TypeId::BOOL }));
        assert!(matches!(table.bit_select(x, 4), Err(TermError::InvalidBitExtract { index: 4, .. })));
    }

    #[test]
    fn sums_fold_constants() {
        let mut table = TermTable::new();
        let ty = bv4(&mut table);
        let x = table.new_uninterpreted_term(ty).unwrap();
        let y = table.new_uninterpreted_term(ty).unwrap();
        let three = table.bv_const(4, 3).unwrap();
        let fifteen = table.bv_const(4, 15).unwrap();

        let a = table.bv_sum(&[x, three, y]).unwrap();
        let b = table.bv_sum(&[y, x, three]).unwrap();
        assert_eq!(a, b);

        // x + 15 + 1 == x (mod 16)
        let one = table.bv_one(4).unwrap();
        let c = table.bv_sum(&[x, fifteen, one]).unwrap();
        assert_eq!(c, x);

        let d = table.bv_sub(x, x).unwrap();
        assert_ne!(d, table.bv_zero(4).unwrap(), "x - x is not folded");
        let nn = table.bv_neg(x).unwrap();
        assert_eq!(table.bv_neg(nn).unwrap(), x);
    }

    #[test]
    fn comparisons_on_constants() {
        let mut table = TermTable::new();
        let two = table.bv_const(4, 2).unwrap();
        let minus_one = table.bv_const(4, 15).unwrap();
        assert_eq!(table.bv_ge(minus_one, two).unwrap(), Term::TRUE);
        assert_eq!(table.bv_sge(minus_one, two).unwrap(), Term::FALSE);
        assert_eq!(table.bv_gt(two, two).unwrap(), Term::FALSE);
        assert_eq!(table.bit_select(two, 1).unwrap(), Term::TRUE);
        assert_eq!(bv_signed(4, 15), -1);
        assert_eq!(bv_signed(64, u64::MAX), -1);
    }

    #[test]
    fn application_checks_arity_and_types() {
        let mut table = TermTable::new();
        let u = table.types_mut().new_uninterpreted();
        let fty = table.types_mut().function_type(&[u], u).unwrap();
        let f = table.new_uninterpreted_term(fty).unwrap();
        let a = table.new_uninterpreted_term(u).unwrap();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();

        let fa = table.application(f, &[a]).unwrap();
        assert_eq!(table.ty(fa), u);
        assert_eq!(table.application(f, &[a]).unwrap(), fa);
        assert!(matches!(
            table.application(f, &[a, a]),
            Err(TermError::WrongNumberOfArguments { expected: 1, got: 2, .. })
        ));
        assert_eq!(table.application(f, &[p]), Err(TermError::TypeMismatch { term: p, expected: u }));
        assert_eq!(table.application(a, &[a]), Err(TermError::FunctionRequired(a)));
    }

    #[test]
    fn forall_requires_distinct_variables() {
        let mut table = TermTable::new();
        let u = table.types_mut().new_uninterpreted();
        let x = table.new_variable(u).unwrap();
        let a = table.new_uninterpreted_term(u).unwrap();
        let body = table.eq(x, a).unwrap();
        assert!(table.forall(&[x], body).is_ok());
        assert_eq!(table.forall(&[x, x], body), Err(TermError::DuplicateVariable(x)));
        assert_eq!(table.forall(&[a], body), Err(TermError::VariableRequired(a)));
        assert!(!table.is_ground(body));
    }

    #[test]
    fn substitution_rebuilds_through_constructors() {
        let mut table = TermTable::new();
        let ty = bv4(&mut table);
        let x = table.new_uninterpreted_term(ty).unwrap();
        let y = table.new_uninterpreted_term(ty).unwrap();
        let one = table.bv_one(4).unwrap();
        let sum = table.bv_add(x, one).unwrap();
        let atom = table.eq(sum, y).unwrap();

        let three = table.bv_const(4, 3).unwrap();
        let four = table.bv_const(4, 4).unwrap();
        let r = table.subst_term(&[(x, three), (y, four)], atom).unwrap();
        assert_eq!(r, Term::TRUE);
        let r = table.subst_term(&[(x, three)], !atom).unwrap();
        assert_eq!(r, !table.eq(four, y).unwrap());

        assert_eq!(table.subst_term(&[(one, x)], atom), Err(TermError::VariableRequired(one)));
        assert!(table.occurs(x, atom));
        assert!(!table.occurs(three, atom));
    }

    #[test]
    fn names_shadow() {
        let mut table = TermTable::new();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let q = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        table.set_term_name(p, "p").unwrap();
        table.set_term_name(q, "p").unwrap();
        assert_eq!(table.get_term_by_name("p"), Some(q));
        table.remove_term_name("p");
        assert_eq!(table.get_term_by_name("p"), Some(p));
        assert_eq!(table.get_term_name(p), Some("p"));
    }
}
