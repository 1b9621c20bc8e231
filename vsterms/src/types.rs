//! Hash-consed type table.
//!
//! Types are interned: two structurally identical type descriptions always map to the
//! same [`TypeId`]. The boolean type is pre-registered with index 0.

use bit_set::BitSet;
use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use strum::{Display, EnumIs};

use crate::{
    error::{TermError, TermResult},
    oom,
};

/// Largest supported bitvector width.
pub const MAX_BV_SIZE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeId {
    pub const BOOL: TypeId = TypeId(0);

    pub fn from_raw(raw: u32) -> Self {
        TypeId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Bool,
    BitVector(u32),
    /// An uninterpreted sort, distinguished by its serial number.
    Uninterpreted(u32),
    Function {
        domain: SmallVec<[TypeId; 4]>,
        range: TypeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIs)]
pub enum TypeKind {
    Bool,
    BitVector,
    Uninterpreted,
    Function,
}

impl TypeDesc {
    pub fn kind(&self) -> TypeKind {
        match self {
            TypeDesc::Bool => TypeKind::Bool,
            TypeDesc::BitVector(_) => TypeKind::BitVector,
            TypeDesc::Uninterpreted(_) => TypeKind::Uninterpreted,
            TypeDesc::Function { .. } => TypeKind::Function,
        }
    }
}

#[derive(Debug)]
pub struct TypeTable {
    descs: Vec<Option<TypeDesc>>,
    index: FxHashMap<TypeDesc, TypeId>,
    free_list: Vec<u32>,
    refcounts: FxHashMap<TypeId, u32>,
    next_serial: u32,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self {
            descs: Vec::new(),
            index: FxHashMap::default(),
            free_list: Vec::new(),
            refcounts: FxHashMap::default(),
            next_serial: 0,
        };
        let bool_type = table.intern(TypeDesc::Bool);
        debug_assert_eq!(bool_type, TypeId::BOOL);
        table
    }

    fn intern(&mut self, desc: TypeDesc) -> TypeId {
        if let Some(&ty) = self.index.get(&desc) {
            return ty;
        }

        let ty = match self.free_list.pop() {
            Some(i) => {
                self.descs[i as usize] = Some(desc.clone());
                TypeId(i)
            }
            None => {
                oom::reserve(&mut self.descs, 1);
                self.descs.push(Some(desc.clone()));
                TypeId(self.descs.len() as u32 - 1)
            }
        };
        debug!("New type {:?} registered as {:?}", desc, ty);
        self.index.insert(desc, ty);
        ty
    }

    pub fn bool_type(&self) -> TypeId {
        TypeId::BOOL
    }

    pub fn bv_type(&mut self, width: u32) -> TermResult<TypeId> {
        if width == 0 {
            return Err(TermError::PosIntRequired(0));
        }
        if width > MAX_BV_SIZE {
            return Err(TermError::MaxBvSizeExceeded(width as u64));
        }
        Ok(self.intern(TypeDesc::BitVector(width)))
    }

    pub fn new_uninterpreted(&mut self) -> TypeId {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.intern(TypeDesc::Uninterpreted(serial))
    }

    pub fn function_type(&mut self, domain: &[TypeId], range: TypeId) -> TermResult<TypeId> {
        if domain.is_empty() {
            return Err(TermError::PosIntRequired(0));
        }
        for &ty in domain.iter().chain(std::iter::once(&range)) {
            self.check(ty)?;
        }
        Ok(self.intern(TypeDesc::Function {
            domain: domain.into(),
            range,
        }))
    }

    pub fn is_valid(&self, ty: TypeId) -> bool {
        matches!(self.descs.get(ty.index()), Some(Some(_)))
    }

    pub fn check(&self, ty: TypeId) -> TermResult<()> {
        if self.is_valid(ty) {
            Ok(())
        } else {
            Err(TermError::InvalidType(ty))
        }
    }

    pub fn get(&self, ty: TypeId) -> Option<&TypeDesc> {
        self.descs.get(ty.index()).and_then(Option::as_ref)
    }

    /// Description of a type known to be valid.
    pub fn desc(&self, ty: TypeId) -> &TypeDesc {
        match self.get(ty) {
            Some(desc) => desc,
            None => panic!("invalid type {:?}", ty),
        }
    }

    pub fn kind(&self, ty: TypeId) -> Option<TypeKind> {
        self.get(ty).map(TypeDesc::kind)
    }

    pub fn bv_width(&self, ty: TypeId) -> Option<u32> {
        match self.get(ty) {
            Some(TypeDesc::BitVector(w)) => Some(*w),
            _ => None,
        }
    }

    pub fn is_uninterpreted(&self, ty: TypeId) -> bool {
        matches!(self.get(ty), Some(TypeDesc::Uninterpreted(_)))
    }

    /// Number of live types.
    pub fn len(&self) -> usize {
        self.descs.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn incref(&mut self, ty: TypeId) -> TermResult<()> {
        self.check(ty)?;
        *self.refcounts.entry(ty).or_insert(0) += 1;
        Ok(())
    }

    pub fn decref(&mut self, ty: TypeId) -> TermResult<()> {
        self.check(ty)?;
        match self.refcounts.get_mut(&ty) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.refcounts.remove(&ty);
            }
            None => return Err(TermError::BadTypeDecref(ty)),
        }
        Ok(())
    }

    pub fn refcount(&self, ty: TypeId) -> u32 {
        self.refcounts.get(&ty).copied().unwrap_or(0)
    }

    pub(crate) fn referenced(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.refcounts.keys().copied()
    }

    /// Mark `ty` and every type it is built from.
    pub(crate) fn mark(&self, ty: TypeId, marks: &mut BitSet) {
        if !marks.insert(ty.index()) {
            return;
        }
        if let Some(TypeDesc::Function { domain, range }) = self.get(ty) {
            for &d in domain {
                self.mark(d, marks);
            }
            self.mark(*range, marks);
        }
    }

    /// Delete every unmarked type except `bool`. Returns the deleted types.
    pub(crate) fn sweep(&mut self, marks: &BitSet) -> Vec<TypeId> {
        let mut deleted = Vec::new();
        for i in 1..self.descs.len() {
            if marks.contains(i) {
                continue;
            }
            if let Some(desc) = self.descs[i].take() {
                self.index.remove(&desc);
                self.refcounts.remove(&TypeId(i as u32));
                self.free_list.push(i as u32);
                deleted.push(TypeId(i as u32));
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_is_preregistered() {
        let table = TypeTable::new();
        assert_eq!(table.kind(TypeId::BOOL), Some(TypeKind::Bool));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bitvector_types_are_interned() {
        let mut table = TypeTable::new();
        let a = table.bv_type(8).unwrap();
        let b = table.bv_type(8).unwrap();
        let c = table.bv_type(4).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.bv_width(c), Some(4));
        assert_eq!(table.bv_type(0), Err(TermError::PosIntRequired(0)));
        assert_eq!(table.bv_type(65), Err(TermError::MaxBvSizeExceeded(65)));
    }

    #[test]
    fn uninterpreted_types_are_distinct() {
        let mut table = TypeTable::new();
        let u = table.new_uninterpreted();
        let v = table.new_uninterpreted();
        assert_ne!(u, v);
        let f = table.function_type(&[u, u], v).unwrap();
        assert_eq!(table.function_type(&[u, u], v).unwrap(), f);
        assert_eq!(table.function_type(&[], v), Err(TermError::PosIntRequired(0)));
    }

    #[test]
    fn decref_below_zero_fails() {
        let mut table = TypeTable::new();
        let u = table.new_uninterpreted();
        table.incref(u).unwrap();
        table.decref(u).unwrap();
        assert_eq!(table.decref(u), Err(TermError::BadTypeDecref(u)));
    }
}
