//! Mark-and-sweep collection of terms and types.
//!
//! Roots are the caller-provided terms and types, every term or type with a positive
//! reference count, and optionally every named term or type. Deleted indices go to the
//! tables' free lists and are reused by later constructions.

use bit_set::BitSet;
use log::{debug, trace};

use crate::{
    terms::{Term, TermTable},
    types::TypeId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub terms_deleted: usize,
    pub types_deleted: usize,
}

impl TermTable {
    pub fn garbage_collect(
        &mut self,
        term_roots: impl IntoIterator<Item = Term>,
        type_roots: impl IntoIterator<Item = TypeId>,
        keep_named: bool,
    ) -> GcStats {
        let mut term_marks = BitSet::new();
        let mut type_marks = BitSet::new();

        // The reserved slot and the boolean constant are permanent.
        term_marks.insert(0);
        let mut stack: Vec<usize> = vec![Term::TRUE.index() as usize];
        stack.extend(
            term_roots
                .into_iter()
                .filter(|&t| self.is_valid(t))
                .map(|t| t.index() as usize),
        );
        stack.extend(self.refcounts.keys().map(|&i| i as usize));

        self.types.mark(TypeId::BOOL, &mut type_marks);
        for ty in type_roots.into_iter().chain(self.types.referenced()) {
            if self.types.is_valid(ty) {
                self.types.mark(ty, &mut type_marks);
            }
        }

        if keep_named {
            stack.extend(self.term_names.values().map(|t| t.index() as usize));
            for ty in self.type_names.values() {
                self.types.mark(ty, &mut type_marks);
            }
        }

        while let Some(i) = stack.pop() {
            if !term_marks.insert(i) {
                continue;
            }
            let Some(node) = self.nodes.get(i).and_then(Option::as_ref) else {
                continue;
            };
            self.types.mark(node.ty, &mut type_marks);
            stack.extend(
                node.desc
                    .children()
                    .into_iter()
                    .map(|c| c.index() as usize)
                    .filter(|&c| !term_marks.contains(c)),
            );
        }

        let mut stats = GcStats::default();
        for i in 0..self.nodes.len() {
            if term_marks.contains(i) {
                continue;
            }
            if let Some(node) = self.nodes[i].take() {
                trace!("Deleting term {} ({:?})", i, node.desc);
                self.index.remove(&node.desc);
                self.refcounts.remove(&(i as u32));
                self.free_list.push(i as u32);
                self.term_names.forget(Term::new(i as u32, false));
                self.term_names.forget(Term::new(i as u32, true));
                stats.terms_deleted += 1;
            }
        }

        for ty in self.types.sweep(&type_marks) {
            trace!("Deleting type {:?}", ty);
            self.type_names.forget(ty);
            stats.types_deleted += 1;
        }

        debug!(
            "Garbage collection deleted {} terms and {} types ({} terms live)",
            stats.terms_deleted,
            stats.types_deleted,
            self.num_terms()
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_terms_are_deleted() {
        let mut table = TermTable::new();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let q = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let or = table.or2(p, q).unwrap();
        let before = table.num_terms();

        let stats = table.garbage_collect([or], [], false);
        assert_eq!(stats.terms_deleted, 0);
        assert_eq!(table.num_terms(), before);

        let stats = table.garbage_collect([p], [], false);
        assert_eq!(stats.terms_deleted, 2);
        assert!(table.is_valid(p));
        assert!(!table.is_valid(q));
        assert!(!table.is_valid(or));
    }

    #[test]
    fn refcounts_and_names_are_roots() {
        let mut table = TermTable::new();
        let u = table.types_mut().new_uninterpreted();
        let a = table.new_uninterpreted_term(u).unwrap();
        let b = table.new_uninterpreted_term(u).unwrap();
        table.incref_term(a).unwrap();
        table.set_term_name(b, "b").unwrap();

        table.garbage_collect([], [], true);
        assert!(table.is_valid(a));
        assert!(table.is_valid(b));
        assert!(table.types().is_valid(u));

        table.garbage_collect([], [], false);
        assert!(table.is_valid(a));
        assert!(!table.is_valid(b));
        assert_eq!(table.get_term_by_name("b"), None);

        table.decref_term(a).unwrap();
        let stats = table.garbage_collect([], [], false);
        assert_eq!(stats.terms_deleted, 1);
        assert_eq!(stats.types_deleted, 1);
        assert!(!table.types().is_valid(u));
    }

    #[test]
    fn deleted_slots_are_reused() {
        let mut table = TermTable::new();
        let p = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        table.garbage_collect([], [], false);
        let q = table.new_uninterpreted_term(TypeId::BOOL).unwrap();
        assert_eq!(p.index(), q.index());
    }
}
