//! Instantiation patterns.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use vsterms::{Term, TermDesc, TermTable};

pub type PatternId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// An application containing bound variables.
    pub term: Term,
    /// Function symbol at the root of `term`.
    pub head: Term,
    /// Bound variables of `term`, sorted.
    pub vars: SmallVec<[Term; 4]>,
}

#[derive(Debug, Default)]
pub struct PatternTable {
    patterns: Vec<Pattern>,
    index: FxHashMap<Term, PatternId>,
}

/// Bound variables occurring in `t`, sorted and without duplicates.
pub fn variables_of(terms: &TermTable, t: Term) -> SmallVec<[Term; 4]> {
    let mut vars: SmallVec<[Term; 4]> = terms
        .subterms(t)
        .into_iter()
        .filter(|&u| matches!(terms.desc(u), TermDesc::Variable { .. }))
        .collect();
    vars.sort_unstable();
    vars.dedup();
    vars
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `t`, which must be an application. Registering twice returns the same id.
    pub fn add(&mut self, terms: &TermTable, t: Term) -> Option<PatternId> {
        if let Some(&id) = self.index.get(&t) {
            return Some(id);
        }
        let TermDesc::App(head, _) = terms.desc(t) else {
            return None;
        };
        let id = self.patterns.len() as PatternId;
        self.patterns.push(Pattern {
            term: t,
            head: *head,
            vars: variables_of(terms, t),
        });
        self.index.insert(t, id);
        Some(id)
    }

    pub fn get(&self, id: PatternId) -> &Pattern {
        &self.patterns[id as usize]
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> + '_ {
        self.patterns.iter()
    }

    pub fn truncate(&mut self, len: usize) {
        for p in self.patterns.drain(len.min(self.patterns.len())..) {
            self.index.remove(&p.term);
        }
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
        self.index.clear();
    }
}

/// Patterns for `forall vars. body`.
///
/// The smallest application mentioning every bound variable is preferred. Otherwise
/// applications are picked greedily, most variables first, until all variables are
/// covered; the result is then a multi-pattern. Empty when no cover exists.
pub fn infer(terms: &TermTable, vars: &[Term], body: Term) -> SmallVec<[Term; 2]> {
    let candidates: Vec<(Term, SmallVec<[Term; 4]>, usize)> = terms
        .subterms(body)
        .into_iter()
        .filter(|&u| matches!(terms.desc(u), TermDesc::App(..)))
        .map(|u| (u, variables_of(terms, u), terms.subterms(u).len()))
        .filter(|(_, vs, _)| !vs.is_empty())
        .collect();

    let covers = |vs: &[Term]| vars.iter().all(|v| vs.contains(v));
    if let Some((t, _, _)) = candidates
        .iter()
        .filter(|(_, vs, _)| covers(vs))
        .min_by_key(|(t, _, size)| (*size, t.raw()))
    {
        return SmallVec::from_slice(&[*t]);
    }

    let mut sorted: Vec<_> = candidates.iter().collect();
    sorted.sort_by_key(|(t, vs, size)| (std::cmp::Reverse(vs.len()), *size, t.raw()));

    let mut chosen = SmallVec::new();
    let mut covered: SmallVec<[Term; 4]> = SmallVec::new();
    for (t, vs, _) in sorted {
        if vs.iter().any(|v| !covered.contains(v)) {
            chosen.push(*t);
            covered.extend(vs.iter().copied().filter(|v| !covered.contains(v)).collect::<Vec<_>>());
            if covers(&covered) {
                return chosen;
            }
        }
    }
    SmallVec::new()
}

#[cfg(test)]
mod tests {
    use vsterms::TypeId;

    use super::*;

    #[test]
    fn smallest_covering_application_wins() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let fty = terms.types_mut().function_type(&[s], s).unwrap();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let f = terms.new_uninterpreted_term(fty).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let x = terms.new_variable(s).unwrap();

        let fx = terms.application(f, &[x]).unwrap();
        let ffx = terms.application(f, &[fx]).unwrap();
        let body = terms.application(p, &[ffx]).unwrap();

        assert_eq!(infer(&terms, &[x], body).as_slice(), &[fx]);
    }

    #[test]
    fn multi_pattern_when_no_single_cover() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let q = terms.new_uninterpreted_term(pty).unwrap();
        let x = terms.new_variable(s).unwrap();
        let y = terms.new_variable(s).unwrap();

        let px = terms.application(p, &[x]).unwrap();
        let qy = terms.application(q, &[y]).unwrap();
        let body = terms.implies(px, qy).unwrap();

        let pats = infer(&terms, &[x, y], body);
        assert_eq!(pats.len(), 2);
        assert!(pats.contains(&px) && pats.contains(&qy));
    }

    #[test]
    fn no_pattern_without_applications() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let a = terms.new_uninterpreted_term(s).unwrap();
        let x = terms.new_variable(s).unwrap();
        let body = terms.eq(x, a).unwrap();
        assert!(infer(&terms, &[x], body).is_empty());
    }

    #[test]
    fn table_deduplicates_and_truncates() {
        let mut terms = TermTable::new();
        let s = terms.types_mut().new_uninterpreted();
        let fty = terms.types_mut().function_type(&[s], s).unwrap();
        let f = terms.new_uninterpreted_term(fty).unwrap();
        let x = terms.new_variable(s).unwrap();
        let fx = terms.application(f, &[x]).unwrap();

        let mut table = PatternTable::new();
        let id = table.add(&terms, fx).unwrap();
        assert_eq!(table.add(&terms, fx), Some(id));
        assert_eq!(table.get(id).head, f);
        assert_eq!(table.get(id).vars.as_slice(), &[x]);
        assert!(table.add(&terms, x).is_none());
        table.truncate(0);
        assert!(table.is_empty());
    }
}
