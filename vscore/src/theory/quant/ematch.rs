//! E-matching modulo the egraph's equalities.
//!
//! Bindings map each bound variable (by position) to an egraph class root. Matching a
//! pattern refines a set of partial bindings; a multi-pattern is matched by feeding
//! the bindings of one pattern into the next.

use smallvec::{SmallVec, smallvec};
use vsterms::{Term, TermDesc, TermTable};

use crate::theory::egraph::{Egraph, NodeId};

pub type Binding = SmallVec<[Option<NodeId>; 4]>;

pub struct Matcher<'a> {
    egraph: &'a Egraph,
    terms: &'a TermTable,
    vars: &'a [Term],
}

impl<'a> Matcher<'a> {
    pub fn new(egraph: &'a Egraph, terms: &'a TermTable, vars: &'a [Term]) -> Self {
        Self { egraph, terms, vars }
    }

    pub fn empty_binding(&self) -> Binding {
        smallvec![None; self.vars.len()]
    }

    /// Extend `bindings` with every match of `pattern` against the `candidates`
    /// application nodes.
    pub fn match_pattern(&self, pattern: Term, candidates: &[NodeId], bindings: Vec<Binding>) -> Vec<Binding> {
        let mut out = Vec::new();
        for &n in candidates {
            out.extend(self.match_node(pattern, n, bindings.clone()));
        }
        out
    }

    fn match_node(&self, pattern: Term, n: NodeId, mut bindings: Vec<Binding>) -> Vec<Binding> {
        let TermDesc::App(f, args) = self.terms.desc(pattern) else {
            return Vec::new();
        };
        let node_args = self.egraph.args(n);
        if self.egraph.func(n) != Some(*f) || node_args.len() != args.len() {
            return Vec::new();
        }
        for (&pa, &na) in args.iter().zip(node_args) {
            bindings = self.match_class(pa, self.egraph.root(na), bindings);
            if bindings.is_empty() {
                break;
            }
        }
        bindings
    }

    fn match_class(&self, pattern: Term, root: NodeId, bindings: Vec<Binding>) -> Vec<Binding> {
        if let Some(i) = self.vars.iter().position(|&v| v == pattern) {
            return bindings
                .into_iter()
                .filter_map(|mut b| match b[i] {
                    None => {
                        b[i] = Some(root);
                        Some(b)
                    }
                    Some(r) if r == root => Some(b),
                    Some(_) => None,
                })
                .collect();
        }

        match self.terms.desc(pattern) {
            TermDesc::App(..) if !self.terms.is_ground(pattern) => {
                let mut out = Vec::new();
                for m in self.egraph.class(root) {
                    out.extend(self.match_node(pattern, m, bindings.clone()));
                }
                out
            }
            _ => match self.egraph.node_of_term(pattern) {
                Some(n) if self.egraph.root(n) == root => bindings,
                _ => Vec::new(),
            },
        }
    }
}
