//! Congruence closure over uninterpreted sorts and functions.
//!
//! The structural part (nodes, atoms) follows assertion scopes. The assignment-dependent
//! part (classes, signature table, explanation edges, disequalities) is rebuilt at the
//! start of every search and undone level by level through an explicit trail.
//!
//! Every class keeps its members on a circular list; each node stores its root directly,
//! so merging relabels the smaller class and undoing walks the same ring back.

use std::collections::{VecDeque, hash_map::Entry};

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use vsterms::{Term, TermDesc, TermTable, TypeId};

use crate::{
    model::{Model, Value},
    search::Literal,
    theory::{FinalCheck, TheoryEnv, TheorySolver},
    variable_db::Variable,
};

pub type NodeId = u32;

pub const TRUE_NODE: NodeId = 0;
pub const FALSE_NODE: NodeId = 1;

#[derive(Debug, Clone)]
struct Node {
    term: Term,
    ty: TypeId,
    func: Option<Term>,
    args: SmallVec<[NodeId; 4]>,
}

/// Theory meaning of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atom {
    Eq(NodeId, NodeId),
    /// Boolean application, merged with the true or false node.
    Pred(NodeId),
}

#[derive(Debug, Clone, Copy)]
enum Reason {
    Literal(Literal),
    Congruence(NodeId, NodeId),
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    a: NodeId,
    b: NodeId,
    reason: Reason,
}

type Signature = (Term, SmallVec<[NodeId; 4]>);

#[derive(Debug, Clone)]
enum Undo {
    Merge {
        small: NodeId,
        big: NodeId,
        parents_len: usize,
    },
    Edge,
    Diseq,
    SigInsert(Signature),
    SigErase(Signature, NodeId),
}

#[derive(Debug, Default)]
pub struct Egraph {
    nodes: Vec<Node>,
    node_of: FxHashMap<Term, NodeId>,
    apps: FxHashMap<Term, Vec<NodeId>>,
    atoms: FxHashMap<Variable, Atom>,
    atom_log: Vec<Variable>,
    scopes: Vec<(usize, usize)>,

    synced: usize,
    root: Vec<NodeId>,
    next: Vec<NodeId>,
    size: Vec<u32>,
    parents: Vec<Vec<NodeId>>,
    sigs: FxHashMap<Signature, NodeId>,
    edges: Vec<Edge>,
    adj: Vec<SmallVec<[u32; 2]>>,
    diseqs: Vec<(NodeId, NodeId, Option<Literal>)>,
    pending: Vec<(NodeId, NodeId, Reason)>,
    undo: Vec<Undo>,
    levels: Vec<(usize, usize)>,
    processed: usize,
}

impl Egraph {
    pub fn new() -> Self {
        let mut egraph = Egraph::default();
        egraph.init_structure();
        egraph.clear_dynamic();
        egraph
    }

    fn init_structure(&mut self) {
        for term in [Term::TRUE, Term::FALSE] {
            self.node_of.insert(term, self.nodes.len() as NodeId);
            self.nodes.push(Node {
                term,
                ty: TypeId::BOOL,
                func: None,
                args: SmallVec::new(),
            });
        }
    }

    // ---------------------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------------------

    /// Node of `t`, created with the nodes of its arguments when missing.
    pub fn internalize(&mut self, t: Term, terms: &TermTable) -> NodeId {
        debug_assert!(t.is_positive());
        if let Some(&n) = self.node_of.get(&t) {
            return n;
        }
        let (func, args) = match terms.desc(t) {
            TermDesc::App(f, args) => {
                let (f, args) = (*f, args.clone());
                let args = args.iter().map(|&a| self.internalize(a, terms)).collect();
                (Some(f), args)
            }
            _ => (None, SmallVec::new()),
        };
        let n = self.nodes.len() as NodeId;
        if let Some(f) = func {
            self.apps.entry(f).or_default().push(n);
        }
        self.nodes.push(Node {
            term: t,
            ty: terms.ty(t),
            func,
            args,
        });
        self.node_of.insert(t, n);
        n
    }

    pub fn add_eq_atom(&mut self, var: Variable, a: Term, b: Term, terms: &TermTable) {
        if self.atoms.contains_key(&var) {
            return;
        }
        let (na, nb) = (self.internalize(a, terms), self.internalize(b, terms));
        self.atoms.insert(var, Atom::Eq(na, nb));
        self.atom_log.push(var);
    }

    pub fn add_pred_atom(&mut self, var: Variable, app: Term, terms: &TermTable) {
        if self.atoms.contains_key(&var) {
            return;
        }
        let n = self.internalize(app, terms);
        self.atoms.insert(var, Atom::Pred(n));
        self.atom_log.push(var);
    }

    pub fn atom(&self, var: Variable) -> Option<Atom> {
        self.atoms.get(&var).copied()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_of_term(&self, t: Term) -> Option<NodeId> {
        self.node_of.get(&t).copied()
    }

    pub fn term(&self, n: NodeId) -> Term {
        self.nodes[n as usize].term
    }

    pub fn func(&self, n: NodeId) -> Option<Term> {
        self.nodes[n as usize].func
    }

    pub fn args(&self, n: NodeId) -> &[NodeId] {
        &self.nodes[n as usize].args
    }

    /// Application nodes of `f`, in creation order.
    pub fn apps_of(&self, f: Term) -> &[NodeId] {
        self.apps.get(&f).map_or(&[], |v| v.as_slice())
    }

    // ---------------------------------------------------------------------------------
    // Classes
    // ---------------------------------------------------------------------------------

    pub fn root(&self, n: NodeId) -> NodeId {
        self.root.get(n as usize).copied().unwrap_or(n)
    }

    pub fn are_equal(&self, a: NodeId, b: NodeId) -> bool {
        self.root(a) == self.root(b)
    }

    /// Members of the class of `n`, starting with `n`.
    pub fn class(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let synced = (n as usize) < self.synced;
        let mut cur = Some(n);
        std::iter::from_fn(move || {
            let m = cur?;
            let nx = if synced { self.next[m as usize] } else { n };
            cur = (nx != n).then_some(nx);
            Some(m)
        })
    }

    pub fn num_classes(&self) -> usize {
        (0..self.synced).filter(|&n| self.root[n] == n as NodeId).count()
    }

    fn clear_dynamic(&mut self) {
        self.synced = 0;
        self.root.clear();
        self.next.clear();
        self.size.clear();
        self.parents.clear();
        self.sigs.clear();
        self.edges.clear();
        self.adj.clear();
        self.diseqs.clear();
        self.diseqs.push((TRUE_NODE, FALSE_NODE, None));
        self.pending.clear();
        self.undo.clear();
        self.levels.clear();
        self.processed = 0;
    }

    fn signature(&self, n: NodeId) -> Option<Signature> {
        let node = &self.nodes[n as usize];
        let f = node.func?;
        Some((f, node.args.iter().map(|&a| self.root[a as usize]).collect()))
    }

    /// Extend the class tables to nodes created since the last call. Nodes are only
    /// created at the base level, so this is never undone by backtracking.
    fn sync(&mut self) {
        if self.synced == self.nodes.len() {
            return;
        }
        debug_assert!(self.levels.is_empty(), "nodes are added at the base level");
        for n in self.synced..self.nodes.len() {
            let id = n as NodeId;
            self.root.push(id);
            self.next.push(id);
            self.size.push(1);
            self.parents.push(Vec::new());
            self.adj.push(SmallVec::new());
            for i in 0..self.nodes[n].args.len() {
                let r = self.root[self.nodes[n].args[i] as usize];
                self.parents[r as usize].push(id);
            }
            if let Some(key) = self.signature(id) {
                match self.sigs.entry(key) {
                    Entry::Occupied(e) => {
                        let other = *e.get();
                        self.pending.push((id, other, Reason::Congruence(id, other)));
                    }
                    Entry::Vacant(e) => {
                        e.insert(id);
                    }
                }
            }
        }
        self.synced = self.nodes.len();
    }

    fn add_edge(&mut self, a: NodeId, b: NodeId, reason: Reason) {
        let e = self.edges.len() as u32;
        self.edges.push(Edge { a, b, reason });
        self.adj[a as usize].push(e);
        self.adj[b as usize].push(e);
        self.undo.push(Undo::Edge);
    }

    fn merge(&mut self, a: NodeId, b: NodeId, reason: Reason) {
        let (ra, rb) = (self.root[a as usize], self.root[b as usize]);
        if ra == rb {
            return;
        }
        self.add_edge(a, b, reason);

        let (small, big) = if self.size[ra as usize] <= self.size[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        trace!("egraph: merging class {} into {}", small, big);

        let moved = self.parents[small as usize].clone();
        for &p in &moved {
            if let Some(key) = self.signature(p)
                && self.sigs.get(&key) == Some(&p)
            {
                self.sigs.remove(&key);
                self.undo.push(Undo::SigErase(key, p));
            }
        }

        let mut n = small;
        loop {
            self.root[n as usize] = big;
            n = self.next[n as usize];
            if n == small {
                break;
            }
        }
        self.next.swap(small as usize, big as usize);
        self.size[big as usize] += self.size[small as usize];
        let parents_len = self.parents[big as usize].len();
        self.parents[big as usize].extend_from_slice(&moved);
        self.undo.push(Undo::Merge {
            small,
            big,
            parents_len,
        });

        for &p in &moved {
            let Some(key) = self.signature(p) else { continue };
            match self.sigs.entry(key) {
                Entry::Occupied(e) => {
                    let q = *e.get();
                    if self.root[q as usize] != self.root[p as usize] {
                        self.pending.push((p, q, Reason::Congruence(p, q)));
                    }
                }
                Entry::Vacant(e) => {
                    let key = e.key().clone();
                    e.insert(p);
                    self.undo.push(Undo::SigInsert(key));
                }
            }
        }
    }

    fn process_pending(&mut self) {
        while let Some((a, b, reason)) = self.pending.pop() {
            self.merge(a, b, reason);
        }
    }

    fn undo_to(&mut self, len: usize) {
        while self.undo.len() > len {
            let Some(entry) = self.undo.pop() else { break };
            match entry {
                Undo::Merge {
                    small,
                    big,
                    parents_len,
                } => {
                    self.parents[big as usize].truncate(parents_len);
                    self.size[big as usize] -= self.size[small as usize];
                    self.next.swap(small as usize, big as usize);
                    let mut n = small;
                    loop {
                        self.root[n as usize] = small;
                        n = self.next[n as usize];
                        if n == small {
                            break;
                        }
                    }
                }
                Undo::Edge => {
                    if let Some(edge) = self.edges.pop() {
                        self.adj[edge.a as usize].pop();
                        self.adj[edge.b as usize].pop();
                    }
                }
                Undo::Diseq => {
                    self.diseqs.pop();
                }
                Undo::SigInsert(key) => {
                    self.sigs.remove(&key);
                }
                Undo::SigErase(key, n) => {
                    self.sigs.insert(key, n);
                }
            }
        }
    }

    // ---------------------------------------------------------------------------------
    // Explanations
    // ---------------------------------------------------------------------------------

    /// Edges on the path from `from` to `to` in the explanation forest.
    fn path(&self, from: NodeId, to: NodeId) -> SmallVec<[u32; 8]> {
        let mut prev: FxHashMap<NodeId, (NodeId, u32)> = FxHashMap::default();
        let mut queue = VecDeque::from([from]);
        prev.insert(from, (from, u32::MAX));
        while let Some(n) = queue.pop_front() {
            if n == to {
                break;
            }
            for &e in &self.adj[n as usize] {
                let edge = self.edges[e as usize];
                let m = if edge.a == n { edge.b } else { edge.a };
                if let Entry::Vacant(v) = prev.entry(m) {
                    v.insert((n, e));
                    queue.push_back(m);
                }
            }
        }

        let mut out = SmallVec::new();
        let mut n = to;
        while n != from {
            let Some(&(p, e)) = prev.get(&n) else {
                unreachable!("nodes of one class are connected by edges");
            };
            out.push(e);
            n = p;
        }
        out
    }

    /// Literals, all true, that imply `a == b`.
    pub fn explain(&self, a: NodeId, b: NodeId) -> Vec<Literal> {
        debug_assert!(self.are_equal(a, b));
        let mut out = Vec::new();
        let mut todo = vec![(a, b)];
        let mut done = FxHashSet::default();
        while let Some((x, y)) = todo.pop() {
            if x == y || !done.insert((x.min(y), x.max(y))) {
                continue;
            }
            for e in self.path(x, y) {
                match self.edges[e as usize].reason {
                    Reason::Literal(l) => out.push(l),
                    Reason::Congruence(p, q) => {
                        let (ps, qs) = (self.args(p), self.args(q));
                        todo.extend(ps.iter().copied().zip(qs.iter().copied()));
                    }
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn find_conflict(&self) -> Option<SmallVec<[Literal; 8]>> {
        let &(a, b, lit) = self
            .diseqs
            .iter()
            .find(|(a, b, _)| self.root[*a as usize] == self.root[*b as usize])?;
        let mut clause: SmallVec<[Literal; 8]> = self.explain(a, b).into_iter().map(|l| !l).collect();
        clause.extend(lit.map(|l| !l));
        Some(clause)
    }
}

impl TheorySolver for Egraph {
    fn name(&self) -> &'static str {
        "egraph"
    }

    fn start_search(&mut self, _env: &mut TheoryEnv<'_>) {
        self.clear_dynamic();
        self.sync();
    }

    fn propagate(&mut self, env: &mut TheoryEnv<'_>) -> bool {
        self.sync();
        let mut changed = !self.pending.is_empty();
        self.process_pending();

        let trail = env.core.trail();
        while self.processed < trail.len() {
            let lit = trail[self.processed];
            self.processed += 1;
            let Some(&atom) = self.atoms.get(&lit.var()) else {
                continue;
            };
            changed = true;
            match atom {
                Atom::Eq(a, b) if !lit.is_negated() => self.merge(a, b, Reason::Literal(lit)),
                Atom::Eq(a, b) => {
                    self.diseqs.push((a, b, Some(lit)));
                    self.undo.push(Undo::Diseq);
                }
                Atom::Pred(n) => {
                    let target = if lit.is_negated() { FALSE_NODE } else { TRUE_NODE };
                    self.merge(n, target, Reason::Literal(lit));
                }
            }
            self.process_pending();
        }

        if changed && let Some(conflict) = self.find_conflict() {
            trace!("egraph: conflict of size {}", conflict.len());
            env.conflict = Some(conflict);
        }
        changed
    }

    fn final_check(&mut self, _env: &mut TheoryEnv<'_>) -> FinalCheck {
        FinalCheck::Done
    }

    fn increase_decision_level(&mut self) {
        self.levels.push((self.undo.len(), self.processed));
    }

    fn backtrack(&mut self, level: u32) {
        let level = level as usize;
        if level < self.levels.len() {
            let (undo_len, processed) = self.levels[level];
            self.undo_to(undo_len);
            self.processed = processed;
            self.levels.truncate(level);
        }
        self.pending.clear();
    }

    fn push(&mut self) {
        self.scopes.push((self.nodes.len(), self.atom_log.len()));
    }

    fn pop(&mut self) {
        let Some((nodes_len, atoms_len)) = self.scopes.pop() else {
            return;
        };
        self.clear_dynamic();
        while self.nodes.len() > nodes_len {
            let Some(node) = self.nodes.pop() else { break };
            self.node_of.remove(&node.term);
            if let Some(f) = node.func
                && let Some(list) = self.apps.get_mut(&f)
            {
                list.pop();
                if list.is_empty() {
                    self.apps.remove(&f);
                }
            }
        }
        for var in self.atom_log.drain(atoms_len..) {
            self.atoms.remove(&var);
        }
    }

    fn merge_scope(&mut self) {
        self.scopes.pop();
    }

    fn reset(&mut self) {
        *self = Egraph::new();
    }

    fn build_model(&self, terms: &TermTable, model: &mut Model) {
        let mut index: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut counters: FxHashMap<TypeId, u32> = FxHashMap::default();
        let true_root = self.root(TRUE_NODE);

        let mut value_of = |n: NodeId| -> Value {
            let node = &self.nodes[n as usize];
            if node.ty == TypeId::BOOL {
                return Value::Bool(self.root(n) == true_root);
            }
            let r = self.root(n);
            let k = *index.entry(r).or_insert_with(|| {
                let c = counters.entry(node.ty).or_insert(0);
                *c += 1;
                *c - 1
            });
            Value::Abstract { ty: node.ty, index: k }
        };

        for n in 2..self.nodes.len() as NodeId {
            let node = &self.nodes[n as usize];
            let value = value_of(n);
            match node.func {
                None => {
                    if matches!(terms.desc(node.term), TermDesc::Uninterpreted { .. }) {
                        model.set_value(node.term, value);
                    }
                }
                Some(f) => {
                    let args = node.args.iter().map(|&a| value_of(a)).collect();
                    model.set_function_entry(f, args, value);
                }
            }
        }
    }

    fn gc_roots(&self, roots: &mut Vec<Term>) {
        roots.extend(self.nodes.iter().map(|n| n.term));
    }
}

#[cfg(test)]
mod tests {
    use vsterms::TypeDesc;

    use super::*;
    use crate::{
        search::SearchCore,
        utils::conf::SearchParams,
        variable_db::VariableDb,
    };

    struct Fixture {
        terms: TermTable,
        vars: VariableDb,
        core: SearchCore,
        egraph: Egraph,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                terms: TermTable::new(),
                vars: VariableDb::new(),
                core: SearchCore::new(),
                egraph: Egraph::new(),
            }
        }

        fn eq_atom(&mut self, a: Term, b: Term) -> Literal {
            let t = self.terms.eq(a, b).unwrap();
            let v = self.vars.get_variable(t);
            self.core.ensure_var(v);
            self.egraph.add_eq_atom(v, a, b, &self.terms);
            Literal::positive(v)
        }

        fn pred_atom(&mut self, app: Term) -> Literal {
            let v = self.vars.get_variable(app);
            self.core.ensure_var(v);
            self.egraph.add_pred_atom(v, app, &self.terms);
            Literal::positive(v)
        }

        /// Assert `lits` one per decision level, then propagate.
        fn run(&mut self, lits: &[Literal]) -> Option<SmallVec<[Literal; 8]>> {
            let params = SearchParams::default();
            assert!(self.core.start_search(&params));
            let Fixture {
                terms,
                vars,
                core,
                egraph,
            } = self;
            egraph.start_search(&mut TheoryEnv::new(terms, vars, core, &params));
            for &l in lits {
                egraph.increase_decision_level();
                core.decide(l);
                assert!(core.propagate().is_none());
                let mut env = TheoryEnv::new(terms, vars, core, &params);
                egraph.propagate(&mut env);
                if env.conflict.is_some() {
                    return env.conflict;
                }
            }
            None
        }
    }

    fn sort(terms: &mut TermTable) -> TypeId {
        terms.types_mut().new_uninterpreted()
    }

    #[test]
    fn transitivity_conflict_is_explained() {
        let mut fx = Fixture::new();
        let s = sort(&mut fx.terms);
        let [a, b, c] = [0; 3].map(|_| fx.terms.new_uninterpreted_term(s).unwrap());
        let ab = fx.eq_atom(a, b);
        let bc = fx.eq_atom(b, c);
        let ac = fx.eq_atom(a, c);

        let conflict = fx.run(&[ab, bc, !ac]).expect("a = b = c contradicts a != c");
        let mut conflict = conflict.to_vec();
        conflict.sort();
        let mut expected = vec![!ab, !bc, ac];
        expected.sort();
        assert_eq!(conflict, expected);
        assert!(conflict.iter().all(|&l| fx.core.value(l) == crate::search::LBool::False));
    }

    #[test]
    fn congruence_closes_applications() {
        let mut fx = Fixture::new();
        let s = sort(&mut fx.terms);
        let fty = fx.terms.types_mut().function_type(&[s], s).unwrap();
        let f = fx.terms.new_uninterpreted_term(fty).unwrap();
        let [a, b] = [0; 2].map(|_| fx.terms.new_uninterpreted_term(s).unwrap());
        let fa = fx.terms.application(f, &[a]).unwrap();
        let fb = fx.terms.application(f, &[b]).unwrap();

        let ab = fx.eq_atom(a, b);
        let fafb = fx.eq_atom(fa, fb);

        let conflict = fx.run(&[ab, !fafb]).expect("f(a) = f(b) follows from a = b");
        let mut conflict = conflict.to_vec();
        conflict.sort();
        let mut expected = vec![!ab, fafb];
        expected.sort();
        assert_eq!(conflict, expected);
    }

    #[test]
    fn predicates_are_merged_with_constants() {
        let mut fx = Fixture::new();
        let s = sort(&mut fx.terms);
        let pty = fx.terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        assert!(matches!(fx.terms.types().desc(pty), TypeDesc::Function { .. }));
        let p = fx.terms.new_uninterpreted_term(pty).unwrap();
        let [a, b] = [0; 2].map(|_| fx.terms.new_uninterpreted_term(s).unwrap());
        let pa = fx.terms.application(p, &[a]).unwrap();
        let pb = fx.terms.application(p, &[b]).unwrap();

        let lpa = fx.pred_atom(pa);
        let lpb = fx.pred_atom(pb);
        let ab = fx.eq_atom(a, b);
        assert!(fx.run(&[lpa, !lpb, ab]).is_some());
    }

    #[test]
    fn backtracking_restores_classes() {
        let mut fx = Fixture::new();
        let s = sort(&mut fx.terms);
        let [a, b, c] = [0; 3].map(|_| fx.terms.new_uninterpreted_term(s).unwrap());
        let ab = fx.eq_atom(a, b);
        let bc = fx.eq_atom(b, c);
        assert!(fx.run(&[ab, bc]).is_none());

        let (na, nc) = (
            fx.egraph.node_of_term(a).unwrap(),
            fx.egraph.node_of_term(c).unwrap(),
        );
        assert!(fx.egraph.are_equal(na, nc));
        assert_eq!(fx.egraph.class(na).count(), 3);

        fx.core.backtrack(1);
        fx.egraph.backtrack(1);
        assert!(!fx.egraph.are_equal(na, nc));
        assert_eq!(fx.egraph.class(nc).count(), 1);
    }

    #[test]
    fn pop_forgets_nodes_and_atoms() {
        let mut fx = Fixture::new();
        let s = sort(&mut fx.terms);
        let [a, b] = [0; 2].map(|_| fx.terms.new_uninterpreted_term(s).unwrap());
        let before = fx.egraph.num_nodes();
        fx.egraph.push();
        let ab = fx.eq_atom(a, b);
        assert_eq!(fx.egraph.num_nodes(), before + 2);
        fx.egraph.pop();
        assert_eq!(fx.egraph.num_nodes(), before);
        assert!(fx.egraph.atom(ab.var()).is_none());
        assert!(fx.egraph.node_of_term(a).is_none());
    }
}
