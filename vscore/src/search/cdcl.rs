//! Conflict-driven clause learning over the context's decision variables.
//!
//! Clauses are tagged with the assertion scope that created them, so that `pop` can drop
//! exactly the clauses of the popped scopes. Learned clauses are tagged with the scope
//! that was current when they were derived. Unit clauses live outside the clause
//! database and are re-applied at the start of every search.

use std::collections::BinaryHeap;

use smallvec::{SmallVec, smallvec};

use crate::{
    search::literal::{LBool, Literal},
    utils::conf::SearchParams,
    variable_db::Variable,
};

pub type ClauseRef = u32;

const ACTIVITY_LIMIT: f64 = 1e100;

#[derive(Debug, Clone)]
struct Clause {
    lits: SmallVec<[Literal; 4]>,
    scope: u32,
    learnt: bool,
    live: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub decisions: u64,
    pub conflicts: u64,
    pub propagations: u64,
    pub restarts: u64,
    pub learned_clauses: u64,
}

/// Outcome of conflict analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAnalysis {
    /// The conflict does not depend on any decision.
    Unsat,
    /// Backjump to `level`, then learn `clause` (its first literal is asserting).
    Learnt {
        level: u32,
        clause: SmallVec<[Literal; 8]>,
    },
}

fn lit_value(assigns: &[LBool], lit: Literal) -> LBool {
    assigns[lit.var().index()].xor(lit.is_negated())
}

#[derive(Debug, Default)]
pub struct SearchCore {
    assigns: Vec<LBool>,
    levels: Vec<u32>,
    reasons: Vec<Option<ClauseRef>>,
    activity: Vec<f64>,
    phase: Vec<bool>,
    seen: Vec<bool>,
    live: Vec<bool>,
    order: BinaryHeap<(u64, u32)>,

    clauses: Vec<Clause>,
    free_clauses: Vec<ClauseRef>,
    watches: Vec<Vec<ClauseRef>>,
    units: Vec<(Literal, u32)>,
    empty_clause: Option<u32>,
    root_conflict: bool,

    trail: Vec<Literal>,
    trail_lim: Vec<usize>,
    qhead: usize,

    var_inc: f64,
    var_decay: f64,
    restart_threshold: f64,
    conflicts_since_restart: u64,
    stats: SearchStats,
}

impl SearchCore {
    pub fn new() -> Self {
        Self {
            var_inc: 1.0,
            var_decay: 0.95,
            restart_threshold: 50.0,
            ..Default::default()
        }
    }

    // ---------------------------------------------------------------------------------
    // Variables
    // ---------------------------------------------------------------------------------

    pub fn ensure_var(&mut self, var: Variable) {
        let n = var.index() + 1;
        if self.assigns.len() < n {
            self.assigns.resize(n, LBool::Undef);
            self.levels.resize(n, 0);
            self.reasons.resize(n, None);
            self.activity.resize(n, 0.0);
            self.phase.resize(n, false);
            self.seen.resize(n, false);
            self.live.resize(n, false);
            self.watches.resize_with(2 * n, Vec::new);
        }
        if !self.live[var.index()] {
            self.live[var.index()] = true;
            self.order.push((0f64.to_bits(), var.index() as u32));
        }
    }

    /// Forget a variable that no clause mentions any more.
    pub fn release_var(&mut self, var: Variable) {
        let v = var.index();
        if v >= self.live.len() {
            return;
        }
        debug_assert_eq!(self.assigns[v], LBool::Undef);
        self.live[v] = false;
        self.activity[v] = 0.0;
        self.phase[v] = false;
    }

    pub fn num_vars(&self) -> usize {
        self.live.iter().filter(|&&l| l).count()
    }

    pub fn value(&self, lit: Literal) -> LBool {
        match self.assigns.get(lit.var().index()) {
            Some(v) => v.xor(lit.is_negated()),
            None => LBool::Undef,
        }
    }

    pub fn var_value(&self, var: Variable) -> LBool {
        self.assigns.get(var.index()).copied().unwrap_or(LBool::Undef)
    }

    pub fn level(&self, var: Variable) -> u32 {
        self.levels[var.index()]
    }

    pub fn decision_level(&self) -> u32 {
        self.trail_lim.len() as u32
    }

    pub fn trail(&self) -> &[Literal] {
        &self.trail
    }

    /// Decision literals, outermost first.
    pub fn decisions(&self) -> impl Iterator<Item = Literal> + '_ {
        self.trail_lim.iter().map(|&i| self.trail[i])
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.iter().filter(|c| c.live).count() + self.units.len()
    }

    fn bump(&mut self, var: Variable) {
        let v = var.index();
        self.activity[v] += self.var_inc;
        if self.activity[v] > ACTIVITY_LIMIT {
            for a in self.activity.iter_mut() {
                *a *= 1.0 / ACTIVITY_LIMIT;
            }
            self.var_inc *= 1.0 / ACTIVITY_LIMIT;
            self.rebuild_order();
        } else {
            self.order.push((self.activity[v].to_bits(), v as u32));
        }
    }

    fn rebuild_order(&mut self) {
        self.order = (1..self.assigns.len())
            .filter(|&v| self.live[v] && self.assigns[v] == LBool::Undef)
            .map(|v| (self.activity[v].to_bits(), v as u32))
            .collect();
    }

    // ---------------------------------------------------------------------------------
    // Clauses
    // ---------------------------------------------------------------------------------

    /// Whether an empty clause was added in a live scope.
    pub fn is_trivially_unsat(&self) -> bool {
        self.empty_clause.is_some()
    }

    /// Whether the clauses added during the current search are already false at level 0.
    pub fn has_root_conflict(&self) -> bool {
        self.root_conflict || self.empty_clause.is_some()
    }

    fn alloc_clause(&mut self, lits: SmallVec<[Literal; 4]>, scope: u32, learnt: bool) -> ClauseRef {
        debug_assert!(lits.len() >= 2);
        let (w0, w1) = (lits[0], lits[1]);
        let clause = Clause {
            lits,
            scope,
            learnt,
            live: true,
        };
        let cref = match self.free_clauses.pop() {
            Some(cref) => {
                self.clauses[cref as usize] = clause;
                cref
            }
            None => {
                self.clauses.push(clause);
                self.clauses.len() as ClauseRef - 1
            }
        };
        self.watches[w0.index()].push(cref);
        self.watches[w1.index()].push(cref);
        cref
    }

    /// Add an input clause at decision level 0.
    pub fn add_clause(&mut self, lits: &[Literal], scope: u32) {
        debug_assert!(self.trail_lim.is_empty(), "clauses are added at level 0");
        let mut c: SmallVec<[Literal; 4]> = lits.iter().copied().collect();
        for &l in &c {
            self.ensure_var(l.var());
        }
        c.sort_unstable();
        c.dedup();
        // A literal and its negation are adjacent once sorted.
        if c.windows(2).any(|w| w[0] == !w[1]) {
            return;
        }

        match c.len() {
            0 => {
                self.empty_clause = Some(self.empty_clause.map_or(scope, |s| s.min(scope)));
                self.root_conflict = true;
            }
            1 => {
                self.units.push((c[0], scope));
                match self.value(c[0]) {
                    LBool::False => self.root_conflict = true,
                    LBool::Undef => self.enqueue(c[0], None),
                    LBool::True => {}
                }
            }
            _ => {
                let assigns = &self.assigns;
                c.sort_by_key(|&l| lit_value(assigns, l) == LBool::False);
                let non_false = c
                    .iter()
                    .filter(|&&l| lit_value(assigns, l) != LBool::False)
                    .count();
                let first = c[0];
                let cref = self.alloc_clause(c, scope, false);
                if non_false == 0 {
                    self.root_conflict = true;
                } else if non_false == 1 && self.value(first) == LBool::Undef {
                    self.enqueue(first, Some(cref));
                }
            }
        }
    }

    /// Drop every clause created in a scope deeper than `depth`.
    pub fn pop_scopes(&mut self, depth: u32) {
        self.reset_trail();
        for (i, clause) in self.clauses.iter_mut().enumerate() {
            if clause.live && clause.scope > depth {
                clause.live = false;
                clause.lits.clear();
                self.free_clauses.push(i as ClauseRef);
            }
        }
        let clauses = &self.clauses;
        for ws in self.watches.iter_mut() {
            ws.retain(|&c| clauses[c as usize].live);
        }
        self.units.retain(|&(_, s)| s <= depth);
        if self.empty_clause.is_some_and(|s| s > depth) {
            self.empty_clause = None;
        }
        self.root_conflict = false;
    }

    /// Move the clauses and units of scopes deeper than `depth` into scope `depth`.
    pub fn merge_scopes(&mut self, depth: u32) {
        for clause in self.clauses.iter_mut().filter(|c| c.live) {
            clause.scope = clause.scope.min(depth);
        }
        for (_, scope) in self.units.iter_mut() {
            *scope = (*scope).min(depth);
        }
        if let Some(scope) = self.empty_clause.as_mut() {
            *scope = (*scope).min(depth);
        }
    }

    /// Drop every clause and every variable.
    pub fn clear(&mut self) {
        *self = SearchCore::new();
    }

    // ---------------------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------------------

    fn enqueue(&mut self, lit: Literal, reason: Option<ClauseRef>) {
        let v = lit.var().index();
        debug_assert_eq!(self.assigns[v], LBool::Undef);
        self.assigns[v] = LBool::from_bool(!lit.is_negated());
        self.levels[v] = self.decision_level();
        self.reasons[v] = reason;
        self.trail.push(lit);
    }

    pub fn decide(&mut self, lit: Literal) {
        self.trail_lim.push(self.trail.len());
        self.stats.decisions += 1;
        self.enqueue(lit, None);
    }

    pub fn backtrack(&mut self, level: u32) {
        if self.decision_level() <= level {
            return;
        }
        let lim = self.trail_lim[level as usize];
        self.unassign_from(lim);
        self.trail_lim.truncate(level as usize);
        if self.order.len() > 8 * self.assigns.len() + 64 {
            self.rebuild_order();
        }
    }

    fn unassign_from(&mut self, lim: usize) {
        for i in (lim..self.trail.len()).rev() {
            let lit = self.trail[i];
            let v = lit.var().index();
            self.phase[v] = !lit.is_negated();
            self.assigns[v] = LBool::Undef;
            self.reasons[v] = None;
            self.order.push((self.activity[v].to_bits(), v as u32));
        }
        self.trail.truncate(lim);
        self.qhead = self.qhead.min(lim);
    }

    /// Undo every assignment, level 0 included.
    pub fn reset_trail(&mut self) {
        self.unassign_from(0);
        self.trail_lim.clear();
        self.qhead = 0;
        self.root_conflict = false;
    }

    /// Prepare a new search. Returns `false` when the clauses are already
    /// contradictory at level 0.
    pub fn start_search(&mut self, params: &SearchParams) -> bool {
        self.reset_trail();
        self.var_decay = params.var_decay;
        self.restart_threshold = params.restart_threshold as f64;
        self.conflicts_since_restart = 0;

        self.assign_units()
    }

    /// Assign every unit clause at level 0, without propagating. Returns `false` on a
    /// contradiction.
    pub fn assign_units(&mut self) -> bool {
        debug_assert!(self.trail_lim.is_empty());
        if self.empty_clause.is_some() {
            return false;
        }
        for i in 0..self.units.len() {
            let (lit, _) = self.units[i];
            match self.value(lit) {
                LBool::False => {
                    self.root_conflict = true;
                    return false;
                }
                LBool::Undef => self.enqueue(lit, None),
                LBool::True => {}
            }
        }
        true
    }

    /// Boolean constraint propagation. Returns the literals of a falsified clause.
    pub fn propagate(&mut self) -> Option<SmallVec<[Literal; 8]>> {
        while self.qhead < self.trail.len() {
            let p = self.trail[self.qhead];
            self.qhead += 1;
            self.stats.propagations += 1;

            let false_lit = !p;
            let mut ws = std::mem::take(&mut self.watches[false_lit.index()]);
            let mut conflict = None;
            let (mut i, mut j) = (0, 0);

            while i < ws.len() {
                let cref = ws[i];
                i += 1;

                let clause = &mut self.clauses[cref as usize];
                debug_assert!(clause.live);
                if clause.lits[0] == false_lit {
                    clause.lits.swap(0, 1);
                }
                let first = clause.lits[0];
                if lit_value(&self.assigns, first) == LBool::True {
                    ws[j] = cref;
                    j += 1;
                    continue;
                }

                let mut moved = None;
                for k in 2..clause.lits.len() {
                    if lit_value(&self.assigns, clause.lits[k]) != LBool::False {
                        clause.lits.swap(1, k);
                        moved = Some(clause.lits[1]);
                        break;
                    }
                }
                if let Some(w) = moved {
                    self.watches[w.index()].push(cref);
                    continue;
                }

                ws[j] = cref;
                j += 1;
                if lit_value(&self.assigns, first) == LBool::False {
                    conflict = Some(clause.lits.iter().copied().collect());
                    while i < ws.len() {
                        ws[j] = ws[i];
                        j += 1;
                        i += 1;
                    }
                } else {
                    self.enqueue(first, Some(cref));
                }
            }

            ws.truncate(j);
            self.watches[false_lit.index()] = ws;
            if conflict.is_some() {
                self.qhead = self.trail.len();
                return conflict;
            }
        }
        None
    }

    /// First-UIP analysis of a clause whose literals are all false.
    ///
    /// The trail is first brought back to the highest level of the clause, which is
    /// where theory conflicts may be detected late.
    pub fn analyze(&mut self, conflict: &[Literal]) -> ConflictAnalysis {
        self.stats.conflicts += 1;
        self.conflicts_since_restart += 1;

        let max_level = conflict
            .iter()
            .map(|l| self.levels[l.var().index()])
            .max()
            .unwrap_or(0);
        if max_level == 0 {
            return ConflictAnalysis::Unsat;
        }
        self.backtrack(max_level);

        let mut learnt: SmallVec<[Literal; 8]> = smallvec![Literal::positive(Variable::NULL)];
        let mut reason: SmallVec<[Literal; 8]> = conflict.iter().copied().collect();
        let mut skip = None;
        let mut counter = 0usize;
        let mut index = self.trail.len();

        let uip = loop {
            for &q in reason.iter() {
                let v = q.var();
                if Some(v) == skip {
                    continue;
                }
                let vi = v.index();
                if !self.seen[vi] && self.levels[vi] > 0 {
                    self.seen[vi] = true;
                    self.bump(v);
                    if self.levels[vi] >= max_level {
                        counter += 1;
                    } else {
                        learnt.push(q);
                    }
                }
            }

            loop {
                index -= 1;
                if self.seen[self.trail[index].var().index()] {
                    break;
                }
            }
            let p = self.trail[index];
            self.seen[p.var().index()] = false;
            counter -= 1;
            if counter == 0 {
                break p;
            }

            let Some(cref) = self.reasons[p.var().index()] else {
                unreachable!("only the first literal of a level lacks a reason");
            };
            skip = Some(p.var());
            reason = self.clauses[cref as usize].lits.iter().copied().collect();
        };

        learnt[0] = !uip;
        for l in &learnt[1..] {
            self.seen[l.var().index()] = false;
        }

        let mut level = 0;
        let mut pos = 1;
        for (k, l) in learnt.iter().enumerate().skip(1) {
            let lv = self.levels[l.var().index()];
            if lv > level {
                level = lv;
                pos = k;
            }
        }
        if learnt.len() > 1 {
            learnt.swap(1, pos);
        }

        self.var_inc /= self.var_decay;
        ConflictAnalysis::Learnt { level, clause: learnt }
    }

    /// Record a learned clause after backjumping; its first literal becomes true.
    pub fn learn(&mut self, clause: &[Literal], scope: u32) {
        self.stats.learned_clauses += 1;
        let asserting = clause[0];
        if clause.len() == 1 {
            self.units.push((asserting, scope));
            self.enqueue(asserting, None);
        } else {
            let cref = self.alloc_clause(clause.iter().copied().collect(), scope, true);
            self.enqueue(asserting, Some(cref));
        }
    }

    /// Most active unassigned variable, with its saved polarity.
    pub fn pick_branch(&mut self) -> Option<Literal> {
        while let Some((_, v)) = self.order.pop() {
            let v = v as usize;
            if self.live[v] && self.assigns[v] == LBool::Undef {
                return Some(Literal::new(Variable::from_index(v), !self.phase[v]));
            }
        }
        (1..self.assigns.len())
            .find(|&v| self.live[v] && self.assigns[v] == LBool::Undef)
            .map(|v| Literal::new(Variable::from_index(v), !self.phase[v]))
    }

    pub fn should_restart(&self) -> bool {
        self.conflicts_since_restart as f64 >= self.restart_threshold
    }

    pub fn restart(&mut self, factor: f64) {
        self.backtrack(0);
        self.conflicts_since_restart = 0;
        self.restart_threshold *= factor;
        self.stats.restarts += 1;
    }

    pub fn num_learnt(&self) -> usize {
        self.clauses.iter().filter(|c| c.live && c.learnt).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: i32) -> Literal {
        Literal::new(Variable::from_index(v.unsigned_abs() as usize), v < 0)
    }

    /// Plain CDCL loop used to exercise the core on its own.
    fn solve(core: &mut SearchCore) -> bool {
        if !core.start_search(&SearchParams::default()) {
            return false;
        }
        loop {
            if core.has_root_conflict() {
                return false;
            }
            if let Some(conflict) = core.propagate() {
                match core.analyze(&conflict) {
                    ConflictAnalysis::Unsat => return false,
                    ConflictAnalysis::Learnt { level, clause } => {
                        core.backtrack(level);
                        core.learn(&clause, 0);
                    }
                }
                continue;
            }
            match core.pick_branch() {
                Some(l) => core.decide(l),
                None => return true,
            }
        }
    }

    fn add(core: &mut SearchCore, clause: &[i32], scope: u32) {
        let lits: Vec<_> = clause.iter().map(|&v| lit(v)).collect();
        core.add_clause(&lits, scope);
    }

    fn pigeonhole(core: &mut SearchCore, holes: i32) {
        let pigeons = holes + 1;
        let var = |p: i32, h: i32| p * holes + h + 1;
        for p in 0..pigeons {
            let clause: Vec<_> = (0..holes).map(|h| var(p, h)).collect();
            add(core, &clause, 0);
        }
        for h in 0..holes {
            for p in 0..pigeons {
                for q in p + 1..pigeons {
                    add(core, &[-var(p, h), -var(q, h)], 0);
                }
            }
        }
    }

    #[test]
    fn satisfiable_formula_gets_a_model() {
        let mut core = SearchCore::new();
        let clauses: &[&[i32]] = &[&[1, 2], &[-1, 3], &[-2, -3], &[2, 3]];
        for c in clauses {
            add(&mut core, c, 0);
        }
        assert!(solve(&mut core));
        for c in clauses {
            assert!(c.iter().any(|&v| core.value(lit(v)) == LBool::True));
        }
    }

    #[test]
    fn pigeonhole_is_unsat() {
        let mut core = SearchCore::new();
        pigeonhole(&mut core, 4);
        assert!(!solve(&mut core));
        assert!(core.stats().conflicts > 0);
    }

    #[test]
    fn contradictory_units() {
        let mut core = SearchCore::new();
        add(&mut core, &[1], 0);
        add(&mut core, &[-1], 0);
        assert!(!solve(&mut core));
    }

    #[test]
    fn tautologies_are_ignored() {
        let mut core = SearchCore::new();
        add(&mut core, &[1, -1], 0);
        assert_eq!(core.num_clauses(), 0);
        add(&mut core, &[], 1);
        assert!(core.is_trivially_unsat());
        core.pop_scopes(0);
        assert!(!core.is_trivially_unsat());
    }

    #[test]
    fn popping_scopes_removes_their_clauses() {
        let mut core = SearchCore::new();
        add(&mut core, &[1, 2], 0);
        add(&mut core, &[-1], 1);
        add(&mut core, &[-2], 1);
        assert!(!solve(&mut core));

        core.pop_scopes(0);
        assert!(solve(&mut core));
        assert_eq!(core.num_clauses(), 1);
    }

    #[test]
    fn merged_scopes_survive_the_next_pop() {
        let mut core = SearchCore::new();
        add(&mut core, &[1, 2], 1);
        add(&mut core, &[-1], 2);
        add(&mut core, &[-2, 3], 2);
        core.merge_scopes(1);

        core.pop_scopes(1);
        assert_eq!(core.num_clauses(), 3);
        assert!(solve(&mut core));
        assert_eq!(core.value(lit(3)), LBool::True);

        core.pop_scopes(0);
        assert_eq!(core.num_clauses(), 0);
    }

    #[test]
    fn decisions_follow_saved_phase() {
        let mut core = SearchCore::new();
        add(&mut core, &[1, 2], 0);
        assert!(solve(&mut core));
        let first: Vec<_> = core.decisions().collect();
        assert!(!first.is_empty());
        assert!(first.iter().all(|l| l.is_negated() || core.value(*l) == LBool::True));
    }
}
