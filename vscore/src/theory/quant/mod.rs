//! Quantifier instantiation by E-matching.
//!
//! Instantiation only happens in final checks: propagation is left alone so that a
//! half-built assignment does not flood the search with instances. Instances are ground
//! formulas handed back to the context, which asserts them at the base level.

pub mod ematch;
pub mod pattern;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use vsterms::{Term, TermDesc, TermTable};

use crate::{
    theory::{
        FinalCheck, TheoryEnv, TheorySolver,
        egraph::{Egraph, NodeId},
    },
    utils::error::{VsError, VsResult},
};

use self::{
    ematch::Matcher,
    pattern::{PatternId, PatternTable, variables_of},
};

/// A universally quantified assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantConstraint {
    pub formula: Term,
    pub vars: SmallVec<[Term; 4]>,
    pub body: Term,
    /// Conjunction of patterns; empty when none could be inferred.
    pub patterns: SmallVec<[PatternId; 2]>,
}

#[derive(Debug, Default)]
pub struct QuantTable {
    constraints: Vec<QuantConstraint>,
}

impl QuantTable {
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn get(&self, i: usize) -> &QuantConstraint {
        &self.constraints[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuantConstraint> + '_ {
        self.constraints.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuantStats {
    pub num_quantifiers: usize,
    pub num_patterns: usize,
    pub num_instances: u64,
}

#[derive(Debug)]
pub struct QuantSolver {
    quants: QuantTable,
    patterns: PatternTable,
    /// Candidate application nodes of each pattern.
    candidates: Vec<Vec<NodeId>>,
    instances: FxHashSet<Term>,
    instance_log: Vec<Term>,
    /// Sizes of the tables and the instance count at each open scope.
    scopes: Vec<(usize, usize, usize, u64)>,
    max_instances: u32,
    max_total_instances: u32,
    check_instances: u32,
    num_instances: u64,
}

impl Default for QuantSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl QuantSolver {
    pub fn new() -> Self {
        Self {
            quants: QuantTable::default(),
            patterns: PatternTable::new(),
            candidates: Vec::new(),
            instances: FxHashSet::default(),
            instance_log: Vec::new(),
            scopes: Vec::new(),
            max_instances: 1000,
            max_total_instances: 100_000,
            check_instances: 0,
            num_instances: 0,
        }
    }

    pub fn quantifiers(&self) -> &QuantTable {
        &self.quants
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn stats(&self) -> QuantStats {
        QuantStats {
            num_quantifiers: self.quants.len(),
            num_patterns: self.patterns.len(),
            num_instances: self.num_instances,
        }
    }

    /// Whether `t` occurs in a registered constraint.
    pub fn mentions(&self, terms: &TermTable, t: Term) -> bool {
        self.quants.iter().any(|c| terms.occurs(t, c.formula))
    }

    /// Register `formula`, a positive `forall`. Patterns are inferred when `explicit` is
    /// empty; explicit patterns must be applications over the bound variables that
    /// together mention all of them.
    pub fn add_constraint(&mut self, terms: &TermTable, formula: Term, explicit: &[Term]) -> VsResult<()> {
        let TermDesc::Forall(vars, body) = terms.desc(formula) else {
            return Err(VsError::FormulaNotSupported(formula));
        };
        let (vars, body): (SmallVec<[Term; 4]>, Term) = (vars.iter().copied().collect(), *body);

        let pattern_terms = if explicit.is_empty() {
            pattern::infer(terms, &vars, body)
        } else {
            let mut covered: SmallVec<[Term; 4]> = SmallVec::new();
            for &p in explicit {
                terms.check(p)?;
                if !matches!(terms.desc(p), TermDesc::App(..)) || p.is_negated() {
                    return Err(VsError::FormulaNotSupported(p));
                }
                let pvars = variables_of(terms, p);
                if pvars.iter().any(|v| !vars.contains(v)) {
                    return Err(VsError::FreeVarInFormula(p));
                }
                covered.extend(pvars);
            }
            if let Some(&missing) = vars.iter().find(|v| !covered.contains(v)) {
                return Err(VsError::FormulaNotSupported(missing));
            }
            explicit.iter().copied().collect()
        };

        let mut patterns = SmallVec::new();
        for p in pattern_terms {
            if let Some(id) = self.patterns.add(terms, p) {
                patterns.push(id);
            }
        }
        debug!(
            "quant: constraint {} with {} pattern(s)",
            self.quants.len(),
            patterns.len()
        );
        self.quants.constraints.push(QuantConstraint {
            formula,
            vars,
            body,
            patterns,
        });
        Ok(())
    }

    fn refresh_candidates(&mut self, egraph: &Egraph) {
        self.candidates = self
            .patterns
            .iter()
            .map(|p| egraph.apps_of(p.head).to_vec())
            .collect();
    }

    fn budget_left(&self, added: u32) -> bool {
        added < self.max_instances && self.check_instances < self.max_total_instances
    }
}

impl TheorySolver for QuantSolver {
    fn name(&self) -> &'static str {
        "quant"
    }

    fn start_search(&mut self, env: &mut TheoryEnv<'_>) {
        self.max_instances = env.params.max_instances;
        self.max_total_instances = env.params.max_total_instances;
        self.check_instances = 0;
        if let Some(egraph) = env.egraph {
            self.refresh_candidates(egraph);
        }
    }

    fn propagate(&mut self, _env: &mut TheoryEnv<'_>) -> bool {
        false
    }

    fn final_check(&mut self, env: &mut TheoryEnv<'_>) -> FinalCheck {
        let Some(egraph) = env.egraph else {
            return FinalCheck::Done;
        };
        if self.quants.is_empty() {
            return FinalCheck::Done;
        }
        self.refresh_candidates(egraph);

        let mut added = 0u32;
        for ci in 0..self.quants.len() {
            if !self.budget_left(added) {
                break;
            }
            let c = &self.quants.constraints[ci];
            if c.patterns.is_empty() {
                continue;
            }
            let (vars, body) = (c.vars.clone(), c.body);

            let bindings = {
                let matcher = Matcher::new(egraph, env.terms, &vars);
                let mut bindings = vec![matcher.empty_binding()];
                for &p in &c.patterns {
                    let pattern = self.patterns.get(p).term;
                    bindings = matcher.match_pattern(pattern, &self.candidates[p as usize], bindings);
                    if bindings.is_empty() {
                        break;
                    }
                }
                bindings
            };

            for binding in bindings {
                if !self.budget_left(added) {
                    break;
                }
                let map: FxHashMap<Term, Term> = vars
                    .iter()
                    .zip(&binding)
                    .filter_map(|(&v, n)| n.map(|n| (v, egraph.term(egraph.root(n)))))
                    .collect();
                if map.len() != vars.len() {
                    continue;
                }
                let instance = match env.terms.subst(&map, body) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!("quant: instantiation of constraint {} failed: {}", ci, e);
                        continue;
                    }
                };
                if instance == Term::TRUE || !self.instances.insert(instance) {
                    continue;
                }
                debug!("quant: new instance {:?} of constraint {}", instance, ci);
                self.instance_log.push(instance);
                env.formulas.push(instance);
                added += 1;
                self.check_instances += 1;
                self.num_instances += 1;
            }
        }

        if added > 0 {
            FinalCheck::Continue
        } else if self.check_instances >= self.max_total_instances {
            FinalCheck::Incomplete
        } else {
            FinalCheck::Done
        }
    }

    fn increase_decision_level(&mut self) {}

    fn backtrack(&mut self, _level: u32) {}

    fn push(&mut self) {
        self.scopes.push((
            self.quants.len(),
            self.patterns.len(),
            self.instance_log.len(),
            self.num_instances,
        ));
    }

    fn pop(&mut self) {
        let Some((quants, patterns, instances, num_instances)) = self.scopes.pop() else {
            return;
        };
        self.num_instances = num_instances;
        self.quants.constraints.truncate(quants);
        self.patterns.truncate(patterns);
        for t in self.instance_log.drain(instances..) {
            self.instances.remove(&t);
        }
        self.candidates.clear();
    }

    fn merge_scope(&mut self) {
        self.scopes.pop();
    }

    fn reset(&mut self) {
        *self = QuantSolver::new();
    }

    /// Saturation does not prove that the quantifiers hold.
    fn is_complete(&self) -> bool {
        self.quants.is_empty()
    }

    fn gc_roots(&self, roots: &mut Vec<Term>) {
        for c in self.quants.iter() {
            roots.push(c.formula);
        }
        roots.extend(self.patterns.iter().map(|p| p.term));
        roots.extend(self.instance_log.iter().copied());
    }
}
