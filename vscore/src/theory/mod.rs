//! Theory-solver plugins.
//!
//! A plugin observes the assignment trail of the search core and reacts at a few fixed
//! points of the search: when a search starts, after boolean propagation, when every
//! variable is assigned (final check), and when the core moves between decision levels
//! or assertion scopes. The egraph always runs first; satellite solvers (currently the
//! quantifier solver) read its equivalence classes.

pub mod egraph;
pub mod quant;

use downcast_rs::{Downcast, impl_downcast};
use smallvec::SmallVec;
use vsterms::{Term, TermTable};

use crate::{
    model::Model,
    search::{Literal, SearchCore},
    utils::conf::SearchParams,
    variable_db::VariableDb,
};

pub use egraph::Egraph;

/// Outcome of a final check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalCheck {
    /// New formulas were produced; search must go on.
    Continue,
    /// The assignment is consistent with the plugin.
    Done,
    /// The plugin gave up.
    Incomplete,
}

/// What a plugin sees of the context during a callback.
pub struct TheoryEnv<'a> {
    pub terms: &'a mut TermTable,
    pub vars: &'a VariableDb,
    pub core: &'a SearchCore,
    pub params: &'a SearchParams,
    /// Congruence classes, available to satellites only.
    pub egraph: Option<&'a Egraph>,
    /// A clause whose literals are all false under the current assignment.
    pub conflict: Option<SmallVec<[Literal; 8]>>,
    /// Ground formulas to assert at the base level.
    pub formulas: Vec<Term>,
}

impl<'a> TheoryEnv<'a> {
    pub fn new(
        terms: &'a mut TermTable,
        vars: &'a VariableDb,
        core: &'a SearchCore,
        params: &'a SearchParams,
    ) -> Self {
        Self {
            terms,
            vars,
            core,
            params,
            egraph: None,
            conflict: None,
            formulas: Vec::new(),
        }
    }

    fn with_egraph<'b>(&'b mut self, egraph: &'b Egraph) -> TheoryEnv<'b> {
        TheoryEnv {
            terms: &mut *self.terms,
            vars: self.vars,
            core: self.core,
            params: self.params,
            egraph: Some(egraph),
            conflict: None,
            formulas: Vec::new(),
        }
    }

    fn absorb(&mut self, conflict: Option<SmallVec<[Literal; 8]>>, formulas: Vec<Term>) {
        if self.conflict.is_none() {
            self.conflict = conflict;
        }
        self.formulas.extend(formulas);
    }
}

pub trait TheorySolver: Downcast + Send {
    fn name(&self) -> &'static str;

    /// Called once per `check`, before the first propagation.
    fn start_search(&mut self, env: &mut TheoryEnv<'_>);

    /// Cheap reasoning after boolean propagation. Returns whether anything changed.
    fn propagate(&mut self, env: &mut TheoryEnv<'_>) -> bool;

    /// Expensive or incomplete reasoning once the assignment is total.
    fn final_check(&mut self, env: &mut TheoryEnv<'_>) -> FinalCheck;

    fn increase_decision_level(&mut self);

    fn backtrack(&mut self, level: u32);

    fn push(&mut self);

    fn pop(&mut self);

    /// Keep the effects of the innermost scope and fold them into the scope below it.
    fn merge_scope(&mut self);

    fn reset(&mut self);

    fn build_model(&self, _terms: &TermTable, _model: &mut Model) {}

    /// Whether `Done` from this plugin proves satisfiability.
    fn is_complete(&self) -> bool {
        true
    }

    /// Terms this plugin keeps alive across garbage collections.
    fn gc_roots(&self, _roots: &mut Vec<Term>) {}
}
impl_downcast!(TheorySolver);

/// The egraph and the satellites, driven in registration order.
pub struct PluginRegistry {
    egraph: Egraph,
    satellites: Vec<Box<dyn TheorySolver>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("egraph", &self.egraph.name())
            .field(
                "satellites",
                &self.satellites.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            egraph: Egraph::new(),
            satellites: Vec::new(),
        }
    }

    pub fn register(&mut self, solver: Box<dyn TheorySolver>) {
        self.satellites.push(solver);
    }

    pub fn egraph(&self) -> &Egraph {
        &self.egraph
    }

    pub fn egraph_mut(&mut self) -> &mut Egraph {
        &mut self.egraph
    }

    pub fn satellite<T: TheorySolver>(&self) -> Option<&T> {
        self.satellites.iter().find_map(|s| s.downcast_ref::<T>())
    }

    pub fn satellite_mut<T: TheorySolver>(&mut self) -> Option<&mut T> {
        self.satellites.iter_mut().find_map(|s| s.downcast_mut::<T>())
    }

    pub fn start_search(&mut self, env: &mut TheoryEnv<'_>) {
        self.egraph.start_search(env);
        for solver in self.satellites.iter_mut() {
            let mut sub = env.with_egraph(&self.egraph);
            solver.start_search(&mut sub);
            let TheoryEnv { conflict, formulas, .. } = sub;
            env.absorb(conflict, formulas);
        }
    }

    pub fn propagate(&mut self, env: &mut TheoryEnv<'_>) -> bool {
        let mut progress = self.egraph.propagate(env);
        for solver in self.satellites.iter_mut() {
            if env.conflict.is_some() {
                break;
            }
            let mut sub = env.with_egraph(&self.egraph);
            progress |= solver.propagate(&mut sub);
            let TheoryEnv { conflict, formulas, .. } = sub;
            env.absorb(conflict, formulas);
        }
        progress
    }

    /// `Continue` if any plugin continues, else `Incomplete` if any gave up.
    pub fn final_check(&mut self, env: &mut TheoryEnv<'_>) -> FinalCheck {
        let mut outcome = self.egraph.final_check(env);
        if env.conflict.is_some() {
            return FinalCheck::Continue;
        }
        for solver in self.satellites.iter_mut() {
            let mut sub = env.with_egraph(&self.egraph);
            let r = solver.final_check(&mut sub);
            let TheoryEnv { conflict, formulas, .. } = sub;
            env.absorb(conflict, formulas);
            outcome = match (outcome, r) {
                (FinalCheck::Continue, _) | (_, FinalCheck::Continue) => FinalCheck::Continue,
                (FinalCheck::Incomplete, _) | (_, FinalCheck::Incomplete) => FinalCheck::Incomplete,
                _ => FinalCheck::Done,
            };
        }
        outcome
    }

    pub fn increase_decision_level(&mut self) {
        self.egraph.increase_decision_level();
        for solver in self.satellites.iter_mut() {
            solver.increase_decision_level();
        }
    }

    pub fn backtrack(&mut self, level: u32) {
        self.egraph.backtrack(level);
        for solver in self.satellites.iter_mut() {
            solver.backtrack(level);
        }
    }

    pub fn push(&mut self) {
        self.egraph.push();
        for solver in self.satellites.iter_mut() {
            solver.push();
        }
    }

    pub fn pop(&mut self) {
        self.egraph.pop();
        for solver in self.satellites.iter_mut() {
            solver.pop();
        }
    }

    pub fn merge_scope(&mut self) {
        self.egraph.merge_scope();
        for solver in self.satellites.iter_mut() {
            solver.merge_scope();
        }
    }

    pub fn reset(&mut self) {
        self.egraph.reset();
        for solver in self.satellites.iter_mut() {
            solver.reset();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.egraph.is_complete() && self.satellites.iter().all(|s| s.is_complete())
    }

    pub fn build_model(&self, terms: &TermTable, model: &mut Model) {
        self.egraph.build_model(terms, model);
        for solver in self.satellites.iter() {
            solver.build_model(terms, model);
        }
    }

    pub fn gc_roots(&self, roots: &mut Vec<Term>) {
        self.egraph.gc_roots(roots);
        for solver in self.satellites.iter() {
            solver.gc_roots(roots);
        }
    }
}
