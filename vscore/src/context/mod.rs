//! Contexts: assertion stacks layered over a search core and its theory plugins.
//!
//! A context moves between the states of [`Status`]. Assertions are simplified and
//! internalized into clauses as soon as they are asserted; `check` then runs the CDCL
//! loop, calling the plugins after propagation and once the assignment is total.

mod internalize;
mod simplify;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use strum::{Display, FromRepr, IntoStaticStr};
use vsterms::{Term, TermDesc, TermTable, TypeId};

use crate::{
    model::{Model, Value},
    search::{ConflictAnalysis, LBool, Literal, SearchCore},
    theory::{
        FinalCheck, PluginRegistry, TheoryEnv,
        quant::{QuantSolver, QuantStats},
    },
    utils::{
        conf::{ContextConfig, ContextMode, ContextOptions, SearchParams},
        error::{VsError, VsResult},
    },
    variable_db::{GcInfo, Variable, VariableDb},
};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Idle = 0,
    Searching = 1,
    Unknown = 2,
    Sat = 3,
    Unsat = 4,
    Interrupted = 5,
}

/// Asynchronous stop request for a running `check`.
///
/// Only stores a flag: it can be used from another thread or a signal handler.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub decisions: u64,
    pub conflicts: u64,
    pub propagations: u64,
    pub restarts: u64,
    pub learned_clauses: u64,
    pub num_vars: usize,
    pub num_clauses: usize,
    pub quant: QuantStats,
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    assertions: usize,
    subst_log: usize,
    cache_log: usize,
    created: usize,
}

#[derive(Debug, Clone, Copy)]
enum Cached {
    Lit(Term),
    Bits(Term),
}

pub struct Context {
    config: ContextConfig,
    options: ContextOptions,
    status: Status,
    vars: VariableDb,
    core: SearchCore,
    registry: PluginRegistry,

    assertions: Vec<Term>,
    scopes: Vec<Scope>,
    /// Eliminated terms and their definitions.
    subst: FxHashMap<Term, Term>,
    subst_log: Vec<Term>,
    lits: FxHashMap<Term, Literal>,
    bits: FxHashMap<Term, Vec<Literal>>,
    cache_log: Vec<Cached>,
    /// Auxiliary boolean terms created for bit-blasting gates.
    aux: FxHashSet<Term>,

    /// Variables announced by the variable database, not yet known to the core.
    pending: Arc<Mutex<Vec<Variable>>>,
    /// Every live variable, in creation order.
    created: Vec<Variable>,
    true_lit: Literal,
    interrupt: InterruptHandle,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("mode", &self.config.mode)
            .field("status", &self.status)
            .field("scopes", &self.scopes.len())
            .field("assertions", &self.assertions.len())
            .field("vars", &self.vars)
            .finish()
    }
}

impl Context {
    pub fn new(config: ContextConfig) -> Self {
        Self::with_interrupt(config, InterruptHandle::new())
    }

    fn with_interrupt(config: ContextConfig, interrupt: InterruptHandle) -> Self {
        let pending = Arc::new(Mutex::new(Vec::new()));
        let mut vars = VariableDb::new();
        let sink = pending.clone();
        vars.add_new_variable_listener(move |v: Variable, _t: Term| sink.lock().push(v));

        let mut registry = PluginRegistry::new();
        registry.register(Box::new(QuantSolver::new()));

        let mut ctx = Self {
            options: config.options(),
            config,
            status: Status::Idle,
            vars,
            core: SearchCore::new(),
            registry,
            assertions: Vec::new(),
            scopes: Vec::new(),
            subst: FxHashMap::default(),
            subst_log: Vec::new(),
            lits: FxHashMap::default(),
            bits: FxHashMap::default(),
            cache_log: Vec::new(),
            aux: FxHashSet::default(),
            pending,
            created: Vec::new(),
            true_lit: Literal::positive(Variable::NULL),
            interrupt,
        };
        let v = ctx.vars.get_variable(Term::TRUE);
        ctx.sync_vars();
        ctx.true_lit = Literal::positive(v);
        ctx.core.add_clause(&[ctx.true_lit], 0);
        ctx
    }

    // ---------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn mode(&self) -> ContextMode {
        self.config.mode
    }

    pub fn options(&self) -> ContextOptions {
        self.options
    }

    pub fn enable_option(&mut self, name: &str) -> VsResult<()> {
        self.options |= ContextOptions::from_option_name(name)?;
        Ok(())
    }

    pub fn disable_option(&mut self, name: &str) -> VsResult<()> {
        self.options -= ContextOptions::from_option_name(name)?;
        Ok(())
    }

    pub fn num_assertions(&self) -> usize {
        self.assertions.len()
    }

    pub fn assertions(&self) -> &[Term] {
        &self.assertions
    }

    /// Number of open `push` scopes.
    pub fn base_level(&self) -> usize {
        self.scopes.len()
    }

    pub fn vars(&self) -> &VariableDb {
        &self.vars
    }

    pub fn core(&self) -> &SearchCore {
        &self.core
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn stats(&self) -> ContextStats {
        let search = self.core.stats();
        ContextStats {
            decisions: search.decisions,
            conflicts: search.conflicts,
            propagations: search.propagations,
            restarts: search.restarts,
            learned_clauses: search.learned_clauses,
            num_vars: self.vars.size(),
            num_clauses: self.core.num_clauses(),
            quant: self
                .registry
                .satellite::<QuantSolver>()
                .map(|q| q.stats())
                .unwrap_or_default(),
        }
    }

    /// Terms that must survive a garbage collection while this context is alive.
    pub fn gc_roots(&self, roots: &mut Vec<Term>) {
        roots.extend(self.assertions.iter().copied());
        roots.extend(self.vars.iter().map(|(_, t)| t));
        for (&x, &v) in &self.subst {
            roots.push(x);
            roots.push(v);
        }
        roots.extend(self.lits.keys().copied());
        roots.extend(self.bits.keys().copied());
        roots.extend(self.aux.iter().copied());
        self.registry.gc_roots(roots);
    }

    // ---------------------------------------------------------------------------------
    // Bookkeeping
    // ---------------------------------------------------------------------------------

    fn scope(&self) -> u32 {
        self.scopes.len() as u32
    }

    /// Hand the variables created since the last call to the search core.
    fn sync_vars(&mut self) {
        let fresh: Vec<Variable> = self.pending.lock().drain(..).collect();
        for v in fresh {
            self.core.ensure_var(v);
            self.created.push(v);
        }
    }

    /// Drop the assignment of a finished search, keeping the root units.
    fn clear_search(&mut self) {
        self.core.reset_trail();
        self.core.assign_units();
        self.registry.backtrack(0);
    }

    // ---------------------------------------------------------------------------------
    // Transitions
    // ---------------------------------------------------------------------------------

    pub fn assert_formula(&mut self, terms: &mut TermTable, t: Term) -> VsResult<()> {
        self.assert_formulas(terms, &[t])
    }

    /// Assert every formula of `ts`. All of them are validated before any is processed.
    pub fn assert_formulas(&mut self, terms: &mut TermTable, ts: &[Term]) -> VsResult<()> {
        self.check_assert_allowed()?;
        for &t in ts {
            self.validate(terms, t)?;
        }
        if self.status == Status::Unsat {
            return Ok(());
        }
        self.prepare_for_assert();

        for &t in ts {
            self.assertions.push(t);
            self.process_assertion(terms, t)?;
        }
        self.finish_assert();
        Ok(())
    }

    /// Assert `formula`, a `forall`, with explicit instantiation patterns.
    pub fn add_quantifier(&mut self, terms: &mut TermTable, formula: Term, patterns: &[Term]) -> VsResult<()> {
        self.check_assert_allowed()?;
        self.validate(terms, formula)?;
        if formula.is_negated() || !matches!(terms.desc(formula), TermDesc::Forall(..)) {
            return Err(VsError::FormulaNotSupported(formula));
        }
        if self.status == Status::Unsat {
            return Ok(());
        }
        self.prepare_for_assert();
        let quantified = terms.subst(&self.subst, formula)?;
        if quantified.is_negated() || !matches!(terms.desc(quantified), TermDesc::Forall(..)) {
            // Eliminations left nothing to instantiate.
            self.assertions.push(formula);
            self.process_assertion(terms, quantified)?;
        } else {
            let patterns = patterns
                .iter()
                .map(|&p| terms.subst(&self.subst, p))
                .collect::<Result<Vec<_>, _>>()?;
            let quant = self
                .registry
                .satellite_mut::<QuantSolver>()
                .ok_or(VsError::OperationNotSupported)?;
            quant.add_constraint(terms, quantified, &patterns)?;
            self.assertions.push(formula);
        }
        self.finish_assert();
        Ok(())
    }

    fn check_assert_allowed(&self) -> VsResult<()> {
        match self.status {
            Status::Searching | Status::Interrupted => Err(VsError::InvalidOperation(self.status)),
            Status::Sat | Status::Unknown if !self.config.mode.supports_multiple_checks() => {
                Err(VsError::OperationNotSupported)
            }
            _ => Ok(()),
        }
    }

    fn prepare_for_assert(&mut self) {
        if matches!(self.status, Status::Sat | Status::Unknown) {
            self.clear_search();
            self.status = Status::Idle;
        }
    }

    fn finish_assert(&mut self) {
        self.sync_vars();
        self.status = if self.core.has_root_conflict() {
            debug!("context: assertions are trivially unsatisfiable");
            Status::Unsat
        } else {
            Status::Idle
        };
    }

    pub fn push(&mut self) -> VsResult<()> {
        if !self.config.mode.supports_push_pop() {
            return Err(VsError::OperationNotSupported);
        }
        match self.status {
            Status::Searching | Status::Unsat | Status::Interrupted => {
                return Err(VsError::InvalidOperation(self.status));
            }
            Status::Sat | Status::Unknown => {
                self.clear_search();
                self.status = Status::Idle;
            }
            Status::Idle => {}
        }
        self.open_scope();
        debug!("context: push to level {}", self.scopes.len());
        Ok(())
    }

    fn open_scope(&mut self) {
        self.sync_vars();
        self.scopes.push(Scope {
            assertions: self.assertions.len(),
            subst_log: self.subst_log.len(),
            cache_log: self.cache_log.len(),
            created: self.created.len(),
        });
        self.registry.push();
    }

    pub fn pop(&mut self) -> VsResult<()> {
        if !self.config.mode.supports_push_pop() {
            return Err(VsError::OperationNotSupported);
        }
        if self.status == Status::Searching {
            return Err(VsError::InvalidOperation(self.status));
        }
        let Some(scope) = self.scopes.pop() else {
            return Err(VsError::InvalidOperation(self.status));
        };
        self.restore(scope);
        self.status = Status::Idle;
        debug!("context: pop to level {}", self.scopes.len());
        Ok(())
    }

    /// Undo every clause, variable, substitution and plugin state recorded since
    /// `scope` was opened. `scope` must already be off the stack.
    fn restore(&mut self, scope: Scope) {
        let depth = self.scopes.len() as u32;

        self.core.pop_scopes(depth);
        self.registry.backtrack(0);
        self.registry.pop();
        self.assertions.truncate(scope.assertions);
        for x in self.subst_log.drain(scope.subst_log..) {
            self.subst.remove(&x);
        }
        for entry in self.cache_log.drain(scope.cache_log..) {
            match entry {
                Cached::Lit(t) => {
                    self.lits.remove(&t);
                }
                Cached::Bits(t) => {
                    self.bits.remove(&t);
                }
            }
        }

        self.sync_vars();
        let doomed: FxHashSet<Variable> = self.created.drain(scope.created..).collect();
        let mut gc = GcInfo::new();
        for (v, t) in self.vars.iter() {
            if doomed.contains(&v) {
                self.aux.remove(&t);
            } else {
                gc.mark(v);
            }
        }
        for v in self.vars.gc_sweep(&gc) {
            self.core.release_var(v);
        }
        self.core.assign_units();
    }

    /// Back to an empty, idle context with the same configuration and options.
    pub fn reset(&mut self) {
        let options = self.options;
        *self = Context::with_interrupt(self.config.clone(), self.interrupt.clone());
        self.options = options;
        debug!("context: reset");
    }

    /// Request the running `check` to stop at its next safe point.
    pub fn stop_search(&self) {
        self.interrupt.interrupt();
    }

    pub fn check(&mut self, terms: &mut TermTable, params: &SearchParams) -> VsResult<Status> {
        match self.status {
            Status::Sat | Status::Unsat | Status::Unknown => return Ok(self.status),
            Status::Searching | Status::Interrupted => return Err(VsError::InvalidOperation(self.status)),
            Status::Idle => {}
        }
        params.validate()?;

        // Interactive checks run in a scope of their own; an interruption drops it.
        let restore_point = self.config.mode == ContextMode::Interactive;
        if restore_point {
            self.open_scope();
        }

        self.interrupt.clear();
        self.status = Status::Searching;
        debug!("context: searching");
        let outcome = self.search(terms, params);

        match outcome {
            Err(e) => {
                if restore_point {
                    self.rollback();
                } else {
                    self.clear_search();
                }
                self.status = Status::Idle;
                Err(e)
            }
            Ok(Status::Interrupted) if restore_point => {
                self.rollback();
                self.status = Status::Idle;
                info!("check: interrupted, context restored");
                Ok(Status::Interrupted)
            }
            Ok(status) => {
                if restore_point {
                    self.commit();
                }
                self.status = status;
                info!("check: {}", status);
                Ok(status)
            }
        }
    }

    /// Drop the scope opened by `check`, with everything the search added to it.
    fn rollback(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.restore(scope);
        }
    }

    /// Keep what the search added, as if it had been asserted in the enclosing scope.
    fn commit(&mut self) {
        if self.scopes.pop().is_some() {
            self.core.merge_scopes(self.scope());
            self.registry.merge_scope();
        }
    }

    fn search(&mut self, terms: &mut TermTable, params: &SearchParams) -> VsResult<Status> {
        if self.core.is_trivially_unsat() || !self.core.start_search(params) {
            return Ok(Status::Unsat);
        }
        let formulas = {
            let mut env = TheoryEnv::new(terms, &self.vars, &self.core, params);
            self.registry.start_search(&mut env);
            env.formulas
        };
        if !formulas.is_empty() && !self.assert_instances(terms, formulas)? {
            return Ok(Status::Unsat);
        }

        let scope = self.scope();
        loop {
            if self.interrupt.is_interrupted() {
                return Ok(Status::Interrupted);
            }

            if let Some(conflict) = self.core.propagate() {
                if !self.resolve(&conflict, scope) {
                    return Ok(Status::Unsat);
                }
                continue;
            }

            let conflict = {
                let mut env = TheoryEnv::new(terms, &self.vars, &self.core, params);
                self.registry.propagate(&mut env);
                env.conflict
            };
            if let Some(conflict) = conflict {
                if !self.resolve(&conflict, scope) {
                    return Ok(Status::Unsat);
                }
                continue;
            }

            if self.core.should_restart() {
                self.core.restart(params.restart_factor);
                self.registry.backtrack(0);
                continue;
            }

            if let Some(lit) = self.core.pick_branch() {
                self.registry.increase_decision_level();
                self.core.decide(lit);
                continue;
            }

            let (outcome, conflict, formulas) = {
                let mut env = TheoryEnv::new(terms, &self.vars, &self.core, params);
                let outcome = self.registry.final_check(&mut env);
                (outcome, env.conflict, env.formulas)
            };
            if self.interrupt.is_interrupted() {
                return Ok(Status::Interrupted);
            }
            if let Some(conflict) = conflict {
                if !self.resolve(&conflict, scope) {
                    return Ok(Status::Unsat);
                }
                continue;
            }
            match outcome {
                FinalCheck::Continue if !formulas.is_empty() => {
                    if !self.assert_instances(terms, formulas)? {
                        return Ok(Status::Unsat);
                    }
                }
                FinalCheck::Incomplete => return Ok(Status::Unknown),
                _ if self.registry.is_complete() => return Ok(Status::Sat),
                _ => return Ok(Status::Unknown),
            }
        }
    }

    /// Learn from a falsified clause. Returns `false` when the conflict is at the root.
    fn resolve(&mut self, conflict: &[Literal], scope: u32) -> bool {
        match self.core.analyze(conflict) {
            ConflictAnalysis::Unsat => false,
            ConflictAnalysis::Learnt { level, clause } => {
                self.core.backtrack(level);
                self.registry.backtrack(level);
                self.core.learn(&clause, scope);
                true
            }
        }
    }

    /// Assert plugin-generated formulas at the base level. Returns `false` on a root
    /// conflict.
    fn assert_instances(&mut self, terms: &mut TermTable, formulas: Vec<Term>) -> VsResult<bool> {
        self.core.backtrack(0);
        self.registry.backtrack(0);
        for f in formulas {
            self.process_assertion(terms, f)?;
        }
        self.sync_vars();
        Ok(!self.core.has_root_conflict())
    }

    /// Add a clause excluding the current assignment.
    pub fn assert_blocking_clause(&mut self) -> VsResult<()> {
        if !matches!(self.status, Status::Sat | Status::Unknown) {
            return Err(VsError::InvalidOperation(self.status));
        }
        if !self.config.mode.supports_multiple_checks() {
            return Err(VsError::OperationNotSupported);
        }
        let clause: Vec<Literal> = self.core.decisions().map(|l| !l).collect();
        self.clear_search();
        self.core.add_clause(&clause, self.scope());
        self.status = if clause.is_empty() { Status::Unsat } else { Status::Idle };
        debug!("context: blocking clause of size {}", clause.len());
        Ok(())
    }

    // ---------------------------------------------------------------------------------
    // Models
    // ---------------------------------------------------------------------------------

    /// Model of the current assignment; with `keep_subst`, eliminated terms are
    /// evaluated through their definitions.
    pub fn build_model(&self, terms: &TermTable, keep_subst: bool) -> VsResult<Model> {
        if !matches!(self.status, Status::Sat | Status::Unknown) {
            return Err(VsError::InvalidOperation(self.status));
        }
        let mut model = Model::new();

        for (v, t) in self.vars.iter() {
            if self.aux.contains(&t) || terms.ty(t) != TypeId::BOOL {
                continue;
            }
            if matches!(terms.desc(t), TermDesc::Uninterpreted { .. }) {
                model.set_value(t, Value::Bool(self.core.var_value(v) == LBool::True));
            }
        }
        for (&t, bits) in &self.bits {
            if matches!(terms.desc(t), TermDesc::Uninterpreted { .. }) {
                let value = bits
                    .iter()
                    .enumerate()
                    .filter(|&(_, &l)| self.core.value(l) == LBool::True)
                    .fold(0u64, |acc, (i, _)| acc | 1 << i);
                model.set_value(
                    t,
                    Value::BitVector {
                        width: bits.len() as u32,
                        value,
                    },
                );
            }
        }
        self.registry.build_model(terms, &mut model);
        if keep_subst {
            model.set_substitutions(self.subst.clone());
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::TheorySolver;

    fn bool_atoms(terms: &mut TermTable, n: usize) -> Vec<Term> {
        (0..n)
            .map(|_| terms.new_uninterpreted_term(TypeId::BOOL).unwrap())
            .collect()
    }

    #[test]
    fn status_numbers_are_stable() {
        assert_eq!(Status::Idle as i32, 0);
        assert_eq!(Status::from_repr(4), Some(Status::Unsat));
        assert_eq!(Status::Interrupted.to_string(), "interrupted");
    }

    #[test]
    fn trivially_false_assertion_is_unsat() {
        let mut terms = TermTable::new();
        let mut ctx = Context::new(ContextConfig::default());
        ctx.assert_formula(&mut terms, Term::FALSE).unwrap();
        assert_eq!(ctx.status(), Status::Unsat);
        // Asserting in UNSAT is accepted and ignored.
        ctx.assert_formula(&mut terms, Term::TRUE).unwrap();
        assert_eq!(ctx.num_assertions(), 1);
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Unsat);
    }

    #[test]
    fn one_shot_rejects_incremental_use() {
        let mut terms = TermTable::new();
        let config = ContextConfig {
            mode: ContextMode::OneShot,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        assert!(matches!(ctx.push(), Err(VsError::OperationNotSupported)));

        let p = bool_atoms(&mut terms, 1)[0];
        ctx.assert_formula(&mut terms, p).unwrap();
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Sat);
        assert!(matches!(
            ctx.assert_formula(&mut terms, p),
            Err(VsError::OperationNotSupported)
        ));
    }

    #[test]
    fn pop_requires_a_scope() {
        let mut ctx = Context::new(ContextConfig::default());
        assert!(matches!(ctx.pop(), Err(VsError::InvalidOperation(Status::Idle))));
    }

    #[test]
    fn interrupt_before_search_is_cleared() {
        let mut terms = TermTable::new();
        let mut ctx = Context::new(ContextConfig::default());
        let p = bool_atoms(&mut terms, 1)[0];
        ctx.assert_formula(&mut terms, p).unwrap();
        ctx.stop_search();
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Sat);
    }

    #[test]
    fn blocking_clauses_enumerate_models() {
        let mut terms = TermTable::new();
        let mut ctx = Context::new(ContextConfig::default());
        let atoms = bool_atoms(&mut terms, 2);
        let f = terms.or(&atoms).unwrap();
        ctx.assert_formula(&mut terms, f).unwrap();

        let mut seen = Vec::new();
        while ctx.check(&mut terms, &SearchParams::default()).unwrap() == Status::Sat {
            let model = ctx.build_model(&terms, false).unwrap();
            let values: Vec<bool> = atoms
                .iter()
                .map(|&a| model.get_bool_value(&terms, a).unwrap())
                .collect();
            assert!(values.iter().any(|&b| b));
            assert!(!seen.contains(&values));
            seen.push(values);
            ctx.assert_blocking_clause().unwrap();
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(ctx.status(), Status::Unsat);
    }

    /// Satellite that requests a stop during its `n`-th final check.
    struct Stopper {
        handle: InterruptHandle,
        countdown: Option<u32>,
    }

    impl TheorySolver for Stopper {
        fn name(&self) -> &'static str {
            "stopper"
        }

        fn start_search(&mut self, _env: &mut TheoryEnv<'_>) {}

        fn propagate(&mut self, _env: &mut TheoryEnv<'_>) -> bool {
            false
        }

        fn final_check(&mut self, _env: &mut TheoryEnv<'_>) -> FinalCheck {
            match self.countdown {
                Some(n) if n <= 1 => {
                    self.handle.interrupt();
                    self.countdown = None;
                }
                Some(n) => self.countdown = Some(n - 1),
                None => {}
            }
            FinalCheck::Done
        }

        fn increase_decision_level(&mut self) {}

        fn backtrack(&mut self, _level: u32) {}

        fn push(&mut self) {}

        fn pop(&mut self) {}

        fn merge_scope(&mut self) {}

        fn reset(&mut self) {}
    }

    fn stop_at_final_check(ctx: &mut Context, n: u32) {
        let handle = ctx.interrupt_handle();
        ctx.registry.register(Box::new(Stopper {
            handle,
            countdown: Some(n),
        }));
    }

    fn with_mode(mode: ContextMode) -> Context {
        Context::new(ContextConfig {
            mode,
            ..Default::default()
        })
    }

    /// `forall x. p(x)` and `p(a) or q`.
    fn quantified_clause(terms: &mut TermTable) -> (Term, Term) {
        let s = terms.types_mut().new_uninterpreted();
        let pty = terms.types_mut().function_type(&[s], TypeId::BOOL).unwrap();
        let p = terms.new_uninterpreted_term(pty).unwrap();
        let a = terms.new_uninterpreted_term(s).unwrap();
        let q = terms.new_uninterpreted_term(TypeId::BOOL).unwrap();
        let x = terms.new_variable(s).unwrap();
        let px = terms.application(p, &[x]).unwrap();
        let all = terms.forall(&[x], px).unwrap();
        let pa = terms.application(p, &[a]).unwrap();
        let clause = terms.or(&[pa, q]).unwrap();
        (all, clause)
    }

    #[test]
    fn interrupted_interactive_check_is_undone() {
        let mut terms = TermTable::new();
        let mut ctx = with_mode(ContextMode::Interactive);
        let (all, clause) = quantified_clause(&mut terms);
        ctx.assert_formulas(&mut terms, &[all, clause]).unwrap();
        // The first round instantiates p(a), the second one stops.
        stop_at_final_check(&mut ctx, 2);

        let before = ctx.stats();
        let outcome = ctx.check(&mut terms, &SearchParams::default()).unwrap();
        assert_eq!(outcome, Status::Interrupted);
        assert_eq!(ctx.status(), Status::Idle);

        let after = ctx.stats();
        assert_eq!(after.num_clauses, before.num_clauses);
        assert_eq!(after.num_vars, before.num_vars);
        assert_eq!(after.quant.num_instances, 0);
        assert_eq!(ctx.base_level(), 0);
        assert_eq!(ctx.core().decision_level(), 0);
        assert_eq!(ctx.num_assertions(), 2);

        // Forgotten instances are generated again.
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Unknown);
        assert_eq!(ctx.stats().quant.num_instances, 1);
        assert!(ctx.stats().num_clauses > before.num_clauses);
    }

    #[test]
    fn interactive_check_commits_into_enclosing_scope() {
        let mut terms = TermTable::new();
        let mut ctx = with_mode(ContextMode::Interactive);
        let atoms = bool_atoms(&mut terms, 2);
        let f = terms.or(&atoms).unwrap();
        ctx.assert_formula(&mut terms, f).unwrap();

        ctx.push().unwrap();
        ctx.assert_formula(&mut terms, !atoms[0]).unwrap();
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Sat);
        assert_eq!(ctx.base_level(), 1);
        let model = ctx.build_model(&terms, false).unwrap();
        assert!(model.get_bool_value(&terms, atoms[1]).unwrap());

        ctx.pop().unwrap();
        ctx.assert_formula(&mut terms, !atoms[1]).unwrap();
        assert_eq!(ctx.check(&mut terms, &SearchParams::default()).unwrap(), Status::Sat);
        let model = ctx.build_model(&terms, false).unwrap();
        assert!(model.get_bool_value(&terms, atoms[0]).unwrap());
    }

    #[test]
    fn interrupted_status_is_sticky_until_pop() {
        let mut terms = TermTable::new();
        let mut ctx = with_mode(ContextMode::PushPop);
        let atoms = bool_atoms(&mut terms, 2);
        ctx.push().unwrap();
        let f = terms.or(&atoms).unwrap();
        ctx.assert_formula(&mut terms, f).unwrap();
        stop_at_final_check(&mut ctx, 1);

        let params = SearchParams::default();
        assert_eq!(ctx.check(&mut terms, &params).unwrap(), Status::Interrupted);
        assert_eq!(ctx.status(), Status::Interrupted);
        assert!(matches!(
            ctx.check(&mut terms, &params),
            Err(VsError::InvalidOperation(Status::Interrupted))
        ));
        assert!(matches!(
            ctx.assert_formula(&mut terms, atoms[0]),
            Err(VsError::InvalidOperation(Status::Interrupted))
        ));
        assert!(matches!(ctx.push(), Err(VsError::InvalidOperation(Status::Interrupted))));

        ctx.pop().unwrap();
        assert_eq!(ctx.status(), Status::Idle);
        assert_eq!(ctx.num_assertions(), 0);
        assert_eq!(ctx.core().decision_level(), 0);
        ctx.assert_formula(&mut terms, f).unwrap();
        assert_eq!(ctx.check(&mut terms, &params).unwrap(), Status::Sat);
    }

    #[test]
    fn interrupted_status_is_sticky_until_reset() {
        for mode in [ContextMode::OneShot, ContextMode::MultiChecks] {
            let mut terms = TermTable::new();
            let mut ctx = with_mode(mode);
            let atoms = bool_atoms(&mut terms, 2);
            let f = terms.or(&atoms).unwrap();
            ctx.assert_formula(&mut terms, f).unwrap();
            stop_at_final_check(&mut ctx, 1);

            let params = SearchParams::default();
            assert_eq!(ctx.check(&mut terms, &params).unwrap(), Status::Interrupted);
            assert!(matches!(
                ctx.check(&mut terms, &params),
                Err(VsError::InvalidOperation(Status::Interrupted))
            ));
            assert!(matches!(
                ctx.assert_formula(&mut terms, atoms[1]),
                Err(VsError::InvalidOperation(Status::Interrupted))
            ));
            assert!(matches!(ctx.pop(), Err(VsError::OperationNotSupported)));

            ctx.reset();
            assert_eq!(ctx.status(), Status::Idle, "{mode:?}");
            assert_eq!(ctx.num_assertions(), 0);
            ctx.assert_formula(&mut terms, f).unwrap();
            assert_eq!(ctx.check(&mut terms, &params).unwrap(), Status::Sat);
        }
    }
}
