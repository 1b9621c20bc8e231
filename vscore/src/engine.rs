//! The engine: one term store plus the contexts and models built over it.
//!
//! Every fallible operation goes through [`Engine::record`], which copies the failure
//! into the error record. Successful operations leave the record alone, so a caller can
//! inspect the last failure after any number of later successes.

use log::{debug, info, warn};
use semver::Version;
use slotmap::{SlotMap, new_key_type};
use vsterms::{ErrorReport, GcStats, Term, TermResult, TermTable, TypeId};

use crate::{
    context::{Context, InterruptHandle, Status},
    model::Model,
    utils::{
        conf::{ContextConfig, SearchParams},
        error::{VsError, VsResult},
    },
};

new_key_type! {
    pub struct ContextKey;
    pub struct ModelKey;
}

/// ABI-stable version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct VersionInfo {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl From<VersionInfo> for Version {
    fn from(v: VersionInfo) -> Self {
        Version::new(v.major as u64, v.minor as u64, v.patch as u64)
    }
}

pub fn version() -> VersionInfo {
    let part = |s: &str| s.parse().unwrap_or(0);
    VersionInfo {
        major: part(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: part(env!("CARGO_PKG_VERSION_MINOR")),
        patch: part(env!("CARGO_PKG_VERSION_PATCH")),
    }
}

#[derive(Debug, Default)]
pub struct Engine {
    terms: TermTable,
    contexts: SlotMap<ContextKey, Context>,
    models: SlotMap<ModelKey, Model>,
    error: ErrorReport,
    message: String,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terms(&self) -> &TermTable {
        &self.terms
    }

    pub fn terms_mut(&mut self) -> &mut TermTable {
        &mut self.terms
    }

    // ---------------------------------------------------------------------------------
    // Error record
    // ---------------------------------------------------------------------------------

    pub fn error(&self) -> &ErrorReport {
        &self.error
    }

    /// Message of the last recorded failure, empty if none.
    pub fn error_message(&self) -> &str {
        &self.message
    }

    pub fn clear_error(&mut self) {
        self.error = ErrorReport::default();
        self.message.clear();
    }

    /// Store the failure of `result`, if any, and pass it through.
    pub fn record<T>(&mut self, result: VsResult<T>) -> VsResult<T> {
        if let Err(e) = &result {
            debug!("engine: {}", e);
            self.error = e.report();
            self.message = e.to_string();
        }
        result
    }

    /// Run a term-store operation through the error record.
    pub fn build<T>(&mut self, f: impl FnOnce(&mut TermTable) -> TermResult<T>) -> VsResult<T> {
        let result = f(&mut self.terms).map_err(VsError::from);
        self.record(result)
    }

    /// Run a read-only term-store query through the error record.
    pub fn query<T>(&mut self, f: impl FnOnce(&TermTable) -> TermResult<T>) -> VsResult<T> {
        let result = f(&self.terms).map_err(VsError::from);
        self.record(result)
    }

    // ---------------------------------------------------------------------------------
    // Contexts
    // ---------------------------------------------------------------------------------

    pub fn new_context(&mut self, config: ContextConfig) -> ContextKey {
        let key = self.contexts.insert(Context::new(config));
        info!("engine: new context {:?}", key);
        key
    }

    pub fn free_context(&mut self, key: ContextKey) -> VsResult<()> {
        let result = self.contexts.remove(key).map(drop).ok_or(VsError::InvalidContext);
        self.record(result)
    }

    pub fn context(&self, key: ContextKey) -> Option<&Context> {
        self.contexts.get(key)
    }

    pub fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    fn with_context<T>(
        &mut self,
        key: ContextKey,
        f: impl FnOnce(&mut Context, &mut TermTable) -> VsResult<T>,
    ) -> VsResult<T> {
        let result = match self.contexts.get_mut(key) {
            Some(ctx) => f(ctx, &mut self.terms),
            None => Err(VsError::InvalidContext),
        };
        self.record(result)
    }

    pub fn context_status(&mut self, key: ContextKey) -> VsResult<Status> {
        self.with_context(key, |ctx, _| Ok(ctx.status()))
    }

    pub fn interrupt_handle(&mut self, key: ContextKey) -> VsResult<InterruptHandle> {
        self.with_context(key, |ctx, _| Ok(ctx.interrupt_handle()))
    }

    pub fn reset_context(&mut self, key: ContextKey) -> VsResult<()> {
        self.with_context(key, |ctx, _| {
            ctx.reset();
            Ok(())
        })
    }

    pub fn enable_option(&mut self, key: ContextKey, name: &str) -> VsResult<()> {
        self.with_context(key, |ctx, _| ctx.enable_option(name))
    }

    pub fn disable_option(&mut self, key: ContextKey, name: &str) -> VsResult<()> {
        self.with_context(key, |ctx, _| ctx.disable_option(name))
    }

    pub fn assert_formula(&mut self, key: ContextKey, t: Term) -> VsResult<()> {
        self.with_context(key, |ctx, terms| ctx.assert_formula(terms, t))
    }

    pub fn assert_formulas(&mut self, key: ContextKey, ts: &[Term]) -> VsResult<()> {
        self.with_context(key, |ctx, terms| ctx.assert_formulas(terms, ts))
    }

    pub fn add_quantifier(&mut self, key: ContextKey, formula: Term, patterns: &[Term]) -> VsResult<()> {
        self.with_context(key, |ctx, terms| ctx.add_quantifier(terms, formula, patterns))
    }

    pub fn push(&mut self, key: ContextKey) -> VsResult<()> {
        self.with_context(key, |ctx, _| ctx.push())
    }

    pub fn pop(&mut self, key: ContextKey) -> VsResult<()> {
        self.with_context(key, |ctx, _| ctx.pop())
    }

    /// Run `check` with `params`, or the default parameters when `None`.
    pub fn check(&mut self, key: ContextKey, params: Option<&SearchParams>) -> VsResult<Status> {
        let defaults = SearchParams::default();
        let params = params.unwrap_or(&defaults);
        self.with_context(key, |ctx, terms| ctx.check(terms, params))
    }

    pub fn stop_search(&mut self, key: ContextKey) -> VsResult<()> {
        self.with_context(key, |ctx, _| {
            ctx.stop_search();
            Ok(())
        })
    }

    pub fn assert_blocking_clause(&mut self, key: ContextKey) -> VsResult<()> {
        self.with_context(key, |ctx, _| ctx.assert_blocking_clause())
    }

    // ---------------------------------------------------------------------------------
    // Models
    // ---------------------------------------------------------------------------------

    pub fn get_model(&mut self, key: ContextKey, keep_subst: bool) -> VsResult<ModelKey> {
        let model = self.with_context(key, |ctx, terms| ctx.build_model(terms, keep_subst))?;
        Ok(self.models.insert(model))
    }

    pub fn free_model(&mut self, key: ModelKey) -> VsResult<()> {
        let result = self.models.remove(key).map(drop).ok_or(VsError::InvalidModel);
        self.record(result)
    }

    pub fn model(&self, key: ModelKey) -> Option<&Model> {
        self.models.get(key)
    }

    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    fn with_model<T>(&mut self, key: ModelKey, f: impl FnOnce(&Model, &TermTable) -> VsResult<T>) -> VsResult<T> {
        let result = match self.models.get(key) {
            Some(model) => f(model, &self.terms),
            None => Err(VsError::InvalidModel),
        };
        self.record(result)
    }

    pub fn get_bool_value(&mut self, key: ModelKey, t: Term) -> VsResult<bool> {
        self.with_model(key, |model, terms| model.get_bool_value(terms, t))
    }

    pub fn get_bv_value(&mut self, key: ModelKey, t: Term) -> VsResult<Vec<bool>> {
        self.with_model(key, |model, terms| model.get_bv_value(terms, t))
    }

    pub fn formula_true(&mut self, key: ModelKey, f: Term) -> VsResult<bool> {
        self.with_model(key, |model, terms| model.formula_true(terms, f))
    }

    pub fn formulas_true(&mut self, key: ModelKey, fs: &[Term]) -> VsResult<bool> {
        self.with_model(key, |model, terms| model.formulas_true(terms, fs))
    }

    pub fn model_to_string(&mut self, key: ModelKey, width: usize) -> VsResult<String> {
        self.with_model(key, |model, terms| Ok(model.to_string(terms, width)))
    }

    // ---------------------------------------------------------------------------------
    // Garbage collection
    // ---------------------------------------------------------------------------------

    /// Collect every term and type unreachable from the given roots, the reference
    /// counts, the live contexts and models, and (with `keep_named`) the symbol tables.
    pub fn garbage_collect(&mut self, term_roots: &[Term], type_roots: &[TypeId], keep_named: bool) -> GcStats {
        let mut roots = term_roots.to_vec();
        for ctx in self.contexts.values() {
            ctx.gc_roots(&mut roots);
        }
        for model in self.models.values() {
            model.gc_roots(&mut roots);
        }
        let stats = self
            .terms
            .garbage_collect(roots, type_roots.iter().copied(), keep_named);
        if stats.terms_deleted > 0 || stats.types_deleted > 0 {
            info!(
                "engine: collected {} term(s) and {} type(s)",
                stats.terms_deleted, stats.types_deleted
            );
        }
        stats
    }

    /// Drop every context, model, term and type.
    pub fn reset(&mut self) {
        if !self.contexts.is_empty() {
            warn!("engine: reset with {} live context(s)", self.contexts.len());
        }
        *self = Engine::new();
    }
}

#[cfg(test)]
mod tests {
    use vsterms::ErrorCode;

    use super::*;

    #[test]
    fn failures_are_recorded_and_sticky() {
        let mut engine = Engine::new();
        let bad = engine.build(|t| t.types_mut().bv_type(0));
        assert!(bad.is_err());
        assert_eq!(engine.error().code, ErrorCode::PosIntRequired);

        // Successful calls leave the record alone.
        let ty = engine.build(|t| t.types_mut().bv_type(4)).unwrap();
        engine.build(|t| t.new_uninterpreted_term(ty)).unwrap();
        assert_eq!(engine.error().code, ErrorCode::PosIntRequired);
        assert!(!engine.error_message().is_empty());

        engine.clear_error();
        assert_eq!(engine.error().code, ErrorCode::NoError);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut engine = Engine::new();
        let ctx = engine.new_context(ContextConfig::default());
        engine.free_context(ctx).unwrap();
        assert!(matches!(engine.push(ctx), Err(VsError::InvalidContext)));
        assert_eq!(engine.error().code, ErrorCode::InternalException);
    }

    #[test]
    fn contexts_and_models_are_collection_roots() {
        let mut engine = Engine::new();
        let (p, q, r) = engine
            .build(|t| {
                Ok((
                    t.new_uninterpreted_term(TypeId::BOOL)?,
                    t.new_uninterpreted_term(TypeId::BOOL)?,
                    t.new_uninterpreted_term(TypeId::BOOL)?,
                ))
            })
            .unwrap();
        let pq = engine.build(|t| t.or2(p, q)).unwrap();
        let qr = engine.build(|t| t.or2(q, r)).unwrap();

        let ctx = engine.new_context(ContextConfig::default());
        engine.assert_formula(ctx, pq).unwrap();
        assert_eq!(engine.check(ctx, None).unwrap(), Status::Sat);
        let model = engine.get_model(ctx, false).unwrap();

        engine.garbage_collect(&[], &[], false);
        assert!(engine.terms().is_valid(pq));
        assert!(!engine.terms().is_valid(qr));
        assert!(!engine.terms().is_valid(r));

        // The model alone keeps the atoms it assigns.
        engine.free_context(ctx).unwrap();
        engine.garbage_collect(&[], &[], false);
        assert!(engine.terms().is_valid(p));
        assert!(!engine.terms().is_valid(pq));

        engine.free_model(model).unwrap();
        let stats = engine.garbage_collect(&[], &[], false);
        assert!(stats.terms_deleted >= 2);
    }

    #[test]
    fn version_matches_the_package() {
        let v: Version = version().into();
        assert_eq!(v.to_string(), env!("CARGO_PKG_VERSION"));
    }
}
