//! Variable database: the bridge between terms and decision variables.
//!
//! Each positive term that needs a decision slot receives a dense [`Variable`] index.
//! Indices double as positions in the search core's per-variable tables, so freed
//! indices are recycled (most recently freed first) before the table grows.
//!
//! Index 0 is the null variable. It is never allocated and never recycled.

use std::fmt;

use bit_set::BitSet;
use log::trace;
use rustc_hash::FxHashMap;
use vsterms::{Term, TermTable, TypeId, TypeKind, oom};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(u32);

impl Variable {
    pub const NULL: Variable = Variable(0);

    pub fn from_index(index: usize) -> Self {
        Variable(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Observer of variable creation.
pub trait NewVariableListener: Send {
    fn new_variable(&mut self, var: Variable, term: Term);
}

impl<F: FnMut(Variable, Term) + Send> NewVariableListener for F {
    fn new_variable(&mut self, var: Variable, term: Term) {
        self(var, term)
    }
}

/// Reachability marks handed to [`VariableDb::gc_sweep`].
#[derive(Debug, Clone, Default)]
pub struct GcInfo {
    marked: BitSet,
    count: usize,
}

impl GcInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, var: Variable) {
        if self.marked.insert(var.index()) {
            self.count += 1;
        }
    }

    pub fn is_marked(&self, var: Variable) -> bool {
        self.marked.contains(var.index())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub struct VariableDb {
    variable_to_term: Vec<Option<Term>>,
    term_to_variable: FxHashMap<Term, Variable>,
    free_list: Vec<Variable>,
    listeners: Vec<Box<dyn NewVariableListener>>,
}

impl fmt::Debug for VariableDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDb")
            .field("size", &self.size())
            .field("free", &self.free_list.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for VariableDb {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableDb {
    pub fn new() -> Self {
        Self {
            variable_to_term: vec![None],
            term_to_variable: FxHashMap::default(),
            free_list: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Variable of `term`, allocated on first request.
    ///
    /// A new variable is announced to every listener, in registration order, before
    /// this function returns.
    pub fn get_variable(&mut self, term: Term) -> Variable {
        assert!(term.is_positive(), "variables are only attached to positive terms");
        if let Some(&var) = self.term_to_variable.get(&term) {
            return var;
        }

        let var = match self.free_list.pop() {
            Some(var) => {
                self.variable_to_term[var.index()] = Some(term);
                var
            }
            None => {
                oom::reserve(&mut self.variable_to_term, 1);
                self.variable_to_term.push(Some(term));
                Variable::from_index(self.variable_to_term.len() - 1)
            }
        };
        self.term_to_variable.insert(term, var);

        for listener in self.listeners.iter_mut() {
            listener.new_variable(var, term);
        }
        var
    }

    /// Lookup without allocation; [`Variable::NULL`] when `term` has no variable.
    pub fn get_variable_if_exists(&self, term: Term) -> Variable {
        self.term_to_variable
            .get(&term)
            .copied()
            .unwrap_or(Variable::NULL)
    }

    pub fn has_variable(&self, term: Term) -> bool {
        self.term_to_variable.contains_key(&term)
    }

    pub fn is_variable(&self, var: Variable) -> bool {
        matches!(self.variable_to_term.get(var.index()), Some(Some(_)))
    }

    /// Term of a live variable.
    pub fn get_term(&self, var: Variable) -> Term {
        match self.variable_to_term.get(var.index()) {
            Some(Some(term)) => *term,
            _ => panic!("{} is not a live variable", var),
        }
    }

    pub fn add_new_variable_listener(&mut self, listener: impl NewVariableListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Number of live variables.
    pub fn size(&self) -> usize {
        self.variable_to_term.len() - self.free_list.len() - 1
    }

    /// One past the largest index ever allocated.
    pub fn capacity(&self) -> usize {
        self.variable_to_term.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, Term)> + '_ {
        self.variable_to_term
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|t| (Variable::from_index(i), t)))
    }

    pub fn is_boolean(&self, var: Variable, terms: &TermTable) -> bool {
        terms.ty(self.get_term(var)) == TypeId::BOOL
    }

    pub fn type_kind(&self, var: Variable, terms: &TermTable) -> Option<TypeKind> {
        terms.types().kind(terms.ty(self.get_term(var)))
    }

    /// Remove every live variable not marked in `gc`. Indices are scanned in increasing
    /// order and pushed on the free list, so the last one removed is reused first.
    ///
    /// Returns the removed variables.
    pub fn gc_sweep(&mut self, gc: &GcInfo) -> Vec<Variable> {
        let expected = self.size() - gc.len();
        let mut removed = Vec::with_capacity(expected);

        for i in 1..self.variable_to_term.len() {
            if removed.len() == expected {
                break;
            }
            let var = Variable::from_index(i);
            if gc.is_marked(var) {
                continue;
            }
            if let Some(term) = self.variable_to_term[i].take() {
                trace!("Removing variable {} (term {:?})", var, term);
                self.term_to_variable.remove(&term);
                self.free_list.push(var);
                removed.push(var);
            }
        }

        assert_eq!(removed.len(), expected, "marks must only cover live variables");
        removed
    }

    pub fn print_variable(&self, f: &mut impl fmt::Write, var: Variable, terms: &TermTable) -> fmt::Result {
        write!(f, "{} := {}", var, terms.term_to_string(self.get_term(var), 80))
    }

    pub fn print(&self, f: &mut impl fmt::Write, terms: &TermTable) -> fmt::Result {
        for (var, _) in self.iter() {
            self.print_variable(f, var, terms)?;
            writeln!(f)?;
        }
        Ok(())
    }
}
