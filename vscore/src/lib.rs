//! Incremental decision engine of the Vesta workspace.
//!
//! Formulas built in a [`vsterms::TermTable`] are asserted into a [`Context`], which
//! translates them into clauses for a CDCL search core and into atoms for the theory
//! plugins (congruence closure and quantifier instantiation). The [`Engine`] owns the
//! term store, the contexts, the models and the last-error record, and is the value the
//! C interface wraps.

pub mod context;
pub mod engine;
pub mod model;
pub mod search;
pub mod theory;
pub mod utils;
pub mod variable_db;

pub use context::{Context, ContextStats, InterruptHandle, Status};
pub use engine::{ContextKey, Engine, ModelKey, VersionInfo, version};
pub use model::{Model, Value};
pub use utils::{
    conf::{ContextConfig, ContextMode, ContextOptions, SearchParams},
    error::{VsError, VsResult},
};
pub use variable_db::{Variable, VariableDb};

pub extern crate vsterms;
