//! Boolean search core: CDCL over the variables of the variable database.

mod cdcl;
mod literal;

pub use cdcl::{ClauseRef, ConflictAnalysis, SearchCore, SearchStats};
pub use literal::{LBool, Literal};
