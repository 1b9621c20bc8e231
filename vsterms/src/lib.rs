//! Persistent term store of the Vesta engine.
//!
//! Terms and types are hash-consed into dense tables: structurally equal objects share
//! one identity. The store also keeps the symbol tables, the reference counts used as
//! garbage-collection roots, and the collector itself.

pub mod error;
pub mod gc;
pub mod names;
pub mod oom;
pub mod pretty;
pub mod terms;
pub mod types;

pub use error::{ErrorCode, ErrorReport, TermError, TermResult};
pub use gc::GcStats;
pub use terms::{Term, TermConstructor, TermDesc, TermKind, TermTable};
pub use types::{TypeDesc, TypeId, TypeKind, TypeTable};
