use strum::{Display, FromRepr, IntoStaticStr};
use thiserror::Error;

use crate::{terms::Term, types::TypeId};

/// Stable numeric error codes shared by every layer of the engine.
///
/// The values are part of the C interface and must never be renumbered.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromRepr, Display, IntoStaticStr)]
pub enum ErrorCode {
    #[default]
    NoError = 0,

    // Term and type construction
    InvalidType = 1,
    InvalidTerm = 2,
    InvalidBitExtract = 12,
    MaxBvSizeExceeded = 15,
    DegreeOverflow = 16,
    PosIntRequired = 18,
    FunctionRequired = 21,
    VariableRequired = 23,
    BitvectorRequired = 25,
    WrongNumberOfArguments = 27,
    TypeMismatch = 28,
    IncompatibleTypes = 29,
    DuplicateVariable = 30,
    IncompatibleBvSizes = 31,
    BvTypeRequired = 38,
    BadTermDecref = 39,
    BadTypeDecref = 40,
    InvalidTermOp = 41,

    // Contexts
    CtxFreeVarInFormula = 300,
    CtxFormulaNotSupported = 301,
    CtxQuantifierNotTopLevel = 302,
    CtxInvalidOperation = 400,
    CtxOperationNotSupported = 401,
    CtxInvalidConfig = 500,
    CtxUnknownParameter = 501,
    CtxInvalidParameterValue = 502,

    // Models
    EvalUnknownTerm = 600,
    EvalFreeVarInTerm = 601,
    EvalQuantifier = 602,
    EvalFailed = 605,

    OutputError = 9000,
    InternalException = 9999,
}

/// Snapshot of the last failure: an error code plus the offending operands.
///
/// The record keeps its content until the next failure or until it is explicitly
/// cleared; successful operations do not touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub term1: Option<Term>,
    pub type1: Option<TypeId>,
    pub term2: Option<Term>,
    pub type2: Option<TypeId>,
    pub badval: i64,
}

impl ErrorReport {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    pub fn with_term1(mut self, term: Term) -> Self {
        self.term1 = Some(term);
        self
    }

    pub fn with_type1(mut self, ty: TypeId) -> Self {
        self.type1 = Some(ty);
        self
    }

    pub fn with_term2(mut self, term: Term) -> Self {
        self.term2 = Some(term);
        self
    }

    pub fn with_type2(mut self, ty: TypeId) -> Self {
        self.type2 = Some(ty);
        self
    }

    pub fn with_badval(mut self, badval: i64) -> Self {
        self.badval = badval;
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TermError {
    #[error("invalid term {0:?}")]
    InvalidTerm(Term),

    #[error("invalid type {0:?}")]
    InvalidType(TypeId),

    #[error("term {term:?} does not have the expected type {expected:?}")]
    TypeMismatch { term: Term, expected: TypeId },

    #[error("incompatible types: {left:?} has type {left_type:?} but {right:?} has type {right_type:?}")]
    IncompatibleTypes {
        left: Term,
        left_type: TypeId,
        right: Term,
        right_type: TypeId,
    },

    #[error("term {0:?} is not a bitvector")]
    BitvectorRequired(Term),

    #[error("type {0:?} is not a bitvector type")]
    BvTypeRequired(TypeId),

    #[error("bitvector sizes differ between {left:?} and {right:?}")]
    IncompatibleBvSizes {
        left: Term,
        left_type: TypeId,
        right: Term,
        right_type: TypeId,
    },

    #[error("a positive integer is required (got {0})")]
    PosIntRequired(u64),

    #[error("bitvector size {0} exceeds the maximal size")]
    MaxBvSizeExceeded(u64),

    #[error("degree {0} is too large")]
    DegreeOverflow(u64),

    #[error("term {0:?} is not a function")]
    FunctionRequired(Term),

    #[error("function {function:?} expects {expected} arguments, got {got}")]
    WrongNumberOfArguments {
        function: Term,
        expected: u32,
        got: u32,
    },

    #[error("term {0:?} is not a variable")]
    VariableRequired(Term),

    #[error("variable {0:?} occurs twice")]
    DuplicateVariable(Term),

    #[error("bit index {index} is out of range for {term:?}")]
    InvalidBitExtract { term: Term, index: u32 },

    #[error("operation is not applicable to term {0:?}")]
    InvalidTermOp(Term),

    #[error("reference count of term {0:?} is already zero")]
    BadTermDecref(Term),

    #[error("reference count of type {0:?} is already zero")]
    BadTypeDecref(TypeId),
}

impl TermError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TermError::InvalidTerm(_) => ErrorCode::InvalidTerm,
            TermError::InvalidType(_) => ErrorCode::InvalidType,
            TermError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            TermError::IncompatibleTypes { .. } => ErrorCode::IncompatibleTypes,
            TermError::BitvectorRequired(_) => ErrorCode::BitvectorRequired,
            TermError::BvTypeRequired(_) => ErrorCode::BvTypeRequired,
            TermError::IncompatibleBvSizes { .. } => ErrorCode::IncompatibleBvSizes,
            TermError::PosIntRequired(_) => ErrorCode::PosIntRequired,
            TermError::MaxBvSizeExceeded(_) => ErrorCode::MaxBvSizeExceeded,
            TermError::DegreeOverflow(_) => ErrorCode::DegreeOverflow,
            TermError::FunctionRequired(_) => ErrorCode::FunctionRequired,
            TermError::WrongNumberOfArguments { .. } => ErrorCode::WrongNumberOfArguments,
            TermError::VariableRequired(_) => ErrorCode::VariableRequired,
            TermError::DuplicateVariable(_) => ErrorCode::DuplicateVariable,
            TermError::InvalidBitExtract { .. } => ErrorCode::InvalidBitExtract,
            TermError::InvalidTermOp(_) => ErrorCode::InvalidTermOp,
            TermError::BadTermDecref(_) => ErrorCode::BadTermDecref,
            TermError::BadTypeDecref(_) => ErrorCode::BadTypeDecref,
        }
    }

    /// Fill the error record for this failure.
    pub fn report(&self) -> ErrorReport {
        let report = ErrorReport::new(self.code());
        match *self {
            TermError::InvalidTerm(t)
            | TermError::BitvectorRequired(t)
            | TermError::FunctionRequired(t)
            | TermError::VariableRequired(t)
            | TermError::DuplicateVariable(t)
            | TermError::InvalidTermOp(t)
            | TermError::BadTermDecref(t) => report.with_term1(t),
            TermError::InvalidType(ty) | TermError::BvTypeRequired(ty) | TermError::BadTypeDecref(ty) => {
                report.with_type1(ty)
            }
            TermError::TypeMismatch { term, expected } => report.with_term1(term).with_type1(expected),
            TermError::IncompatibleTypes {
                left,
                left_type,
                right,
                right_type,
            }
            | TermError::IncompatibleBvSizes {
                left,
                left_type,
                right,
                right_type,
            } => report
                .with_term1(left)
                .with_type1(left_type)
                .with_term2(right)
                .with_type2(right_type),
            TermError::PosIntRequired(v) | TermError::MaxBvSizeExceeded(v) | TermError::DegreeOverflow(v) => {
                report.with_badval(v as i64)
            }
            TermError::WrongNumberOfArguments { function, got, .. } => {
                report.with_term1(function).with_badval(got as i64)
            }
            TermError::InvalidBitExtract { term, index } => report.with_term1(term).with_badval(index as i64),
        }
    }
}

pub type TermResult<T> = Result<T, TermError>;
