use thiserror::Error;
use vsterms::{ErrorCode, ErrorReport, Term, TermError};

use crate::context::Status;

#[derive(Debug, Error)]
pub enum VsError {
    #[error(transparent)]
    Term(#[from] TermError),

    #[error("formula {0:?} contains a free variable")]
    FreeVarInFormula(Term),

    #[error("formula {0:?} is not supported by the context")]
    FormulaNotSupported(Term),

    #[error("quantifier {0:?} does not occur at the top level of an assertion")]
    QuantifierNotTopLevel(Term),

    #[error("operation is not allowed while the context is {0}")]
    InvalidOperation(Status),

    #[error("operation is not supported by the context configuration")]
    OperationNotSupported,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid value '{value}' for parameter '{name}'")]
    InvalidParameterValue { name: String, value: String },

    #[error("term {0:?} has no value in the model")]
    EvalUnknownTerm(Term),

    #[error("term {0:?} contains a free variable")]
    EvalFreeVar(Term),

    #[error("term {0:?} contains a quantifier")]
    EvalQuantifier(Term),

    #[error("evaluation of {0:?} failed")]
    EvalFailed(Term),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("the context handle is no longer valid")]
    InvalidContext,

    #[error("the model handle is no longer valid")]
    InvalidModel,
}

impl VsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VsError::Term(e) => e.code(),
            VsError::FreeVarInFormula(_) => ErrorCode::CtxFreeVarInFormula,
            VsError::FormulaNotSupported(_) => ErrorCode::CtxFormulaNotSupported,
            VsError::QuantifierNotTopLevel(_) => ErrorCode::CtxQuantifierNotTopLevel,
            VsError::InvalidOperation(_) => ErrorCode::CtxInvalidOperation,
            VsError::OperationNotSupported => ErrorCode::CtxOperationNotSupported,
            VsError::InvalidConfig(_) | VsError::ConfigParse(_) => ErrorCode::CtxInvalidConfig,
            VsError::UnknownParameter(_) => ErrorCode::CtxUnknownParameter,
            VsError::InvalidParameterValue { .. } => ErrorCode::CtxInvalidParameterValue,
            VsError::EvalUnknownTerm(_) => ErrorCode::EvalUnknownTerm,
            VsError::EvalFreeVar(_) => ErrorCode::EvalFreeVarInTerm,
            VsError::EvalQuantifier(_) => ErrorCode::EvalQuantifier,
            VsError::EvalFailed(_) => ErrorCode::EvalFailed,
            VsError::Output(_) => ErrorCode::OutputError,
            VsError::InvalidContext | VsError::InvalidModel => ErrorCode::InternalException,
        }
    }

    pub fn report(&self) -> ErrorReport {
        match self {
            VsError::Term(e) => e.report(),
            VsError::FreeVarInFormula(t)
            | VsError::FormulaNotSupported(t)
            | VsError::QuantifierNotTopLevel(t)
            | VsError::EvalUnknownTerm(t)
            | VsError::EvalFreeVar(t)
            | VsError::EvalQuantifier(t)
            | VsError::EvalFailed(t) => ErrorReport::new(self.code()).with_term1(*t),
            _ => ErrorReport::new(self.code()),
        }
    }
}

pub type VsResult<T> = Result<T, VsError>;
