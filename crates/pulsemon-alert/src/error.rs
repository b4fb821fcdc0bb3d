use pulsemon_storage::error::StorageError;

/// Errors raised while evaluating a single rule.
///
/// Every variant maps to one of three reporting kinds via [`EvalError::kind`]:
/// validation (malformed rule or data), reference (unresolvable metric),
/// or persistence (storage failure). A lost dedup race is not an
/// error; the store reports it as
/// [`InsertOutcome::DuplicateInWindow`](pulsemon_storage::InsertOutcome)
/// and the engine treats it as a suppression.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The stored rule is malformed: bad severity, unparsable condition
    /// or actions JSON, empty composite, zero-day pattern.
    #[error("invalid rule: {reason}")]
    InvalidRule { reason: String },

    /// Condition nesting exceeds the configured depth cap.
    #[error("condition nesting exceeds {max} levels")]
    ExpressionTooDeep { max: usize },

    /// The observation's unit disagrees with the metric's canonical unit.
    #[error("unit mismatch for metric '{metric}': observed '{observed}', expected '{expected}'")]
    UnitMismatch {
        metric: String,
        observed: String,
        expected: String,
    },

    /// A threshold condition needs a numeric value but the observation
    /// carries a structured payload.
    #[error("observation {observation_id} has no numeric value")]
    NonNumericValue { observation_id: String },

    /// A missed-assessment condition was evaluated without a configured
    /// cadence.
    #[error("assessment cadence not configured for missed-assessment condition")]
    CadenceNotConfigured,

    /// A threshold condition references a metric key absent from the
    /// registry.
    #[error("unknown metric key '{0}'")]
    UnknownMetric(String),

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Coarse error classification used when reporting per-rule failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Reference,
    Persistence,
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::InvalidRule { .. }
            | EvalError::ExpressionTooDeep { .. }
            | EvalError::UnitMismatch { .. }
            | EvalError::NonNumericValue { .. }
            | EvalError::CadenceNotConfigured => ErrorKind::Validation,
            EvalError::UnknownMetric(_) => ErrorKind::Reference,
            EvalError::Storage(_) => ErrorKind::Persistence,
        }
    }
}

/// Convenience `Result` alias for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;
