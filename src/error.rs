use thiserror::Error;

/// Errors raised while building the operation registry
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Operation '{operation}' with signature ({signature}) already registered")]
    Conflict { operation: String, signature: String },

    #[error(
        "Operation '{operation}' takes {expected} object operands, variant ({signature}) declares {found}"
    )]
    ArityMismatch {
        operation: String,
        signature: String,
        expected: usize,
        found: usize,
    },

    #[error("Variant name '{name}' is already used by operation '{operation}'")]
    NameConflict { operation: String, name: String },

    #[error("Invalid signature: {0}")]
    Signature(#[from] SignatureError),
}

/// Errors raised while parsing signature operands
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Empty representation in signature")]
    EmptyRepresentation,

    #[error("Malformed operand '{0}'")]
    MalformedOperand(String),
}

/// Errors surfaced by `OperationContext::invoke`
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Operation '{0}' not found")]
    UnknownOperation(String),

    #[error("Operation '{operation}' expects {expected} object arguments, got {found}")]
    ArgumentCount {
        operation: String,
        expected: usize,
        found: usize,
    },

    #[error(
        "No matching signature found for operation '{operation}' (args: {}; registered: {})",
        .arguments.join(", "),
        .registered.join(" | ")
    )]
    NoCandidate {
        operation: String,
        /// Representations each argument supports, in argument order
        arguments: Vec<String>,
        /// Signatures registered for the operation
        registered: Vec<String>,
    },

    #[error("No suitable variant left for operation '{operation}': {}", .reasons.join("; "))]
    Exhausted {
        operation: String,
        reasons: Vec<String>,
    },

    #[error("Retry of operation '{operation}' is not allowed (reason: {reason})")]
    RetryNotAllowed { operation: String, reason: String },

    #[error(
        "Operation '{operation}' retry limit reached (allowed: {limit}): {}",
        .reasons.join("; ")
    )]
    RetryLimitExceeded {
        operation: String,
        limit: u32,
        /// Retry reasons collected before the limit was hit, in attempt order
        reasons: Vec<String>,
    },

    #[error(transparent)]
    VariantFailure(OperationError),
}

impl DispatchError {
    /// True when the error came out of a variant body rather than dispatch
    pub fn is_variant_failure(&self) -> bool {
        matches!(self, DispatchError::VariantFailure(_))
    }
}

/// Non-retryable failure raised by a variant body
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Field error: {0}")]
    Field(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error("Nested call failed: {0}")]
    Dispatch(Box<DispatchError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by data objects when a representation is accessed
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("Representation '{requested}' is not available (object provides: {available})")]
    Representation { requested: String, available: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DispatchError> for OperationError {
    fn from(err: DispatchError) -> Self {
        match err {
            // Keep nested variant failures flat
            DispatchError::VariantFailure(inner) => inner,
            other => OperationError::Dispatch(Box::new(other)),
        }
    }
}

/// Convert anyhow::Error to OperationError
impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        OperationError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to OperationError
impl From<rusqlite::Error> for OperationError {
    fn from(err: rusqlite::Error) -> Self {
        OperationError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(err: serde_json::Error) -> Self {
        OperationError::Argument(format!("Invalid operation parameters: {}", err))
    }
}

impl From<rusqlite::Error> for ObjectError {
    fn from(err: rusqlite::Error) -> Self {
        ObjectError::Database(err.to_string())
    }
}
