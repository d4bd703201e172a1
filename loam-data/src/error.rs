/// Errors that can occur in the data layer.
#[derive(Debug)]
pub enum DataError {
    /// No result where one was required.
    NotFound(String),
    /// The backend driver reported a failure.
    Database(Box<dyn std::error::Error + Send + Sync>),
    /// A raw value could not be converted to the declared result type.
    Conversion(String),
    /// A raw result document did not match any recognized shape.
    UnrecognizedResult(String),
    /// An internal invariant was violated. Signals a misconfiguration of the
    /// composition layer, not bad user data; never retryable.
    IllegalState(String),
    /// A version-checked update or delete matched nothing, meaning the entity
    /// was modified concurrently since it was read.
    OptimisticLock(String),
    Other(String),
}

impl DataError {
    /// Construct a `Database` variant from any error type.
    ///
    /// Used by backend crates to wrap driver-specific errors.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        DataError::IllegalState(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        DataError::Conversion(msg.into())
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DataError::Database(err) => write!(f, "Database error: {err}"),
            DataError::Conversion(msg) => write!(f, "Conversion error: {msg}"),
            DataError::UnrecognizedResult(msg) => write!(f, "Unrecognized result: {msg}"),
            DataError::IllegalState(msg) => write!(f, "Illegal state: {msg}"),
            DataError::OptimisticLock(msg) => write!(f, "Optimistic lock failure: {msg}"),
            DataError::Other(msg) => write!(f, "Data error: {msg}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
