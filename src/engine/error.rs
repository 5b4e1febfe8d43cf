/// Machine-readable failure class of a booking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    InvalidInput,
    CategoryNotFound,
    CapacityExhausted,
    BookingConflict,
    Infrastructure,
}

impl FailureReason {
    pub fn code(self) -> &'static str {
        match self {
            FailureReason::InvalidInput => "invalid_input",
            FailureReason::CategoryNotFound => "category_not_found",
            FailureReason::CapacityExhausted => "capacity_exhausted",
            FailureReason::BookingConflict => "booking_conflict",
            FailureReason::Infrastructure => "infrastructure",
        }
    }

    /// Whether re-issuing the same request unchanged can succeed right away.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureReason::BookingConflict | FailureReason::Infrastructure)
    }
}

/// Failure of the backing store itself, independent of allocation logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
    Timeout,
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Timeout => write!(f, "store timed out"),
            StoreError::Wal(msg) => write!(f, "WAL error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidInput(&'static str),
    CategoryNotFound(String),
    CapacityExhausted { category: String, total: usize },
    /// The chosen doctor filled up between selection and the conditional update.
    BookingConflict(String),
    AlreadyExists(String),
    InvalidResource(&'static str),
    LimitExceeded(&'static str),
    Store(StoreError),
}

impl EngineError {
    pub fn reason(&self) -> FailureReason {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::AlreadyExists(_)
            | EngineError::InvalidResource(_)
            | EngineError::LimitExceeded(_) => FailureReason::InvalidInput,
            EngineError::CategoryNotFound(_) => FailureReason::CategoryNotFound,
            EngineError::CapacityExhausted { .. } => FailureReason::CapacityExhausted,
            EngineError::BookingConflict(_) => FailureReason::BookingConflict,
            EngineError::Store(_) => FailureReason::Infrastructure,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::CategoryNotFound(category) => {
                write!(f, "no doctors found for specialization: \"{category}\"")
            }
            EngineError::CapacityExhausted { category, total } => write!(
                f,
                "all {total} doctor(s) for \"{category}\" are fully booked for today"
            ),
            EngineError::BookingConflict(id) => {
                write!(f, "booking conflict: doctor {id} was just fully booked, retry")
            }
            EngineError::AlreadyExists(id) => write!(f, "doctor already exists: {id}"),
            EngineError::InvalidResource(msg) => write!(f, "invalid doctor: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}
