use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or past interval.
    Validation(&'static str),
    /// Suspended user or insufficient role.
    Permission(&'static str),
    /// Overlaps the given active booking.
    Conflict(Ulid),
    NotFound(Ulid),
    /// Illegal transition, e.g. cancelling a started booking.
    InvalidState(&'static str),
    AlreadyExists(Ulid),
    /// Per-user daily bookings for the room already at the limit.
    ThresholdExceeded(usize),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::Permission(msg) => write!(f, "permission denied: {msg}"),
            EngineError::Conflict(id) => {
                write!(f, "the booking time conflicts with existing booking {id}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::ThresholdExceeded(limit) => {
                write!(f, "booking threshold of {limit} per room per day reached")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
