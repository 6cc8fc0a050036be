use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Frame reused: page frame was recycled while a guard was live")]
    FrameReused,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Only frame reuse is worth retrying; everything else is either fatal
    /// or already absorbed by the subsystem that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::FrameReused)
    }
}

impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::OutOfMemory(s) => DbError::OutOfMemory(s.clone()),
            DbError::FrameReused => DbError::FrameReused,
            DbError::InvalidArgument(s) => DbError::InvalidArgument(s.clone()),
            DbError::Buffer(s) => DbError::Buffer(s.clone()),
            DbError::Memory(s) => DbError::Memory(s.clone()),
            DbError::Storage(s) => DbError::Storage(s.clone()),
            DbError::InvalidState(s) => DbError::InvalidState(s.clone()),
            DbError::PageNotFound(s) => DbError::PageNotFound(s.clone()),
            DbError::Internal(s) => DbError::Internal(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(DbError::FrameReused.is_retryable());
        assert!(!DbError::OutOfMemory("budget exhausted".into()).is_retryable());
        assert!(!DbError::InvalidArgument("bad size".into()).is_retryable());
    }
}
