use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Duplicate call id: {0}")]
    DuplicateCallId(String),
}
