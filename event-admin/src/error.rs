use event_core::error::EventError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("event: {0}")]
    Event(#[from] EventError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("handler not found: {0}")]
    HandlerNotFound(&'static str),

    #[error("handler already registered: command={command}")]
    AlreadyRegisteredCommand { command: &'static str },

    #[error("handler already registered: query={query}")]
    AlreadyRegisteredQuery { query: &'static str },

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}
