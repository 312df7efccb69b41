/// Result alias that carries the custom [`LightdeskError`] type.
pub type Result<T> = std::result::Result<T, LightdeskError>;

/// Common error type for the core crate. Most failure paths in the routing
/// and compositing pipeline degrade gracefully instead of erroring; this type
/// covers the genuinely exceptional cases such as poisoned service state.
#[derive(Debug, thiserror::Error)]
pub enum LightdeskError {
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialization errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LightdeskError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for LightdeskError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LightdeskError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
