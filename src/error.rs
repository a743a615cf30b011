use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructDbError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid store format: {0}")]
    InvalidFormat(String),
    #[error("Out-of-range reference: {message}")]
    OutOfRange { message: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, StructDbError>;

// Helper conversions
impl From<std::io::Error> for StructDbError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}
impl From<walkdir::Error> for StructDbError {
    fn from(e: walkdir::Error) -> Self { Self::Io(e.to_string()) }
}
impl From<config::ConfigError> for StructDbError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for StructDbError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}

impl StructDbError {
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange { message: message.into() }
    }
}
