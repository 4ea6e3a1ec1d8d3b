use failure::Fail;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum Error {
    /// A precondition on the inputs was violated. Reported before any computation starts
    #[fail(display = "invalid input: {}", _0)]
    InvalidInput(String),
    /// Every cell of the correlation surface was exactly zero, so the reported offset and
    /// identity carry no information
    #[fail(display = "correlation surface is identically zero")]
    NumericDegenerate,
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] std::io::Error),
    #[fail(display = "malformed JSON: {}", _0)]
    Json(#[cause] serde_json::Error),
    #[fail(display = "parse error: {}", _0)]
    Parse(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

/// Shorthand used by the validation code
pub(crate) fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::InvalidInput(msg.into()))
}
