//! Unified error types.

use thiserror::Error;

/// The error type returned by corvid's fallible server operations.
///
/// Application-level failures (404, 413, etc.) are expressed as HTTP
/// responses, not as `Error`s. This type surfaces infrastructure failures:
/// a bad listen address, binding to a port, or accepting a connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address `{addr}`: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Boxed error a handler or middleware may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a handler or middleware produced once it finished.
///
/// Implemented for `()` and for `Result<(), E>`, so both of these are valid
/// handlers:
///
/// ```rust
/// use corvid::{Request, Response};
///
/// async fn plain(_req: Request, res: Response) {
///     res.text("ok");
/// }
///
/// async fn fallible(req: Request, res: Response) -> Result<(), std::num::ParseIntError> {
///     let n: u32 = req.param("n").unwrap_or("0").parse()?;
///     res.text(format!("{}", n * 2));
///     Ok(())
/// }
/// ```
///
/// An `Err` is logged and, if nothing was written yet, answered with `500`.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<(), BoxError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> IntoOutcome for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}
