/// Result type for gzip middleware construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building the middleware.
///
/// Failures while writing a response body are reported as [`std::io::Error`]
/// by the writer that hit them and are never wrapped in this type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The compression level is outside `-1..=9`.
    #[error("invalid gzip compression level {0}: expected a value between -1 and 9")]
    InvalidLevel(i32),
}
