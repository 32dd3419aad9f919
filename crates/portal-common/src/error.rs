/// Error types shared by the results bot crates.
///
/// These cover failures of the HTTP plumbing every external collaborator goes through.
/// Application-specific errors are defined in the bot crate and wrap `CommonError`
/// via `#[from]`.
use crate::http::HttpClientError;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("http error: {0}")]
    Http(#[from] HttpClientError),

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}
