use thiserror::Error;

/// Errors surfaced by a [super::LanguageModel] implementation.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Model error: {0}")]
    Other(String),
}
