use thiserror::Error;

/// The only error kinds that abort a run. Everything else (scraper failures,
/// probe timeouts, transient resolver errors) is absorbed by its component
/// and surfaced statistically.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("ArgumentError: {0}")]
    Argument(String),

    #[error("ApexUnreachable: {0}")]
    ApexUnreachable(String),
}
