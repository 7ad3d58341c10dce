use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_log::log::SetLoggerError;

pub type Result<T> = std::result::Result<T, ErrorConfig>;

#[derive(Error, Debug)]
pub enum ErrorConfig {
    #[error(transparent)]
    TracingLog(#[from] SetLoggerError),

    #[error(transparent)]
    Subscriber(#[from] SetGlobalDefaultError),

    #[error("at least one broker url is required")]
    NoEndpoints,

    #[error("invalid broker url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: &'static str },
}
