use thiserror::Error;

use crate::config::error::ErrorConfig;
use crate::output::error::ErrorOutput;
use crate::rabbitmq::error::ErrorBroker;
use crate::verify::ErrorVerify;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ErrorConfig),

    #[error(transparent)]
    Broker(#[from] ErrorBroker),

    #[error(transparent)]
    Verify(#[from] ErrorVerify),

    #[error(transparent)]
    Output(#[from] ErrorOutput),
}

impl Error {
    /// Process exit code for this failure: 1 for configuration problems, 2 for everything
    /// that happens once the consumer is running.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 1,
            _ => 2,
        }
    }
}
