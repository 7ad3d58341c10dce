use std::time::Duration;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, ErrorBroker>;

/// Declaration step that failed during topology setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStep {
    Exchange,
    Queue,
    Binding,
}

impl std::fmt::Display for TopologyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyStep::Exchange => f.write_str("declaring exchange"),
            TopologyStep::Queue => f.write_str("declaring queue"),
            TopologyStep::Binding => f.write_str("binding queue"),
        }
    }
}

/// Broker side failures. All of them are retried on the next connection.
#[derive(Error, Debug)]
pub enum ErrorBroker {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("failed to open channel: {0}")]
    Channel(#[source] BoxError),

    #[error("topology conflict while {step}: {source}")]
    TopologyConflict {
        step: TopologyStep,
        #[source]
        source: BoxError,
    },

    #[error("topology setup failed while {step}: {source}")]
    Topology {
        step: TopologyStep,
        #[source]
        source: BoxError,
    },

    #[error("failed to start consuming from {queue}: {source}")]
    Consume {
        queue: String,
        #[source]
        source: BoxError,
    },

    #[error("delivery stream failed: {0}")]
    Delivery(#[source] BoxError),

    #[error("delivery stream closed by broker")]
    StreamClosed,
}
