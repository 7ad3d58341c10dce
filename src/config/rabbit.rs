use std::time::Duration;

use lapin::uri::AMQPUri;
use tracing::{debug, info, warn};

use crate::config::cli::Cli;
use crate::config::error::{ErrorConfig, Result};
use crate::rabbitmq::connection::{Endpoints, redact};
use crate::rabbitmq::topology::{ExchangeKind, TopologyDescriptor};

#[derive(Debug, Clone)]
pub struct RabbitMQConfig {
    pub urls: Vec<String>,
    pub exchange_name: String,
    pub exchange_kind: ExchangeKind,
    pub queue_name: String,
    pub lazy: bool,
    pub routing_key: String,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

impl RabbitMQConfig {
    /// Validate the broker related flags
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        info!("Loading RabbitMQ configuration");

        let urls: Vec<String> = cli
            .urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(ErrorConfig::NoEndpoints);
        }
        for url in &urls {
            debug!("Validating broker url {}", redact(url));
            url.parse::<AMQPUri>()
                .map_err(|reason| ErrorConfig::InvalidUrl {
                    url: redact(url),
                    reason,
                })?;
        }

        if cli.exchange.is_empty() && !cli.routing_key.is_empty() {
            warn!(
                "Routing key {} has no effect without an exchange",
                cli.routing_key
            );
        }

        Ok(Self {
            urls,
            exchange_name: cli.exchange.clone(),
            exchange_kind: cli.kind,
            queue_name: cli.queue.clone(),
            lazy: cli.lazy,
            routing_key: cli.routing_key.clone(),
            reconnect_interval: cli.interval,
            connect_timeout: cli.timeout,
        })
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::new(self.urls.clone()).ok_or(ErrorConfig::NoEndpoints)
    }

    pub fn topology(&self) -> TopologyDescriptor {
        let topology = TopologyDescriptor::new(&self.queue_name, self.lazy);
        if self.exchange_name.is_empty() {
            topology
        } else {
            topology.with_exchange(&self.exchange_name, self.exchange_kind, &self.routing_key)
        }
    }
}
