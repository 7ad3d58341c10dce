use std::future::Future;

use clap::ValueEnum;
use tracing::{debug, info, warn};

use crate::rabbitmq::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeBinding {
    name: String,
    kind: ExchangeKind,
    routing_key: String,
}

impl ExchangeBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Key actually used for the binding; fanout exchanges ignore routing keys.
    pub fn binding_key(&self) -> &str {
        match self.kind {
            ExchangeKind::Fanout => "",
            _ => &self.routing_key,
        }
    }
}

/// Queue and optional exchange to consume from. Fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    queue: String,
    lazy: bool,
    exchange: Option<ExchangeBinding>,
}

impl TopologyDescriptor {
    /// An empty `queue` lets the broker pick a name.
    pub fn new(queue: &str, lazy: bool) -> Self {
        Self {
            queue: queue.to_string(),
            lazy,
            exchange: None,
        }
    }

    pub fn with_exchange(self, name: &str, kind: ExchangeKind, routing_key: &str) -> Self {
        Self {
            exchange: Some(ExchangeBinding {
                name: name.to_string(),
                kind,
                routing_key: routing_key.to_string(),
            }),
            ..self
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn lazy(&self) -> bool {
        self.lazy
    }

    pub fn exchange(&self) -> Option<&ExchangeBinding> {
        self.exchange.as_ref()
    }
}

/// Declaration primitives of a broker channel.
pub trait TopologyChannel {
    fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> impl Future<Output = Result<()>>;

    /// Returns the queue name, which the broker generates when `name` is empty.
    fn declare_queue(&self, name: &str, lazy: bool) -> impl Future<Output = Result<String>>;

    fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> impl Future<Output = Result<()>>;
}

/// Declare exchange, queue and binding, in that order. Returns the queue name to consume.
pub async fn bind<T: TopologyChannel>(channel: &T, topology: &TopologyDescriptor) -> Result<String> {
    if let Some(exchange) = topology.exchange() {
        channel.declare_exchange(exchange.name(), exchange.kind()).await?;
        debug!("Declared {:?} exchange {}", exchange.kind(), exchange.name());
    }

    let queue = channel.declare_queue(topology.queue(), topology.lazy()).await?;
    debug!("Declared queue {} (lazy: {})", queue, topology.lazy());

    if let Some(exchange) = topology.exchange() {
        if exchange.kind() == ExchangeKind::Fanout && !exchange.routing_key().is_empty() {
            warn!(
                "Routing key {} ignored for fanout exchange {}",
                exchange.routing_key(),
                exchange.name()
            );
        }
        channel
            .bind_queue(&queue, exchange.name(), exchange.binding_key())
            .await?;
        debug!(
            "Bound queue {} to exchange {} with routing key {:?}",
            queue,
            exchange.name(),
            exchange.binding_key()
        );
    }

    info!("Topology ready, consuming from {}", queue);
    Ok(queue)
}
