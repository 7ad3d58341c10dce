use futures::StreamExt;
use futures::stream::BoxStream;
use lapin::{
    Channel, Connection, ConnectionProperties, ErrorKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, warn};

use crate::delivery::Delivery;
use crate::rabbitmq::connection::{BrokerConnection, Connector, redact};
use crate::rabbitmq::consumer::DeliveryChannel;
use crate::rabbitmq::error::{ErrorBroker, Result, TopologyStep};
use crate::rabbitmq::topology::{ExchangeKind, TopologyChannel};

/// Connects with `lapin` using default connection properties.
#[derive(Debug, Clone, Default)]
pub struct LapinConnector;

impl Connector for LapinConnector {
    type Connection = Connection;

    async fn connect(&self, endpoint: &str) -> Result<Connection> {
        Connection::connect(endpoint, ConnectionProperties::default())
            .await
            .map_err(|e| ErrorBroker::Connect {
                endpoint: redact(endpoint),
                source: Box::new(e),
            })
    }
}

impl BrokerConnection for Connection {
    type Channel = Channel;

    async fn open_channel(&self) -> Result<Channel> {
        let channel = self
            .create_channel()
            .await
            .map_err(|e| ErrorBroker::Channel(Box::new(e)))?;
        debug!("Created RabbitMQ channel");
        Ok(channel)
    }

    async fn close(&self) {
        if !self.status().connected() {
            debug!("Connection already closed by peer");
            return;
        }
        if let Err(e) = Connection::close(self, 200, "Normal shutdown").await {
            warn!("Failed to close connection gracefully: {}", e);
        }
    }
}

fn is_precondition_failed(error: &lapin::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ProtocolError(e)
            if e.kind() == &AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
    )
}

/// The broker answers attribute mismatches with PRECONDITION_FAILED.
fn topology_error(step: TopologyStep, error: lapin::Error) -> ErrorBroker {
    if is_precondition_failed(&error) {
        ErrorBroker::TopologyConflict {
            step,
            source: Box::new(error),
        }
    } else {
        ErrorBroker::Topology {
            step,
            source: Box::new(error),
        }
    }
}

impl TopologyChannel for Channel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        self.exchange_declare(
            name,
            kind.into(),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| topology_error(TopologyStep::Exchange, e))
    }

    async fn declare_queue(&self, name: &str, lazy: bool) -> Result<String> {
        let options = if name.is_empty() {
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            }
        } else {
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            }
        };

        let mut arguments = FieldTable::default();
        if lazy {
            arguments.insert("x-queue-mode".into(), AMQPValue::LongString("lazy".into()));
        }

        let queue = self
            .queue_declare(name, options, arguments)
            .await
            .map_err(|e| topology_error(TopologyStep::Queue, e))?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| topology_error(TopologyStep::Binding, e))
    }
}

impl DeliveryChannel for Channel {
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<BoxStream<'static, Result<Delivery>>> {
        let consume_error = |e: lapin::Error| ErrorBroker::Consume {
            queue: queue.to_string(),
            source: Box::new(e),
        };

        self.basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(consume_error)?;
        let consumer = self
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(consume_error)?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(Delivery::from)
                    .map_err(|e| ErrorBroker::Delivery(Box::new(e)))
            })
            .boxed())
    }

    async fn accept(&self, delivery_tag: u64) -> Result<()> {
        self.basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| ErrorBroker::Delivery(Box::new(e)))
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| ErrorBroker::Delivery(Box::new(e)))
    }
}
