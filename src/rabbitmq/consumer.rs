use std::future::Future;
use std::io::Write;

use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::delivery::Delivery;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::output::Dispatcher;
use crate::rabbitmq::connection::{BrokerConnection, ConnectionManager, Connector};
use crate::rabbitmq::error::{self as broker, ErrorBroker};
use crate::rabbitmq::topology::{self, TopologyChannel, TopologyDescriptor};
use crate::verify::PayloadVerifier;

/// Consuming side of a broker channel.
pub trait DeliveryChannel {
    fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> impl Future<Output = broker::Result<BoxStream<'static, broker::Result<Delivery>>>>;

    fn accept(&self, delivery_tag: u64) -> impl Future<Output = broker::Result<()>>;

    /// Drop a delivery without requeueing it.
    fn reject(&self, delivery_tag: u64) -> impl Future<Output = broker::Result<()>>;
}

/// Waits for one delivery, verifies and renders it, reconnecting as long as needed.
pub struct RabbitMQConsumer<C, W> {
    manager: ConnectionManager<C>,
    topology: TopologyDescriptor,
    verifier: Option<PayloadVerifier>,
    dispatcher: Dispatcher<W>,
    lifecycle: Lifecycle,
    consumer_tag: String,
}

impl<C, W> RabbitMQConsumer<C, W>
where
    C: Connector,
    <C::Connection as BrokerConnection>::Channel: TopologyChannel + DeliveryChannel,
    W: Write,
{
    pub fn new(
        manager: ConnectionManager<C>,
        topology: TopologyDescriptor,
        verifier: Option<PayloadVerifier>,
        dispatcher: Dispatcher<W>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            manager,
            topology,
            verifier,
            dispatcher,
            lifecycle,
            consumer_tag: format!("amqp-recv-{}", Uuid::new_v4()),
        }
    }

    /// Run until a delivery is rendered or the lifecycle is interrupted. Broker failures
    /// are retried; only output failures end the run with an error.
    pub async fn run(mut self) -> Result<()> {
        info!("Waiting for messages...");

        let result = loop {
            let Some(connection) = self.manager.connect().await else {
                break Ok(());
            };

            let outcome = self.session(&connection).await;
            self.manager.release(connection).await;

            match outcome {
                Ok(()) => break Ok(()),
                Err(Error::Broker(e @ ErrorBroker::TopologyConflict { .. })) => {
                    error!("{} (existing queue or exchange has other attributes)", e);
                }
                Err(Error::Broker(e)) => warn!("{}", e),
                Err(e) => {
                    self.lifecycle.fail();
                    break Err(e);
                }
            }

            if !self.manager.wait_retry().await {
                break Ok(());
            }
        };

        self.lifecycle.terminate();
        info!(
            "Consumer stopped ({:?}, state {:?})",
            self.lifecycle.reason(),
            self.manager.state()
        );
        result
    }

    /// One connection's worth of work. `Ok` means the lifecycle tripped.
    async fn session(&mut self, connection: &C::Connection) -> Result<()> {
        let channel = connection.open_channel().await?;
        let queue = topology::bind(&channel, &self.topology).await?;
        let mut deliveries = channel.consume(&queue, &self.consumer_tag).await?;
        debug!("Consumer {} attached to {}", self.consumer_tag, queue);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.lifecycle.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ErrorBroker::StreamClosed.into()),
            };
            let tag = delivery.delivery_tag;
            debug!("Received delivery {} ({} bytes)", tag, delivery.body.len());

            if let Some(verifier) = &self.verifier {
                if let Err(e) = verifier.verify(&delivery) {
                    warn!("Dropping delivery {}: {}", tag, e);
                    if let Err(e) = channel.reject(tag).await {
                        warn!("Failed to reject delivery {}: {}", tag, e);
                    }
                    continue;
                }
            }

            if self.dispatcher.dispatch(delivery)? {
                if let Err(e) = channel.accept(tag).await {
                    warn!("Failed to acknowledge delivery {}: {}", tag, e);
                }
            }
        }
    }
}
