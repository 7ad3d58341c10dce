//! In-memory broker used by unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::{self, BoxStream};

use crate::delivery::Delivery;
use crate::rabbitmq::connection::{BrokerConnection, Connector};
use crate::rabbitmq::consumer::DeliveryChannel;
use crate::rabbitmq::error::{ErrorBroker, Result, TopologyStep};
use crate::rabbitmq::topology::{ExchangeKind, TopologyChannel};

type Outbox = (
    UnboundedSender<Result<Delivery>>,
    Option<UnboundedReceiver<Result<Delivery>>>,
);

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    refuse: usize,
    hang: usize,
    stream_closed: bool,
    attempts: Vec<String>,
    events: Vec<String>,
    queues: HashMap<String, bool>,
    exchanges: HashMap<String, ExchangeKind>,
    generated: usize,
    outbox: Option<Outbox>,
    accepted: Vec<u64>,
    rejected: Vec<u64>,
    closed: usize,
}

impl State {
    fn outbox(&mut self) -> &mut Outbox {
        self.outbox.get_or_insert_with(|| {
            let (tx, rx) = unbounded();
            (tx, Some(rx))
        })
    }
}

fn rejected(message: &str) -> crate::rabbitmq::error::BoxError {
    Box::new(io::Error::other(message.to_string()))
}

impl FakeBroker {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn refuse_connections(&self, count: usize) {
        self.state().refuse = count;
    }

    pub(crate) fn hang_connections(&self, count: usize) {
        self.state().hang = count;
    }

    /// Every consume returns a stream that ends immediately.
    pub(crate) fn close_stream(&self) {
        self.state().stream_closed = true;
    }

    pub(crate) fn declare_existing_queue(&self, name: &str, lazy: bool) {
        self.state().queues.insert(name.to_string(), lazy);
    }

    pub(crate) fn publish(&self, delivery: Delivery) {
        let mut state = self.state();
        state
            .outbox()
            .0
            .unbounded_send(Ok(delivery))
            .expect("fake delivery stream dropped");
    }

    pub(crate) fn channel(&self) -> FakeChannel {
        FakeChannel {
            broker: self.clone(),
        }
    }

    pub(crate) fn connect_attempts(&self) -> Vec<String> {
        self.state().attempts.clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub(crate) fn accepted(&self) -> Vec<u64> {
        self.state().accepted.clone()
    }

    pub(crate) fn rejected(&self) -> Vec<u64> {
        self.state().rejected.clone()
    }

    pub(crate) fn closed_connections(&self) -> usize {
        self.state().closed
    }
}

impl Connector for FakeBroker {
    type Connection = FakeConnection;

    async fn connect(&self, endpoint: &str) -> Result<FakeConnection> {
        let hang = {
            let mut state = self.state();
            state.attempts.push(endpoint.to_string());
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(ErrorBroker::Connect {
                    endpoint: endpoint.to_string(),
                    source: Box::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
                });
            }
            let hang = state.hang > 0;
            state.hang = state.hang.saturating_sub(1);
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(FakeConnection {
            broker: self.clone(),
        })
    }
}

pub(crate) struct FakeConnection {
    broker: FakeBroker,
}

impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn open_channel(&self) -> Result<FakeChannel> {
        Ok(self.broker.channel())
    }

    async fn close(&self) {
        self.broker.state().closed += 1;
    }
}

pub(crate) struct FakeChannel {
    broker: FakeBroker,
}

impl TopologyChannel for FakeChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        let mut state = self.broker.state();
        state
            .events
            .push(format!("exchange {name} {}", format!("{kind:?}").to_lowercase()));
        if state.exchanges.get(name).is_some_and(|existing| *existing != kind) {
            return Err(ErrorBroker::TopologyConflict {
                step: TopologyStep::Exchange,
                source: rejected("PRECONDITION_FAILED - inequivalent arg 'type'"),
            });
        }
        state.exchanges.insert(name.to_string(), kind);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, lazy: bool) -> Result<String> {
        let mut state = self.broker.state();
        let name = if name.is_empty() {
            state.generated += 1;
            format!("amq.gen-{}", state.generated)
        } else {
            name.to_string()
        };
        state.events.push(format!("queue {name} lazy={lazy}"));
        if state.queues.get(&name).is_some_and(|existing| *existing != lazy) {
            return Err(ErrorBroker::TopologyConflict {
                step: TopologyStep::Queue,
                source: rejected("PRECONDITION_FAILED - inequivalent arg 'x-queue-mode'"),
            });
        }
        state.queues.insert(name.clone(), lazy);
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.broker.state();
        state
            .events
            .push(format!("bind {queue} {exchange} {routing_key}"));
        if state.queues.contains_key(queue) && state.exchanges.contains_key(exchange) {
            Ok(())
        } else {
            Err(ErrorBroker::Topology {
                step: TopologyStep::Binding,
                source: rejected("NOT_FOUND"),
            })
        }
    }
}

impl DeliveryChannel for FakeChannel {
    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<BoxStream<'static, Result<Delivery>>> {
        let mut state = self.broker.state();
        state.events.push(format!("consume {queue}"));
        if state.stream_closed {
            return Ok(stream::empty().boxed());
        }
        Ok(match state.outbox().1.take() {
            Some(receiver) => receiver.boxed(),
            None => stream::pending().boxed(),
        })
    }

    async fn accept(&self, delivery_tag: u64) -> Result<()> {
        self.broker.state().accepted.push(delivery_tag);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.broker.state().rejected.push(delivery_tag);
        Ok(())
    }
}
