pub mod amqp;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use amqp::LapinConnector;
pub use connection::ConnectionManager;
pub use consumer::RabbitMQConsumer;
