pub mod config;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod rabbitmq;
pub mod verify;
