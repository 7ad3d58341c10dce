pub mod cli;
pub mod duration;
pub mod error;
pub mod rabbit;

use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::config::{cli::Cli, error::Result, rabbit::RabbitMQConfig};
use crate::output::OutputKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub rabbit: RabbitMQConfig,
    pub output: OutputKind,
    pub verify_certificate: Option<PathBuf>,
}

/// Load `.env` and parse flags; environment variables fill in anything not given on the
/// command line.
pub fn parse() -> std::result::Result<Cli, clap::Error> {
    dotenv().ok();
    Cli::try_parse()
}

/// Install logging and validate the parsed flags.
pub fn init(cli: &Cli) -> Result<Config> {
    init_logging(cli.quiet)?;

    info!("Starting amqp-recv {}", env!("CARGO_PKG_VERSION"));

    Ok(Config {
        rabbit: RabbitMQConfig::from_cli(cli)?,
        output: cli.output,
        verify_certificate: cli.verify.clone(),
    })
}

fn init_logging(quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::default().add_directive(LevelFilter::OFF.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
