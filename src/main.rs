use std::process::ExitCode;

use amqp_recv::config::{self, Config};
use amqp_recv::error::Result;
use amqp_recv::lifecycle::Lifecycle;
use amqp_recv::output::{Dispatcher, Handler};
use amqp_recv::rabbitmq::{ConnectionManager, LapinConnector, RabbitMQConsumer};
use amqp_recv::verify::PayloadVerifier;
use clap::error::ErrorKind;
use rustls::crypto::{CryptoProvider, ring::default_provider};
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = match config::parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = match config::init(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::from(2);
        }
    };
    let result = runtime.block_on(run(config));
    // A template read from an interactive STDIN can still be blocked in its reader thread.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    _ = CryptoProvider::install_default(default_provider());

    let lifecycle = Lifecycle::new();
    let signals = lifecycle.listen_for_signals();

    let Some(handler) = lifecycle
        .until_cancelled(Handler::prepare(config.output, tokio::io::stdin()))
        .await
    else {
        info!("Interrupted while reading the template");
        return Ok(());
    };
    let handler = handler?;
    let verifier = match &config.verify_certificate {
        Some(path) => Some(PayloadVerifier::from_pem_file(path)?),
        None => None,
    };

    let endpoints = config.rabbit.endpoints()?;
    info!("Using {} broker endpoint(s)", endpoints.len());
    let manager = ConnectionManager::new(
        LapinConnector,
        endpoints,
        config.rabbit.reconnect_interval,
        config.rabbit.connect_timeout,
        lifecycle.clone(),
    );

    let consumer = RabbitMQConsumer::new(
        manager,
        config.rabbit.topology(),
        verifier,
        Dispatcher::new(handler, std::io::stdout(), lifecycle.clone()),
        lifecycle.clone(),
    );

    let result = consumer.run().await;
    signals.abort();

    info!("Goodbye!");
    result
}
