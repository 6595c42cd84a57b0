use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use envconfig::Envconfig;
use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::counter::CounterOverlay;
use crate::error::SetupError;
use crate::kafka::KafkaSource;
use crate::produce::EventProducer;
use crate::session::ReceiveSession;
use crate::transport::EventSource;

#[derive(Parser)]
#[command(name = "eventtail", version, about = "Tail a partitioned Kafka event stream")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive events and print them as JSON lines
    Listen(ReceiveArgs),

    /// Receive events and render a live counter
    Count(ReceiveArgs),

    /// Publish one message to the topic
    Send {
        message: String,

        /// Send to a specific partition instead of letting the partitioner
        /// pick one
        #[arg(long)]
        partition: Option<i32>,
    },

    /// List the partition ids of the configured topic
    Partitions,
}

#[derive(Args)]
struct ReceiveArgs {
    /// Receive from a single partition instead of all of them
    #[arg(long)]
    partition: Option<i32>,

    /// Consumer group to read as (overrides KAFKA_CONSUMER_GROUP)
    #[arg(long)]
    group: Option<String>,
}

impl Cli {
    pub async fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        let config = Config::init_from_env()?;

        match cli.command {
            Commands::Listen(args) => listen(&config, args).await,
            Commands::Count(args) => count(&config, args).await,
            Commands::Send { message, partition } => send(&config, message, partition).await,
            Commands::Partitions => partitions(&config).await,
        }
    }
}

async fn open_session(config: &Config, args: &ReceiveArgs) -> Result<ReceiveSession, SetupError> {
    let source = Arc::new(KafkaSource::new(config));
    let group = args
        .group
        .clone()
        .unwrap_or_else(|| config.kafka_consumer_group.clone());

    info!("connecting to {}", config.connection_summary());

    match args.partition {
        Some(partition) => {
            ReceiveSession::single_partition(source, partition, &group, config.shutdown_grace())
                .await
        }
        None => ReceiveSession::all_partitions(source, &group, config.shutdown_grace()).await,
    }
}

async fn listen(config: &Config, args: ReceiveArgs) -> anyhow::Result<()> {
    let mut session = open_session(config, &args).await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = session.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            }
        }
    }

    session.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn count(config: &Config, args: ReceiveArgs) -> anyhow::Result<()> {
    let mut session = open_session(config, &args).await?;
    let mut overlay = CounterOverlay::spawn();
    let counts = overlay.counts();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            // The operator pressed a key while the overlay had the terminal.
            _ = overlay.finished() => break,
            event = session.recv() => match event {
                Some(_) => {
                    if counts.send(()).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    session.shutdown().await;
    overlay.stop().await;
    info!("shutdown complete");
    Ok(())
}

async fn send(config: &Config, message: String, partition: Option<i32>) -> anyhow::Result<()> {
    let producer = EventProducer::new(config)?;
    let (partition, offset) = producer.send(message.as_bytes(), partition).await?;
    info!(partition, offset, "message delivered");
    Ok(())
}

async fn partitions(config: &Config) -> anyhow::Result<()> {
    let source = KafkaSource::new(config);
    for id in source.partition_ids().await? {
        println!("{id}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("termination signal received, shutting down");
}
