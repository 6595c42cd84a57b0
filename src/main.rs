use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use eventtail::commands::Cli;

fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
                .add_directive("rdkafka=warn".parse().expect("static directive parses")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    setup_tracing();

    if let Err(e) = Cli::run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
