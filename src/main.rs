use clap::Parser;
use refinery::config::{self, Config};
use refinery::pipeline::Refinery;
use refinery::{APP_NAME, VERSION};
use tracing::{debug, error, info};
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Streaming refinery: consumes application events from Kafka, enriches them
/// with app/space/org metadata from the platform API and writes time-series
/// points to InfluxDB. Everything but the log level is configured through
/// CFMR_* environment variables.
#[derive(Parser)]
#[command(name = "cf-metrics-refinery", version)]
struct Args {
    /// Log level (DEBUG, INFO or ERROR)
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup tracing layers; RUST_LOG wins over the flag when set
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector).unwrap();

    info!("{} version {}", APP_NAME, VERSION);
    debug!(log_level = %args.log_level);

    let conf = match Config::from_env() {
        Ok(conf) => conf,
        Err(err) => {
            error!(%err, "failed to parse environment configuration");
            eprintln!("{}", config::usage());
            std::process::exit(1);
        }
    };

    if let Err(err) = Refinery::new(conf).run().await {
        error!(%err, "exiting");
        std::process::exit(1);
    }
}
