use clap::Parser;
use smoky::{config::Config, config::Mode, server::SmokyServer, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "smoky")]
#[command(about = "Smoky HTTP/1.1 server: echo origin or reverse proxy")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value = "9999")]
    port: u16,

    /// Relay requests to this upstream authority instead of echoing.
    #[arg(short, long)]
    upstream: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.listen_host = cli.host;
    config.listen_port = cli.port;
    if let Some(upstream) = cli.upstream {
        config.mode = Mode::Proxy;
        config.upstream = Some(upstream);
    }

    info!("starting smoky");
    SmokyServer::new(config)?.run().await
}
