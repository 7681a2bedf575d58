use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod server;

/// WebSocket echo server built on hpx-wsengine
///
/// Log verbosity follows RUST_LOG, e.g. RUST_LOG=hpx_wsengine=debug.
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept WebSocket connections and echo every message back
    Serve(server::Cmd),
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    match args.command {
        Commands::Serve(cmd) => server::run(cmd),
    }
}
