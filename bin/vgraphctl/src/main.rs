//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "binary"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Control CLI for operators driving a VisualGraph daemon."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Parser, Subcommand};
use vgraph_common::logging::init_cli_tracing;

mod control;
mod watch;

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("VisualGraph ", env!("CARGO_PKG_VERSION")),
    about = "VisualGraph control utility",
    long_about = None
)]
struct Cli {
    /// Base URL of the daemon's API.
    #[arg(
        long,
        global = true,
        env = "VGRAPH_SERVER",
        default_value = "http://127.0.0.1:8080"
    )]
    server: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a generation session.
    Start(control::StartArgs),
    /// Stop the running session.
    Stop,
    /// Print the generation status.
    Status,
    /// Fetch the most recent stored samples.
    Latest(control::LatestArgs),
    /// Fetch stored samples inside a time window.
    History(control::HistoryArgs),
    /// Stream live samples from the listener endpoint.
    Watch(watch::WatchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_cli_tracing();
    let cli = Cli::parse();
    let client = control::ApiClient::new(&cli.server)?;
    match cli.command {
        Commands::Start(args) => control::start(&client, args).await,
        Commands::Stop => control::stop(&client).await,
        Commands::Status => control::status(&client).await,
        Commands::Latest(args) => control::latest(&client, args).await,
        Commands::History(args) => control::history(&client, args).await,
        Commands::Watch(args) => watch::run(client.websocket_url()?, args).await,
    }
}
