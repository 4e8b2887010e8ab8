use std::{error::Error, net::SocketAddr, sync::Arc};

use clap::Parser;
use log::info;
use remora::{
    MemoryEngine,
    protocol::{DEFAULT_ADDRESS, NoResultsMode, Server, ServerConfig},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(default_value = DEFAULT_ADDRESS)]
    address: SocketAddr,
    /// Number of worker threads
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=10))]
    threads: u16,
    /// Seed the graph with demo data
    #[arg(long)]
    demo: bool,
    /// Only `no_results: true` suppresses rows, instead of the key being present
    #[arg(long)]
    no_results_by_value: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let engine = if cli.demo {
        info!("seeding demo graph");
        MemoryEngine::with_demo_data()
    } else {
        MemoryEngine::new()
    };
    let no_results = if cli.no_results_by_value {
        NoResultsMode::Value
    } else {
        NoResultsMode::Presence
    };

    let config = ServerConfig::new(cli.address)
        .with_threads(usize::from(cli.threads))
        .with_no_results(no_results);
    let server = Server::bind(config, Arc::new(engine))?;

    let context = server.context();
    ctrlc::set_handler(move || context.terminate())?;

    server.run()?;
    Ok(())
}
