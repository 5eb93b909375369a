// evolution-memory/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use evolution_memory::{cli::Cli, config::Config, telemetry};

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let result = match Config::from_env() {
        Ok(cfg) => evolution_memory::cli::run(cli, cfg).await,
        Err(e) => Err(e),
    };

    // one line on stderr, no backtrace
    if let Err(e) = result {
        tracing::error!("Command failed: {:#}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
