mod api;
mod app;
mod cni;
mod config;
mod dra;
mod grpc;
mod index;
mod k8s;
mod logging;
mod sandbox;
mod status;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;

use crate::config::Cli;
use crate::config::Commands;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => {
            logging::init();
            app::run(*run_args).await
        }
    }
}
