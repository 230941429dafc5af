//! Proxy binary.

use clap::Parser;
use proxy::{Config, Proxy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipeproxy")]
#[command(about = "Pipelining RESP proxy: many clients, one upstream connection")]
struct Args {
    /// TCP port to listen on
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    config.proxy.listen.set_port(args.port);

    proxy::logging::init(&config.logging);

    let shutdown = proxy::signal::install_signal_handler();

    let mut server = match Proxy::new(&config, shutdown) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!(error = %e, "fatal proxy error");
        std::process::exit(1);
    }
}
