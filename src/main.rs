#![warn(clippy::all)]

use clap::Parser;
use cli::Cli;

mod cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let program: Cli = Cli::parse();
    if let Err(e) = program.run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
