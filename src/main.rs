mod cli;
mod controller;
mod engine;
mod helper;
mod ingest;
mod list;
mod render;
mod x11;

use clap::Parser;
use cli::{Cli, Source};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let (opts, source) = match cli.into_options() {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("multiselect: {e}");
            std::process::exit(1);
        }
    };

    let strings = match source {
        Source::Stdin => match ingest::from_stdin() {
            Ok(strings) => strings,
            Err(e) => {
                eprintln!("multiselect: reading stdin: {e}");
                std::process::exit(1);
            }
        },
        Source::Literals(strings) => strings,
    };

    if let Err(e) = controller::run(opts, strings) {
        tracing::error!(error = %e, "fatal");
        eprintln!("multiselect: {e}");
        std::process::exit(1);
    }
}
