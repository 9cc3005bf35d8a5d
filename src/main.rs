mod average;
mod cli;
mod config;
mod ingest;
mod ipc;
mod logging;
mod object;
mod reading;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
