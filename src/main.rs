mod actions;
mod arbiter;
mod cli;
mod config;
mod error;
mod gestures;
mod input;
mod ipc;
mod landmarks;
mod logging;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
