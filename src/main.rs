//! invstream CLI: route queries, stream search results, run reindex jobs.

use anyhow::Result;
use clap::Parser;
use invstream::engine::arg_parser::Cli;
use invstream::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
