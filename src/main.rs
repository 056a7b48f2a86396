use std::process::ExitCode;

use clap::Parser;

use smartpatch::cli::{self, CliArgs};
use smartpatch::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init();
    if let Some(path) = logger::log_path() {
        smartpatch::log_info!("args: {:?} (log: {})", args, path.display());
    }
    cli::run(args)
}
