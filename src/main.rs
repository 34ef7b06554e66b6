use clap::Parser;
use std::process::ExitCode;
use tcp_forwarder::cli::{Cli, print_help, run};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            print_help();
            ExitCode::FAILURE
        }
    }
}
