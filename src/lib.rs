mod classify;
mod cli;
mod commands;
mod github;
mod models;
mod prompt;
mod retry;
mod runtime;

use clap::Parser;

pub fn run() -> i32 {
    let cli = cli::Cli::parse();
    match commands::execute(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            2
        }
    }
}
