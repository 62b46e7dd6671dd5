#[macro_use] extern crate prettytable;

use anyhow::anyhow;
use directories::ProjectDirs;
use std::io;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::Level;

mod cli;
mod interface;
mod model;
mod store;
mod summary;

use crate::store::Store;
use cli::CommandLineArgs;

fn find_default_tasks_file() -> Option<PathBuf> {
    ProjectDirs::from("com", "gozque", "tasq").map(|dirs| dirs.data_dir().join("tasks.json"))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    // Get the command-line arguments.
    let CommandLineArgs {
        action,
        tasks_file,
        id_policy,
        summarizer,
        verbose,
    } = CommandLineArgs::from_args();

    init_logging(verbose);

    // Unpack the tasks file.
    let tasks_file = tasks_file
        .or_else(find_default_tasks_file)
        .ok_or(anyhow!("Failed to find tasks file."))?;

    let mut store = Store::open(tasks_file, id_policy);
    let summarizer = summary::from_command(summarizer);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Perform the action, or read actions interactively.
    match action {
        Some(command) => interface::run(&mut store, summarizer.as_ref(), command, &mut out),
        None => {
            let stdin = io::stdin();
            interface::shell(&mut store, summarizer.as_ref(), stdin.lock(), &mut out)
        }
    }?;
    Ok(())
}
