#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]

mod adapter;
mod cache;
mod cancel;
mod cli;
mod config;
mod detect;
mod error;
mod exec;
mod git;
mod init;
mod key;
mod known;
mod log;
mod parse;
mod plan;
mod probe;
mod registry;
mod report;
mod run;
mod store;

use anyhow::Result;
use clap::Parser as _;
use std::process;
use tracing::trace;

pub(crate) fn go(cli: &cli::Cli) -> Result<bool> {
    let session = run::Session::open(cli)?;
    match &cli.command {
        cli::Command::Run(run_opts) => run::run(&session, run_opts, false),
        cli::Command::Check(run_opts) => run::run(&session, run_opts, true),
        cli::Command::Init(init_opts) => {
            init::go(&session.root.join(".gzquality.yml"), init_opts)?;
            Ok(true)
        }
        cli::Command::Analyze => {
            run::analyze(&session)?;
            Ok(true)
        }
        cli::Command::List => {
            run::list(&session);
            Ok(true)
        }
        cli::Command::Tool(tool_cmd) => run::tool(&session, tool_cmd),
        cli::Command::Install { tool } => {
            run::install(&session, tool)?;
            Ok(true)
        }
        cli::Command::Upgrade => run::upgrade(&session),
        cli::Command::Version => {
            run::version(&session);
            Ok(true)
        }
        cli::Command::Cache(cache_cmd) => {
            match cache_cmd.command {
                cli::CacheCommand::Clear => run::cache_clear(&session),
                cli::CacheCommand::Stats => run::cache_stats(&session),
            }
            Ok(true)
        }
    }
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    log::init_tracing(cli.log);
    trace!(?cli);
    let ok = go(&cli)?;
    if !ok {
        process::exit(1);
    }
    Ok(())
}
