use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::report::ReportFormat;

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub(crate) enum Color {
    /// Always use color output
    Always,
    /// Never use color output
    Never,
    /// Use color output if stdout is a terminal
    #[default]
    Auto,
}

#[derive(Clone, Copy, Debug, clap::Args)]
#[group(id = "log")]
pub(crate) struct LogOptions {
    /// When to use color output
    #[arg(long, default_value = "auto", help_heading = "Logging options")]
    pub(crate) color: Color,
    /// Include timestamps in log output
    #[arg(long, help_heading = "Logging options")]
    pub(crate) log_timestamp: bool,
    /// Quiet mode (can be used multiple times, opposite of `--verbose`)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Logging options")]
    pub(crate) quiet: u8,
    /// Verbosity level (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Logging options")]
    pub(crate) verbose: u8,
}

#[derive(Debug, clap::Parser)]
#[command(name = "gzquality")]
#[command(about = "Orchestrate formatters and linters across a project tree")]
#[command(version)]
pub(crate) struct Cli {
    /// Path to the configuration file (default: search upward for
    /// .gzquality.yml)
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
    #[command(flatten)]
    pub(crate) log: LogOptions,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Command {
    Run(Run),
    /// Run linters only (alias for `run --lint-only`)
    Check(Run),
    /// Write a default configuration file
    Init(Init),
    /// Print the language detection report
    Analyze,
    /// List known tools with availability and version
    List,
    Tool(ToolCmd),
    /// Install one tool via its package manager
    Install {
        /// Name of the tool to install
        tool: String,
    },
    /// Install every tool applicable to this project
    Upgrade,
    /// Print versions of all available tools
    Version,
    Cache(CacheCmd),
}

/// Run formatters and linters over the project
#[derive(Clone, Debug, Default, clap::Parser)]
pub(crate) struct Run {
    /// Only run on the given files (can be used multiple times)
    #[arg(long, action = clap::ArgAction::Append, value_name = "FILE")]
    pub(crate) files: Vec<PathBuf>,
    /// Only run on files staged in Git
    #[arg(long)]
    pub(crate) staged: bool,
    /// Only run on files changed in the working tree
    #[arg(long)]
    pub(crate) changed: bool,
    /// Only run on files changed since the given Git ref
    #[arg(long, value_name = "REF")]
    pub(crate) since: Option<String>,
    /// Let tools fix what they can
    #[arg(short = 'x', long)]
    pub(crate) fix: bool,
    /// Only run formatters
    #[arg(long)]
    pub(crate) format_only: bool,
    /// Only run linters
    #[arg(long)]
    pub(crate) lint_only: bool,
    /// Number of parallel workers (overrides config file value)
    #[arg(short, long)]
    pub(crate) workers: Option<NonZeroUsize>,
    /// Deadline for the whole run (overrides config file value)
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,
    /// Skip the result cache
    #[arg(long)]
    pub(crate) no_cache: bool,
    /// Show the plan without executing it
    #[arg(short = 'n', long)]
    pub(crate) dry_run: bool,
    /// Only run tools for the given language
    #[arg(long, value_name = "LANG")]
    pub(crate) language: Option<String>,
    /// Only run tools with the given name (can be used multiple times)
    #[arg(long, action = clap::ArgAction::Append, value_name = "TOOL")]
    pub(crate) only_tool: Vec<String>,
    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub(crate) report: ReportFormat,
    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub(crate) output: Option<PathBuf>,
    /// Extra arguments passed through to every tool
    #[arg(last = true, value_name = "ARG")]
    pub(crate) extra_args: Vec<String>,
}

/// Run a single tool by name
#[derive(Debug, clap::Parser)]
pub(crate) struct ToolCmd {
    /// Name of the tool to run
    pub(crate) name: String,
    #[command(flatten)]
    pub(crate) run: Run,
}

/// Create a config file for this project
#[derive(Debug, clap::Parser)]
pub(crate) struct Init {
    /// Overwrite an existing config file
    #[arg(long)]
    pub(crate) force: bool,
}

/// Inspect or clear the result cache
#[derive(Debug, clap::Parser)]
pub(crate) struct CacheCmd {
    #[command(subcommand)]
    pub(crate) command: CacheCommand,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum CacheCommand {
    /// Delete every cached result
    Clear,
    /// Print cache statistics
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn parse_run_flags() {
        let cli = Cli::try_parse_from([
            "gzquality",
            "run",
            "--staged",
            "--fix",
            "--workers",
            "4",
            "--timeout",
            "2m",
            "--report",
            "json",
            "--",
            "--verbose",
        ])
        .unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert!(run.staged);
        assert!(run.fix);
        assert_eq!(run.workers, NonZeroUsize::new(4));
        assert_eq!(run.timeout, Some(Duration::from_secs(120)));
        assert_eq!(run.report, ReportFormat::Json);
        assert_eq!(run.extra_args, vec!["--verbose"]);
    }

    #[test]
    fn parse_cache_stats() {
        let cli = Cli::try_parse_from(["gzquality", "cache", "stats"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache(CacheCmd {
                command: CacheCommand::Stats
            })
        ));
    }

    #[test]
    fn parse_tool_with_files() {
        let cli =
            Cli::try_parse_from(["gzquality", "tool", "gofumpt", "--files", "main.go"]).unwrap();
        let Command::Tool(tool) = cli.command else {
            panic!("expected tool");
        };
        assert_eq!(tool.name, "gofumpt");
        assert_eq!(tool.run.files, vec![PathBuf::from("main.go")]);
    }
}
