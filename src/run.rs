use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::{debug, trace, warn};

use crate::adapter::Adapter;
use crate::cache::{DiskCache, NopCache, ResultCache};
use crate::cancel::CancelToken;
use crate::cli;
use crate::config::Config;
use crate::detect;
use crate::exec::{self, Executor};
use crate::known;
use crate::plan::{self, PlanOptions};
use crate::probe::Probe;
use crate::registry::Registry;
use crate::report::Report;

/// Project root, config, and the adapter registry: everything a
/// subcommand needs, built once.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) root: PathBuf,
    pub(crate) config: Config,
    pub(crate) registry: Registry,
}

impl Session {
    pub(crate) fn open(cli: &cli::Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get working directory")?;
        let (config, root) = match &cli.config {
            Some(path) => {
                if !path.is_file() {
                    return Err(crate::error::Error::InvalidPath(path.clone()).into());
                }
                (Config::load(path)?, cwd)
            }
            None => match Config::discover(&cwd)? {
                Some((config, path)) => {
                    let root = path.parent().map_or_else(|| cwd.clone(), Path::to_path_buf);
                    (config, root)
                }
                None => (Config::default(), cwd),
            },
        };
        trace!(?config);
        let registry = Registry::new();
        known::register_builtin(&registry, &Arc::new(Probe::new()));
        Ok(Self {
            root,
            config,
            registry,
        })
    }

    fn cache(&self, no_cache: bool) -> Arc<dyn ResultCache> {
        if no_cache || !self.config.cache.enabled {
            debug!("Result cache disabled");
            Arc::new(NopCache)
        } else {
            Arc::new(DiskCache::new(
                &self.config.cache_dir(&self.root),
                self.config.cache.max_age,
                self.config.cache.max_size_bytes,
            ))
        }
    }
}

fn plan_options(run: &cli::Run, lint_only: bool) -> PlanOptions {
    PlanOptions {
        files: (!run.files.is_empty()).then(|| run.files.clone()),
        fix: run.fix,
        format_only: run.format_only,
        lint_only: run.lint_only || lint_only,
        extra_args: run.extra_args.clone(),
        env: Default::default(),
        language: run.language.clone(),
        tool_filter: run.only_tool.clone(),
        since: run.since.clone(),
        staged: run.staged,
        changed: run.changed,
    }
}

fn emit_report(report: &Report, run: &cli::Run) -> Result<()> {
    let rendered = report.render(run.report);
    match &run.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Failed to write report: {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

/// Plan and execute. Returns whether everything succeeded.
pub(crate) fn run(session: &Session, run: &cli::Run, lint_only: bool) -> Result<bool> {
    let options = plan_options(run, lint_only);
    let plan = plan::plan(&session.root, &session.registry, &session.config, &options)?;
    if plan.tasks.is_empty() {
        eprintln!("Nothing to do");
        return Ok(true);
    }
    if run.dry_run {
        for task in &plan.tasks {
            println!(
                "[{:>2}] {:<16} {} files",
                task.priority,
                task.adapter.name(),
                task.files.len(),
            );
        }
        eprintln!(
            "{} tasks over {} files, estimated {:?}",
            plan.tasks.len(),
            plan.total_files,
            plan.estimated_duration,
        );
        return Ok(true);
    }

    let workers = exec::num_workers(run.workers.or(session.config.default_workers));
    let timeout = run
        .timeout
        .or(session.config.timeout)
        .unwrap_or(exec::DEFAULT_TIMEOUT);
    let cache = session.cache(run.no_cache);
    let executor = Executor::new(workers, timeout, cache);
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);
    let outcome = executor.execute(plan, &cancel)?;

    let failed = !outcome.all_succeeded();
    let report = Report::new(outcome.results);
    emit_report(&report, run)?;
    if let Some(error) = outcome.error {
        eprintln!("error: {error}");
    }
    Ok(!failed)
}

/// Ctrl-C cancels the run: in-flight subprocesses get the termination
/// signal, completed results are still reported.
#[cfg(unix)]
fn install_interrupt_handler(cancel: &CancelToken) {
    static INTERRUPTED: AtomicBool = AtomicBool::new(false);
    extern "C" fn on_interrupt(_: libc::c_int) {
        INTERRUPTED.store(true, Ordering::Relaxed);
    }
    let handler = on_interrupt as extern "C" fn(libc::c_int);
    // SAFETY: the handler only touches an atomic
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
    let cancel = cancel.clone();
    thread::spawn(move || {
        loop {
            if INTERRUPTED.load(Ordering::Relaxed) {
                cancel.cancel();
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    });
}

#[cfg(not(unix))]
fn install_interrupt_handler(_cancel: &CancelToken) {}

/// Run exactly one adapter, by name.
pub(crate) fn tool(session: &Session, cmd: &cli::ToolCmd) -> Result<bool> {
    if session.registry.find(&cmd.name).is_none() {
        anyhow::bail!("Unknown tool: {}", cmd.name);
    }
    let mut run_opts = cmd.run.clone();
    run_opts.only_tool = vec![cmd.name.clone()];
    run(session, &run_opts, false)
}

/// Print the detection report.
pub(crate) fn analyze(session: &Session) -> Result<()> {
    let detection = detect::detect_with_rules(&session.root, session.config.detection_rules())?;
    if detection.languages.is_empty() {
        println!("No languages detected in {}", session.root.display());
        return Ok(());
    }
    for (language, presence) in &detection.languages {
        let tools: Vec<String> = session
            .registry
            .by_language(language)
            .iter()
            .map(|a| {
                if a.available() {
                    a.name().to_string()
                } else {
                    format!("{} (not installed)", a.name())
                }
            })
            .collect();
        println!(
            "{language}: confidence {:.2}, {} files, tools: {}",
            presence.confidence,
            detection.files_for(language).len(),
            if tools.is_empty() {
                "none".to_string()
            } else {
                tools.join(", ")
            },
        );
        if let Some(package_manager) = presence.package_manager {
            println!("  package manager: {package_manager}");
        }
        if let Some(build_tool) = presence.build_tool {
            println!("  build tool: {build_tool}");
        }
        for indicator in &presence.indicators {
            println!("  indicator: {}", indicator.display());
        }
    }
    Ok(())
}

/// List every registered adapter with availability and version.
pub(crate) fn list(session: &Session) {
    for adapter in session.registry.all() {
        let status = match adapter.version() {
            Ok(version) => version,
            Err(_) => "not installed".to_string(),
        };
        println!(
            "{:<16} {:<12} {:<10} {}",
            adapter.name(),
            adapter.language(),
            kind_str(&*adapter),
            status,
        );
    }
}

fn kind_str(adapter: &dyn Adapter) -> &'static str {
    match adapter.kind() {
        crate::adapter::ToolKind::Formatter => "formatter",
        crate::adapter::ToolKind::Linter => "linter",
        crate::adapter::ToolKind::Both => "both",
    }
}

pub(crate) fn install(session: &Session, tool: &str) -> Result<()> {
    let Some(adapter) = session.registry.find(tool) else {
        anyhow::bail!("Unknown tool: {tool}");
    };
    adapter.install()
}

/// Install (or update) every tool applicable to the detected languages.
pub(crate) fn upgrade(session: &Session) -> Result<bool> {
    let detection = detect::detect_with_rules(&session.root, session.config.detection_rules())?;
    let mut ok = true;
    for language in detection.languages.keys() {
        for adapter in session.registry.by_language(language) {
            if let Err(e) = adapter.install() {
                warn!("Failed to install {}: {e:#}", adapter.name());
                ok = false;
            }
        }
    }
    Ok(ok)
}

pub(crate) fn version(session: &Session) {
    for adapter in session.registry.all() {
        if let Ok(version) = adapter.version() {
            println!("{:<16} {}", adapter.name(), version);
        }
    }
}

pub(crate) fn cache_clear(session: &Session) {
    session.cache(false).invalidate_all();
    eprintln!("Cache cleared");
}

pub(crate) fn cache_stats(session: &Session) {
    let stats = session.cache(false).stats();
    println!("entries:    {}", stats.entries);
    println!("size:       {} bytes", stats.size_bytes);
    println!("hits:       {}", stats.hit_count);
    println!("misses:     {}", stats.miss_count);
    println!("hit rate:   {:.1}%", stats.hit_rate * 100.0);
    if let Some(oldest) = stats.oldest_entry
        && let Ok(age) = oldest.elapsed()
    {
        println!("oldest:     {}s ago", age.as_secs());
    }
    if let Some(newest) = stats.newest_entry
        && let Ok(age) = newest.elapsed()
    {
        println!("newest:     {}s ago", age.as_secs());
    }
}
