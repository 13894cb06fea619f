use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use tracing::{debug, trace};

use crate::cancel::ExecContext;
use crate::error::Error;
use crate::parse::OutputParser;
use crate::probe::Probe;

/// The role of a checker: formatters rewrite files, linters report issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ToolKind {
    Formatter,
    Linter,
    Both,
}

impl ToolKind {
    /// Whether an adapter of this kind serves requests for `wanted`.
    pub(crate) fn matches(self, wanted: ToolKind) -> bool {
        self == wanted || self == ToolKind::Both
    }

    /// Task priority: formatters run before linters so linters see
    /// formatted code.
    pub(crate) fn priority(self) -> u8 {
        match self {
            ToolKind::Formatter => 10,
            ToolKind::Both => 7,
            ToolKind::Linter => 5,
        }
    }

    /// True when an invocation of this kind may rewrite files on disk.
    pub(crate) fn writes_files(self) -> bool {
        matches!(self, ToolKind::Formatter | ToolKind::Both)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Severity {
    Error,
    Warning,
    Info,
}

/// One finding reported by a checker.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct Issue {
    pub(crate) file: PathBuf,
    pub(crate) line: u32,
    pub(crate) column: u32,
    pub(crate) severity: Severity,
    pub(crate) rule: String,
    pub(crate) message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) suggestion: Option<String>,
}

/// Behaviour-affecting execution options, shared by planner and adapters.
///
/// Invariant: `format_only` and `lint_only` are never both set.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct ExecuteOptions {
    pub(crate) project_root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) config_file: Option<PathBuf>,
    #[serde(default)]
    pub(crate) fix: bool,
    #[serde(default)]
    pub(crate) format_only: bool,
    #[serde(default)]
    pub(crate) lint_only: bool,
    #[serde(default)]
    pub(crate) extra_args: Vec<String>,
    #[serde(default)]
    pub(crate) env: BTreeMap<String, String>,
}

impl ExecuteOptions {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.format_only && self.lint_only {
            return Err(Error::InvalidConfig(
                "format_only and lint_only are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one adapter invocation. Checker-level failures live in
/// `success`/`error`; they never propagate as Rust errors.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct CheckResult {
    pub(crate) tool: String,
    pub(crate) language: String,
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) cached: bool,
    pub(crate) files_processed: usize,
    pub(crate) duration: Duration,
    pub(crate) issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) raw_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl CheckResult {
    fn empty(tool: &str, language: &str) -> Self {
        Self {
            tool: tool.to_string(),
            language: language.to_string(),
            success: true,
            cached: false,
            files_processed: 0,
            duration: Duration::ZERO,
            issues: Vec::new(),
            raw_output: String::new(),
            error: None,
        }
    }

    fn failed(tool: &str, language: &str, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::empty(tool, language)
        }
    }
}

/// The capability set every checker adapter provides.
pub(crate) trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn language(&self) -> &str;
    fn kind(&self) -> ToolKind;
    fn available(&self) -> bool;
    fn install(&self) -> Result<()>;
    fn version(&self) -> Result<String, Error>;
    /// Existing config files for this tool under `root`. Absence is
    /// normal, not an error.
    fn config_files(&self, root: &Path) -> Vec<PathBuf>;
    fn execute(&self, ctx: &ExecContext, files: &[PathBuf], options: &ExecuteOptions)
    -> CheckResult;
}

/// Which half of a kind=Both tool an invocation exercises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Format,
    Lint,
}

/// Static description of one external tool. Per-tool variation is limited
/// to command construction (`build_args`) and output parsing (`parser`);
/// everything else is shared [`CommandAdapter`] behaviour.
#[derive(Clone, Debug)]
pub(crate) struct ToolSpec {
    pub(crate) name: &'static str,
    pub(crate) language: &'static str,
    pub(crate) kind: ToolKind,
    pub(crate) executable: &'static str,
    /// argv of the external installer; empty when self-install is
    /// unsupported.
    pub(crate) install: &'static [&'static str],
    pub(crate) extensions: &'static [&'static str],
    pub(crate) config_patterns: &'static [&'static str],
    /// Whether matched files are appended to the argv. Whole-project
    /// tools (cargo) take no file arguments.
    pub(crate) pass_files: bool,
    pub(crate) build_args: fn(Phase, &ExecuteOptions) -> Vec<String>,
    pub(crate) parser: OutputParser,
}

/// An adapter driving one external executable according to its
/// [`ToolSpec`].
pub(crate) struct CommandAdapter {
    spec: ToolSpec,
    probe: Arc<Probe>,
}

impl std::fmt::Debug for CommandAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAdapter")
            .field("name", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl CommandAdapter {
    pub(crate) fn new(spec: ToolSpec, probe: Arc<Probe>) -> Self {
        Self { spec, probe }
    }

    pub(crate) fn recognises(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        self.spec.extensions.iter().any(|e| *e == ext)
    }

    fn phases(&self, options: &ExecuteOptions) -> Vec<Phase> {
        match self.spec.kind {
            ToolKind::Formatter => vec![Phase::Format],
            ToolKind::Linter => vec![Phase::Lint],
            // format first, then lint, so the linter sees formatted code
            ToolKind::Both => {
                if options.format_only {
                    vec![Phase::Format]
                } else if options.lint_only {
                    vec![Phase::Lint]
                } else {
                    vec![Phase::Format, Phase::Lint]
                }
            }
        }
    }

    fn run_phase(
        &self,
        ctx: &ExecContext,
        phase: Phase,
        files: &[&PathBuf],
        options: &ExecuteOptions,
    ) -> CheckResult {
        let started = Instant::now();
        let mut cmd = process::Command::new(self.spec.executable);
        cmd.args((self.spec.build_args)(phase, options));
        cmd.args(&options.extra_args);
        if self.spec.pass_files {
            cmd.args(files.iter().map(|f| f.as_path()));
        }
        cmd.current_dir(&options.project_root);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        trace!(?cmd, "Invoking");

        let captured = match run_cancellable(ctx, cmd, self.spec.name) {
            Ok(Wait::Finished(captured)) => captured,
            Ok(Wait::Interrupted) => {
                return CheckResult::failed(
                    self.spec.name,
                    self.spec.language,
                    Error::Cancelled.to_string(),
                );
            }
            Err(e) => {
                return CheckResult::failed(self.spec.name, self.spec.language, format!("{e:#}"));
            }
        };

        let issues = self
            .spec
            .parser
            .parse(&captured.stdout, &captured.stderr, &options.project_root);
        // Many linters exit non-zero to signal "issues found"; that is not
        // an execution failure as long as the output parsed.
        let success = captured.status.success() || !issues.is_empty();
        let error = if success {
            None
        } else {
            // raw output is retained in the result for debugging
            Some(
                Error::ExecutionFailed(format!(
                    "{} exited with {} and no parseable output",
                    self.spec.name, captured.status,
                ))
                .to_string(),
            )
        };
        CheckResult {
            tool: self.spec.name.to_string(),
            language: self.spec.language.to_string(),
            success,
            cached: false,
            files_processed: files.len(),
            duration: started.elapsed(),
            issues,
            raw_output: captured.raw(),
            error,
        }
    }
}

impl Adapter for CommandAdapter {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn language(&self) -> &str {
        self.spec.language
    }

    fn kind(&self) -> ToolKind {
        self.spec.kind
    }

    fn available(&self) -> bool {
        self.probe.available(self.spec.executable)
    }

    fn install(&self) -> Result<()> {
        let Some((program, args)) = self.spec.install.split_first() else {
            anyhow::bail!("{} has no registered installer", self.spec.name);
        };
        debug!("Installing {} via {:?}", self.spec.name, self.spec.install);
        let status = process::Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("Failed to run installer for {}", self.spec.name))?;
        anyhow::ensure!(status.success(), "installer for {} failed", self.spec.name);
        Ok(())
    }

    fn version(&self) -> Result<String, Error> {
        if !self.available() {
            return Err(Error::ToolUnavailable(self.spec.name.to_string()));
        }
        Ok(self.probe.version(self.spec.executable))
    }

    fn config_files(&self, root: &Path) -> Vec<PathBuf> {
        self.spec
            .config_patterns
            .iter()
            .map(|pattern| root.join(pattern))
            .filter(|candidate| candidate.is_file())
            .collect()
    }

    fn execute(
        &self,
        ctx: &ExecContext,
        files: &[PathBuf],
        options: &ExecuteOptions,
    ) -> CheckResult {
        let matching: Vec<&PathBuf> = files.iter().filter(|f| self.recognises(f)).collect();
        if matching.is_empty() {
            return CheckResult::empty(self.spec.name, self.spec.language);
        }
        if !self.available() {
            return CheckResult::failed(
                self.spec.name,
                self.spec.language,
                Error::ToolUnavailable(self.spec.name.to_string()).to_string(),
            );
        }

        let mut combined: Option<CheckResult> = None;
        for phase in self.phases(options) {
            if ctx.interrupted() {
                return CheckResult::failed(
                    self.spec.name,
                    self.spec.language,
                    Error::Cancelled.to_string(),
                );
            }
            let result = self.run_phase(ctx, phase, &matching, options);
            combined = Some(match combined {
                None => result,
                Some(mut acc) => {
                    // kind=Both: success is the conjunction of both halves
                    acc.success &= result.success;
                    acc.duration += result.duration;
                    acc.issues.extend(result.issues);
                    if !acc.raw_output.is_empty() && !result.raw_output.is_empty() {
                        acc.raw_output.push('\n');
                    }
                    acc.raw_output.push_str(&result.raw_output);
                    acc.error = acc.error.or(result.error);
                    acc
                }
            });
        }
        #[allow(clippy::unwrap_used)] // phases() is never empty
        combined.unwrap()
    }
}

struct Captured {
    status: process::ExitStatus,
    stdout: String,
    stderr: String,
}

impl Captured {
    fn raw(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

enum Wait {
    Finished(Captured),
    Interrupted,
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Run `cmd`, polling the cancellation scope. On interruption the child
/// gets SIGTERM, a grace period, then SIGKILL.
fn run_cancellable(ctx: &ExecContext, mut cmd: process::Command, tool: &str) -> Result<Wait> {
    cmd.stdin(process::Stdio::null());
    cmd.stdout(process::Stdio::piped());
    cmd.stderr(process::Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {tool}"))?;

    // Drain pipes on their own threads so a chatty child never blocks on
    // a full pipe while we poll.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_handle = thread::spawn(move || read_all(stdout));
    let err_handle = thread::spawn(move || read_all(stderr));

    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to wait on {tool}"))?
        {
            break Some(status);
        }
        if ctx.interrupted() {
            debug!("Interrupting {}", tool);
            terminate(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = out_handle.join().unwrap_or_default();
    let stderr = err_handle.join().unwrap_or_default();
    match status {
        Some(status) => Ok(Wait::Finished(Captured {
            status,
            stdout,
            stderr,
        })),
        None => Ok(Wait::Interrupted),
    }
}

fn read_all(pipe: Option<impl Read>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        drop(pipe.read_to_end(&mut buf));
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn terminate(child: &mut process::Child) {
    let pid = child.id() as i32;
    // SAFETY: plain kill(2) on a pid we own
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    drop(child.kill());
    drop(child.wait());
}

#[cfg(not(unix))]
fn terminate(child: &mut process::Child) {
    drop(child.kill());
    drop(child.wait());
}
