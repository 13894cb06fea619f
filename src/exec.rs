use std::cmp;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::adapter::CheckResult;
use crate::cancel::{CancelToken, ExecContext};
use crate::cache::ResultCache;
use crate::error::Error;
use crate::key::{self, CacheKey};
use crate::plan::{Plan, Task};
use crate::probe::UNKNOWN_VERSION;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything the run produced. Task-level failures live inside
/// `results`; `error` carries only run-level conditions (deadline,
/// cancellation).
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) results: Vec<CheckResult>,
    pub(crate) error: Option<Error>,
}

impl Outcome {
    pub(crate) fn all_succeeded(&self) -> bool {
        self.error.is_none() && self.results.iter().all(|r| r.success)
    }
}

/// Fixed-size worker pool over planned tasks. Tasks that rewrite files
/// run sequenced before read-only tasks run in parallel, so no two
/// writers ever overlap.
pub(crate) struct Executor {
    workers: NonZeroUsize,
    timeout: Duration,
    cache: Arc<dyn ResultCache>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn num_workers(requested: Option<NonZeroUsize>) -> NonZeroUsize {
    requested.unwrap_or_else(|| {
        std::thread::available_parallelism().unwrap_or(const { NonZeroUsize::new(1).unwrap() })
    })
}

impl Executor {
    pub(crate) fn new(
        workers: NonZeroUsize,
        timeout: Duration,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            workers,
            timeout,
            cache,
        }
    }

    pub(crate) fn execute(&self, plan: Plan, cancel: &CancelToken) -> Result<Outcome> {
        let ctx = ExecContext::new(cancel.clone(), Some(self.timeout));
        let mut tasks = plan.tasks;
        // stable: plan order already breaks ties
        tasks.sort_by_key(|t| cmp::Reverse(t.priority));

        let (writers, readers): (Vec<Task>, Vec<Task>) = tasks
            .into_iter()
            .partition(|t| t.adapter.kind().writes_files() && !t.options.lint_only);

        let mut results = Vec::new();
        // phase 1: file-mutating tasks, one at a time
        for task in writers {
            if ctx.interrupted() {
                break;
            }
            results.push(self.run_task(&ctx, &task));
        }

        // phase 2: read-only tasks on the pool
        if !readers.is_empty() && !ctx.interrupted() {
            let num_threads = cmp::min(self.workers.get(), readers.len());
            debug!(tasks = readers.len(), num_threads, "Dispatching linters");
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .context("Failed to create worker pool")?;
            let parallel: Vec<Option<CheckResult>> = pool.install(|| {
                readers
                    .into_par_iter()
                    .map(|task| {
                        if ctx.interrupted() {
                            // drain without starting new tasks
                            None
                        } else {
                            Some(self.run_task(&ctx, &task))
                        }
                    })
                    .collect()
            });
            results.extend(parallel.into_iter().flatten());
        }

        let error = if ctx.expired() {
            Some(Error::DeadlineExceeded(self.timeout))
        } else if cancel.is_cancelled() {
            Some(Error::Cancelled)
        } else {
            None
        };
        Ok(Outcome { results, error })
    }

    /// Cache-aware dispatch for one task: one key per (tool, file), hits
    /// dropped from the invocation, misses forwarded, successful per-file
    /// results stored.
    fn run_task(&self, ctx: &ExecContext, task: &Task) -> CheckResult {
        let adapter = &task.adapter;
        debug!("Running {} over {} files", adapter.name(), task.files.len());

        let version = match adapter.version() {
            Ok(version) => version,
            Err(e) => {
                return CheckResult {
                    tool: adapter.name().to_string(),
                    language: adapter.language().to_string(),
                    success: false,
                    cached: false,
                    files_processed: 0,
                    duration: Duration::ZERO,
                    issues: Vec::new(),
                    raw_output: String::new(),
                    error: Some(e.to_string()),
                };
            }
        };
        // an unverified tool version must never serve cached results
        let cacheable = self.cache.enabled() && version != UNKNOWN_VERSION;
        if !cacheable && version == UNKNOWN_VERSION {
            debug!("{} reports no version, bypassing cache", adapter.name());
        }

        let config_hash = key::config_hash(&adapter.config_files(&task.options.project_root));
        let options_hash = key::options_hash(&task.options);

        let mut cached_issues = Vec::new();
        let mut hits = 0usize;
        let mut misses: Vec<PathBuf> = Vec::new();
        let mut miss_keys: Vec<(PathBuf, Option<CacheKey>)> = Vec::new();
        for file in &task.files {
            let abs = task.options.project_root.join(file);
            let cache_key = key::hash_file(&abs).ok().map(|file_hash| {
                CacheKey::new(
                    &abs,
                    file_hash,
                    adapter.name(),
                    &version,
                    config_hash.clone(),
                    options_hash.clone(),
                )
            });
            let lookup = match (&cache_key, cacheable) {
                (Some(cache_key), true) => self.cache.get(cache_key),
                _ => crate::cache::Lookup::Miss,
            };
            match lookup.into_hit() {
                Some(result) => {
                    trace!("Cache hit: {} {}", adapter.name(), file.display());
                    cached_issues.extend(result.issues);
                    hits += 1;
                }
                None => {
                    misses.push(file.clone());
                    miss_keys.push((file.clone(), cache_key));
                }
            }
        }

        if misses.is_empty() {
            debug!("All {} files cached for {}", hits, adapter.name());
            return CheckResult {
                tool: adapter.name().to_string(),
                language: adapter.language().to_string(),
                success: true,
                cached: true,
                files_processed: task.files.len(),
                duration: Duration::ZERO,
                issues: cached_issues,
                raw_output: String::new(),
                error: None,
            };
        }

        let mut result = adapter.execute(ctx, &misses, &task.options);
        // a cancelled task contributes no cache entry
        if cacheable && result.success && !ctx.interrupted() {
            for (file, cache_key) in &miss_keys {
                let Some(cache_key) = cache_key else {
                    continue;
                };
                let per_file = CheckResult {
                    files_processed: 1,
                    cached: false,
                    issues: result
                        .issues
                        .iter()
                        .filter(|issue| issue.file == *file)
                        .cloned()
                        .collect(),
                    raw_output: String::new(),
                    ..result.clone()
                };
                self.cache.put(cache_key, &per_file);
            }
        }
        result.files_processed = task.files.len();
        result.issues.extend(cached_issues);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, ExecuteOptions, Issue, Severity, ToolKind};
    use crate::cache::{DiskCache, NopCache, ResultCache};
    use crate::error::Error;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Adapter that records every invocation instead of running anything.
    struct CountingAdapter {
        name: &'static str,
        kind: ToolKind,
        version: &'static str,
        succeed: bool,
        issue_per_file: bool,
        executions: AtomicUsize,
        seen: Mutex<Vec<Vec<PathBuf>>>,
        log: Option<Arc<Mutex<Vec<&'static str>>>>,
    }

    impl CountingAdapter {
        fn new(name: &'static str, kind: ToolKind) -> Self {
            Self {
                name,
                kind,
                version: "1.0.0",
                succeed: true,
                issue_per_file: false,
                executions: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                log: None,
            }
        }
    }

    impl Adapter for CountingAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn language(&self) -> &str {
            "go"
        }

        fn kind(&self) -> ToolKind {
            self.kind
        }

        fn available(&self) -> bool {
            true
        }

        fn install(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn version(&self) -> Result<String, Error> {
            Ok(self.version.to_string())
        }

        fn config_files(&self, _root: &Path) -> Vec<PathBuf> {
            Vec::new()
        }

        fn execute(
            &self,
            _ctx: &ExecContext,
            files: &[PathBuf],
            _options: &ExecuteOptions,
        ) -> CheckResult {
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(files.to_vec());
            if let Some(log) = &self.log {
                log.lock().unwrap().push(self.name);
                // give parallel siblings a chance to overlap
                std::thread::sleep(Duration::from_millis(20));
            }
            let issues = if self.issue_per_file {
                files
                    .iter()
                    .map(|file| Issue {
                        file: file.clone(),
                        line: 1,
                        column: 1,
                        severity: Severity::Warning,
                        rule: "counting".to_string(),
                        message: "found".to_string(),
                        suggestion: None,
                    })
                    .collect()
            } else {
                Vec::new()
            };
            CheckResult {
                tool: self.name.to_string(),
                language: "go".to_string(),
                success: self.succeed,
                cached: false,
                files_processed: files.len(),
                duration: Duration::from_millis(1),
                issues,
                raw_output: String::new(),
                error: (!self.succeed).then(|| "boom".to_string()),
            }
        }
    }

    fn project(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            fs::write(dir.path().join(file), format!("content of {file}\n")).unwrap();
        }
        dir
    }

    fn task_for(adapter: &Arc<CountingAdapter>, root: &Path, files: &[&str]) -> Task {
        Task {
            adapter: Arc::clone(adapter) as Arc<dyn Adapter>,
            files: files.iter().map(PathBuf::from).collect(),
            options: ExecuteOptions {
                project_root: root.to_path_buf(),
                ..Default::default()
            },
            priority: adapter.kind.priority(),
        }
    }

    fn executor(cache: Arc<dyn ResultCache>) -> Executor {
        Executor::new(
            NonZeroUsize::new(2).unwrap(),
            DEFAULT_TIMEOUT,
            cache,
        )
    }

    fn plan_of(tasks: Vec<Task>) -> Plan {
        let total_files = tasks.iter().map(|t| t.files.len()).sum();
        Plan {
            tasks,
            total_files,
            estimated_duration: Duration::ZERO,
        }
    }

    #[test]
    fn second_run_fully_cached() {
        let dir = project(&["a.go", "b.go"]);
        let cache: Arc<dyn ResultCache> =
            Arc::new(DiskCache::new(&dir.path().join(".cache"), Duration::ZERO, 0));
        let adapter = Arc::new(CountingAdapter::new("lint", ToolKind::Linter));

        let outcome = executor(Arc::clone(&cache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go", "b.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(outcome.all_succeeded());
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 1);

        let outcome = executor(Arc::clone(&cache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go", "b.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(outcome.all_succeeded());
        // adapter not invoked again; synthetic cached result
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 1);
        assert!(outcome.results[0].cached);
        assert_eq!(outcome.results[0].files_processed, 2);

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.hit_count, 2);
    }

    #[test]
    fn modified_file_is_the_only_miss() {
        let dir = project(&["a.go", "b.go"]);
        let cache: Arc<dyn ResultCache> =
            Arc::new(DiskCache::new(&dir.path().join(".cache"), Duration::ZERO, 0));
        let adapter = Arc::new(CountingAdapter::new("lint", ToolKind::Linter));

        executor(Arc::clone(&cache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go", "b.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        fs::write(dir.path().join("b.go"), "changed\n").unwrap();

        executor(Arc::clone(&cache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go", "b.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 2);
        let seen = adapter.seen.lock().unwrap();
        assert_eq!(seen[1], vec![PathBuf::from("b.go")]);
    }

    #[test]
    fn cached_issues_resurface_on_hits() {
        let dir = project(&["a.go"]);
        let cache: Arc<dyn ResultCache> =
            Arc::new(DiskCache::new(&dir.path().join(".cache"), Duration::ZERO, 0));
        let adapter = Arc::new(CountingAdapter {
            issue_per_file: true,
            ..CountingAdapter::new("lint", ToolKind::Linter)
        });

        let first = executor(Arc::clone(&cache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(first.results[0].issues.len(), 1);

        let second = executor(Arc::clone(&cache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(second.results[0].cached);
        assert_eq!(second.results[0].issues.len(), 1);
        assert_eq!(second.results[0].issues[0].file, PathBuf::from("a.go"));
    }

    #[test]
    fn failures_not_cached() {
        let dir = project(&["a.go"]);
        let cache: Arc<dyn ResultCache> =
            Arc::new(DiskCache::new(&dir.path().join(".cache"), Duration::ZERO, 0));
        let adapter = Arc::new(CountingAdapter {
            succeed: false,
            ..CountingAdapter::new("lint", ToolKind::Linter)
        });

        for _ in 0..2 {
            let outcome = executor(Arc::clone(&cache))
                .execute(
                    plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                    &CancelToken::new(),
                )
                .unwrap();
            assert!(!outcome.all_succeeded());
        }
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_version_bypasses_cache() {
        let dir = project(&["a.go"]);
        let cache: Arc<dyn ResultCache> =
            Arc::new(DiskCache::new(&dir.path().join(".cache"), Duration::ZERO, 0));
        let adapter = Arc::new(CountingAdapter {
            version: UNKNOWN_VERSION,
            ..CountingAdapter::new("lint", ToolKind::Linter)
        });

        for _ in 0..2 {
            executor(Arc::clone(&cache))
                .execute(
                    plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                    &CancelToken::new(),
                )
                .unwrap();
        }
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn disabled_cache_always_executes() {
        let dir = project(&["a.go"]);
        let adapter = Arc::new(CountingAdapter::new("lint", ToolKind::Linter));
        for _ in 0..2 {
            executor(Arc::new(NopCache))
                .execute(
                    plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                    &CancelToken::new(),
                )
                .unwrap();
        }
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writers_run_before_readers() {
        let dir = project(&["a.go"]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let fmt1 = Arc::new(CountingAdapter {
            log: Some(Arc::clone(&log)),
            ..CountingAdapter::new("fmt1", ToolKind::Formatter)
        });
        let fmt2 = Arc::new(CountingAdapter {
            log: Some(Arc::clone(&log)),
            ..CountingAdapter::new("fmt2", ToolKind::Formatter)
        });
        let lint = Arc::new(CountingAdapter {
            log: Some(Arc::clone(&log)),
            ..CountingAdapter::new("lint", ToolKind::Linter)
        });

        executor(Arc::new(NopCache))
            .execute(
                plan_of(vec![
                    task_for(&lint, dir.path(), &["a.go"]),
                    task_for(&fmt1, dir.path(), &["a.go"]),
                    task_for(&fmt2, dir.path(), &["a.go"]),
                ]),
                &CancelToken::new(),
            )
            .unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], "lint");
    }

    #[test]
    fn zero_deadline_cancels_everything() {
        let dir = project(&["a.go"]);
        let adapter = Arc::new(CountingAdapter::new("lint", ToolKind::Linter));
        let executor = Executor::new(
            NonZeroUsize::new(2).unwrap(),
            Duration::ZERO,
            Arc::new(NopCache),
        );
        let outcome = executor
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(matches!(outcome.error, Some(Error::DeadlineExceeded(_))));
        assert_eq!(adapter.executions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn external_cancellation_reported() {
        let dir = project(&["a.go"]);
        let adapter = Arc::new(CountingAdapter::new("lint", ToolKind::Linter));
        let token = CancelToken::new();
        token.cancel();
        let outcome = executor(Arc::new(NopCache))
            .execute(
                plan_of(vec![task_for(&adapter, dir.path(), &["a.go"])]),
                &token,
            )
            .unwrap();
        assert!(matches!(outcome.error, Some(Error::Cancelled)));
        assert!(outcome.results.is_empty());
    }
}
