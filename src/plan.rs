use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::adapter::{Adapter, ExecuteOptions, ToolKind};
use crate::config::Config;
use crate::detect;
use crate::error::Error;
use crate::git::Git;
use crate::registry::Registry;

/// Rough per-check estimate; planners should not over-commit.
const ESTIMATE_PER_CHECK: Duration = Duration::from_millis(100);

/// Caller-facing knobs for one planning run. At most one of `since`,
/// `staged`, `changed` may be set.
#[derive(Clone, Debug, Default)]
pub(crate) struct PlanOptions {
    pub(crate) files: Option<Vec<PathBuf>>,
    pub(crate) fix: bool,
    pub(crate) format_only: bool,
    pub(crate) lint_only: bool,
    pub(crate) extra_args: Vec<String>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) language: Option<String>,
    pub(crate) tool_filter: Vec<String>,
    pub(crate) since: Option<String>,
    pub(crate) staged: bool,
    pub(crate) changed: bool,
}

/// One unit of work: an adapter over a non-empty file set.
#[derive(Clone)]
pub(crate) struct Task {
    pub(crate) adapter: Arc<dyn Adapter>,
    /// Project-relative, sorted.
    pub(crate) files: Vec<PathBuf>,
    pub(crate) options: ExecuteOptions,
    pub(crate) priority: u8,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("adapter", &self.adapter.name())
            .field("files", &self.files.len())
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub(crate) tasks: Vec<Task>,
    pub(crate) total_files: usize,
    pub(crate) estimated_duration: Duration,
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    builder.build().context("Failed to build glob set").map(Some)
}

/// The Git-derived file scope, when one of the git filters is requested.
fn git_scope(root: &Path, options: &PlanOptions) -> Result<Option<HashSet<PathBuf>>> {
    let git = Git::new(root);
    let list = if options.staged {
        git.staged_files()?
    } else if options.changed {
        git.all_changed_files()?
            .into_iter()
            .map(|abs| {
                abs.strip_prefix(root)
                    .map_or_else(|_| abs.clone(), Path::to_path_buf)
            })
            .collect()
    } else if let Some(r#ref) = &options.since {
        git.changed_since(r#ref)?
    } else {
        return Ok(None);
    };
    Ok(Some(list.into_iter().collect()))
}

fn validate(options: &PlanOptions) -> Result<(), Error> {
    let git_filters =
        usize::from(options.since.is_some()) + usize::from(options.staged) + usize::from(options.changed);
    if git_filters > 1 {
        return Err(Error::ConflictingFilters);
    }
    if options.format_only && options.lint_only {
        return Err(Error::InvalidConfig(
            "format_only and lint_only are mutually exclusive".to_string(),
        ));
    }
    Ok(())
}

fn kind_allowed(kind: ToolKind, options: &PlanOptions) -> bool {
    if options.format_only {
        kind.matches(ToolKind::Formatter)
    } else if options.lint_only {
        kind.matches(ToolKind::Linter)
    } else {
        true
    }
}

/// Analyse the project and produce the ordered task list. Deterministic
/// for identical inputs and filesystem state: tasks are ordered by
/// language, then priority descending; preferred and config-driven tools
/// break ties ahead of the name.
pub(crate) fn plan(
    root: &Path,
    registry: &Registry,
    config: &Config,
    options: &PlanOptions,
) -> Result<Plan> {
    validate(options)?;

    let detection = detect::detect_with_rules(root, config.detection_rules())?;
    debug!("Detected {} languages", detection.languages.len());
    let scope = git_scope(root, options)?;
    let explicit: Option<HashSet<PathBuf>> = options.files.as_ref().map(|files| {
        files
            .iter()
            .map(|f| {
                f.strip_prefix(root)
                    .map_or_else(|_| f.clone(), Path::to_path_buf)
            })
            .collect()
    });
    let include = build_globset(&config.include)?;
    let exclude = build_globset(&config.exclude)?;

    let mut tasks = Vec::new();
    for (language, presence) in &detection.languages {
        if let Some(only) = &options.language
            && only != language
        {
            continue;
        }
        let preferred = config.language(language).preferred_tools;

        for adapter in registry.by_language(language) {
            let name = adapter.name().to_string();
            if !options.tool_filter.is_empty() && !options.tool_filter.contains(&name) {
                continue;
            }
            let tool_cfg = config.tool(&name);
            if !tool_cfg.enabled {
                debug!("{} disabled by config", name);
                continue;
            }
            if !kind_allowed(adapter.kind(), options) {
                continue;
            }
            if !adapter.available() {
                debug!("{} not available, skipping", name);
                continue;
            }

            let mut files: Vec<PathBuf> = presence
                .files
                .iter()
                .filter(|f| scope.as_ref().is_none_or(|s| s.contains(f.as_path())))
                .filter(|f| explicit.as_ref().is_none_or(|s| s.contains(f.as_path())))
                .filter(|f| include.as_ref().is_none_or(|g| g.is_match(f)))
                .filter(|f| exclude.as_ref().is_none_or(|g| !g.is_match(f)))
                .cloned()
                .collect();
            if files.is_empty() {
                debug!("No files left for {} after filtering", name);
                continue;
            }
            files.sort();

            let config_file = tool_cfg
                .config_file
                .clone()
                .or_else(|| adapter.config_files(root).first().cloned());
            let has_config = config_file.is_some();
            let mut extra_args = options.extra_args.clone();
            extra_args.extend(tool_cfg.args.iter().cloned());
            let mut env = options.env.clone();
            env.extend(tool_cfg.env.clone());

            let task_options = ExecuteOptions {
                project_root: root.to_path_buf(),
                config_file,
                fix: options.fix,
                format_only: options.format_only,
                lint_only: options.lint_only,
                extra_args,
                env,
            };
            task_options.validate()?;
            let priority = tool_cfg.priority.unwrap_or_else(|| adapter.kind().priority());
            let is_preferred = preferred.contains(&name);
            tasks.push((
                language.clone(),
                Reverse(priority),
                !is_preferred,
                !has_config,
                name,
                Task {
                    adapter,
                    files,
                    options: task_options,
                    priority,
                },
            ));
        }
    }

    tasks.sort_by(|a, b| (&a.0, a.1, a.2, a.3, &a.4).cmp(&(&b.0, b.1, b.2, b.3, &b.4)));
    let tasks: Vec<Task> = tasks.into_iter().map(|(_, _, _, _, _, task)| task).collect();
    let total_files: usize = tasks.iter().map(|t| t.files.len()).sum();
    let estimated_duration = ESTIMATE_PER_CHECK * tasks.len() as u32 * total_files as u32;
    debug!(
        "Planned {} tasks over {} files (estimate {:?})",
        tasks.len(),
        total_files,
        estimated_duration
    );
    Ok(Plan {
        tasks,
        total_files,
        estimated_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::FakeAdapter;
    use std::fs;
    use tempfile::TempDir;

    fn go_registry() -> Registry {
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter::new("gofumpt", "go", ToolKind::Formatter)));
        registry.register(Arc::new(FakeAdapter {
            configs: &[".golangci.yml", ".golangci.yaml"],
            ..FakeAdapter::new("golangci-lint", "go", ToolKind::Linter)
        }));
        registry
    }

    fn go_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        fs::write(dir.path().join("go.mod"), "module example.com/x\n").unwrap();
        fs::write(dir.path().join(".golangci.yml"), "linters: {}\n").unwrap();
        dir
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.tasks.iter().map(|t| t.adapter.name()).collect()
    }

    #[test]
    fn go_project_plan_shape() {
        let dir = go_project();
        let plan = plan(
            dir.path(),
            &go_registry(),
            &Config::default(),
            &PlanOptions::default(),
        )
        .unwrap();

        assert_eq!(names(&plan), vec!["gofumpt", "golangci-lint"]);
        assert_eq!(plan.tasks[0].priority, 10);
        assert_eq!(plan.tasks[0].files, vec![PathBuf::from("main.go")]);
        assert_eq!(plan.tasks[0].options.config_file, None);
        assert_eq!(plan.tasks[1].priority, 5);
        assert_eq!(
            plan.tasks[1].options.config_file,
            Some(dir.path().join(".golangci.yml"))
        );
        assert_eq!(plan.total_files, 2);
        assert_eq!(
            plan.estimated_duration,
            Duration::from_millis(100) * 2 * 2
        );
    }

    #[test]
    fn idempotent() {
        let dir = go_project();
        let registry = go_registry();
        let config = Config::default();
        let options = PlanOptions::default();
        let first = plan(dir.path(), &registry, &config, &options).unwrap();
        let second = plan(dir.path(), &registry, &config, &options).unwrap();
        assert_eq!(names(&first), names(&second));
        for (a, b) in first.tasks.iter().zip(second.tasks.iter()) {
            assert_eq!(a.files, b.files);
            assert_eq!(a.priority, b.priority);
            assert_eq!(a.options, b.options);
        }
    }

    #[test]
    fn conflicting_filters_rejected() {
        let dir = go_project();
        let options = PlanOptions {
            staged: true,
            changed: true,
            ..Default::default()
        };
        let err = plan(dir.path(), &go_registry(), &Config::default(), &options).unwrap_err();
        assert!(
            err.downcast_ref::<Error>()
                .is_some_and(|e| matches!(e, Error::ConflictingFilters))
        );
    }

    #[test]
    fn tool_filter_whitelists() {
        let dir = go_project();
        let options = PlanOptions {
            tool_filter: vec!["golangci-lint".to_string()],
            ..Default::default()
        };
        let plan = plan(dir.path(), &go_registry(), &Config::default(), &options).unwrap();
        assert_eq!(names(&plan), vec!["golangci-lint"]);
    }

    #[test]
    fn language_filter_whitelists() {
        let dir = go_project();
        let options = PlanOptions {
            language: Some("python".to_string()),
            ..Default::default()
        };
        let plan = plan(dir.path(), &go_registry(), &Config::default(), &options).unwrap();
        assert!(plan.tasks.is_empty());
    }

    #[test]
    fn format_only_rejects_linters() {
        let dir = go_project();
        let options = PlanOptions {
            format_only: true,
            ..Default::default()
        };
        let plan = plan(dir.path(), &go_registry(), &Config::default(), &options).unwrap();
        assert_eq!(names(&plan), vec!["gofumpt"]);
        assert!(plan.tasks[0].options.format_only);
    }

    #[test]
    fn unavailable_adapter_skipped() {
        let dir = go_project();
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter {
            available: false,
            ..FakeAdapter::new("gofumpt", "go", ToolKind::Formatter)
        }));
        let plan = plan(
            dir.path(),
            &registry,
            &Config::default(),
            &PlanOptions::default(),
        )
        .unwrap();
        assert!(plan.tasks.is_empty());
    }

    #[test]
    fn explicit_files_intersected() {
        let dir = go_project();
        fs::write(dir.path().join("other.go"), "package main\n").unwrap();
        let options = PlanOptions {
            files: Some(vec![PathBuf::from("main.go")]),
            ..Default::default()
        };
        let plan = plan(dir.path(), &go_registry(), &Config::default(), &options).unwrap();
        for task in &plan.tasks {
            assert_eq!(task.files, vec![PathBuf::from("main.go")]);
        }
    }

    #[test]
    fn exclude_glob_applied() {
        let dir = go_project();
        fs::write(dir.path().join("gen.go"), "package main\n").unwrap();
        let config: Config = serde_yaml::from_str("exclude: ['gen.go']\n").unwrap();
        let plan = plan(dir.path(), &go_registry(), &config, &PlanOptions::default()).unwrap();
        for task in &plan.tasks {
            assert_eq!(task.files, vec![PathBuf::from("main.go")]);
        }
    }

    #[test]
    fn disabled_tool_skipped() {
        let dir = go_project();
        let config: Config =
            serde_yaml::from_str("tools:\n  gofumpt:\n    enabled: false\n").unwrap();
        let plan = plan(dir.path(), &go_registry(), &config, &PlanOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["golangci-lint"]);
    }

    #[test]
    fn config_priority_override_reorders() {
        let dir = go_project();
        let config: Config =
            serde_yaml::from_str("tools:\n  golangci-lint:\n    priority: 12\n").unwrap();
        let plan = plan(dir.path(), &go_registry(), &config, &PlanOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["golangci-lint", "gofumpt"]);
        assert_eq!(plan.tasks[0].priority, 12);
    }

    #[test]
    fn tool_args_and_env_merged() {
        let dir = go_project();
        let config: Config = serde_yaml::from_str(
            "tools:\n  golangci-lint:\n    args: [--fast]\n    env:\n      GOFLAGS: -mod=vendor\n",
        )
        .unwrap();
        let options = PlanOptions {
            extra_args: vec!["--verbose".to_string()],
            ..Default::default()
        };
        let plan = plan(dir.path(), &go_registry(), &config, &options).unwrap();
        let lint = &plan.tasks[1];
        assert_eq!(lint.adapter.name(), "golangci-lint");
        assert_eq!(lint.options.extra_args, vec!["--verbose", "--fast"]);
        assert_eq!(lint.options.env.get("GOFLAGS"), Some(&"-mod=vendor".to_string()));
    }

    #[test]
    fn staged_scope_intersects_detection() {
        if std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| !o.status.success())
            .unwrap_or(true)
        {
            return;
        }
        let dir = go_project();
        let git_env = |args: &[&str]| {
            #[allow(clippy::unwrap_used)]
            let ok = std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .unwrap()
                .success();
            assert!(ok);
        };
        git_env(&["init", "--quiet"]);
        git_env(&["add", "main.go"]);

        let options = PlanOptions {
            staged: true,
            ..Default::default()
        };
        let plan = plan(dir.path(), &go_registry(), &Config::default(), &options).unwrap();
        assert!(!plan.tasks.is_empty());
        for task in &plan.tasks {
            assert_eq!(task.files, vec![PathBuf::from("main.go")]);
        }
    }
}
