use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::error::Error;

/// Thin supervisor over the external `git` executable, scoped to one
/// project root. Inherits the ambient environment so `GIT_*` variables
/// work unchanged.
#[derive(Clone, Debug)]
pub(crate) struct Git {
    root: PathBuf,
}

impl Git {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<process::Output> {
        process::Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    pub(crate) fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|out| out.status.success())
    }

    fn ensure_repo(&self) -> Result<(), Error> {
        if self.is_repo() {
            Ok(())
        } else {
            Err(Error::NotGitRepository(self.root.clone()))
        }
    }

    /// A ref is valid iff `ref^{commit}` resolves.
    pub(crate) fn validate_ref(&self, r#ref: &str) -> Result<()> {
        self.ensure_repo()?;
        let revspec = format!("{}^{{commit}}", r#ref);
        let out = self.run(&["rev-parse", "--verify", "--quiet", &revspec])?;
        if out.status.success() {
            Ok(())
        } else {
            Err(Error::InvalidRef(r#ref.to_string()).into())
        }
    }

    pub(crate) fn staged_files(&self) -> Result<Vec<PathBuf>> {
        self.ensure_repo()?;
        let out = self.run(&["diff", "--cached", "--name-only", "--diff-filter=ACMR"])?;
        Self::name_list(&out)
    }

    pub(crate) fn modified_files(&self) -> Result<Vec<PathBuf>> {
        self.ensure_repo()?;
        let out = self.run(&["diff", "--name-only", "--diff-filter=ACMR"])?;
        Self::name_list(&out)
    }

    pub(crate) fn untracked_files(&self) -> Result<Vec<PathBuf>> {
        self.ensure_repo()?;
        let out = self.run(&["ls-files", "--others", "--exclude-standard"])?;
        Self::name_list(&out)
    }

    /// Unique union of staged, modified, and untracked files, as absolute
    /// paths of files that still exist on disk.
    pub(crate) fn all_changed_files(&self) -> Result<Vec<PathBuf>> {
        let mut all = self.staged_files()?;
        all.extend(self.modified_files()?);
        all.extend(self.untracked_files()?);
        all.sort();
        all.dedup();
        Ok(all
            .into_iter()
            .map(|rel| self.root.join(rel))
            .filter(|abs| abs.exists())
            .collect())
    }

    /// Files changed in the working tree relative to `ref`.
    pub(crate) fn changed_since(&self, r#ref: &str) -> Result<Vec<PathBuf>> {
        self.validate_ref(r#ref)?;
        let out = self.run(&["diff", "--name-only", "--diff-filter=ACMR", r#ref])?;
        Self::name_list(&out)
    }

    fn name_list(out: &process::Output) -> Result<Vec<PathBuf>> {
        anyhow::ensure!(
            out.status.success(),
            "git failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                debug!("Changed file: {line}");
                PathBuf::from(line)
            })
            .collect())
    }
}
