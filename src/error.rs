use std::path::PathBuf;
use std::time::Duration;

/// Failures that cross module boundaries. Checker-level failures do not
/// appear here: they are carried inside `adapter::CheckResult` and
/// aggregated by the executor.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("tool `{0}` is not installed")]
    ToolUnavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("failed to parse tool output: {0}")]
    ParseFailed(String),

    #[error("corrupted cache entry: {0}")]
    CacheCorrupted(String),

    #[error("at most one of --since, --staged, --changed may be given")]
    ConflictingFilters,

    #[error("not a git repository: {}", .0.display())]
    NotGitRepository(PathBuf),

    #[error("invalid git ref: {0}")]
    InvalidRef(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),
}
