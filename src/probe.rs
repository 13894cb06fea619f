use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::RwLock;

use tracing::debug;

/// Sentinel returned when no version invocation yields output. Keys built
/// from it are valid but never match a verified version, so results from
/// such tools are effectively re-checked until the tool learns to report
/// a version.
pub(crate) const UNKNOWN_VERSION: &str = "unknown";

const VERSION_FLAGS: &[&str] = &["--version", "-version", "-V", "-v"];

/// Locates executables and discovers their versions. Both positive and
/// negative lookups are memoised for the life of the process.
#[derive(Debug, Default)]
pub(crate) struct Probe {
    paths: RwLock<HashMap<String, Option<PathBuf>>>,
    versions: RwLock<HashMap<String, String>>,
}

impl Probe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Full path of `exe`, searching `PATH` and then a set of well-known
    /// install directories. `None` (also cached) when absent everywhere.
    pub(crate) fn lookup(&self, exe: &str) -> Option<PathBuf> {
        #[allow(clippy::unwrap_used)] // poisoning only follows a panic
        if let Some(cached) = self.paths.read().unwrap().get(exe) {
            return cached.clone();
        }
        let found = search_path(exe).or_else(|| search_well_known(exe));
        match &found {
            Some(path) => debug!("Found {} at {}", exe, path.display()),
            None => debug!("{} not found on this system", exe),
        }
        #[allow(clippy::unwrap_used)]
        self.paths
            .write()
            .unwrap()
            .insert(exe.to_string(), found.clone());
        found
    }

    pub(crate) fn available(&self, exe: &str) -> bool {
        self.lookup(exe).is_some()
    }

    /// First line of the first successful version invocation, or
    /// [`UNKNOWN_VERSION`].
    pub(crate) fn version(&self, exe: &str) -> String {
        #[allow(clippy::unwrap_used)]
        if let Some(cached) = self.versions.read().unwrap().get(exe) {
            return cached.clone();
        }
        let version = discover_version(exe).unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        debug!("Version of {}: {}", exe, version);
        #[allow(clippy::unwrap_used)]
        self.versions
            .write()
            .unwrap()
            .insert(exe.to_string(), version.clone());
        version
    }
}

fn discover_version(exe: &str) -> Option<String> {
    for flag in VERSION_FLAGS {
        let Ok(output) = process::Command::new(exe).arg(flag).output() else {
            continue;
        };
        let raw = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let first_line = String::from_utf8_lossy(&raw);
        let first_line = first_line.lines().next().unwrap_or("").trim();
        if output.status.success() && !first_line.is_empty() {
            return Some(first_line.to_string());
        }
    }
    None
}

fn search_path(exe: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(exe))
        .find(|candidate| is_executable(candidate))
}

fn search_well_known(exe: &str) -> Option<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];
    if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join("go/bin"));
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".cargo/bin"));
        dirs.push(home.join(".npm-global/bin"));
    }
    if let Some(gobin) = env::var_os("GOBIN").map(PathBuf::from) {
        dirs.push(gobin);
    }
    dirs.into_iter()
        .map(|dir| dir.join(exe))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .is_ok_and(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
