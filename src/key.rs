use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use sha2::{Digest as _, Sha256};

use crate::adapter::ExecuteOptions;

pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of the file's bytes. Content only; metadata never contributes.
pub(crate) fn hash_file(path: &Path) -> Result<String> {
    let content =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(hash_bytes(&content))
}

/// Identity of one memoised check: all six components participate in
/// equality. `config_hash` and `options_hash` may be empty; the other
/// four must not be.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) struct CacheKey {
    pub(crate) file_path: PathBuf,
    pub(crate) file_hash: String,
    pub(crate) tool_name: String,
    pub(crate) tool_version: String,
    pub(crate) config_hash: String,
    pub(crate) options_hash: String,
}

impl CacheKey {
    /// `file_path` is absolutised so entries from different working
    /// directories (or users) never collide.
    pub(crate) fn new(
        file_path: &Path,
        file_hash: String,
        tool_name: &str,
        tool_version: &str,
        config_hash: String,
        options_hash: String,
    ) -> Self {
        let file_path = if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(file_path))
                .unwrap_or_else(|_| file_path.to_path_buf())
        };
        Self {
            file_path,
            file_hash,
            tool_name: tool_name.to_string(),
            tool_version: tool_version.to_string(),
            config_hash,
            options_hash,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.file_path.as_os_str().is_empty()
            && !self.file_hash.is_empty()
            && !self.tool_name.is_empty()
            && !self.tool_version.is_empty()
    }

    /// Filesystem-friendly form: `tool-version-fh8-ch8-oh8`, where the
    /// hash components are truncated to eight hex characters.
    pub(crate) fn printable(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            sanitise(&self.tool_name),
            sanitise(&self.tool_version),
            prefix8(&self.file_hash),
            prefix8(&self.config_hash),
            prefix8(&self.options_hash),
        )
    }

    /// Shard directory name: the first two hex characters of the
    /// printable form, i.e. of the file-hash component.
    pub(crate) fn shard(&self) -> String {
        let mut chars = self.file_hash.chars();
        match (chars.next(), chars.next()) {
            (Some(a), Some(b)) => format!("{a}{b}"),
            _ => "00".to_string(),
        }
    }
}

fn prefix8(hash: &str) -> &str {
    if hash.len() >= 8 { &hash[..8] } else { hash }
}

/// Directory-safe form of a tool name for the store layout.
pub(crate) fn tool_dir(name: &str) -> String {
    sanitise(name)
}

/// Tool names and versions can contain path separators and whitespace;
/// they become `_` so the printable key stays a single path component.
fn sanitise(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Digest over the sorted, existing config files: for each, its path
/// bytes then its content bytes. Missing files are silently skipped; if
/// nothing contributes the hash is the empty string.
pub(crate) fn config_hash(configs: &[PathBuf]) -> String {
    let mut sorted = configs.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    let mut contributed = false;
    for path in &sorted {
        let Ok(content) = fs::read(path) else {
            continue;
        };
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(&content);
        contributed = true;
    }
    if contributed {
        format!("{:x}", hasher.finalize())
    } else {
        String::new()
    }
}

/// Digest over the behaviour-affecting options. `project_root` and
/// `config_file` are deliberately excluded: the root is path-specific and
/// the config already participates via its content hash.
pub(crate) fn options_hash(options: &ExecuteOptions) -> String {
    let mut parts = Vec::new();
    if options.fix {
        parts.push("fix:true".to_string());
    }
    if options.format_only {
        parts.push("format-only:true".to_string());
    }
    if options.lint_only {
        parts.push("lint-only:true".to_string());
    }
    if !options.extra_args.is_empty() {
        let mut args = options.extra_args.clone();
        args.sort();
        parts.push(format!("args:{}", args.join(",")));
    }
    for (key, value) in &options.env {
        parts.push(format!("env:{key}={value}"));
    }
    if parts.is_empty() {
        String::new()
    } else {
        hash_bytes(parts.join("|").as_bytes())
    }
}
